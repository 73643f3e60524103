// The tagged heap backing the VM: frames, env pairs, and boxed cells
// all live here. A block is one header word followed by its payload
// words. The header packs a one-byte block tag and a 32-bit payload
// size; addresses handed out point past the header. Freed blocks are
// zeroed, marked, and kept on a free list for first-fit reuse.

use std::collections::BTreeMap;

use crate::value::Value;
use crate::vm::{Error, Result};


#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum BlockTag {
    Int   = 0x01,
    Pair  = 0x02,
    Array = 0x03,
    Freed = 0x0f,
}


fn pack_header(tag: BlockTag, size: u32) -> u64 {
    (tag as u64) | ((size as u64) << 8)
}

fn header_tag(word: u64) -> BlockTag {
    match (word & 0xff) as u8 {
        0x01 => BlockTag::Int,
        0x02 => BlockTag::Pair,
        0x03 => BlockTag::Array,
        _ => BlockTag::Freed,
    }
}

fn header_size(word: u64) -> u32 {
    (word >> 8) as u32
}


pub struct Heap {
    words: Vec<u64>,
    limit: usize,
    // header index -> payload capacity, for every block ever carved
    // out. Capacity can exceed the header's live size after reuse.
    blocks: BTreeMap<u32, u32>,
    free: Vec<(u32, u32)>,
}


impl Heap {
    pub fn new(limit: usize) -> Heap {
        Heap {
            words: Vec::new(),
            limit,
            blocks: BTreeMap::new(),
            free: Vec::new(),
        }
    }

    // Carve out a block of `size` payload slots. The first free block
    // with sufficient capacity is reused; otherwise the top is bumped.
    // Fresh payload slots always read back as the invalid value.
    pub fn allocate(&mut self, tag: BlockTag, size: u32) -> Result<Value> {
        if let Some(pos) = self.free.iter().position(|&(_, cap)| cap >= size) {
            let (header, _cap) = self.free.remove(pos);
            self.words[header as usize] = pack_header(tag, size);
            for i in 0..size {
                self.words[(header + 1 + i) as usize] = 0;
            }
            return Ok(Value::from_address(header + 1));
        }

        if self.words.len() + size as usize + 1 > self.limit {
            return Err(Error::HeapOverflow);
        }
        let header = self.words.len() as u32;
        self.words.push(pack_header(tag, size));
        for _ in 0..size {
            self.words.push(0);
        }
        self.blocks.insert(header, size);
        Ok(Value::from_address(header + 1))
    }

    // Release the block whose payload starts at `addr`. The payload
    // is zeroed and the header marked, so stale reads are caught.
    pub fn free(&mut self, addr: u32) -> Result<()> {
        let header = addr.wrapping_sub(1);
        let cap = match self.blocks.get(&header) {
            Some(&cap) => cap,
            None => return Err(Error::UnknownAddress(addr)),
        };
        if header_tag(self.words[header as usize]) == BlockTag::Freed {
            return Err(Error::FreedSlot(addr));
        }
        for i in 0..cap {
            self.words[(header + 1 + i) as usize] = 0;
        }
        self.words[header as usize] = pack_header(BlockTag::Freed, cap);
        self.free.push((header, cap));
        Ok(())
    }

    // Find the block containing `addr`, returning its header index,
    // live size, and tag. `addr` must fall inside the live payload.
    fn locate(&self, addr: u32) -> Result<(u32, u32, BlockTag)> {
        let (&header, _) = self.blocks
            .range(..addr)
            .next_back()
            .ok_or(Error::UnknownAddress(addr))?;
        let word = self.words[header as usize];
        let tag = header_tag(word);
        if tag == BlockTag::Freed {
            return Err(Error::FreedSlot(addr));
        }
        let size = header_size(word);
        if addr - header - 1 >= size {
            return Err(Error::OutOfBounds(addr));
        }
        Ok((header, size, tag))
    }

    pub fn get(&self, addr: u32) -> Result<Value> {
        self.locate(addr)?;
        Ok(Value::unpack(self.words[addr as usize]))
    }

    pub fn set(&mut self, addr: u32, value: Value) -> Result<()> {
        self.locate(addr)?;
        self.words[addr as usize] = value.pack();
        Ok(())
    }

    // Tag of the block whose payload starts at `addr`. Unlike get and
    // set this answers for freed blocks, so tests and debuggers can
    // observe the freed marker.
    pub fn tag_of(&self, addr: u32) -> Result<BlockTag> {
        let header = addr.wrapping_sub(1);
        match self.blocks.get(&header) {
            Some(_) => Ok(header_tag(self.words[header as usize])),
            None => Err(Error::UnknownAddress(addr)),
        }
    }

    // Live payload size of the block whose payload starts at `addr`.
    pub fn size_of(&self, addr: u32) -> Result<u32> {
        let header = addr.wrapping_sub(1);
        match self.blocks.get(&header) {
            Some(_) => Ok(header_size(self.words[header as usize])),
            None => Err(Error::UnknownAddress(addr)),
        }
    }

    // Words in use, including headers. Exposed for tests.
    pub fn used(&self) -> usize {
        self.words.len()
    }
}
