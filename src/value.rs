// The uniform runtime value: a 48-bit composite of a 16-bit tag and
// a 32-bit payload. Every operand stack entry and every frame slot
// holds exactly one of these. Primitives (i32, u32, bool, unit) live
// in the payload directly; references, boxes, and code entry points
// carry an address.

use enumflags2::BitFlags;

use crate::vm::{Error, Result};


// It kinda bugs me that I need this, but Rust doesn't have a way of
// exposing an enum's discriminant besides a pattern match.
#[derive(BitFlags, Copy, Clone, Debug, PartialEq)]
#[repr(u16)]
pub enum Tag {
    Invalid   = 0b001,
    Address   = 0b010,
    Primitive = 0b100,
}


pub type TagSet = BitFlags<Tag>;


#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Value {
    tag: Tag,
    payload: u32,
}


// Construct an Error::TypeError from a value.
fn expected(expect: TagSet, got: &Value) -> Error {
    Error::TypeError {expect, got: got.tag()}
}


impl Value {
    pub fn invalid() -> Value {
        Value {tag: Tag::Invalid, payload: 0}
    }

    pub fn from_i32(v: i32) -> Value {
        Value {tag: Tag::Primitive, payload: v as u32}
    }

    pub fn from_u32(v: u32) -> Value {
        Value {tag: Tag::Primitive, payload: v}
    }

    pub fn from_bool(v: bool) -> Value {
        Value {tag: Tag::Primitive, payload: v as u32}
    }

    pub fn from_unit() -> Value {
        Value {tag: Tag::Primitive, payload: 0}
    }

    pub fn from_address(addr: u32) -> Value {
        Value {tag: Tag::Address, payload: addr}
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn is_valid(&self) -> bool {
        self.tag != Tag::Invalid
    }

    pub fn is_address(&self) -> bool {
        self.tag == Tag::Address
    }

    pub fn is_primitive(&self) -> bool {
        self.tag == Tag::Primitive
    }

    pub fn as_i32(&self) -> Result<i32> {
        if self.is_primitive() {
            Ok(self.payload as i32)
        } else {
            Err(expected(Tag::Primitive.into(), self))
        }
    }

    pub fn as_u32(&self) -> Result<u32> {
        if self.is_primitive() {
            Ok(self.payload)
        } else {
            Err(expected(Tag::Primitive.into(), self))
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        if self.is_primitive() {
            Ok(self.payload != 0)
        } else {
            Err(expected(Tag::Primitive.into(), self))
        }
    }

    pub fn as_address(&self) -> Result<u32> {
        if self.is_address() {
            Ok(self.payload)
        } else {
            Err(expected(Tag::Address.into(), self))
        }
    }

    // Address arithmetic: offsetting a value preserves its tag.
    pub fn add(&self, offset: u32) -> Value {
        Value {tag: self.tag, payload: self.payload.wrapping_add(offset)}
    }

    // Packed form used for heap cells: tag in bits 32..48, payload in
    // bits 0..32. A zeroed cell unpacks as the invalid value.
    pub fn pack(&self) -> u64 {
        ((self.tag as u64) << 32) | self.payload as u64
    }

    pub fn unpack(word: u64) -> Value {
        let payload = word as u32;
        let tag = match (word >> 32) as u16 {
            t if t == Tag::Address as u16 => Tag::Address,
            t if t == Tag::Primitive as u16 => Tag::Primitive,
            _ => return Value::invalid(),
        };
        Value {tag, payload}
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i32_round_trip() {
        for &i in &[0, 1, -1, 42, -42, i32::max_value(), i32::min_value()] {
            assert_eq!(Value::from_i32(i).as_i32(), Ok(i));
        }
    }

    #[test]
    fn test_u32_round_trip() {
        for &u in &[0, 1, 42, u32::max_value()] {
            assert_eq!(Value::from_u32(u).as_u32(), Ok(u));
        }
    }

    #[test]
    fn test_bool_round_trip() {
        assert_eq!(Value::from_bool(false).as_bool(), Ok(false));
        assert_eq!(Value::from_bool(true).as_bool(), Ok(true));
    }

    #[test]
    fn test_tags() {
        assert!(Value::from_i32(-7).is_primitive());
        assert!(!Value::from_i32(-7).is_address());
        assert!(Value::from_address(16).is_address());
        assert!(!Value::from_address(16).is_primitive());
        assert!(!Value::invalid().is_valid());
        assert!(Value::from_unit().is_valid());
    }

    #[test]
    fn test_accessor_mismatch() {
        assert_eq!(
            Value::from_address(3).as_i32(),
            Err(Error::TypeError {
                expect: Tag::Primitive.into(),
                got: Tag::Address,
            })
        );
        assert_eq!(
            Value::from_i32(3).as_address(),
            Err(Error::TypeError {
                expect: Tag::Address.into(),
                got: Tag::Primitive,
            })
        );
    }

    #[test]
    fn test_address_arithmetic() {
        let base = Value::from_address(100);
        let offset = base.add(3);
        assert!(offset.is_address());
        assert_eq!(offset.as_address(), Ok(103));

        // tag is preserved for primitives too
        assert_eq!(Value::from_i32(40).add(2).as_i32(), Ok(42));
    }

    #[test]
    fn test_pack_round_trip() {
        for &v in &[
            Value::from_i32(-1),
            Value::from_u32(u32::max_value()),
            Value::from_bool(true),
            Value::from_unit(),
            Value::from_address(0xdead),
        ] {
            assert_eq!(Value::unpack(v.pack()), v);
        }
        // a zeroed heap cell reads back as invalid
        assert_eq!(Value::unpack(0), Value::invalid());
    }
}
