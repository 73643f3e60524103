// The built-in function registry: an immutable table of host
// functions the VM can dispatch without touching the call stack.
// The display family formats the popped value to the output sink;
// `box` backs Box::new and is not addressable from source code (the
// compiler emits it directly).

use std::collections::HashMap;

use crate::ast::{Node, Type};
use crate::heap::BlockTag;
use crate::value::Value;
use crate::vm::{Output, Result, Vm};


pub type Handler = fn(&mut Vm, &mut dyn Output) -> Result<()>;


pub struct Builtin {
    pub name: &'static str,
    pub arity: usize,
    pub handler: Handler,
}


static TABLE: [Builtin; 4] = [
    Builtin {name: "box", arity: 1, handler: builtin_box},
    Builtin {name: "displayi32", arity: 1, handler: builtin_displayi32},
    Builtin {name: "displayu32", arity: 1, handler: builtin_displayu32},
    Builtin {name: "displaybool", arity: 1, handler: builtin_displaybool},
];


lazy_static! {
    static ref INDEX: HashMap<&'static str, u8> = {
        let mut index = HashMap::new();
        for (ix, b) in TABLE.iter().enumerate() {
            index.insert(b.name, ix as u8);
        }
        index
    };
}


pub fn lookup(name: &str) -> Option<u8> {
    INDEX.get(name).cloned()
}

pub fn get(ix: u8) -> Option<&'static Builtin> {
    TABLE.get(ix as usize)
}

pub fn name_of(ix: u8) -> &'static str {
    match TABLE.get(ix as usize) {
        Some(b) => b.name,
        None => "?",
    }
}

// Signatures seeded into the root environment of the analyses. The
// box built-in is deliberately absent: Box::new is its only caller.
pub fn signatures() -> Vec<(String, Type)> {
    let display = |param: Type| Type::Fn(
        vec![(String::from("value"), Node::new(param))],
        Node::new(Type::Unit)
    );
    vec![
        (String::from("displayi32"), display(Type::I32)),
        (String::from("displayu32"), display(Type::U32)),
        (String::from("displaybool"), display(Type::Bool)),
    ]
}


// Every call leaves exactly one value on the stack, so the display
// family pushes its unit result after formatting.
fn builtin_displayi32(vm: &mut Vm, out: &mut dyn Output) -> Result<()> {
    let value = vm.pop()?;
    out.send(&value.as_i32()?.to_string());
    vm.push(Value::from_unit())
}

fn builtin_displayu32(vm: &mut Vm, out: &mut dyn Output) -> Result<()> {
    let value = vm.pop()?;
    out.send(&value.as_u32()?.to_string());
    vm.push(Value::from_unit())
}

fn builtin_displaybool(vm: &mut Vm, out: &mut dyn Output) -> Result<()> {
    let value = vm.pop()?;
    out.send(&value.as_bool()?.to_string());
    vm.push(Value::from_unit())
}

// Box::new: move the operand into a fresh single-cell heap block and
// leave its address on the stack.
fn builtin_box(vm: &mut Vm, _out: &mut dyn Output) -> Result<()> {
    let value = vm.pop()?;
    let cell = vm.heap_mut().allocate(BlockTag::Int, 1)?;
    let addr = cell.as_address()?;
    vm.heap_mut().set(addr, value)?;
    vm.push(cell)
}
