// The in-memory opcode format.
//
// This is designed to make illegal operations impossible to
// represent, thereby avoiding "wierd machines" resulting from
// ill-formed opcodes. Jumps are relative, call targets are bytecode
// offsets resolved at compile time, and function bodies are inlined,
// so an instruction stream is self-contained.

use crate::ast::BinOp;
use crate::builtins;
use crate::value::Value;
use crate::vm::{Error, Result};


#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Opcode {
    Pop,
    Ldcp(Value),
    EnterScope(u16),
    ExitScope,
    EnterLoop,
    ExitLoop,
    // (frame, local, indirections); -1 on Get pushes the slot address
    Set(u16, u16, i8),
    Get(u16, u16, i8),
    Deref,
    Write,
    // Some(ix) dispatches the built-in registry, bypassing the call
    // stack; None pops a code address.
    Call(Option<u8>),
    Ret,
    Binary(BinOp),
    Jofr(i32),
    Gotor(i32),
    // Reserved: drop the value in the named slot.
    Free(u16, u16),
    Done,
}


// The assembly spelling, one word per instruction with
// colon-separated operands. The asm module parses this same form.
impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        use Opcode::*;
        match self {
            Pop => write!(f, "pop"),
            Ldcp(v) if v.is_address() =>
                write!(f, "ldcp:addr:{}", v.as_address().unwrap()),
            Ldcp(v) if v.is_primitive() =>
                write!(f, "ldcp:i32:{}", v.as_i32().unwrap()),
            Ldcp(_) => write!(f, "ldcp:invalid"),
            EnterScope(n) => write!(f, "enter_scope:{}", n),
            ExitScope => write!(f, "exit_scope"),
            EnterLoop => write!(f, "enter_loop"),
            ExitLoop => write!(f, "exit_loop"),
            Set(fr, l, k) => write!(f, "set:{}:{}:{}", fr, l, k),
            Get(fr, l, k) => write!(f, "get:{}:{}:{}", fr, l, k),
            Deref => write!(f, "deref"),
            Write => write!(f, "write"),
            Call(None) => write!(f, "call"),
            Call(Some(ix)) => write!(f, "call:{}", builtins::name_of(*ix)),
            Ret => write!(f, "ret"),
            Binary(op) => {
                let word = match op {
                    BinOp::Add => "add",
                    BinOp::Sub => "sub",
                    BinOp::Mul => "mul",
                    BinOp::Div => "div",
                    BinOp::Mod => "mod",
                    BinOp::Eq => "eq",
                    BinOp::Lt => "lt",
                    BinOp::Gt => "gt",
                    BinOp::Lte => "lte",
                    BinOp::Gte => "gte",
                    // never emitted; lowered to branches
                    BinOp::And => "and",
                    BinOp::Or => "or",
                    BinOp::Ne => "ne",
                };
                write!(f, "{}", word)
            },
            Jofr(s) => write!(f, "jofr:{}", s),
            Gotor(s) => write!(f, "gotor:{}", s),
            Free(fr, l) => write!(f, "free:{}:{}", fr, l),
            Done => write!(f, "done"),
        }
    }
}


// The internal program representation.
#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub code: Vec<Opcode>,
}


impl Program {
    // Safely fetch the opcode from the given address.
    //
    // The address is simply the index into the instruction sequence.
    pub fn fetch(&self, index: usize) -> Result<Opcode> {
        let len = self.code.len();

        if index < len {
            Ok(self.code[index])
        } else if index == len {
            Err(Error::Halt)
        } else {
            Err(Error::IllegalAddr(index))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch() {
        let prog = Program {code: vec![Opcode::Pop, Opcode::Done]};
        assert_eq!(prog.fetch(0), Ok(Opcode::Pop));
        assert_eq!(prog.fetch(1), Ok(Opcode::Done));
        assert_eq!(prog.fetch(2), Err(Error::Halt));
        assert_eq!(prog.fetch(3), Err(Error::IllegalAddr(3)));
    }

    #[test]
    fn test_display() {
        assert_eq!(Opcode::Ldcp(Value::from_i32(-3)).to_string(),
                   "ldcp:i32:-3");
        assert_eq!(Opcode::Ldcp(Value::from_address(7)).to_string(),
                   "ldcp:addr:7");
        assert_eq!(Opcode::Get(1, 2, -1).to_string(), "get:1:2:-1");
        assert_eq!(Opcode::Binary(BinOp::Mod).to_string(), "mod");
        assert_eq!(Opcode::Jofr(4).to_string(), "jofr:4");
        assert_eq!(Opcode::Gotor(-6).to_string(), "gotor:-6");
    }
}
