// A whitespace-separated textual form of the instruction set, for
// poking at the VM without the language front end. One word per
// instruction, colon-separated operands, labels written `name:` and
// referenced `#name`. Jump words resolve their label to a relative
// skip; `ldcp:#name` resolves to the label's absolute address, which
// is how a hand-written function is stored into a slot.

use std::collections::HashMap;
use std::fs;

use regex::Regex;

use crate::ast::BinOp;
use crate::bytecode::{Opcode, Program};
use crate::builtins;
use crate::value::Value;


// The external program representation
#[derive(Clone, Debug, PartialEq)]
pub enum Insn {
    Op(Opcode),
    Label(String),
    Jump {conditional: bool, label: String},
    Load(String),
}


pub type ParseResult = std::result::Result<Program, String>;


fn parse_u16(text: &str) -> Option<u16> {
    text.parse::<u16>().ok()
}

fn parse_slot(rest: &[&str]) -> Option<(u16, u16, i8)> {
    if rest.len() != 3 {
        return None;
    }
    Some((
        parse_u16(rest[0])?,
        parse_u16(rest[1])?,
        rest[2].parse::<i8>().ok()?,
    ))
}

fn parse_value(rest: &[&str]) -> Option<Value> {
    match rest {
        ["i32", n] => Some(Value::from_i32(n.parse().ok()?)),
        ["u32", n] => Some(Value::from_u32(n.parse().ok()?)),
        ["bool", b] => Some(Value::from_bool(b.parse().ok()?)),
        ["addr", n] => Some(Value::from_address(n.parse().ok()?)),
        ["unit"] => Some(Value::from_unit()),
        _ => None,
    }
}

pub fn decode_word(word: &str) -> Option<Insn> {
    lazy_static! {
        static ref LABEL_REGEX: Regex = Regex::new(
            "^([a-zA-Z0-9_-]+):$"
        ).unwrap();
    }

    use Insn::*;
    use Opcode::*;

    if let Some(captures) = LABEL_REGEX.captures(word) {
        let raw = captures.get(1).unwrap().as_str();
        return Some(Label(String::from(raw)));
    }

    let parts: Vec<&str> = word.split(':').collect();
    match parts.as_slice() {
        ["pop"] => Some(Op(Pop)),
        ["deref"] => Some(Op(Deref)),
        ["write"] => Some(Op(Write)),
        ["ret"] => Some(Op(Ret)),
        ["exit_scope"] => Some(Op(ExitScope)),
        ["enter_loop"] => Some(Op(EnterLoop)),
        ["exit_loop"] => Some(Op(ExitLoop)),
        ["done"] => Some(Op(Done)),
        ["add"] => Some(Op(Binary(BinOp::Add))),
        ["sub"] => Some(Op(Binary(BinOp::Sub))),
        ["mul"] => Some(Op(Binary(BinOp::Mul))),
        ["div"] => Some(Op(Binary(BinOp::Div))),
        ["mod"] => Some(Op(Binary(BinOp::Mod))),
        ["eq"] => Some(Op(Binary(BinOp::Eq))),
        ["lt"] => Some(Op(Binary(BinOp::Lt))),
        ["gt"] => Some(Op(Binary(BinOp::Gt))),
        ["lte"] => Some(Op(Binary(BinOp::Lte))),
        ["gte"] => Some(Op(Binary(BinOp::Gte))),
        ["call"] => Some(Op(Call(None))),
        ["call", name] => Some(Op(Call(Some(builtins::lookup(name)?)))),
        ["enter_scope", n] => Some(Op(EnterScope(parse_u16(n)?))),
        ["free", f, l] => Some(Op(Free(parse_u16(f)?, parse_u16(l)?))),
        ["jofr", rest] => {
            if let Some(label) = rest.strip_prefix('#') {
                Some(Jump {conditional: true, label: label.to_string()})
            } else {
                Some(Op(Jofr(rest.parse().ok()?)))
            }
        },
        ["gotor", rest] => {
            if let Some(label) = rest.strip_prefix('#') {
                Some(Jump {conditional: false, label: label.to_string()})
            } else {
                Some(Op(Gotor(rest.parse().ok()?)))
            }
        },
        ["ldcp", "#"] => None,
        ["ldcp", rest @ ..] => {
            if rest.len() == 1 {
                if let Some(label) = rest[0].strip_prefix('#') {
                    return Some(Load(label.to_string()));
                }
            }
            Some(Op(Ldcp(parse_value(rest)?)))
        },
        ["get", rest @ ..] => {
            let (f, l, k) = parse_slot(rest)?;
            Some(Op(Get(f, l, k)))
        },
        ["set", rest @ ..] => {
            let (f, l, k) = parse_slot(rest)?;
            Some(Op(Set(f, l, k)))
        },
        _ => None,
    }
}


// Lower the external representation to the internal one: strip the
// labels, then resolve references against their indices.
pub fn lower(insns: Vec<Insn>) -> ParseResult {
    let mut labels: HashMap<String, usize> = HashMap::new();
    let mut stripped = Vec::new();
    for insn in insns {
        match insn {
            Insn::Label(name) => {
                if labels.insert(name.clone(), stripped.len()).is_some() {
                    return Err(format!("duplicate label '{}'", name));
                }
            },
            insn => stripped.push(insn),
        }
    }

    let mut code = Vec::new();
    for (ix, insn) in stripped.into_iter().enumerate() {
        let resolve = |label: &str| {
            labels
                .get(label)
                .cloned()
                .ok_or_else(|| format!("unknown label '{}'", label))
        };
        match insn {
            Insn::Label(_) => unreachable!("labels are stripped before this loop"),
            Insn::Op(op) => code.push(op),
            Insn::Jump {conditional, label} => {
                let skip = (resolve(&label)? as i64 - ix as i64 - 1) as i32;
                code.push(if conditional {
                    Opcode::Jofr(skip)
                } else {
                    Opcode::Gotor(skip)
                });
            },
            Insn::Load(label) => {
                let target = resolve(&label)? as u32;
                code.push(Opcode::Ldcp(Value::from_address(target)));
            },
        }
    }

    Ok(Program {code})
}


pub fn assemble(source: &str) -> ParseResult {
    let mut insns = Vec::new();
    for word in source.split_whitespace() {
        match decode_word(word) {
            Some(insn) => insns.push(insn),
            None => return Err(format!("illegal instruction '{}'", word)),
        }
    }
    lower(insns)
}


pub fn load(path: String) -> ParseResult {
    match fs::read_to_string(&path) {
        Ok(source) => assemble(&source),
        Err(e) => Err(format!("couldn't open {}: {}", path, e)),
    }
}
