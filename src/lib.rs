// urust: featherweight interpreter for an ownership-disciplined
// systems language.
//
// Copyright (C) 2020  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

extern crate enumflags2;
#[macro_use]
extern crate lazy_static;
extern crate lalrpop_util;
extern crate regex;
extern crate ron;
extern crate serde;

use lalrpop_util::lalrpop_mod;

#[macro_use]
pub mod util;
pub mod ast;
pub mod asm;
pub mod builtins;
pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod env;
pub mod heap;
pub mod ownership;
pub mod parser;
pub mod typechecker;
pub mod value;
pub mod vm;

lalrpop_mod!(pub grammar);

use crate::config::VmConfig;
use crate::vm::Output;


// One error type spanning the whole pipeline. Each pass fails fast
// on its first violation; the driver renders whichever kind escaped.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    Syntax(String),
    Type(typechecker::TypeError),
    Borrow(ownership::OwnershipError),
    Compile(compiler::CompileError),
    Runtime(vm::Error),
}


impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Syntax(message) => write!(f, "Syntax error. {}", message),
            Error::Type(e) => write!(f, "{}", e),
            Error::Borrow(e) => write!(f, "{}", e),
            Error::Compile(e) => write!(f, "{}", e),
            Error::Runtime(e) => write!(f, "{}", e),
        }
    }
}


impl From<typechecker::TypeError> for Error {
    fn from(e: typechecker::TypeError) -> Error {
        Error::Type(e)
    }
}

impl From<ownership::OwnershipError> for Error {
    fn from(e: ownership::OwnershipError) -> Error {
        Error::Borrow(e)
    }
}

impl From<compiler::CompileError> for Error {
    fn from(e: compiler::CompileError) -> Error {
        Error::Compile(e)
    }
}

impl From<vm::Error> for Error {
    fn from(e: vm::Error) -> Error {
        Error::Runtime(e)
    }
}


// Parse, check, compile, and run a source program, sending output to
// the sink.
pub fn run_source(
    source: &str,
    config: &VmConfig,
    out: &mut impl Output
) -> Result<(), Error> {
    let krate = parser::parse(source).map_err(Error::Syntax)?;
    typechecker::check(&krate)?;
    ownership::check(&krate)?;
    let program = compiler::compile(&krate)?;

    trace!("{:?}", &program);
    let mut vm = vm::Vm::new(program, config);
    vm.exec(out)?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> Result<Vec<String>, Error> {
        let mut out: Vec<String> = Vec::new();
        run_source(src, &VmConfig::default(), &mut out)?;
        Ok(out)
    }

    fn lines(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_display_literal() {
        assert_eq!(
            run("fn main() { displayi32(32); }"),
            Ok(lines(&["32"]))
        );
    }

    #[test]
    fn test_box_round_trip() {
        let src = "\
fn main() {
    let a: Box<i32> = Box::new(32);
    displayi32(*a);
}
";
        assert_eq!(run(src), Ok(lines(&["32"])));
    }

    #[test]
    fn test_forward_referenced_recursion() {
        let src = "\
fn add(x: i32, y: i32) -> i32 {
    if y == 0 { return x; } else { return add(x + 1, y - 1); }
}
fn main() {
    let a: i32 = 32;
    let b: i32 = 64;
    displayi32(add(a, b));
}
";
        assert_eq!(run(src), Ok(lines(&["96"])));
    }

    #[test]
    fn test_box_through_function() {
        let src = "\
fn foo(x: i32) -> Box<i32> { let b: Box<i32> = Box::new(x); b }
fn main() {
    let a: Box<i32> = foo(123);
    displayi32(*a + 1);
}
";
        assert_eq!(run(src), Ok(lines(&["124"])));
    }

    #[test]
    fn test_borrow_violation_message() {
        let src = "\
fn main() {
    let mut a: i32 = 1;
    let r: &mut i32 = &mut a;
    let s: &i32 = &a;
    *r = 2;
}
";
        let err = run(src).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot borrow a as immutable because it is already borrowed \
             mutably. Line 4"
        );
    }

    #[test]
    fn test_missing_annotation_message() {
        let err = run("fn main() { let a = 32; }").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Let binding 'a' requires a type annotation. Line 1"
        );
    }

    #[test]
    fn test_syntax_error_message() {
        let err = run("fn main() { let x: i32 = ; }").unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("Syntax error. line 1:26"), "got: {}", text);
    }

    #[test]
    fn test_mutation_through_reference() {
        let src = "\
fn bump(r: &mut i32) { *r = *r + 1; }
fn main() {
    let mut a: i32 = 41;
    bump(&mut a);
    displayi32(a);
}
";
        assert_eq!(run(src), Ok(lines(&["42"])));
    }

    #[test]
    fn test_loop_with_break_and_continue() {
        let src = "\
fn main() {
    let mut n: i32 = 0;
    let mut sum: i32 = 0;
    loop {
        n = n + 1;
        if n > 10 { break; };
        if n % 2 == 1 { continue; };
        sum = sum + n;
    };
    displayi32(sum);
}
";
        // 2 + 4 + 6 + 8 + 10
        assert_eq!(run(src), Ok(lines(&["30"])));
    }

    #[test]
    fn test_match_dispatch() {
        let src = "\
fn describe(x: i32) -> i32 {
    match x { 0 => 100, 1 => 200, other => other * 10 }
}
fn main() {
    displayi32(describe(0));
    displayi32(describe(1));
    displayi32(describe(7));
}
";
        assert_eq!(run(src), Ok(lines(&["100", "200", "70"])));
    }

    #[test]
    fn test_u32_display() {
        let src = "\
fn main() {
    let x: u32 = 7;
    displayu32(x + 1);
    displaybool(x == 7);
}
";
        assert_eq!(run(src), Ok(lines(&["8", "true"])));
    }

    #[test]
    fn test_shadowing_in_nested_scopes() {
        let src = "\
fn main() {
    let x: i32 = 1;
    {
        let x: i32 = 2;
        displayi32(x);
    };
    displayi32(x);
}
";
        assert_eq!(run(src), Ok(lines(&["2", "1"])));
    }

    #[test]
    fn test_division_by_zero() {
        let src = "\
fn main() {
    let z: i32 = 0;
    displayi32(1 / z);
}
";
        assert_eq!(run(src), Err(Error::Runtime(vm::Error::DivideByZero)));
        assert_eq!(
            Error::Runtime(vm::Error::DivideByZero).to_string(),
            "division by zero"
        );
    }

    #[test]
    fn test_heap_overflow() {
        let config = VmConfig {
            stack_limit: 64,
            heap_words: 8,
            trace: false,
        };
        let mut out: Vec<String> = Vec::new();
        assert_eq!(
            run_source("fn main() {}", &config, &mut out),
            Err(Error::Runtime(vm::Error::HeapOverflow))
        );
    }

    #[test]
    fn test_logic_and_comparison_operators() {
        let src = "\
fn main() {
    displaybool(true && false);
    displaybool(true || false);
    displaybool(!true);
    displaybool(1 != 2);
    displaybool(3 <= 3);
    displayi32(-7 / 2);
}
";
        assert_eq!(
            run(src),
            Ok(lines(&["false", "true", "false", "true", "true", "-4"]))
        );
    }

    #[test]
    fn test_if_as_value() {
        let src = "\
fn main() {
    let flag: bool = false;
    let x: i32 = if flag { 1 } else { 2 };
    displayi32(x);
}
";
        assert_eq!(run(src), Ok(lines(&["2"])));
    }
}
