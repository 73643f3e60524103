// Lowering from the checked AST to the flat instruction stream.
//
// The compile-time environment mirrors the runtime one exactly: a
// stack of scopes holding each scope's locals in declaration order,
// so any in-scope name resolves to (frame, local) coordinates that
// are valid against the env chain at the matching program point.
// Functions are compiled inline, guarded by a skip jump, and their
// entry addresses stored into the crate scope's slots; jumps are
// relative and patched once the target is known.

use crate::ast::*;
use crate::builtins;
use crate::bytecode::{Opcode, Program};
use crate::env::ScopeStack;
use crate::value::Value;


#[derive(Clone, Debug, PartialEq)]
pub enum CompileError {
    TooManyLocals {line: u32},
    // a name the checkers approved failed to resolve; a bug in a
    // prior pass rather than in the program
    Unresolved {name: String, line: u32},
}


impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CompileError::TooManyLocals {line} => write!(
                f, "Too many locals in one scope. Line {}", line
            ),
            CompileError::Unresolved {name, line} => write!(
                f, "Unresolved name '{}' during lowering. Line {}",
                name, line
            ),
        }
    }
}


type Emit = Result<(), CompileError>;


struct LoopFrame {
    start: usize,
    breaks: Vec<usize>,
}


pub struct Compiler {
    code: Vec<Opcode>,
    scopes: ScopeStack<()>,
    loops: Vec<LoopFrame>,
}


pub fn compile(krate: &Crate) -> Result<Program, CompileError> {
    let mut c = Compiler {
        code: Vec::new(),
        scopes: ScopeStack::new(),
        loops: Vec::new(),
    };

    // crate scope: one slot per top-level function
    c.scopes.push();
    for func in &krate.functions {
        c.scopes.define(&func.name, ());
    }
    c.emit(Opcode::EnterScope(krate.functions.len() as u16));

    for func in &krate.functions {
        c.compile_function(func)?;
    }

    // startup: invoke main and discard its unit result
    let (frame, local) = c.resolve("main", 0)?;
    c.emit(Opcode::Get(frame, local, 0));
    c.emit(Opcode::Call(None));
    c.emit(Opcode::Pop);
    c.emit(Opcode::Done);

    Ok(Program {code: c.code})
}


impl Compiler {
    fn emit(&mut self, op: Opcode) -> usize {
        self.code.push(op);
        self.code.len() - 1
    }

    // Rewrite a placeholder jump so it lands on `target`.
    fn patch(&mut self, site: usize, target: usize) {
        let skip = (target as i64 - site as i64 - 1) as i32;
        self.code[site] = match self.code[site] {
            Opcode::Jofr(_) => Opcode::Jofr(skip),
            Opcode::Gotor(_) => Opcode::Gotor(skip),
            other => other,
        };
    }

    fn resolve(&self, name: &str, line: u32) -> Result<(u16, u16), CompileError> {
        self.scopes.resolve(name).ok_or_else(|| CompileError::Unresolved {
            name: name.to_string(),
            line,
        })
    }

    // Declare a block's locals ahead of its statements, fixing the
    // frame layout before anything executes.
    fn prescan(&mut self, stmts: &Seq<Stmt>) -> Emit {
        for stmt in stmts {
            if let StmtKind::Let {name, ..} = &stmt.kind {
                self.scopes.define(name, ());
                if self.scopes.local_count() > u16::max_value() as usize {
                    return Err(CompileError::TooManyLocals {line: stmt.line});
                }
            }
        }
        Ok(())
    }

    fn compile_function(&mut self, func: &Function) -> Emit {
        // skip the inlined body at definition time
        let guard = self.emit(Opcode::Gotor(0));
        let entry = self.code.len();

        // parameters share the body scope with the body's own locals
        self.scopes.push();
        for (name, _) in &func.params {
            self.scopes.define(name, ());
        }
        let (stmts, tail) = match &func.body.kind {
            ExprKind::Block(stmts, tail) => (stmts, tail),
            _ => return Err(CompileError::Unresolved {
                name: func.name.clone(),
                line: func.line,
            }),
        };
        self.prescan(stmts)?;

        self.emit(Opcode::EnterScope(self.scopes.local_count() as u16));
        // arguments were pushed left to right; pop them in reverse
        for i in (0..func.params.len()).rev() {
            self.emit(Opcode::Set(0, i as u16, 0));
        }

        for stmt in stmts {
            self.compile_stmt(stmt)?;
        }
        match tail {
            Some(expr) => self.compile_expr(expr)?,
            None => {
                self.emit(Opcode::Ldcp(Value::from_unit()));
            },
        }
        self.emit(Opcode::Ret);
        self.scopes.pop();

        // the function value is its entry address, stored in the
        // enclosing scope's slot
        let after = self.code.len();
        self.patch(guard, after);
        let (frame, local) = self.resolve(&func.name, func.line)?;
        self.emit(Opcode::Ldcp(Value::from_address(entry as u32)));
        self.emit(Opcode::Set(frame, local, 0));
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Emit {
        match &stmt.kind {
            StmtKind::Let {name, init, ..} => {
                self.compile_expr(init)?;
                let (frame, local) = self.resolve(name, stmt.line)?;
                self.emit(Opcode::Set(frame, local, 0));
            },
            StmtKind::Expr(expr) => {
                self.compile_expr(expr)?;
                self.emit(Opcode::Pop);
            },
            StmtKind::Return(value) => {
                match value {
                    Some(expr) => self.compile_expr(expr)?,
                    None => {
                        self.emit(Opcode::Ldcp(Value::from_unit()));
                    },
                }
                self.emit(Opcode::Ret);
            },
            StmtKind::Break => {
                let site = self.emit(Opcode::Gotor(0));
                match self.loops.last_mut() {
                    Some(frame) => frame.breaks.push(site),
                    None => return Err(CompileError::Unresolved {
                        name: String::from("break"),
                        line: stmt.line,
                    }),
                }
            },
            StmtKind::Continue => {
                let start = match self.loops.last() {
                    Some(frame) => frame.start,
                    None => return Err(CompileError::Unresolved {
                        name: String::from("continue"),
                        line: stmt.line,
                    }),
                };
                // rewind the env to the loop head, then re-arm the
                // marker and jump back
                self.emit(Opcode::ExitLoop);
                self.emit(Opcode::EnterLoop);
                let site = self.emit(Opcode::Gotor(0));
                self.patch(site, start);
            },
        }
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Node<Expr>) -> Emit {
        match &expr.kind {
            ExprKind::Int(n) => {
                let value = match expr.ty() {
                    Type::U32 => Value::from_u32(*n as u32),
                    _ => Value::from_i32(*n),
                };
                self.emit(Opcode::Ldcp(value));
            },
            ExprKind::Bool(b) => {
                self.emit(Opcode::Ldcp(Value::from_bool(*b)));
            },
            ExprKind::Path(name) => {
                let (frame, local) = self.resolve(name, expr.line)?;
                self.emit(Opcode::Get(frame, local, 0));
            },
            ExprKind::Binary(op, l, r) => {
                self.compile_binary(*op, l, r)?;
            },
            ExprKind::Unary(op, operand) => {
                match op {
                    // !e is e == false
                    UnOp::Not => {
                        self.compile_expr(operand)?;
                        self.emit(Opcode::Ldcp(Value::from_bool(false)));
                        self.emit(Opcode::Binary(BinOp::Eq));
                    },
                    // -e is 0 - e
                    UnOp::Neg => {
                        self.emit(Opcode::Ldcp(Value::from_i32(0)));
                        self.compile_expr(operand)?;
                        self.emit(Opcode::Binary(BinOp::Sub));
                    },
                }
            },
            ExprKind::Assign(l, r) => {
                self.compile_lvalue(l)?;
                self.compile_expr(r)?;
                self.emit(Opcode::Write);
                self.emit(Opcode::Ldcp(Value::from_unit()));
            },
            ExprKind::Borrow(_, inner) => {
                let (root, derefs) = lvalue_parts(inner);
                let name = root.ok_or_else(|| CompileError::Unresolved {
                    name: String::from("<borrow>"),
                    line: expr.line,
                })?;
                let (frame, local) = self.resolve(name, expr.line)?;
                self.emit(Opcode::Get(frame, local, derefs as i8 - 1));
            },
            ExprKind::Deref(inner) => {
                self.compile_expr(inner)?;
                self.emit(Opcode::Deref);
            },
            ExprKind::BoxNew(inner) => {
                self.compile_expr(inner)?;
                let ix = builtins::lookup("box")
                    .ok_or_else(|| CompileError::Unresolved {
                        name: String::from("box"),
                        line: expr.line,
                    })?;
                self.emit(Opcode::Call(Some(ix)));
            },
            ExprKind::Call(callee, args) => {
                for arg in args {
                    self.compile_expr(arg)?;
                }
                // a name that is not in scope dispatches the registry
                if let ExprKind::Path(name) = &callee.kind {
                    if self.scopes.resolve(name).is_none() {
                        let ix = builtins::lookup(name).ok_or_else(|| {
                            CompileError::Unresolved {
                                name: name.clone(),
                                line: callee.line,
                            }
                        })?;
                        self.emit(Opcode::Call(Some(ix)));
                        return Ok(());
                    }
                }
                self.compile_expr(callee)?;
                self.emit(Opcode::Call(None));
            },
            ExprKind::If(c, t, e) => {
                self.compile_if(c, t, e)?;
            },
            ExprKind::Loop(body) => {
                self.compile_loop(body)?;
            },
            ExprKind::Match(s, arms) => {
                self.compile_match(s, arms)?;
            },
            ExprKind::Block(stmts, tail) => {
                self.scopes.push();
                self.prescan(stmts)?;
                self.emit(Opcode::EnterScope(
                    self.scopes.local_count() as u16
                ));
                for stmt in stmts {
                    self.compile_stmt(stmt)?;
                }
                match tail {
                    Some(expr) => self.compile_expr(expr)?,
                    None => {
                        self.emit(Opcode::Ldcp(Value::from_unit()));
                    },
                }
                self.emit(Opcode::ExitScope);
                self.scopes.pop();
            },
        }
        Ok(())
    }

    fn compile_binary(
        &mut self,
        op: BinOp,
        l: &Node<Expr>,
        r: &Node<Expr>
    ) -> Emit {
        match op {
            // short-circuit forms lower to branches
            BinOp::And => {
                self.compile_expr(l)?;
                let to_false = self.emit(Opcode::Jofr(0));
                self.compile_expr(r)?;
                let to_end = self.emit(Opcode::Gotor(0));
                let here = self.code.len();
                self.patch(to_false, here);
                self.emit(Opcode::Ldcp(Value::from_bool(false)));
                let end = self.code.len();
                self.patch(to_end, end);
            },
            BinOp::Or => {
                self.compile_expr(l)?;
                let to_rhs = self.emit(Opcode::Jofr(0));
                self.emit(Opcode::Ldcp(Value::from_bool(true)));
                let to_end = self.emit(Opcode::Gotor(0));
                let here = self.code.len();
                self.patch(to_rhs, here);
                self.compile_expr(r)?;
                let end = self.code.len();
                self.patch(to_end, end);
            },
            // a != b is (a == b) == false
            BinOp::Ne => {
                self.compile_expr(l)?;
                self.compile_expr(r)?;
                self.emit(Opcode::Binary(BinOp::Eq));
                self.emit(Opcode::Ldcp(Value::from_bool(false)));
                self.emit(Opcode::Binary(BinOp::Eq));
            },
            _ => {
                self.compile_expr(l)?;
                self.compile_expr(r)?;
                self.emit(Opcode::Binary(op));
            },
        }
        Ok(())
    }

    fn compile_if(
        &mut self,
        cond: &Node<Expr>,
        then: &Node<Expr>,
        alt: &Option<Node<Expr>>
    ) -> Emit {
        self.compile_expr(cond)?;
        let to_else = self.emit(Opcode::Jofr(0));
        self.compile_expr(then)?;
        let to_end = self.emit(Opcode::Gotor(0));
        let else_at = self.code.len();
        self.patch(to_else, else_at);
        match alt {
            Some(alt) => self.compile_expr(alt)?,
            // a missing else still yields the if's unit value
            None => {
                self.emit(Opcode::Ldcp(Value::from_unit()));
            },
        }
        let end = self.code.len();
        self.patch(to_end, end);
        Ok(())
    }

    fn compile_loop(&mut self, body: &Node<Expr>) -> Emit {
        self.emit(Opcode::EnterLoop);
        let start = self.code.len();
        self.loops.push(LoopFrame {start, breaks: Vec::new()});

        self.compile_expr(body)?;
        self.emit(Opcode::Pop);
        let back = self.emit(Opcode::Gotor(0));
        self.patch(back, start);

        let frame = self.loops.pop().expect("loop frame vanished");
        let exit = self.code.len();
        for site in frame.breaks {
            self.patch(site, exit);
        }
        self.emit(Opcode::ExitLoop);
        self.emit(Opcode::Ldcp(Value::from_unit()));
        Ok(())
    }

    // The scrutinee is stashed in a hidden one-slot scope, then the
    // arms compare against it in order. The final arm is irrefutable,
    // so there is no fall-through.
    fn compile_match(
        &mut self,
        scrutinee: &Node<Expr>,
        arms: &[(Pattern, Node<Expr>)]
    ) -> Emit {
        self.compile_expr(scrutinee)?;
        self.scopes.push();
        self.scopes.define("match scrutinee", ());
        self.emit(Opcode::EnterScope(1));
        self.emit(Opcode::Set(0, 0, 0));

        let mut ends: Vec<usize> = Vec::new();
        for (pat, body) in arms {
            match pat {
                Pattern::Int(n) => {
                    self.emit(Opcode::Get(0, 0, 0));
                    let lit = match scrutinee.ty() {
                        Type::U32 => Value::from_u32(*n as u32),
                        _ => Value::from_i32(*n),
                    };
                    self.emit(Opcode::Ldcp(lit));
                    self.emit(Opcode::Binary(BinOp::Eq));
                    let to_next = self.emit(Opcode::Jofr(0));
                    self.compile_expr(body)?;
                    ends.push(self.emit(Opcode::Gotor(0)));
                    let next = self.code.len();
                    self.patch(to_next, next);
                },
                Pattern::Bool(b) => {
                    self.emit(Opcode::Get(0, 0, 0));
                    self.emit(Opcode::Ldcp(Value::from_bool(*b)));
                    self.emit(Opcode::Binary(BinOp::Eq));
                    let to_next = self.emit(Opcode::Jofr(0));
                    self.compile_expr(body)?;
                    ends.push(self.emit(Opcode::Gotor(0)));
                    let next = self.code.len();
                    self.patch(to_next, next);
                },
                Pattern::Bind(name) => {
                    self.scopes.push();
                    self.scopes.define(name, ());
                    self.emit(Opcode::EnterScope(1));
                    self.emit(Opcode::Get(1, 0, 0));
                    self.emit(Opcode::Set(0, 0, 0));
                    self.compile_expr(body)?;
                    self.emit(Opcode::ExitScope);
                    self.scopes.pop();
                    ends.push(self.emit(Opcode::Gotor(0)));
                    break;
                },
                Pattern::Wildcard => {
                    self.compile_expr(body)?;
                    ends.push(self.emit(Opcode::Gotor(0)));
                    break;
                },
            }
        }

        let end = self.code.len();
        for site in ends {
            self.patch(site, end);
        }
        self.emit(Opcode::ExitScope);
        self.scopes.pop();
        Ok(())
    }

    // An l-value lowers to the address of its slot: Get with the -1
    // sentinel, plus one Deref per source-level dereference.
    fn compile_lvalue(&mut self, expr: &Node<Expr>) -> Emit {
        match &expr.kind {
            ExprKind::Path(name) => {
                let (frame, local) = self.resolve(name, expr.line)?;
                self.emit(Opcode::Get(frame, local, -1));
            },
            ExprKind::Deref(inner) => {
                self.compile_lvalue(inner)?;
                self.emit(Opcode::Deref);
            },
            // the type checker rejects other targets
            _ => return Err(CompileError::Unresolved {
                name: String::from("<lvalue>"),
                line: expr.line,
            }),
        }
        Ok(())
    }
}


fn lvalue_parts(expr: &Expr) -> (Option<&str>, u32) {
    match &expr.kind {
        ExprKind::Path(name) => (Some(name), 0),
        ExprKind::Deref(inner) => {
            let (root, k) = lvalue_parts(inner);
            (root, k + 1)
        },
        _ => (None, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ownership;
    use crate::parser::parse;
    use crate::typechecker;
    use Opcode::*;

    fn compile_src(src: &str) -> Program {
        let krate = parse(src).unwrap();
        typechecker::check(&krate).unwrap();
        ownership::check(&krate).unwrap();
        compile(&krate).unwrap()
    }

    #[test]
    fn test_trivial_main() {
        let prog = compile_src("fn main() {}");
        assert_eq!(prog.code, vec![
            EnterScope(1),           // 0 crate scope, one fn slot
            Gotor(3),                // 1 skip the body
            EnterScope(0),           // 2 main:
            Ldcp(Value::from_unit()),// 3
            Ret,                     // 4
            Ldcp(Value::from_address(2)), // 5
            Set(0, 0, 0),            // 6 main's slot
            Get(0, 0, 0),            // 7 entry
            Call(None),              // 8
            Pop,                     // 9
            Done,                    // 10
        ]);
    }

    #[test]
    fn test_literal_and_call_lowering() {
        let prog = compile_src("fn main() { displayi32(32); }");
        let display = builtins::lookup("displayi32").unwrap();
        assert_eq!(prog.code, vec![
            EnterScope(1),
            Gotor(6),
            EnterScope(0),               // main:
            Ldcp(Value::from_i32(32)),
            Call(Some(display)),
            Pop,                         // statement discard
            Ldcp(Value::from_unit()),
            Ret,
            Ldcp(Value::from_address(2)),
            Set(0, 0, 0),
            Get(0, 0, 0),
            Call(None),
            Pop,
            Done,
        ]);
    }

    #[test]
    fn test_let_and_locals() {
        let prog = compile_src(
            "fn main() { let a: i32 = 1; let b: i32 = a; displayi32(b); }"
        );
        let display = builtins::lookup("displayi32").unwrap();
        assert_eq!(prog.code, vec![
            EnterScope(1),
            Gotor(10),
            EnterScope(2),               // main: a, b
            Ldcp(Value::from_i32(1)),
            Set(0, 0, 0),                // a
            Get(0, 0, 0),
            Set(0, 1, 0),                // b
            Get(0, 1, 0),
            Call(Some(display)),
            Pop,
            Ldcp(Value::from_unit()),
            Ret,
            Ldcp(Value::from_address(2)),
            Set(0, 0, 0),
            Get(0, 0, 0),
            Call(None),
            Pop,
            Done,
        ]);
    }

    #[test]
    fn test_borrow_lowering() {
        // &a is the address of a's slot; *r reads through it
        let prog = compile_src("\
fn main() {
    let mut a: i32 = 1;
    let r: &mut i32 = &mut a;
    *r = 2;
    displayi32(a);
}
");
        let code = &prog.code;
        // borrow: address-of sentinel
        assert!(code.contains(&Get(0, 0, -1)));
        // *r = 2: l-value of r, deref, write, unit, discard
        let write_at = code.iter().position(|op| *op == Write).unwrap();
        assert_eq!(code[write_at - 3], Get(0, 1, -1));
        assert_eq!(code[write_at - 2], Deref);
        assert_eq!(code[write_at - 1], Ldcp(Value::from_i32(2)));
        assert_eq!(code[write_at + 1], Ldcp(Value::from_unit()));
        assert_eq!(code[write_at + 2], Pop);
    }

    #[test]
    fn test_reborrow_indirection() {
        let prog = compile_src("\
fn main() {
    let mut a: i32 = 1;
    let r: &mut i32 = &mut a;
    let s: &i32 = &*r;
    displayi32(*s);
}
");
        // &*r: one dereference, so indirection level 0
        assert!(prog.code.contains(&Get(0, 1, 0)));
    }

    #[test]
    fn test_if_patching() {
        let prog = compile_src(
            "fn main() { let x: i32 = if true { 1 } else { 2 }; displayi32(x); }"
        );
        let code = &prog.code;
        let jofr_at = code
            .iter()
            .position(|op| match op {
                Jofr(_) => true,
                _ => false,
            })
            .unwrap();
        // then arm: block of 1, then a goto over the else arm; a
        // false condition lands on the else arm's block
        assert_eq!(code[jofr_at], Jofr(4));
        assert_eq!(code[jofr_at + 1], EnterScope(0));
        assert_eq!(code[jofr_at + 2], Ldcp(Value::from_i32(1)));
        assert_eq!(code[jofr_at + 3], ExitScope);
        assert_eq!(code[jofr_at + 4], Gotor(3));
        assert_eq!(code[jofr_at + 5], EnterScope(0));
        assert_eq!(code[jofr_at + 6], Ldcp(Value::from_i32(2)));
        assert_eq!(code[jofr_at + 7], ExitScope);
    }

    #[test]
    fn test_function_args_reverse_pop() {
        let prog = compile_src("\
fn add(x: i32, y: i32) -> i32 { x + y }
fn main() { displayi32(add(1, 2)); }
");
        let code = &prog.code;
        // after add's EnterScope(2): pop y then x. The crate scope
        // is also EnterScope(2), so skip instruction 0.
        let enter = code
            .iter()
            .skip(1)
            .position(|op| *op == EnterScope(2))
            .unwrap() + 1;
        assert_eq!(code[enter + 1], Set(0, 1, 0));
        assert_eq!(code[enter + 2], Set(0, 0, 0));
        // the body reads x then y
        assert_eq!(code[enter + 3], Get(0, 0, 0));
        assert_eq!(code[enter + 4], Get(0, 1, 0));
        assert_eq!(code[enter + 5], Binary(BinOp::Add));
    }

    #[test]
    fn test_nested_scope_indices() {
        let prog = compile_src("\
fn main() {
    let a: i32 = 1;
    {
        let b: i32 = 2;
        displayi32(a + b);
    };
}
");
        let code = &prog.code;
        // inside the inner block, a is one frame out and b is local
        assert!(code.contains(&Get(1, 0, 0)));
        assert!(code.contains(&Get(0, 0, 0)));
    }

    #[test]
    fn test_loop_shape() {
        let prog = compile_src("\
fn main() {
    loop { break; };
}
");
        let code = &prog.code;
        let enter = code.iter().position(|op| *op == EnterLoop).unwrap();
        let exit = code.iter().position(|op| *op == ExitLoop).unwrap();
        assert!(enter < exit);
        // the break jumps exactly to the ExitLoop
        let break_at = enter + 2; // EnterLoop, EnterScope(0), Gotor
        match code[break_at] {
            Gotor(skip) => {
                assert_eq!(break_at + 1 + skip as usize, exit);
            },
            other => panic!("expected break goto, got {:?}", other),
        }
        // the loop value follows the ExitLoop
        assert_eq!(code[exit + 1], Ldcp(Value::from_unit()));
    }

    #[test]
    fn test_u32_literal_lowering() {
        let prog = compile_src(
            "fn main() { let x: u32 = 7; displayu32(x); }"
        );
        assert!(prog.code.contains(&Ldcp(Value::from_u32(7))));
    }

    #[test]
    fn test_match_lowering() {
        let prog = compile_src("\
fn main() {
    let x: i32 = 1;
    let y: i32 = match x { 0 => 10, _ => 20 };
    displayi32(y);
}
");
        let code = &prog.code;
        // hidden scrutinee scope with comparison chain
        assert!(code.contains(&EnterScope(1)));
        let eq_at = code
            .iter()
            .position(|op| *op == Binary(BinOp::Eq))
            .unwrap();
        assert_eq!(code[eq_at - 2], Get(0, 0, 0));
        assert_eq!(code[eq_at - 1], Ldcp(Value::from_i32(0)));
    }
}
