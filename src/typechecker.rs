use crate::ast::*;
use crate::builtins;
use crate::env::Env;


#[derive(Clone, Debug, PartialEq)]
pub enum TypeError {
    Mismatch {expected: Type, found: Type, line: u32},
    Undefined {name: String, line: u32},
    MissingAnnotation {name: String, line: u32},
    NotCallable {found: Type, line: u32},
    Arity {expected: usize, found: usize, line: u32},
    NotAnLvalue {line: u32},
    NotDereferenceable {found: Type, line: u32},
    NotNumeric {found: Type, line: u32},
    NotComparable {found: Type, line: u32},
    OutsideLoop {line: u32},
    DuplicateBinding {name: String, line: u32},
    Refutable {line: u32},
    NoMain,
}


use TypeError::*;


impl std::fmt::Display for TypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Mismatch {expected, found, line} => write!(
                f,
                "Type mismatch: expected {}, found {}. Line {}",
                expected, found, line
            ),
            Undefined {name, line} => write!(
                f, "Undefined name '{}'. Line {}", name, line
            ),
            MissingAnnotation {name, line} => write!(
                f,
                "Let binding '{}' requires a type annotation. Line {}",
                name, line
            ),
            NotCallable {found, line} => write!(
                f, "Not callable: {}. Line {}", found, line
            ),
            Arity {expected, found, line} => write!(
                f,
                "Wrong number of arguments: expected {}, found {}. Line {}",
                expected, found, line
            ),
            NotAnLvalue {line} => write!(
                f, "Expression is not an l-value. Line {}", line
            ),
            NotDereferenceable {found, line} => write!(
                f, "Cannot dereference {}. Line {}", found, line
            ),
            NotNumeric {found, line} => write!(
                f, "Expected a numeric operand, found {}. Line {}",
                found, line
            ),
            NotComparable {found, line} => write!(
                f, "Cannot compare values of type {}. Line {}", found, line
            ),
            OutsideLoop {line} => write!(
                f, "break or continue outside of a loop. Line {}", line
            ),
            DuplicateBinding {name, line} => write!(
                f, "Duplicate binding '{}' in this scope. Line {}",
                name, line
            ),
            Refutable {line} => write!(
                f, "Match must end with an irrefutable arm. Line {}", line
            ),
            NoMain => write!(f, "No main function"),
        }
    }
}


pub type TypeCheck = core::result::Result<Type, TypeError>;


pub struct TypeChecker {
    types: Node<Env<Type>>,
    ret: Type,
    in_loop: bool,
}


// Check the whole crate: pre-scan function signatures for forward
// reference, then type every body. Every expression node carries its
// resolved type on success.
pub fn check(krate: &Crate) -> Result<(), TypeError> {
    let root = Env::root();
    for (name, ty) in builtins::signatures() {
        root.define(&name, ty);
    }

    let mut seen: Vec<&str> = Vec::new();
    for func in &krate.functions {
        if seen.contains(&func.name.as_str()) {
            return Err(DuplicateBinding {
                name: func.name.clone(),
                line: func.line,
            });
        }
        seen.push(&func.name);
        root.define(&func.name, func.signature());
    }

    let main = krate.functions
        .iter()
        .find(|f| f.name == "main")
        .ok_or(NoMain)?;
    if !main.params.is_empty() {
        return Err(Arity {
            expected: 0,
            found: main.params.len(),
            line: main.line,
        });
    }

    let checker = TypeChecker {
        types: Node::new(root),
        ret: Type::Unit,
        in_loop: false,
    };
    for func in &krate.functions {
        checker.check_function(func)?;
    }
    Ok(())
}


fn is_int_literal(expr: &Expr) -> bool {
    match expr.kind {
        ExprKind::Int(_) => true,
        _ => false,
    }
}


impl TypeChecker {
    fn chained(&self) -> TypeChecker {
        TypeChecker {
            types: Node::new(Env::chain(&self.types)),
            ret: self.ret.clone(),
            in_loop: self.in_loop,
        }
    }

    fn check_function(&self, func: &Function) -> Result<(), TypeError> {
        let mut sub = self.chained();
        sub.ret = func.ret.clone();
        sub.in_loop = false;

        let mut seen: Vec<&str> = Vec::new();
        for (name, ty) in &func.params {
            if seen.contains(&name.as_str()) {
                return Err(DuplicateBinding {
                    name: name.clone(),
                    line: func.line,
                });
            }
            seen.push(name);
            sub.types.define(name, ty.clone());
        }

        let body = sub.eval_expr(&func.body)?;
        // A unit-typed body may still return through explicit return
        // statements; a non-unit trailing value is the implicit
        // return and must match the declared type.
        if body != Type::Unit && body != func.ret {
            return Err(Mismatch {
                expected: func.ret.clone(),
                found: body,
                line: func.body.line,
            });
        }
        Ok(())
    }

    pub fn eval_expr(&self, expr: &Node<Expr>) -> TypeCheck {
        let ty = self.eval_kind(expr)?;
        expr.set_ty(ty.clone());
        Ok(ty)
    }

    // Type an expression against an expected type. A bare integer
    // literal checked directly against u32 adopts it; nothing else
    // coerces.
    fn check_expecting(&self, expr: &Node<Expr>, expected: &Type) -> TypeCheck {
        let found = self.eval_expr(expr)?;
        if &found == expected {
            return Ok(found);
        }
        if *expected == Type::U32 && is_int_literal(expr) {
            expr.set_ty(Type::U32);
            return Ok(Type::U32);
        }
        Err(Mismatch {
            expected: expected.clone(),
            found,
            line: expr.line,
        })
    }

    fn eval_kind(&self, expr: &Node<Expr>) -> TypeCheck {
        match &expr.kind {
            ExprKind::Int(_) => Ok(Type::I32),
            ExprKind::Bool(_) => Ok(Type::Bool),
            ExprKind::Path(name) => self.eval_path(name, expr.line),
            ExprKind::Binary(op, l, r) => self.eval_binary(*op, l, r),
            ExprKind::Unary(op, operand) => self.eval_unary(*op, operand),
            ExprKind::Assign(l, r) => self.eval_assign(l, r),
            ExprKind::Borrow(kind, inner) => self.eval_borrow(*kind, inner),
            ExprKind::Deref(inner) => self.eval_deref(inner),
            ExprKind::BoxNew(inner) => {
                Ok(Type::Boxed(Node::new(self.eval_expr(inner)?)))
            },
            ExprKind::Call(callee, args) => {
                self.eval_call(callee, args, expr.line)
            },
            ExprKind::If(c, t, e) => self.eval_if(c, t, e),
            ExprKind::Loop(body) => self.eval_loop(body),
            ExprKind::Match(s, arms) => self.eval_match(s, arms, expr.line),
            ExprKind::Block(stmts, tail) => self.eval_block(stmts, tail),
        }
    }

    fn eval_path(&self, name: &str, line: u32) -> TypeCheck {
        match self.types.get(name) {
            Some(ty) => Ok(ty),
            None => Err(Undefined {name: name.to_string(), line}),
        }
    }

    fn eval_binary(
        &self,
        op: BinOp,
        l: &Node<Expr>,
        r: &Node<Expr>
    ) -> TypeCheck {
        let mut lt = self.eval_expr(l)?;
        let mut rt = self.eval_expr(r)?;

        // a bare literal operand follows a u32 on the other side
        if lt != rt {
            if lt == Type::U32 && is_int_literal(r) {
                r.set_ty(Type::U32);
                rt = Type::U32;
            } else if rt == Type::U32 && is_int_literal(l) {
                l.set_ty(Type::U32);
                lt = Type::U32;
            }
        }
        if lt != rt {
            return Err(Mismatch {expected: lt, found: rt, line: r.line});
        }

        if op.is_arithmetic() {
            if lt.is_numeric() {
                Ok(lt)
            } else {
                Err(NotNumeric {found: lt, line: l.line})
            }
        } else if op.is_comparison() {
            let ordered = match op {
                BinOp::Eq | BinOp::Ne => lt.is_numeric() || lt == Type::Bool,
                _ => lt.is_numeric(),
            };
            if ordered {
                Ok(Type::Bool)
            } else {
                Err(NotComparable {found: lt, line: l.line})
            }
        } else {
            if lt != Type::Bool {
                return Err(Mismatch {
                    expected: Type::Bool,
                    found: lt,
                    line: l.line,
                });
            }
            Ok(Type::Bool)
        }
    }

    fn eval_unary(&self, op: UnOp, operand: &Node<Expr>) -> TypeCheck {
        let ty = self.eval_expr(operand)?;
        match op {
            UnOp::Not => {
                if ty == Type::Bool {
                    Ok(Type::Bool)
                } else {
                    Err(Mismatch {
                        expected: Type::Bool,
                        found: ty,
                        line: operand.line,
                    })
                }
            },
            UnOp::Neg => {
                if ty == Type::I32 {
                    Ok(Type::I32)
                } else {
                    Err(Mismatch {
                        expected: Type::I32,
                        found: ty,
                        line: operand.line,
                    })
                }
            },
        }
    }

    fn eval_assign(&self, l: &Node<Expr>, r: &Node<Expr>) -> TypeCheck {
        if !l.is_lvalue() {
            return Err(NotAnLvalue {line: l.line});
        }
        let target = self.eval_expr(l)?;
        self.check_expecting(r, &target)?;
        Ok(Type::Unit)
    }

    fn eval_borrow(&self, kind: RefKind, inner: &Node<Expr>) -> TypeCheck {
        if !inner.is_lvalue() {
            return Err(NotAnLvalue {line: inner.line});
        }
        let ty = Node::new(self.eval_expr(inner)?);
        Ok(match kind {
            RefKind::Shared => Type::Ref(ty),
            RefKind::Mut => Type::RefMut(ty),
        })
    }

    fn eval_deref(&self, inner: &Node<Expr>) -> TypeCheck {
        let ty = self.eval_expr(inner)?;
        match ty.deref_target() {
            Some(target) => Ok((*target).clone()),
            None => Err(NotDereferenceable {found: ty, line: inner.line}),
        }
    }

    fn eval_call(
        &self,
        callee: &Node<Expr>,
        args: &Seq<Expr>,
        line: u32
    ) -> TypeCheck {
        let ty = self.eval_expr(callee)?;
        if let Type::Fn(params, ret) = ty {
            if params.len() != args.len() {
                return Err(Arity {
                    expected: params.len(),
                    found: args.len(),
                    line,
                });
            }
            for (arg, (_, param)) in args.iter().zip(params.iter()) {
                self.check_expecting(arg, param)?;
            }
            Ok((*ret).clone())
        } else {
            Err(NotCallable {found: ty, line: callee.line})
        }
    }

    fn eval_if(
        &self,
        cond: &Node<Expr>,
        then: &Node<Expr>,
        alt: &Option<Node<Expr>>
    ) -> TypeCheck {
        let ct = self.eval_expr(cond)?;
        if ct != Type::Bool {
            return Err(Mismatch {
                expected: Type::Bool,
                found: ct,
                line: cond.line,
            });
        }
        let tt = self.eval_expr(then)?;
        match alt {
            Some(alt) => {
                let at = self.eval_expr(alt)?;
                if tt != at {
                    Err(Mismatch {expected: tt, found: at, line: alt.line})
                } else {
                    Ok(tt)
                }
            },
            // a missing else forces the whole if to unit
            None => {
                if tt != Type::Unit {
                    Err(Mismatch {
                        expected: Type::Unit,
                        found: tt,
                        line: then.line,
                    })
                } else {
                    Ok(Type::Unit)
                }
            },
        }
    }

    fn eval_loop(&self, body: &Node<Expr>) -> TypeCheck {
        let sub = TypeChecker {
            types: self.types.clone(),
            ret: self.ret.clone(),
            in_loop: true,
        };
        let bt = sub.eval_expr(body)?;
        if bt != Type::Unit {
            return Err(Mismatch {
                expected: Type::Unit,
                found: bt,
                line: body.line,
            });
        }
        Ok(Type::Unit)
    }

    fn eval_match(
        &self,
        scrutinee: &Node<Expr>,
        arms: &[(Pattern, Node<Expr>)],
        line: u32
    ) -> TypeCheck {
        let st = self.eval_expr(scrutinee)?;
        let irrefutable = match arms.last() {
            Some((pat, _)) => pat.is_irrefutable(),
            None => false,
        };
        if !irrefutable {
            return Err(Refutable {line});
        }

        let mut result: Option<Type> = None;
        for (pat, body) in arms {
            match pat {
                Pattern::Int(_) => {
                    if !st.is_numeric() {
                        return Err(Mismatch {
                            expected: st,
                            found: Type::I32,
                            line: body.line,
                        });
                    }
                },
                Pattern::Bool(_) => {
                    if st != Type::Bool {
                        return Err(Mismatch {
                            expected: st,
                            found: Type::Bool,
                            line: body.line,
                        });
                    }
                },
                Pattern::Bind(_) | Pattern::Wildcard => {},
            }

            let sub = self.chained();
            if let Pattern::Bind(name) = pat {
                sub.types.define(name, st.clone());
            }
            let bt = sub.eval_expr(body)?;
            match &result {
                None => result = Some(bt),
                Some(rt) => {
                    if *rt != bt {
                        return Err(Mismatch {
                            expected: rt.clone(),
                            found: bt,
                            line: body.line,
                        });
                    }
                },
            }
        }
        Ok(result.unwrap_or(Type::Unit))
    }

    fn eval_block(
        &self,
        stmts: &Seq<Stmt>,
        tail: &Option<Node<Expr>>
    ) -> TypeCheck {
        let sub = self.chained();

        // pre-scan: a scope's lets are visible throughout it, and
        // their annotations are mandatory
        let mut seen: Vec<&str> = Vec::new();
        for stmt in stmts {
            if let StmtKind::Let {name, ann, ..} = &stmt.kind {
                if seen.contains(&name.as_str()) {
                    return Err(DuplicateBinding {
                        name: name.clone(),
                        line: stmt.line,
                    });
                }
                seen.push(name);
                match ann {
                    Some(ty) => sub.types.define(name, ty.clone()),
                    None => return Err(MissingAnnotation {
                        name: name.clone(),
                        line: stmt.line,
                    }),
                }
            }
        }

        for stmt in stmts {
            sub.check_stmt(stmt)?;
        }
        match tail {
            Some(expr) => sub.eval_expr(expr),
            None => Ok(Type::Unit),
        }
    }

    fn check_stmt(&self, stmt: &Stmt) -> Result<(), TypeError> {
        match &stmt.kind {
            StmtKind::Let {ann, init, ..} => {
                // the pre-scan guarantees the annotation is present
                let expected = ann.clone().unwrap_or(Type::Unit);
                self.check_expecting(init, &expected)?;
            },
            StmtKind::Expr(expr) => {
                self.eval_expr(expr)?;
            },
            StmtKind::Return(value) => {
                match value {
                    Some(expr) => {
                        self.check_expecting(expr, &self.ret)?;
                    },
                    None => {
                        if self.ret != Type::Unit {
                            return Err(Mismatch {
                                expected: self.ret.clone(),
                                found: Type::Unit,
                                line: stmt.line,
                            });
                        }
                    },
                }
            },
            StmtKind::Break | StmtKind::Continue => {
                if !self.in_loop {
                    return Err(OutsideLoop {line: stmt.line});
                }
            },
        }
        Ok(())
    }
}
