// Ownership and borrow checking over the typed AST.
//
// Runs after the type checker (it reads the resolved types off the
// nodes) and enforces single ownership and the aliasing rules: at
// most one live mutable borrow, or any number of shared borrows, and
// no move or drop while either counter is nonzero. Scopes are lexical
// and checking is flow-insensitive within a scope except for the
// explicit branch joins: if/else and match arms must agree on the
// final ownership state, and a loop body must be a fixed point of its
// entry state.

use crate::ast::*;
use crate::builtins;
use crate::env::ScopeStack;


#[derive(Clone, Debug, PartialEq)]
pub enum OwnershipError {
    UseBeforeInit {name: String, line: u32},
    UseAfterMove {name: String, line: u32},
    MoveWhileBorrowed {name: String, line: u32},
    BorrowSharedWhileMut {name: String, line: u32},
    BorrowMutWhileShared {name: String, line: u32},
    BorrowMutWhileMut {name: String, line: u32},
    NotMutable {name: String, line: u32},
    AssignNotMutable {name: String, line: u32},
    AssignWhileBorrowed {name: String, line: u32},
    WriteThroughImmutable {name: String, line: u32},
    MoveOutOfDeref {line: u32},
    DoesNotLiveLongEnough {name: String, line: u32},
    EscapingBorrow {name: String, line: u32},
    ReturnWithBorrow {name: String, line: u32},
    BranchMismatch {name: String, line: u32},
    LoopMismatch {name: String, line: u32},
}


use OwnershipError::*;


impl std::fmt::Display for OwnershipError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            UseBeforeInit {name, line} => write!(
                f,
                "Use of possibly-uninitialized variable {}. Line {}",
                name, line
            ),
            UseAfterMove {name, line} => write!(
                f, "Use of moved value {}. Line {}", name, line
            ),
            MoveWhileBorrowed {name, line} => write!(
                f, "Cannot move {} because it is borrowed. Line {}",
                name, line
            ),
            BorrowSharedWhileMut {name, line} => write!(
                f,
                "Cannot borrow {} as immutable because it is already \
                 borrowed mutably. Line {}",
                name, line
            ),
            BorrowMutWhileShared {name, line} => write!(
                f,
                "Cannot borrow {} as mutable because it is already \
                 borrowed. Line {}",
                name, line
            ),
            BorrowMutWhileMut {name, line} => write!(
                f,
                "Cannot borrow {} as mutable because it is already \
                 borrowed mutably. Line {}",
                name, line
            ),
            NotMutable {name, line} => write!(
                f,
                "Cannot borrow {} as mutable because it is not declared \
                 mutable. Line {}",
                name, line
            ),
            AssignNotMutable {name, line} => write!(
                f,
                "Cannot assign twice to immutable variable {}. Line {}",
                name, line
            ),
            AssignWhileBorrowed {name, line} => write!(
                f, "Cannot assign to {} because it is borrowed. Line {}",
                name, line
            ),
            WriteThroughImmutable {name, line} => write!(
                f,
                "Cannot write through {} because it is not mutable. Line {}",
                name, line
            ),
            MoveOutOfDeref {line} => write!(
                f, "Cannot move out of a dereference. Line {}", line
            ),
            DoesNotLiveLongEnough {name, line} => write!(
                f, "{} does not live long enough. Line {}", name, line
            ),
            EscapingBorrow {name, line} => write!(
                f,
                "Cannot return a reference to local variable {}. Line {}",
                name, line
            ),
            ReturnWithBorrow {name, line} => write!(
                f, "Cannot return while {} is borrowed. Line {}", name, line
            ),
            BranchMismatch {name, line} => write!(
                f,
                "Ownership of {} differs between branches. Line {}",
                name, line
            ),
            LoopMismatch {name, line} => write!(
                f,
                "Ownership of {} changes across loop iterations. Line {}",
                name, line
            ),
        }
    }
}


// What a value borrows: the borrow flavor and the root slot it was
// taken from. A None owner is a reference whose referent lives in
// the caller (a reference-typed parameter).
type Prov = Option<(RefKind, Option<String>)>;

type Check = Result<Prov, OwnershipError>;


// The ownership record for one slot.
#[derive(Clone, Debug, PartialEq)]
struct Slot {
    ty: Type,
    mutable: bool,
    alive: bool,
    moved: bool,
    read_refs: u32,
    write_refs: u32,
    borrow_of: Prov,
}


impl Slot {
    fn owned(ty: Type, mutable: bool, alive: bool) -> Slot {
        let borrow_of = match &ty {
            Type::Ref(_) => Some((RefKind::Shared, None)),
            Type::RefMut(_) => Some((RefKind::Mut, None)),
            _ => None,
        };
        Slot {
            ty,
            mutable,
            alive,
            moved: false,
            read_refs: 0,
            write_refs: 0,
            borrow_of: if alive { borrow_of } else { None },
        }
    }

    fn borrowed(&self) -> bool {
        self.read_refs > 0 || self.write_refs > 0
    }
}


fn increment(slot: &mut Slot, kind: RefKind) {
    match kind {
        RefKind::Shared => slot.read_refs += 1,
        RefKind::Mut => slot.write_refs += 1,
    }
}

fn decrement(slot: &mut Slot, kind: RefKind) {
    match kind {
        RefKind::Shared => slot.read_refs = slot.read_refs.saturating_sub(1),
        RefKind::Mut => slot.write_refs = slot.write_refs.saturating_sub(1),
    }
}


// Leave a scope: release the borrows its bindings held, then verify
// no dying slot is still borrowed from outside. Returns the names
// that went out of scope.
fn exit_scope(
    scopes: &mut ScopeStack<Slot>,
    line: u32
) -> Result<Vec<String>, OwnershipError> {
    let mut popped = scopes.pop();

    for i in 0..popped.len() {
        if let Some((kind, Some(owner))) = popped[i].1.borrow_of.clone() {
            if let Some(j) = popped.iter().position(|(n, _)| *n == owner) {
                decrement(&mut popped[j].1, kind);
            } else if let Some(slot) = scopes.get_mut(&owner) {
                decrement(slot, kind);
            }
        }
    }

    for (name, slot) in &popped {
        if slot.alive && !slot.moved && slot.borrowed() {
            return Err(DoesNotLiveLongEnough {
                name: name.clone(),
                line,
            });
        }
    }
    Ok(popped.into_iter().map(|(name, _)| name).collect())
}


// First slot whose state differs between two snapshots of the same
// scope shape, for join diagnostics.
fn differing_name(a: &ScopeStack<Slot>, b: &ScopeStack<Slot>) -> String {
    for ((_, na, sa), (_, _, sb)) in a.iter().zip(b.iter()) {
        if sa != sb {
            return na.to_string();
        }
    }
    String::from("?")
}


struct LoopCtx {
    depth: usize,
    entry: ScopeStack<Slot>,
}


pub struct OwnershipChecker {
    scopes: ScopeStack<Slot>,
    loops: Vec<LoopCtx>,
}


pub fn check(krate: &Crate) -> Result<(), OwnershipError> {
    let mut checker = OwnershipChecker {
        scopes: ScopeStack::new(),
        loops: Vec::new(),
    };
    checker.scopes.push();
    for (name, ty) in builtins::signatures() {
        checker.scopes.define(&name, Slot::owned(ty, false, true));
    }
    for func in &krate.functions {
        checker.scopes.define(
            &func.name,
            Slot::owned(func.signature(), false, true)
        );
    }
    for func in &krate.functions {
        checker.check_function(func)?;
    }
    Ok(())
}


impl OwnershipChecker {
    fn check_function(&mut self, func: &Function) -> Result<(), OwnershipError> {
        self.scopes.push();
        for (name, ty) in &func.params {
            self.scopes.define(name, Slot::owned(ty.clone(), false, true));
        }

        let prov = self.eval(&func.body)?;
        if let Some((_, Some(owner))) = &prov {
            if self.local_depth(owner).unwrap_or(0) > 0 {
                return Err(EscapingBorrow {
                    name: owner.clone(),
                    line: func.body.line,
                });
            }
        }
        exit_scope(&mut self.scopes, func.line)?;
        Ok(())
    }

    // Innermost scope depth a name resolves to; 0 is the crate scope.
    fn local_depth(&self, name: &str) -> Option<usize> {
        let mut found = None;
        for (depth, n, _) in self.scopes.iter() {
            if n == name {
                found = Some(depth);
            }
        }
        found
    }

    fn eval(&mut self, expr: &Node<Expr>) -> Check {
        match &expr.kind {
            ExprKind::Int(_) | ExprKind::Bool(_) => Ok(None),
            ExprKind::Path(name) => self.read_path(name, expr.line),
            ExprKind::Binary(_, l, r) => {
                self.eval(l)?;
                self.eval(r)?;
                Ok(None)
            },
            ExprKind::Unary(_, operand) => {
                self.eval(operand)?;
                Ok(None)
            },
            ExprKind::Assign(l, r) => self.eval_assign(l, r),
            ExprKind::Borrow(kind, inner) => {
                self.eval_borrow(*kind, inner, expr.line)
            },
            ExprKind::Deref(inner) => {
                self.read_place(inner)?;
                if !expr.ty().is_copy() {
                    return Err(MoveOutOfDeref {line: expr.line});
                }
                Ok(None)
            },
            ExprKind::BoxNew(inner) => {
                self.eval(inner)?;
                Ok(None)
            },
            ExprKind::Call(callee, args) => self.eval_call(callee, args),
            ExprKind::If(c, t, e) => self.eval_if(c, t, e, expr.line),
            ExprKind::Loop(body) => self.eval_loop(body, expr.line),
            ExprKind::Match(s, arms) => self.eval_match(s, arms, expr.line),
            ExprKind::Block(stmts, tail) => {
                self.eval_block(stmts, tail, expr.line)
            },
        }
    }

    // Read a name in r-value position. A move-semantic read takes
    // the value out of the slot and requires both counters zero.
    fn read_path(&mut self, name: &str, line: u32) -> Check {
        let slot = match self.scopes.get(name) {
            Some(slot) => slot.clone(),
            None => return Ok(None),
        };
        if !slot.alive {
            return Err(UseBeforeInit {name: name.to_string(), line});
        }
        if slot.moved {
            return Err(UseAfterMove {name: name.to_string(), line});
        }
        if !slot.ty.is_copy() {
            if slot.borrowed() {
                return Err(MoveWhileBorrowed {name: name.to_string(), line});
            }
            if let Some(slot) = self.scopes.get_mut(name) {
                slot.moved = true;
            }
        }
        // a reference value carries its referent along
        Ok(slot.borrow_of)
    }

    // Walk an l-value used as the base of a dereference or borrow.
    // Unlike read_path this never moves: reading through a place is
    // a use of the binding, not a consumption of it.
    fn read_place(&mut self, expr: &Node<Expr>) -> Result<(), OwnershipError> {
        match &expr.kind {
            ExprKind::Path(name) => {
                let slot = match self.scopes.get(name) {
                    Some(slot) => slot,
                    None => return Ok(()),
                };
                if !slot.alive {
                    return Err(UseBeforeInit {
                        name: name.clone(),
                        line: expr.line,
                    });
                }
                if slot.moved {
                    return Err(UseAfterMove {
                        name: name.clone(),
                        line: expr.line,
                    });
                }
                Ok(())
            },
            ExprKind::Deref(inner) => self.read_place(inner),
            // not an l-value: a temporary, evaluated normally
            _ => {
                self.eval(expr)?;
                Ok(())
            },
        }
    }

    // Whether an l-value may be written through or mutably borrowed:
    // a mut binding, a &mut, or a box reached through a mutable path.
    fn place_is_mut(&self, expr: &Node<Expr>) -> bool {
        match &expr.kind {
            ExprKind::Path(name) => match self.scopes.get(name) {
                Some(slot) => slot.mutable,
                None => false,
            },
            ExprKind::Deref(inner) => match inner.ty() {
                Type::RefMut(_) => true,
                Type::Boxed(_) => self.place_is_mut(inner),
                _ => false,
            },
            _ => false,
        }
    }

    fn eval_borrow(
        &mut self,
        kind: RefKind,
        inner: &Node<Expr>,
        line: u32
    ) -> Check {
        self.read_place(inner)?;
        let root = match inner.lvalue_root() {
            Some(root) => root.to_string(),
            None => return Ok(None),
        };
        let slot = match self.scopes.get(&root) {
            Some(slot) => slot.clone(),
            None => return Ok(None),
        };

        match kind {
            RefKind::Shared => {
                if slot.write_refs > 0 {
                    return Err(BorrowSharedWhileMut {name: root, line});
                }
            },
            RefKind::Mut => {
                if slot.write_refs > 0 {
                    return Err(BorrowMutWhileMut {name: root, line});
                }
                if slot.read_refs > 0 {
                    return Err(BorrowMutWhileShared {name: root, line});
                }
                if !self.place_is_mut(inner) {
                    return Err(NotMutable {name: root, line});
                }
            },
        }
        Ok(Some((kind, Some(root))))
    }

    fn eval_assign(&mut self, l: &Node<Expr>, r: &Node<Expr>) -> Check {
        let prov = self.eval(r)?;
        match &l.kind {
            ExprKind::Path(name) => {
                self.assign_path(name, prov, l.line)?;
            },
            ExprKind::Deref(_) => {
                self.read_place(l)?;
                if !self.place_is_mut(l) {
                    let root = l.lvalue_root().unwrap_or("?").to_string();
                    return Err(WriteThroughImmutable {
                        name: root,
                        line: l.line,
                    });
                }
            },
            // the type checker rejects other targets
            _ => {},
        }
        Ok(None)
    }

    fn assign_path(
        &mut self,
        name: &str,
        prov: Prov,
        line: u32
    ) -> Result<(), OwnershipError> {
        let slot = match self.scopes.get(name) {
            Some(slot) => slot.clone(),
            None => return Ok(()),
        };
        if slot.alive {
            if !slot.mutable {
                return Err(AssignNotMutable {name: name.to_string(), line});
            }
            if !slot.moved && slot.borrowed() {
                return Err(AssignWhileBorrowed {
                    name: name.to_string(),
                    line,
                });
            }
        }
        self.rebind(name, prov);
        Ok(())
    }

    // Place a fresh value in a slot: release the borrow the old value
    // held, record the new one, and mark the slot live.
    fn rebind(&mut self, name: &str, prov: Prov) {
        let old = match self.scopes.get(name) {
            Some(slot) => slot.borrow_of.clone(),
            None => return,
        };
        if let Some((kind, Some(owner))) = old {
            if let Some(owner_slot) = self.scopes.get_mut(&owner) {
                decrement(owner_slot, kind);
            }
        }
        if let Some((kind, Some(owner))) = &prov {
            if let Some(owner_slot) = self.scopes.get_mut(owner) {
                increment(owner_slot, *kind);
            }
        }
        if let Some(slot) = self.scopes.get_mut(name) {
            slot.alive = true;
            slot.moved = false;
            slot.borrow_of = prov;
        }
    }

    fn eval_call(&mut self, callee: &Node<Expr>, args: &Seq<Expr>) -> Check {
        self.eval(callee)?;

        // argument borrows live for the duration of the call
        let mut temps: Vec<(String, RefKind)> = Vec::new();
        for arg in args {
            let prov = self.eval(arg)?;
            if let Some((kind, Some(owner))) = prov {
                if let Some(slot) = self.scopes.get_mut(&owner) {
                    increment(slot, kind);
                }
                temps.push((owner, kind));
            }
        }
        for (owner, kind) in temps {
            if let Some(slot) = self.scopes.get_mut(&owner) {
                decrement(slot, kind);
            }
        }
        Ok(None)
    }

    fn eval_if(
        &mut self,
        cond: &Node<Expr>,
        then: &Node<Expr>,
        alt: &Option<Node<Expr>>,
        line: u32
    ) -> Check {
        self.eval(cond)?;

        let entry = self.scopes.clone();
        let prov_then = self.eval(then)?;
        let after_then = std::mem::replace(&mut self.scopes, entry);

        let prov_alt = match alt {
            Some(alt) => self.eval(alt)?,
            None => None,
        };

        if after_then != self.scopes {
            return Err(BranchMismatch {
                name: differing_name(&after_then, &self.scopes),
                line,
            });
        }
        Ok(if prov_then == prov_alt { prov_then } else { None })
    }

    fn eval_loop(&mut self, body: &Node<Expr>, line: u32) -> Check {
        self.loops.push(LoopCtx {
            depth: self.scopes.depth(),
            entry: self.scopes.clone(),
        });
        self.eval(body)?;
        let ctx = self.loops.pop().expect("loop context vanished");

        // the body must be a fixed point of the entry state
        if self.scopes != ctx.entry {
            return Err(LoopMismatch {
                name: differing_name(&self.scopes, &ctx.entry),
                line,
            });
        }
        Ok(None)
    }

    fn eval_match(
        &mut self,
        scrutinee: &Node<Expr>,
        arms: &[(Pattern, Node<Expr>)],
        line: u32
    ) -> Check {
        let prov_s = self.eval(scrutinee)?;
        let entry = self.scopes.clone();

        let mut states: Vec<ScopeStack<Slot>> = Vec::new();
        let mut provs: Vec<Prov> = Vec::new();
        for (pat, body) in arms {
            self.scopes = entry.clone();

            let binding = if let Pattern::Bind(name) = pat {
                self.scopes.push();
                let mut slot = Slot::owned(scrutinee.ty(), false, true);
                slot.borrow_of = prov_s.clone();
                self.scopes.define(name, slot);
                if let Some((kind, Some(owner))) = &prov_s {
                    if let Some(owner_slot) = self.scopes.get_mut(owner) {
                        increment(owner_slot, *kind);
                    }
                }
                Some(name.clone())
            } else {
                None
            };

            let prov = self.eval(body)?;
            if let Some(name) = binding {
                exit_scope(&mut self.scopes, body.line)?;
                if let Some((_, Some(owner))) = &prov {
                    if *owner == name {
                        return Err(DoesNotLiveLongEnough {
                            name,
                            line: body.line,
                        });
                    }
                }
            }
            states.push(self.scopes.clone());
            provs.push(prov);
        }

        for state in &states[1..] {
            if state != &states[0] {
                return Err(BranchMismatch {
                    name: differing_name(state, &states[0]),
                    line,
                });
            }
        }
        if let Some(state) = states.pop() {
            self.scopes = state;
        }

        let first = provs.first().cloned().unwrap_or(None);
        Ok(if provs.iter().all(|p| *p == first) { first } else { None })
    }

    fn eval_block(
        &mut self,
        stmts: &Seq<Stmt>,
        tail: &Option<Node<Expr>>,
        line: u32
    ) -> Check {
        self.scopes.push();

        // pre-scan: locals exist for the whole scope but are not
        // alive until their let runs
        for stmt in stmts {
            if let StmtKind::Let {name, mutable, ann, ..} = &stmt.kind {
                let ty = ann.clone().unwrap_or(Type::Unit);
                self.scopes.define(name, Slot::owned(ty, *mutable, false));
            }
        }

        for stmt in stmts {
            self.check_stmt(stmt)?;
        }
        let prov = match tail {
            Some(expr) => self.eval(expr)?,
            None => None,
        };

        let popped = exit_scope(&mut self.scopes, line)?;
        if let Some((_, Some(owner))) = &prov {
            if popped.contains(owner) {
                return Err(DoesNotLiveLongEnough {
                    name: owner.clone(),
                    line,
                });
            }
        }
        Ok(prov)
    }

    fn check_stmt(&mut self, stmt: &Stmt) -> Result<(), OwnershipError> {
        match &stmt.kind {
            StmtKind::Let {name, init, ..} => {
                let prov = self.eval(init)?;
                self.rebind(name, prov);
            },
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            },
            StmtKind::Return(value) => {
                let prov = match value {
                    Some(expr) => self.eval(expr)?,
                    None => None,
                };
                if let Some((_, Some(owner))) = &prov {
                    if self.local_depth(owner).unwrap_or(0) > 0 {
                        return Err(EscapingBorrow {
                            name: owner.clone(),
                            line: stmt.line,
                        });
                    }
                }
                for (depth, name, slot) in self.scopes.iter() {
                    if depth > 0 && slot.borrowed() {
                        return Err(ReturnWithBorrow {
                            name: name.to_string(),
                            line: stmt.line,
                        });
                    }
                }
            },
            StmtKind::Break | StmtKind::Continue => {
                let ctx = self.loops
                    .last()
                    .expect("loop statement outside a loop");
                let mut probe = self.scopes.clone();
                while probe.depth() > ctx.depth {
                    exit_scope(&mut probe, stmt.line)?;
                }
                if probe != ctx.entry {
                    return Err(LoopMismatch {
                        name: differing_name(&probe, &ctx.entry),
                        line: stmt.line,
                    });
                }
            },
        }
        Ok(())
    }
}
