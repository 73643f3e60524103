use std::cell::RefCell;
use std::rc::Rc;


// Abstract over various memory management strategies.
pub type Node<T> = Rc<T>;
pub type Seq<T> = Vec<Node<T>>;


// Arithmetic, comparison, and logic operations
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
}


#[derive(Copy, Clone, Debug, PartialEq)]
pub enum UnOp {
    Not,
    Neg,
}


impl BinOp {
    pub fn is_arithmetic(self) -> bool {
        match self {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
                => true,
            _ => false,
        }
    }

    pub fn is_comparison(self) -> bool {
        match self {
            BinOp::Eq | BinOp::Ne
                | BinOp::Lt | BinOp::Gt | BinOp::Lte | BinOp::Gte => true,
            _ => false,
        }
    }

    pub fn is_logical(self) -> bool {
        match self {
            BinOp::And | BinOp::Or => true,
            _ => false,
        }
    }
}


// Borrow flavor, shared between the AST and the ownership records.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RefKind {
    Shared,
    Mut,
}


// ADT for types
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    I32,
    U32,
    Bool,
    Unit,
    Ref(Node<Type>),
    RefMut(Node<Type>),
    Boxed(Node<Type>),
    Fn(Vec<(String, Node<Type>)>, Node<Type>),
}


impl Type {
    // The copy/move predicate every pass consults: primitives,
    // shared references, and function values copy; everything else
    // moves. Function values must copy, since every call site reads
    // the function out of its slot.
    pub fn is_copy(&self) -> bool {
        match self {
            Type::I32 | Type::U32 | Type::Bool | Type::Unit => true,
            Type::Ref(_) => true,
            Type::Fn(_, _) => true,
            Type::RefMut(_) | Type::Boxed(_) => false,
        }
    }

    pub fn is_numeric(&self) -> bool {
        match self {
            Type::I32 | Type::U32 => true,
            _ => false,
        }
    }

    // Target type of a dereference, if the type supports one.
    pub fn deref_target(&self) -> Option<Node<Type>> {
        match self {
            Type::Ref(t) | Type::RefMut(t) | Type::Boxed(t) => {
                Some(t.clone())
            },
            _ => None,
        }
    }
}


impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Type::I32 => write!(f, "i32"),
            Type::U32 => write!(f, "u32"),
            Type::Bool => write!(f, "bool"),
            Type::Unit => write!(f, "()"),
            Type::Ref(t) => write!(f, "&{}", t),
            Type::RefMut(t) => write!(f, "&mut {}", t),
            Type::Boxed(t) => write!(f, "Box<{}>", t),
            Type::Fn(params, ret) => {
                write!(f, "fn(")?;
                for (i, (_, t)) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, ") -> {}", ret)
            },
        }
    }
}


// Expression node: the variant, the source line, and the resolved
// type written back by the type checker.
#[derive(Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: u32,
    pub ty: RefCell<Option<Type>>,
}


impl Expr {
    pub fn new(kind: ExprKind, line: u32) -> Node<Expr> {
        Node::new(Expr {kind, line, ty: RefCell::new(None)})
    }

    // The resolved type recorded by the type checker. Panics if the
    // checker has not visited this node, which would be a pass-order
    // bug rather than a user error.
    pub fn ty(&self) -> Type {
        self.ty
            .borrow()
            .clone()
            .expect("expression was not visited by the type checker")
    }

    pub fn set_ty(&self, ty: Type) {
        *self.ty.borrow_mut() = Some(ty);
    }

    // An l-value designates a slot: a plain path, or a dereference
    // of an l-value.
    pub fn is_lvalue(&self) -> bool {
        match &self.kind {
            ExprKind::Path(_) => true,
            ExprKind::Deref(inner) => inner.is_lvalue(),
            _ => false,
        }
    }

    // Root variable of an l-value, if any.
    pub fn lvalue_root(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Path(name) => Some(name),
            ExprKind::Deref(inner) => inner.lvalue_root(),
            _ => None,
        }
    }
}


// Equality ignores the decoration slot and the line, so tests can
// compare parsed shapes directly.
impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}


#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Int(i32),
    Bool(bool),
    Path(String),
    Binary(BinOp, Node<Expr>, Node<Expr>),
    Unary(UnOp, Node<Expr>),
    Assign(Node<Expr>, Node<Expr>),
    Borrow(RefKind, Node<Expr>),
    Deref(Node<Expr>),
    BoxNew(Node<Expr>),
    Call(Node<Expr>, Seq<Expr>),
    If(Node<Expr>, Node<Expr>, Option<Node<Expr>>),
    Loop(Node<Expr>),
    Match(Node<Expr>, Vec<(Pattern, Node<Expr>)>),
    Block(Seq<Stmt>, Option<Node<Expr>>),
}


// Patterns are plain identifier bindings, wildcards, and literals.
#[derive(Clone, Debug, PartialEq)]
pub enum Pattern {
    Int(i32),
    Bool(bool),
    Bind(String),
    Wildcard,
}


impl Pattern {
    pub fn is_irrefutable(&self) -> bool {
        match self {
            Pattern::Bind(_) | Pattern::Wildcard => true,
            _ => false,
        }
    }
}


#[derive(Debug, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: u32,
}


impl Stmt {
    pub fn new(kind: StmtKind, line: u32) -> Node<Stmt> {
        Node::new(Stmt {kind, line})
    }
}


#[derive(Debug, PartialEq)]
pub enum StmtKind {
    Let {
        name: String,
        mutable: bool,
        ann: Option<Type>,
        init: Node<Expr>,
    },
    Expr(Node<Expr>),
    Return(Option<Node<Expr>>),
    Break,
    Continue,
}


#[derive(Debug, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<(String, Type)>,
    pub ret: Type,
    pub body: Node<Expr>,
    pub line: u32,
}


impl Function {
    // The function's full signature as a type, used by the crate
    // scope pre-scan.
    pub fn signature(&self) -> Type {
        let params = self.params
            .iter()
            .map(|(name, ty)| (name.clone(), Node::new(ty.clone())))
            .collect();
        Type::Fn(params, Node::new(self.ret.clone()))
    }
}


#[derive(Debug, PartialEq)]
pub struct Crate {
    pub functions: Vec<Node<Function>>,
}
