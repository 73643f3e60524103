// Thin wrapper over the generated parser: byte offsets become line
// numbers here, and lalrpop's ParseError becomes the surfaced
// syntax-error string.

use lalrpop_util::ParseError;
use lalrpop_util::lexer::Token;

use crate::ast::Crate;
use crate::grammar;


// Byte offset to 1-based line/column translation, built once per
// source text and threaded through the grammar actions.
pub struct LineMap {
    starts: Vec<usize>,
}


impl LineMap {
    pub fn new(source: &str) -> LineMap {
        let mut starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                starts.push(i + 1);
            }
        }
        LineMap {starts}
    }

    pub fn line(&self, offset: usize) -> u32 {
        match self.starts.binary_search(&offset) {
            Ok(ix) => ix as u32 + 1,
            Err(ix) => ix as u32,
        }
    }

    pub fn line_col(&self, offset: usize) -> (u32, u32) {
        let line = self.line(offset);
        let col = offset - self.starts[line as usize - 1] + 1;
        (line, col as u32)
    }
}


pub fn parse(source: &str) -> Result<Crate, String> {
    let lines = LineMap::new(source);
    grammar::CrateParser::new()
        .parse(&lines, source)
        .map_err(|e| render(&lines, e))
}


fn at(lines: &LineMap, offset: usize) -> String {
    let (line, col) = lines.line_col(offset);
    format!("line {}:{}", line, col)
}

fn expecting(expected: &[String]) -> String {
    if expected.is_empty() {
        String::new()
    } else {
        format!(" expecting {}", expected.join(", "))
    }
}

fn render(
    lines: &LineMap,
    error: ParseError<usize, Token, String>
) -> String {
    match error {
        ParseError::InvalidToken {location} => {
            format!("{} invalid token", at(lines, location))
        },
        ParseError::UnrecognizedEOF {location, expected} => {
            format!(
                "{} unexpected end of input{}",
                at(lines, location),
                expecting(&expected)
            )
        },
        ParseError::UnrecognizedToken {token: (lo, tok, _), expected} => {
            format!(
                "{} mismatched input '{}'{}",
                at(lines, lo),
                tok,
                expecting(&expected)
            )
        },
        ParseError::ExtraToken {token: (lo, tok, _)} => {
            format!("{} extraneous input '{}'", at(lines, lo), tok)
        },
        ParseError::User {error} => error,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use BinOp::*;

    fn ex(kind: ExprKind) -> Node<Expr> {
        Expr::new(kind, 1)
    }

    fn int(n: i32) -> Node<Expr> {
        ex(ExprKind::Int(n))
    }

    fn id(name: &str) -> Node<Expr> {
        ex(ExprKind::Path(String::from(name)))
    }

    fn bin(op: BinOp, l: Node<Expr>, r: Node<Expr>) -> Node<Expr> {
        ex(ExprKind::Binary(op, l, r))
    }

    fn assert_parses_to(text: &'static str, ast: Node<Expr>) {
        let lines = LineMap::new(text);
        assert_eq!(
            grammar::ExprParser::new().parse(&lines, text).unwrap(),
            ast
        );
    }

    #[test]
    fn test_terms() {
        assert_parses_to("42", int(42));
        assert_parses_to("(42)", int(42));
        assert_parses_to("true", ex(ExprKind::Bool(true)));
        assert_parses_to("false", ex(ExprKind::Bool(false)));
        assert_parses_to("foo", id("foo"));
    }

    #[test]
    fn test_precedence() {
        assert_parses_to("3 + 4 * 2", bin(
            Add,
            int(3),
            bin(Mul, int(4), int(2))
        ));

        assert_parses_to("(3 + 4) * 2", bin(
            Mul,
            bin(Add, int(3), int(4)),
            int(2)
        ));

        assert_parses_to("10 % 4 - 1", bin(
            Sub,
            bin(Mod, int(10), int(4)),
            int(1)
        ));
    }

    #[test]
    fn test_relational() {
        assert_parses_to("3 + 4 < 3 * 4", bin(
            Lt,
            bin(Add, int(3), int(4)),
            bin(Mul, int(3), int(4))
        ));

        assert_parses_to("3 + 4 >= 3 * 4", bin(
            Gte,
            bin(Add, int(3), int(4)),
            bin(Mul, int(3), int(4))
        ));

        assert_parses_to("x == 0", bin(Eq, id("x"), int(0)));
        assert_parses_to("x != 0", bin(Ne, id("x"), int(0)));
    }

    #[test]
    fn test_logical() {
        assert_parses_to("a && b || c", bin(
            Or,
            bin(And, id("a"), id("b")),
            id("c")
        ));
        assert_parses_to("!a", ex(ExprKind::Unary(UnOp::Not, id("a"))));
    }

    #[test]
    fn test_unary_and_borrows() {
        assert_parses_to("-x", ex(ExprKind::Unary(UnOp::Neg, id("x"))));
        assert_parses_to("*p", ex(ExprKind::Deref(id("p"))));
        assert_parses_to("**p", ex(
            ExprKind::Deref(ex(ExprKind::Deref(id("p"))))
        ));
        assert_parses_to("&x", ex(
            ExprKind::Borrow(RefKind::Shared, id("x"))
        ));
        assert_parses_to("&mut x", ex(
            ExprKind::Borrow(RefKind::Mut, id("x"))
        ));
        assert_parses_to("&mut *p", ex(ExprKind::Borrow(
            RefKind::Mut,
            ex(ExprKind::Deref(id("p")))
        )));
        assert_parses_to("*a + 1", bin(
            Add,
            ex(ExprKind::Deref(id("a"))),
            int(1)
        ));
    }

    #[test]
    fn test_calls() {
        assert_parses_to("f()", ex(ExprKind::Call(id("f"), vec![])));
        assert_parses_to("add(a, b)", ex(ExprKind::Call(
            id("add"),
            vec![id("a"), id("b")]
        )));
        assert_parses_to("add(x + 1, y - 1)", ex(ExprKind::Call(
            id("add"),
            vec![
                bin(Add, id("x"), int(1)),
                bin(Sub, id("y"), int(1)),
            ]
        )));
    }

    #[test]
    fn test_box_new() {
        assert_parses_to("Box::new(32)", ex(ExprKind::BoxNew(int(32))));
        assert_parses_to("Box::new(x + 1)", ex(ExprKind::BoxNew(
            bin(Add, id("x"), int(1))
        )));
    }

    #[test]
    fn test_assignment() {
        assert_parses_to("x = 2", ex(ExprKind::Assign(id("x"), int(2))));
        assert_parses_to("*r = 2", ex(ExprKind::Assign(
            ex(ExprKind::Deref(id("r"))),
            int(2)
        )));
    }

    #[test]
    fn test_if_else_chain() {
        assert_parses_to("if c { 1 } else { 2 }", ex(ExprKind::If(
            id("c"),
            ex(ExprKind::Block(vec![], Some(int(1)))),
            Some(ex(ExprKind::Block(vec![], Some(int(2)))))
        )));

        assert_parses_to("if a { 1 } else if b { 2 } else { 3 }", ex(
            ExprKind::If(
                id("a"),
                ex(ExprKind::Block(vec![], Some(int(1)))),
                Some(ex(ExprKind::If(
                    id("b"),
                    ex(ExprKind::Block(vec![], Some(int(2)))),
                    Some(ex(ExprKind::Block(vec![], Some(int(3)))))
                )))
            )
        ));

        assert_parses_to("if c { 1 }", ex(ExprKind::If(
            id("c"),
            ex(ExprKind::Block(vec![], Some(int(1)))),
            None
        )));
    }

    #[test]
    fn test_match() {
        assert_parses_to("match x { 0 => 1, _ => 2 }", ex(ExprKind::Match(
            id("x"),
            vec![
                (Pattern::Int(0), int(1)),
                (Pattern::Wildcard, int(2)),
            ]
        )));

        assert_parses_to("match b { true => 1, other => 2, }", ex(
            ExprKind::Match(
                id("b"),
                vec![
                    (Pattern::Bool(true), int(1)),
                    (Pattern::Bind(String::from("other")), int(2)),
                ]
            )
        ));
    }

    #[test]
    fn test_crate_and_statements() {
        let src = "\
fn add(x: i32, y: i32) -> i32 {
    let mut z: i32 = x;
    z = z + y;
    z
}
fn main() { displayi32(add(1, 2)); }
";
        let krate = parse(src).unwrap();
        assert_eq!(krate.functions.len(), 2);

        let add = &krate.functions[0];
        assert_eq!(add.name, "add");
        assert_eq!(add.line, 1);
        assert_eq!(add.params, vec![
            (String::from("x"), Type::I32),
            (String::from("y"), Type::I32),
        ]);
        assert_eq!(add.ret, Type::I32);
        match &add.body.kind {
            ExprKind::Block(stmts, Some(tail)) => {
                assert_eq!(stmts.len(), 2);
                assert_eq!(stmts[0].line, 2);
                match &stmts[0].kind {
                    StmtKind::Let {name, mutable, ann, ..} => {
                        assert_eq!(name, "z");
                        assert!(*mutable);
                        assert_eq!(ann, &Some(Type::I32));
                    },
                    other => panic!("expected let, got {:?}", other),
                }
                assert_eq!(tail, &id("z"));
            },
            other => panic!("expected block, got {:?}", other),
        }

        let main = &krate.functions[1];
        assert_eq!(main.ret, Type::Unit);
        assert_eq!(main.line, 6);
    }

    #[test]
    fn test_types() {
        let src = "fn f(a: &i32, b: &mut bool, c: Box<Box<u32>>, d: ()) {}";
        let krate = parse(src).unwrap();
        assert_eq!(krate.functions[0].params, vec![
            (String::from("a"), Type::Ref(Node::new(Type::I32))),
            (String::from("b"), Type::RefMut(Node::new(Type::Bool))),
            (String::from("c"), Type::Boxed(Node::new(
                Type::Boxed(Node::new(Type::U32))
            ))),
            (String::from("d"), Type::Unit),
        ]);
    }

    #[test]
    fn test_let_without_annotation_parses() {
        // rejected later by the type checker, not here
        let krate = parse("fn main() { let a = 32; }").unwrap();
        match &krate.functions[0].body.kind {
            ExprKind::Block(stmts, None) => match &stmts[0].kind {
                StmtKind::Let {ann, ..} => assert_eq!(ann, &None),
                other => panic!("expected let, got {:?}", other),
            },
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn test_syntax_errors() {
        let err = parse("fn main() { let x: i32 = ; }").unwrap_err();
        assert!(err.contains("line 1:26"), "got: {}", err);
        assert!(err.contains("mismatched input ';'"), "got: {}", err);

        let err = parse("fn main() { displayi32(1) }\nfn f(").unwrap_err();
        assert!(err.starts_with("line"), "got: {}", err);

        let err = parse("fn main() { let n: i32 = 99999999999; }")
            .unwrap_err();
        assert!(err.contains("out of range"), "got: {}", err);
    }

    #[test]
    fn test_line_map() {
        let lines = LineMap::new("ab\ncd\n\nef");
        assert_eq!(lines.line(0), 1);
        assert_eq!(lines.line(1), 1);
        assert_eq!(lines.line(3), 2);
        assert_eq!(lines.line(6), 3);
        assert_eq!(lines.line(7), 4);
        assert_eq!(lines.line_col(4), (2, 2));
    }
}
