use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Chain {
        base: Box<Base>,
        suffixes: Vec<Suffix>,
    },
    Pipe(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Base {
    Identity,
    Literal(Value),
    RawString(String),
    FunctionCall(String, Vec<Expr>),
    Paren(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Suffix {
    Field(String),
    Index(i64),
    Wildcard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}
