use std::fmt;

use serde::{Deserialize, Serialize};

use crate::token::{Literal, Token};

pub use crate::token::Span;

/// Expression nodes. Immutable once parsed; the resolver and interpreter
/// walk them by shared reference. Name and keyword tokens carry the spans
/// the resolver uses to attach binding distances without mutating the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal {
        value: Literal,
    },
    Grouping {
        expression: Box<Expr>,
    },
    Unary {
        operator: Token,
        right: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        operator: Token,
        right: Box<Expr>,
    },
    Logical {
        left: Box<Expr>,
        operator: Token,
        right: Box<Expr>,
    },
    Variable {
        name: Token,
    },
    Assign {
        name: Token,
        value: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        /// Closing paren, used to attribute call-site errors.
        paren: Token,
        arguments: Vec<Expr>,
    },
    Get {
        object: Box<Expr>,
        name: Token,
    },
    Set {
        object: Box<Expr>,
        name: Token,
        value: Box<Expr>,
    },
    This {
        keyword: Token,
    },
    Super {
        keyword: Token,
        method: Token,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Expression {
        expression: Expr,
        span: Span,
    },
    Print {
        expression: Expr,
        span: Span,
    },
    Var {
        name: Token,
        initializer: Option<Expr>,
        span: Span,
    },
    Block {
        statements: Vec<Stmt>,
        span: Span,
    },
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
        span: Span,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
        span: Span,
    },
    Break {
        keyword: Token,
    },
    Function {
        name: Token,
        params: Vec<Token>,
        body: Vec<Stmt>,
        span: Span,
    },
    Return {
        keyword: Token,
        value: Option<Expr>,
        span: Span,
    },
    Class {
        name: Token,
        /// Always an `Expr::Variable` naming the superclass when present.
        superclass: Option<Expr>,
        /// Always `Stmt::Function` entries.
        methods: Vec<Stmt>,
        span: Span,
    },
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal { value } => write!(f, "{}", value),
            Expr::Grouping { expression } => write!(f, "(group {})", expression),
            Expr::Unary { operator, right } => write!(f, "({} {})", operator.lexeme, right),
            Expr::Binary {
                left,
                operator,
                right,
            }
            | Expr::Logical {
                left,
                operator,
                right,
            } => write!(f, "({} {} {})", operator.lexeme, left, right),
            Expr::Variable { name } => write!(f, "{}", name.lexeme),
            Expr::Assign { name, value } => write!(f, "(= {} {})", name.lexeme, value),
            Expr::Call {
                callee, arguments, ..
            } => {
                write!(f, "(call {}", callee)?;
                for arg in arguments {
                    write!(f, " {}", arg)?;
                }
                write!(f, ")")
            }
            Expr::Get { object, name } => write!(f, "(. {} {})", object, name.lexeme),
            Expr::Set {
                object,
                name,
                value,
            } => write!(f, "(.= {} {} {})", object, name.lexeme, value),
            Expr::This { .. } => write!(f, "this"),
            Expr::Super { method, .. } => write!(f, "(super {})", method.lexeme),
        }
    }
}
