use serde::{Deserialize, Serialize};

use crate::ast::Stmt;
use crate::error::RillError;

/// Bump when the AST layout changes in a way old images cannot survive.
pub const IMAGE_VERSION: u32 = 1;

/// A parsed and statically checked program, ready to be written to disk
/// and executed later. Images carry the syntax tree only; binding
/// distances are recomputed on load, so an image never encodes stale
/// scope information.
#[derive(Debug, Serialize, Deserialize)]
pub struct Program {
    version: u32,
    statements: Vec<Stmt>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self {
            version: IMAGE_VERSION,
            statements,
        }
    }

    pub fn statements(&self) -> &[Stmt] {
        &self.statements
    }

    pub fn to_json(&self) -> Result<String, RillError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, RillError> {
        let program: Program = serde_json::from_str(json)?;
        if program.version != IMAGE_VERSION {
            return Err(RillError::ImageVersion {
                found: program.version,
                expected: IMAGE_VERSION,
            });
        }
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::scanner::Scanner;
    use crate::token::Token;

    fn parse(source: &str) -> Vec<Stmt> {
        let tokens: Vec<Token> = Scanner::new(source).map(|r| r.unwrap()).collect();
        let mut parser = Parser::new(tokens);
        let statements = parser.parse();
        assert!(parser.take_errors().is_empty());
        statements
    }

    #[test]
    fn image_round_trips_statements() {
        let statements = parse("fn add(a, b) { return a + b; } print add(1, 2);");
        let program = Program::new(statements.clone());
        let json = program.to_json().unwrap();
        let back = Program::from_json(&json).unwrap();
        assert_eq!(back.statements(), statements.as_slice());
    }

    #[test]
    fn garbage_input_is_an_image_error() {
        let err = Program::from_json("not json").unwrap_err();
        assert!(matches!(err, RillError::Image(_)));
    }

    #[test]
    fn truncated_image_is_an_image_error() {
        let statements = parse("print 1;");
        let json = Program::new(statements).to_json().unwrap();
        let err = Program::from_json(&json[..json.len() / 2]).unwrap_err();
        assert!(matches!(err, RillError::Image(_)));
    }

    #[test]
    fn future_version_is_rejected() {
        let json = format!(
            "{{\"version\":{},\"statements\":[]}}",
            IMAGE_VERSION + 1
        );
        let err = Program::from_json(&json).unwrap_err();
        assert!(matches!(
            err,
            RillError::ImageVersion {
                expected: IMAGE_VERSION,
                ..
            }
        ));
    }
}
