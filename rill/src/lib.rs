//! Rill is a small dynamically typed scripting language with lexical
//! scoping, first-class functions, closures and single-inheritance
//! classes. The pipeline is a scanner, a recursive descent parser, a
//! static resolver that precomputes binding distances, and a tree
//! walking interpreter.
//!
//! ```
//! use rill::Rill;
//!
//! let mut rill = Rill::new();
//! let mut output = Vec::new();
//! let errors = rill.run("print 1 + 2;", &mut output);
//! assert!(errors.is_empty());
//! assert_eq!(output, b"3\n");
//! ```

use std::io::Write;

pub mod ast;
pub mod environment;
pub mod error;
pub mod interpreter;
pub mod parser;
pub mod program;
pub mod resolver;
pub mod scanner;
pub mod token;
pub mod value;

pub use ast::{Expr, Stmt};
pub use error::{RillError, RuntimeErrorKind, ScopeErrorKind};
pub use interpreter::{Interpreter, NATIVES};
pub use parser::Parser;
pub use program::Program;
pub use resolver::{Resolutions, Resolver};
pub use scanner::Scanner;
pub use token::{Literal, Span, Token, TokenType};
pub use value::Value;

/// The whole pipeline behind one entry point. Holds interpreter state
/// across runs, so a REPL keeps its globals from line to line.
#[derive(Default)]
pub struct Rill {
    interpreter: Interpreter,
}

impl Rill {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan, parse and statically check a source text without running
    /// it. This is the front half of `run`; the compile path uses it to
    /// build a program image.
    pub fn parse(source: &str) -> Result<Vec<Stmt>, Vec<RillError>> {
        let mut errors = Vec::new();
        let mut tokens = Vec::new();
        for result in Scanner::new(source) {
            match result {
                Ok(token) => tokens.push(token),
                Err(error) => errors.push(error),
            }
        }

        let mut parser = Parser::new(tokens);
        let statements = parser.parse();
        errors.extend(parser.take_errors());
        if !errors.is_empty() {
            return Err(errors);
        }

        if let Err(scope_errors) = Resolver::new().resolve(&statements) {
            return Err(scope_errors);
        }

        Ok(statements)
    }

    /// Run a source text. Nothing executes unless scanning, parsing and
    /// resolution all succeed; execution stops at the first runtime
    /// error. All errors come back in one list.
    pub fn run(&mut self, source: &str, output: &mut dyn Write) -> Vec<RillError> {
        let mut errors = Vec::new();
        let mut tokens = Vec::new();
        for result in Scanner::new(source) {
            match result {
                Ok(token) => tokens.push(token),
                Err(error) => errors.push(error),
            }
        }

        let mut parser = Parser::new(tokens);
        let statements = parser.parse();
        errors.extend(parser.take_errors());
        if !errors.is_empty() {
            return errors;
        }

        let resolutions = match Resolver::new().resolve(&statements) {
            Ok(resolutions) => resolutions,
            Err(errors) => return errors,
        };

        self.run_resolved(&statements, resolutions, output)
    }

    /// Run a deserialized program image. Binding distances are always
    /// recomputed here; images never carry them.
    pub fn run_program(&mut self, program: &Program, output: &mut dyn Write) -> Vec<RillError> {
        let resolutions = match Resolver::new().resolve(program.statements()) {
            Ok(resolutions) => resolutions,
            Err(errors) => return errors,
        };
        self.run_resolved(program.statements(), resolutions, output)
    }

    fn run_resolved(
        &mut self,
        statements: &[Stmt],
        resolutions: Resolutions,
        output: &mut dyn Write,
    ) -> Vec<RillError> {
        self.interpreter.set_resolutions(resolutions);
        match self.interpreter.interpret(statements, output) {
            Ok(()) => Vec::new(),
            Err(error) => vec![error],
        }
    }
}
