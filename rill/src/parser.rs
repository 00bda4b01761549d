use crate::ast::{Expr, Stmt};
use crate::error::RillError;
use crate::token::{Literal, Token, TokenType};

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    errors: Vec<RillError>,
    loop_depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            errors: Vec::new(),
            loop_depth: 0,
        }
    }

    /// Parse the whole token stream. Statements that failed to parse are
    /// dropped after synchronization; the errors are kept for `take_errors`.
    pub fn parse(&mut self) -> Vec<Stmt> {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            if let Some(stmt) = self.declaration() {
                statements.push(stmt);
            }
        }
        statements
    }

    pub fn take_errors(&mut self) -> Vec<RillError> {
        std::mem::take(&mut self.errors)
    }

    fn declaration(&mut self) -> Option<Stmt> {
        let result = if self.match_types(&[TokenType::Class]) {
            self.class_declaration()
        } else if self.match_types(&[TokenType::Fn]) {
            self.function("function")
        } else if self.match_types(&[TokenType::Var]) {
            self.var_declaration()
        } else {
            self.statement()
        };

        match result {
            Ok(stmt) => Some(stmt),
            Err(e) => {
                self.errors.push(e);
                self.synchronize();
                None
            }
        }
    }

    fn class_declaration(&mut self) -> Result<Stmt, RillError> {
        let start = self.previous().span.start;
        let name = self
            .consume(TokenType::Identifier, "expected class name")?
            .clone();

        let superclass = if self.match_types(&[TokenType::Less]) {
            let super_name = self
                .consume(TokenType::Identifier, "expected superclass name")?
                .clone();
            Some(Expr::Variable { name: super_name })
        } else {
            None
        };

        self.consume(TokenType::LeftBrace, "expected '{' before class body")?;

        let mut methods = Vec::new();
        while !self.check(&TokenType::RightBrace) && !self.is_at_end() {
            methods.push(self.function("method")?);
        }

        let closing = self.consume(TokenType::RightBrace, "expected '}' after class body")?;
        let end = closing.span.end;

        Ok(Stmt::Class {
            name,
            superclass,
            methods,
            span: start..end,
        })
    }

    fn function(&mut self, kind: &str) -> Result<Stmt, RillError> {
        let start = self.previous().span.start;
        let name = self
            .consume(TokenType::Identifier, &format!("expected {} name", kind))?
            .clone();
        self.consume(
            TokenType::LeftParen,
            &format!("expected '(' after {} name", kind),
        )?;

        let mut params = Vec::new();
        if !self.check(&TokenType::RightParen) {
            loop {
                params.push(
                    self.consume(TokenType::Identifier, "expected parameter name")?
                        .clone(),
                );
                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "expected ')' after parameters")?;

        self.consume(
            TokenType::LeftBrace,
            &format!("expected '{{' before {} body", kind),
        )?;

        // A break cannot escape a function boundary, even when the
        // declaration sits inside a loop.
        let enclosing_loop_depth = std::mem::replace(&mut self.loop_depth, 0);
        let body_result = self.block();
        self.loop_depth = enclosing_loop_depth;

        let Stmt::Block { statements, span } = body_result? else {
            unreachable!("block() always returns Stmt::Block")
        };

        Ok(Stmt::Function {
            name,
            params,
            body: statements,
            span: start..span.end,
        })
    }

    fn var_declaration(&mut self) -> Result<Stmt, RillError> {
        let start = self.previous().span.start;
        let name = self
            .consume(TokenType::Identifier, "expected variable name")?
            .clone();

        let initializer = if self.match_types(&[TokenType::Equal]) {
            Some(self.expression()?)
        } else {
            None
        };

        let semi = self.consume(
            TokenType::Semicolon,
            "expected ';' after variable declaration",
        )?;
        let end = semi.span.end;
        Ok(Stmt::Var {
            name,
            initializer,
            span: start..end,
        })
    }

    fn statement(&mut self) -> Result<Stmt, RillError> {
        if self.match_types(&[TokenType::Break]) {
            self.break_statement()
        } else if self.match_types(&[TokenType::For]) {
            self.for_statement()
        } else if self.match_types(&[TokenType::If]) {
            self.if_statement()
        } else if self.match_types(&[TokenType::While]) {
            self.while_statement()
        } else if self.match_types(&[TokenType::Return]) {
            self.return_statement()
        } else if self.match_types(&[TokenType::LeftBrace]) {
            self.block()
        } else if self.match_types(&[TokenType::Print]) {
            self.print_statement()
        } else {
            self.expression_statement()
        }
    }

    fn break_statement(&mut self) -> Result<Stmt, RillError> {
        let keyword = self.previous().clone();
        if self.loop_depth == 0 {
            return Err(RillError::Parse {
                message: "'break' outside of a loop".to_string(),
                span: keyword.span,
            });
        }
        self.consume(TokenType::Semicolon, "expected ';' after 'break'")?;
        Ok(Stmt::Break { keyword })
    }

    fn return_statement(&mut self) -> Result<Stmt, RillError> {
        let keyword = self.previous().clone();
        let start = keyword.span.start;

        let value = if self.check(&TokenType::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };

        let semi = self.consume(TokenType::Semicolon, "expected ';' after return value")?;
        let end = semi.span.end;
        Ok(Stmt::Return {
            keyword,
            value,
            span: start..end,
        })
    }

    fn for_statement(&mut self) -> Result<Stmt, RillError> {
        let start = self.previous().span.start;
        self.consume(TokenType::LeftParen, "expected '(' after 'for'")?;

        let initializer = if self.match_types(&[TokenType::Semicolon]) {
            None
        } else if self.match_types(&[TokenType::Var]) {
            Some(self.var_declaration()?)
        } else {
            Some(self.expression_statement()?)
        };

        let condition = if self.check(&TokenType::Semicolon) {
            Expr::Literal {
                value: Literal::Bool(true),
            }
        } else {
            self.expression()?
        };
        self.consume(TokenType::Semicolon, "expected ';' after loop condition")?;

        let increment = if self.check(&TokenType::RightParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenType::RightParen, "expected ')' after for clauses")?;

        self.loop_depth += 1;
        let body_result = self.statement();
        self.loop_depth -= 1;
        let mut body = body_result?;
        let end = self.previous().span.end;

        // Desugar into the while form the rest of the pipeline understands
        if let Some(inc) = increment {
            body = Stmt::Block {
                statements: vec![
                    body,
                    Stmt::Expression {
                        expression: inc,
                        span: 0..0,
                    },
                ],
                span: 0..0,
            };
        }

        body = Stmt::While {
            condition,
            body: Box::new(body),
            span: 0..0,
        };

        if let Some(init) = initializer {
            body = Stmt::Block {
                statements: vec![init, body],
                span: start..end,
            };
        }

        Ok(body)
    }

    fn while_statement(&mut self) -> Result<Stmt, RillError> {
        let start = self.previous().span.start;
        self.consume(TokenType::LeftParen, "expected '(' after 'while'")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "expected ')' after condition")?;

        self.loop_depth += 1;
        let body_result = self.statement();
        self.loop_depth -= 1;
        let body = Box::new(body_result?);
        let end = self.previous().span.end;

        Ok(Stmt::While {
            condition,
            body,
            span: start..end,
        })
    }

    fn if_statement(&mut self) -> Result<Stmt, RillError> {
        let start = self.previous().span.start;
        self.consume(TokenType::LeftParen, "expected '(' after 'if'")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "expected ')' after condition")?;

        let then_branch = Box::new(self.statement()?);
        let mut end = self.previous().span.end;
        let else_branch = if self.match_types(&[TokenType::Else]) {
            let body = self.statement()?;
            end = self.previous().span.end;
            Some(Box::new(body))
        } else {
            None
        };

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
            span: start..end,
        })
    }

    fn block(&mut self) -> Result<Stmt, RillError> {
        let start = self.previous().span.start;
        let mut statements = Vec::new();

        while !self.check(&TokenType::RightBrace) && !self.is_at_end() {
            if let Some(stmt) = self.declaration() {
                statements.push(stmt);
            }
        }

        let closing = self.consume(TokenType::RightBrace, "expected '}' after block")?;
        let end = closing.span.end;
        Ok(Stmt::Block {
            statements,
            span: start..end,
        })
    }

    fn print_statement(&mut self) -> Result<Stmt, RillError> {
        let start = self.previous().span.start;
        let expression = self.expression()?;
        let semi = self.consume(TokenType::Semicolon, "expected ';' after value")?;
        let end = semi.span.end;
        Ok(Stmt::Print {
            expression,
            span: start..end,
        })
    }

    fn expression_statement(&mut self) -> Result<Stmt, RillError> {
        let start = self.peek().span.start;
        let expression = self.expression()?;
        let semi = self.consume(TokenType::Semicolon, "expected ';' after expression")?;
        let end = semi.span.end;
        Ok(Stmt::Expression {
            expression,
            span: start..end,
        })
    }

    fn expression(&mut self) -> Result<Expr, RillError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, RillError> {
        let expr = self.or()?;

        if self.match_types(&[TokenType::Equal]) {
            let equals = self.previous().clone();
            let value = self.assignment()?;

            return match expr {
                Expr::Variable { name } => Ok(Expr::Assign {
                    name,
                    value: Box::new(value),
                }),
                Expr::Get { object, name } => Ok(Expr::Set {
                    object,
                    name,
                    value: Box::new(value),
                }),
                _ => Err(RillError::Parse {
                    message: "invalid assignment target".to_string(),
                    span: equals.span,
                }),
            };
        }

        Ok(expr)
    }

    fn or(&mut self) -> Result<Expr, RillError> {
        let mut expr = self.and()?;

        while self.match_types(&[TokenType::Or]) {
            let operator = self.previous().clone();
            let right = self.and()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn and(&mut self) -> Result<Expr, RillError> {
        let mut expr = self.equality()?;

        while self.match_types(&[TokenType::And]) {
            let operator = self.previous().clone();
            let right = self.equality()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn equality(&mut self) -> Result<Expr, RillError> {
        let mut expr = self.comparison()?;

        while self.match_types(&[TokenType::BangEqual, TokenType::EqualEqual]) {
            let operator = self.previous().clone();
            let right = self.comparison()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn comparison(&mut self) -> Result<Expr, RillError> {
        let mut expr = self.term()?;

        while self.match_types(&[
            TokenType::Greater,
            TokenType::GreaterEqual,
            TokenType::Less,
            TokenType::LessEqual,
        ]) {
            let operator = self.previous().clone();
            let right = self.term()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn term(&mut self) -> Result<Expr, RillError> {
        let mut expr = self.factor()?;

        while self.match_types(&[TokenType::Minus, TokenType::Plus, TokenType::PlusPlus]) {
            let operator = self.previous().clone();
            let right = self.factor()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn factor(&mut self) -> Result<Expr, RillError> {
        let mut expr = self.unary()?;

        while self.match_types(&[TokenType::Slash, TokenType::Star]) {
            let operator = self.previous().clone();
            let right = self.unary()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr, RillError> {
        if self.match_types(&[TokenType::Bang, TokenType::Minus]) {
            let operator = self.previous().clone();
            let right = self.unary()?;
            return Ok(Expr::Unary {
                operator,
                right: Box::new(right),
            });
        }

        self.call()
    }

    fn call(&mut self) -> Result<Expr, RillError> {
        let mut expr = self.primary()?;

        loop {
            if self.match_types(&[TokenType::LeftParen]) {
                expr = self.finish_call(expr)?;
            } else if self.match_types(&[TokenType::Dot]) {
                let name = self
                    .consume(TokenType::Identifier, "expected property name after '.'")?
                    .clone();
                expr = Expr::Get {
                    object: Box::new(expr),
                    name,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> Result<Expr, RillError> {
        let mut arguments = Vec::new();
        if !self.check(&TokenType::RightParen) {
            loop {
                arguments.push(self.expression()?);
                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
            }
        }

        let paren = self
            .consume(TokenType::RightParen, "expected ')' after arguments")?
            .clone();

        Ok(Expr::Call {
            callee: Box::new(callee),
            paren,
            arguments,
        })
    }

    fn primary(&mut self) -> Result<Expr, RillError> {
        if self.match_types(&[TokenType::False]) {
            return Ok(Expr::Literal {
                value: Literal::Bool(false),
            });
        }
        if self.match_types(&[TokenType::True]) {
            return Ok(Expr::Literal {
                value: Literal::Bool(true),
            });
        }
        if self.match_types(&[TokenType::Nil]) {
            return Ok(Expr::Literal {
                value: Literal::Nil,
            });
        }

        if self.match_types(&[TokenType::Number, TokenType::String]) {
            let token = self.previous();
            return match token.literal.clone() {
                Some(value) => Ok(Expr::Literal { value }),
                None => Err(RillError::Parse {
                    message: "literal token is missing its value".to_string(),
                    span: token.span.clone(),
                }),
            };
        }

        if self.match_types(&[TokenType::This]) {
            return Ok(Expr::This {
                keyword: self.previous().clone(),
            });
        }

        if self.match_types(&[TokenType::Super]) {
            let keyword = self.previous().clone();
            self.consume(TokenType::Dot, "expected '.' after 'super'")?;
            let method = self
                .consume(TokenType::Identifier, "expected superclass method name")?
                .clone();
            return Ok(Expr::Super { keyword, method });
        }

        if self.match_types(&[TokenType::Identifier]) {
            return Ok(Expr::Variable {
                name: self.previous().clone(),
            });
        }

        if self.match_types(&[TokenType::LeftParen]) {
            let expr = self.expression()?;
            self.consume(TokenType::RightParen, "expected ')' after expression")?;
            return Ok(Expr::Grouping {
                expression: Box::new(expr),
            });
        }

        let token = self.peek();
        Err(RillError::Parse {
            message: "expected expression".to_string(),
            span: token.span.clone(),
        })
    }

    fn synchronize(&mut self) {
        self.advance();

        while !self.is_at_end() {
            if self.previous().token_type == TokenType::Semicolon {
                return;
            }

            match self.peek().token_type {
                TokenType::Class
                | TokenType::Fn
                | TokenType::Var
                | TokenType::For
                | TokenType::If
                | TokenType::While
                | TokenType::Print
                | TokenType::Return
                | TokenType::Break => return,
                _ => {}
            }

            self.advance();
        }
    }

    fn match_types(&mut self, types: &[TokenType]) -> bool {
        for token_type in types {
            if self.check(token_type) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn consume(&mut self, token_type: TokenType, message: &str) -> Result<&Token, RillError> {
        if self.check(&token_type) {
            return Ok(self.advance());
        }

        let token = self.peek();
        Err(RillError::Parse {
            message: message.to_string(),
            span: token.span.clone(),
        })
    }

    fn check(&self, token_type: &TokenType) -> bool {
        !self.is_at_end() && self.peek().token_type == *token_type
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn is_at_end(&self) -> bool {
        self.peek().token_type == TokenType::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Scanner;

    fn parse(source: &str) -> (Vec<Stmt>, Vec<RillError>) {
        let tokens: Vec<Token> = Scanner::new(source).map(|r| r.unwrap()).collect();
        let mut parser = Parser::new(tokens);
        let statements = parser.parse();
        (statements, parser.take_errors())
    }

    fn parse_ok(source: &str) -> Vec<Stmt> {
        let (statements, errors) = parse(source);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        statements
    }

    #[test]
    fn parses_print_statement() {
        let statements = parse_ok("print 1 + 2;");
        assert_eq!(statements.len(), 1);
        let Stmt::Print { expression, .. } = &statements[0] else {
            panic!("expected print statement");
        };
        assert_eq!(expression.to_string(), "(+ 1 2)");
    }

    #[test]
    fn arithmetic_precedence_binds_factor_over_term() {
        let statements = parse_ok("print 1 + 2 * 3;");
        let Stmt::Print { expression, .. } = &statements[0] else {
            panic!("expected print statement");
        };
        assert_eq!(expression.to_string(), "(+ 1 (* 2 3))");
    }

    #[test]
    fn concat_operator_parses_as_term() {
        let statements = parse_ok("print \"a\" ++ 1;");
        let Stmt::Print { expression, .. } = &statements[0] else {
            panic!("expected print statement");
        };
        assert_eq!(expression.to_string(), "(++ a 1)");
    }

    #[test]
    fn parses_var_declaration_without_initializer() {
        let statements = parse_ok("var x;");
        assert!(matches!(
            &statements[0],
            Stmt::Var {
                initializer: None,
                ..
            }
        ));
    }

    #[test]
    fn parses_assignment_to_variable() {
        let statements = parse_ok("x = 1;");
        let Stmt::Expression { expression, .. } = &statements[0] else {
            panic!("expected expression statement");
        };
        assert_eq!(expression.to_string(), "(= x 1)");
    }

    #[test]
    fn assignment_to_literal_is_an_error() {
        let (_, errors) = parse("1 = 2;");
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], RillError::Parse { .. }));
    }

    #[test]
    fn property_assignment_becomes_set() {
        let statements = parse_ok("point.x = 1;");
        let Stmt::Expression { expression, .. } = &statements[0] else {
            panic!("expected expression statement");
        };
        assert_eq!(expression.to_string(), "(.= point x 1)");
    }

    #[test]
    fn parses_if_with_else() {
        let statements = parse_ok("if (true) print 1; else print 2;");
        assert!(matches!(
            &statements[0],
            Stmt::If {
                else_branch: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn parses_while_loop_with_break() {
        let statements = parse_ok("while (true) { break; }");
        let Stmt::While { body, .. } = &statements[0] else {
            panic!("expected while statement");
        };
        let Stmt::Block { statements, .. } = body.as_ref() else {
            panic!("expected block body");
        };
        assert!(matches!(statements[0], Stmt::Break { .. }));
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let (_, errors) = parse("break;");
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], RillError::Parse { .. }));
    }

    #[test]
    fn break_inside_function_inside_loop_is_an_error() {
        let (_, errors) = parse("while (true) { fn f() { break; } f(); }");
        assert!(!errors.is_empty());
    }

    #[test]
    fn for_loop_desugars_to_while() {
        let statements = parse_ok("for (var i = 0; i < 3; i = i + 1) print i;");
        let Stmt::Block { statements, .. } = &statements[0] else {
            panic!("expected desugared outer block");
        };
        assert!(matches!(statements[0], Stmt::Var { .. }));
        assert!(matches!(statements[1], Stmt::While { .. }));
    }

    #[test]
    fn parses_function_declaration() {
        let statements = parse_ok("fn add(a, b) { return a + b; }");
        let Stmt::Function { name, params, body, .. } = &statements[0] else {
            panic!("expected function statement");
        };
        assert_eq!(name.lexeme, "add");
        assert_eq!(params.len(), 2);
        assert!(matches!(body[0], Stmt::Return { .. }));
    }

    #[test]
    fn parses_class_with_superclass_and_methods() {
        let statements = parse_ok("class B < A { init(x) { this.x = x; } get() { return this.x; } }");
        let Stmt::Class {
            name,
            superclass,
            methods,
            ..
        } = &statements[0]
        else {
            panic!("expected class statement");
        };
        assert_eq!(name.lexeme, "B");
        assert!(matches!(superclass, Some(Expr::Variable { .. })));
        assert_eq!(methods.len(), 2);
    }

    #[test]
    fn parses_super_method_access() {
        let statements = parse_ok("class B < A { go() { return super.go(); } }");
        assert!(matches!(statements[0], Stmt::Class { .. }));
    }

    #[test]
    fn call_chain_parses_left_to_right() {
        let statements = parse_ok("a(1)(2).b(3);");
        let Stmt::Expression { expression, .. } = &statements[0] else {
            panic!("expected expression statement");
        };
        assert_eq!(
            expression.to_string(),
            "(call (. (call (call a 1) 2) b) 3)"
        );
    }

    #[test]
    fn missing_semicolon_reports_error_and_recovers() {
        let (statements, errors) = parse("print 1\nprint 2; print 3;");
        assert_eq!(errors.len(), 1);
        // Recovery skips past the broken statement and picks up the next one
        assert_eq!(statements.len(), 1);
        assert!(matches!(statements[0], Stmt::Print { .. }));
    }

    #[test]
    fn multiple_errors_accumulate() {
        let (_, errors) = parse("var = 1; var y");
        assert!(errors.len() >= 2);
        assert!(errors.iter().all(|e| matches!(e, RillError::Parse { .. })));
    }

    #[test]
    fn literal_token_without_a_value_is_an_error() {
        let tokens = vec![
            Token {
                token_type: TokenType::Number,
                lexeme: "1".to_string(),
                literal: None,
                span: 0..1,
            },
            Token {
                token_type: TokenType::Semicolon,
                lexeme: ";".to_string(),
                literal: None,
                span: 1..2,
            },
            Token {
                token_type: TokenType::Eof,
                lexeme: String::new(),
                literal: None,
                span: 2..2,
            },
        ];
        let mut parser = Parser::new(tokens);
        let statements = parser.parse();
        let errors = parser.take_errors();
        assert!(statements.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], RillError::Parse { .. }));
    }

    #[test]
    fn return_without_value_parses() {
        let statements = parse_ok("fn f() { return; }");
        let Stmt::Function { body, .. } = &statements[0] else {
            panic!("expected function statement");
        };
        assert!(matches!(body[0], Stmt::Return { value: None, .. }));
    }
}
