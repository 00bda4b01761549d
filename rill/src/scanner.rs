use phf::phf_map;

use crate::error::RillError;
use crate::token::{Literal, Token, TokenType};

/// Check if a character can start an identifier
pub fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

/// Check if a character can continue an identifier
pub fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// All rill keywords with their token types
pub static KEYWORDS: phf::Map<&'static str, TokenType> = phf_map! {
    "and" => TokenType::And,
    "break" => TokenType::Break,
    "class" => TokenType::Class,
    "else" => TokenType::Else,
    "false" => TokenType::False,
    "fn" => TokenType::Fn,
    "for" => TokenType::For,
    "if" => TokenType::If,
    "nil" => TokenType::Nil,
    "or" => TokenType::Or,
    "print" => TokenType::Print,
    "return" => TokenType::Return,
    "super" => TokenType::Super,
    "this" => TokenType::This,
    "true" => TokenType::True,
    "var" => TokenType::Var,
    "while" => TokenType::While,
};

pub struct Scanner<'a> {
    source: &'a str,
    start: usize,
    current: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            start: 0,
            current: 0,
        }
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Result<Token, RillError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current > self.source.len() {
                return None;
            }

            if self.is_at_end() {
                let span = self.current..self.current;
                self.current += 1;
                return Some(Ok(Token {
                    token_type: TokenType::Eof,
                    lexeme: String::new(),
                    literal: None,
                    span,
                }));
            }

            self.start = self.current;
            let c = self.advance();

            match c {
                ' ' | '\r' | '\t' | '\n' => continue,
                '(' => return Some(Ok(self.add_token(TokenType::LeftParen))),
                ')' => return Some(Ok(self.add_token(TokenType::RightParen))),
                '{' => return Some(Ok(self.add_token(TokenType::LeftBrace))),
                '}' => return Some(Ok(self.add_token(TokenType::RightBrace))),
                ',' => return Some(Ok(self.add_token(TokenType::Comma))),
                '.' => return Some(Ok(self.add_token(TokenType::Dot))),
                '-' => return Some(Ok(self.add_token(TokenType::Minus))),
                ';' => return Some(Ok(self.add_token(TokenType::Semicolon))),
                '*' => return Some(Ok(self.add_token(TokenType::Star))),
                '+' => {
                    let token_type = if self.match_char('+') {
                        TokenType::PlusPlus
                    } else {
                        TokenType::Plus
                    };
                    return Some(Ok(self.add_token(token_type)));
                }
                '/' => {
                    if self.match_char('/') {
                        // Line comment, runs to end of line
                        while self.peek() != Some('\n') && !self.is_at_end() {
                            self.advance();
                        }
                        continue;
                    } else if self.match_char('*') {
                        if let Err(e) = self.block_comment() {
                            return Some(Err(e));
                        }
                        continue;
                    } else {
                        return Some(Ok(self.add_token(TokenType::Slash)));
                    }
                }
                '!' => {
                    let token_type = if self.match_char('=') {
                        TokenType::BangEqual
                    } else {
                        TokenType::Bang
                    };
                    return Some(Ok(self.add_token(token_type)));
                }
                '=' => {
                    let token_type = if self.match_char('=') {
                        TokenType::EqualEqual
                    } else {
                        TokenType::Equal
                    };
                    return Some(Ok(self.add_token(token_type)));
                }
                '<' => {
                    let token_type = if self.match_char('=') {
                        TokenType::LessEqual
                    } else {
                        TokenType::Less
                    };
                    return Some(Ok(self.add_token(token_type)));
                }
                '>' => {
                    let token_type = if self.match_char('=') {
                        TokenType::GreaterEqual
                    } else {
                        TokenType::Greater
                    };
                    return Some(Ok(self.add_token(token_type)));
                }
                '"' => return Some(self.string()),
                c if c.is_ascii_digit() => return Some(Ok(self.number())),
                c if is_identifier_start(c) => return Some(Ok(self.identifier())),
                _ => {
                    return Some(Err(RillError::Scan {
                        message: format!("unexpected character '{}'", c),
                        span: self.start..self.current,
                    }));
                }
            }
        }
    }
}

impl<'a> Scanner<'a> {
    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> char {
        // Callers check peek/is_at_end first; past the end this steps
        // nowhere and hands back NUL
        let Some(c) = self.peek() else {
            return '\0';
        };
        self.current += c.len_utf8();
        c
    }

    fn peek(&self) -> Option<char> {
        self.source[self.current..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.source[self.current..].chars();
        chars.next();
        chars.next()
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn add_token(&self, token_type: TokenType) -> Token {
        Token {
            token_type,
            lexeme: self.source[self.start..self.current].to_string(),
            literal: None,
            span: self.start..self.current,
        }
    }

    fn add_token_with_literal(&self, token_type: TokenType, literal: Literal) -> Token {
        Token {
            token_type,
            lexeme: self.source[self.start..self.current].to_string(),
            literal: Some(literal),
            span: self.start..self.current,
        }
    }

    fn block_comment(&mut self) -> Result<(), RillError> {
        // No nesting, like the line variant this just swallows text
        loop {
            match self.peek() {
                None => {
                    return Err(RillError::Scan {
                        message: "unterminated block comment".to_string(),
                        span: self.start..self.current,
                    });
                }
                Some('*') if self.peek_next() == Some('/') => {
                    self.advance();
                    self.advance();
                    return Ok(());
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }

    fn identifier(&mut self) -> Token {
        while self.peek().is_some_and(is_identifier_char) {
            self.advance();
        }

        let text = &self.source[self.start..self.current];
        let token_type = KEYWORDS.get(text).copied().unwrap_or(TokenType::Identifier);
        self.add_token(token_type)
    }

    fn number(&mut self) -> Token {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        // Fractional part only when the dot is followed by a digit,
        // so `1.foo` still scans as a property access.
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        let value: f64 = self.source[self.start..self.current].parse().unwrap();
        self.add_token_with_literal(TokenType::Number, Literal::Number(value))
    }

    fn string(&mut self) -> Result<Token, RillError> {
        let content_start = self.current;

        loop {
            match self.peek() {
                None => {
                    return Err(RillError::Scan {
                        message: "unterminated string".to_string(),
                        span: self.start..self.current,
                    });
                }
                Some('"') => {
                    let value = self.source[content_start..self.current].to_string();
                    self.advance();
                    return Ok(
                        self.add_token_with_literal(TokenType::String, Literal::String(value))
                    );
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }
}
