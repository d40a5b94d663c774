//! Expression tokenizer: converts contract text into a token stream
//!
//! Handles: identifiers (including `$`-prefixed reserved names), string
//! literals, integer/float literals, operators and delimiters.
//!
//! Guarantees:
//! - Deterministic: same input always produces same token stream
//! - Errors carry the column of the offending character

use crate::{Error, Result};

/// Token types for contract expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    If,
    Else,
    True,
    False,
    Null,

    // Literals
    StringLiteral(String),
    IntegerLiteral(i64),
    FloatLiteral(f64),

    // Delimiters
    LParen,   // (
    RParen,   // )
    LBrace,   // {
    RBrace,   // }
    LBracket, // [
    RBracket, // ]
    Dot,      // .
    Comma,    // ,
    Question, // ?
    Colon,    // :

    // Operators
    Not,       // !
    Plus,      // +
    Minus,     // -
    Star,      // *
    Slash,     // /
    Percent,   // %
    Less,      // <
    LessEq,    // <=
    Greater,   // >
    GreaterEq, // >=
    EqEq,      // == or ===
    NotEq,     // != or !==
    AndAnd,    // &&
    OrOr,      // ||

    // Other
    Identifier(String),
    Eof,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Token::Identifier(name) => write!(f, "identifier '{}'", name),
            Token::StringLiteral(s) => write!(f, "string \"{}\"", s),
            Token::IntegerLiteral(i) => write!(f, "integer {}", i),
            Token::FloatLiteral(v) => write!(f, "float {}", v),
            Token::Eof => write!(f, "end of expression"),
            other => write!(f, "'{}'", symbol_text(other)),
        }
    }
}

fn symbol_text(token: &Token) -> &'static str {
    match token {
        Token::If => "if",
        Token::Else => "else",
        Token::True => "true",
        Token::False => "false",
        Token::Null => "null",
        Token::LParen => "(",
        Token::RParen => ")",
        Token::LBrace => "{",
        Token::RBrace => "}",
        Token::LBracket => "[",
        Token::RBracket => "]",
        Token::Dot => ".",
        Token::Comma => ",",
        Token::Question => "?",
        Token::Colon => ":",
        Token::Not => "!",
        Token::Plus => "+",
        Token::Minus => "-",
        Token::Star => "*",
        Token::Slash => "/",
        Token::Percent => "%",
        Token::Less => "<",
        Token::LessEq => "<=",
        Token::Greater => ">",
        Token::GreaterEq => ">=",
        Token::EqEq => "==",
        Token::NotEq => "!=",
        Token::AndAnd => "&&",
        Token::OrOr => "||",
        _ => "?",
    }
}

/// Token with its column in the source expression (1-based)
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub column: usize,
}

/// Tokenizer for contract expression text
pub struct Tokenizer {
    source: String,
    input: Vec<char>,
    position: usize,
}

impl Tokenizer {
    /// Create a new tokenizer for the given expression
    pub fn new(text: &str) -> Self {
        Tokenizer {
            source: text.to_string(),
            input: text.chars().collect(),
            position: 0,
        }
    }

    /// Tokenize the entire input into a stream of spanned tokens
    pub fn tokenize(&mut self) -> Result<Vec<SpannedToken>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();

            if self.is_at_end() {
                tokens.push(SpannedToken {
                    token: Token::Eof,
                    column: self.position + 1,
                });
                break;
            }

            tokens.push(self.next_token()?);
        }

        Ok(tokens)
    }

    // ── Character helpers ──────────────────────────────────

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_ahead(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.position += 1;
        }
        ch
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn error(&self, column: usize, reason: String) -> Error {
        Error::malformed(&self.source, format!("{} at column {}", reason, column))
    }

    // ── Main dispatch ──────────────────────────────────────

    fn next_token(&mut self) -> Result<SpannedToken> {
        let column = self.position + 1;
        let ch = match self.peek() {
            Some(c) => c,
            None => {
                return Ok(SpannedToken {
                    token: Token::Eof,
                    column,
                })
            }
        };

        let token = match ch {
            '(' => self.single(Token::LParen),
            ')' => self.single(Token::RParen),
            '{' => self.single(Token::LBrace),
            '}' => self.single(Token::RBrace),
            '[' => self.single(Token::LBracket),
            ']' => self.single(Token::RBracket),
            '.' if !self.peek_ahead(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.single(Token::Dot)
            }
            ',' => self.single(Token::Comma),
            '?' => self.single(Token::Question),
            ':' => self.single(Token::Colon),
            '+' => self.single(Token::Plus),
            '-' => self.single(Token::Minus),
            '*' => self.single(Token::Star),
            '/' => self.single(Token::Slash),
            '%' => self.single(Token::Percent),
            '<' => self.with_optional_eq(Token::Less, Token::LessEq),
            '>' => self.with_optional_eq(Token::Greater, Token::GreaterEq),
            '!' => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    if self.peek() == Some('=') {
                        self.advance();
                    }
                    Token::NotEq
                } else {
                    Token::Not
                }
            }
            '=' => {
                if self.peek_ahead(1) != Some('=') {
                    return Err(self.error(column, "assignment is not allowed in contracts".into()));
                }
                self.advance();
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                }
                Token::EqEq
            }
            '&' => self.doubled('&', Token::AndAnd, column)?,
            '|' => self.doubled('|', Token::OrOr, column)?,
            '"' | '\'' => self.read_string(ch, column)?,
            c if c.is_ascii_digit() || c == '.' => self.read_number(column)?,
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => self.read_identifier_or_keyword(),
            _ => return Err(self.error(column, format!("unexpected character '{}'", ch))),
        };

        Ok(SpannedToken { token, column })
    }

    fn single(&mut self, token: Token) -> Token {
        self.advance();
        token
    }

    fn with_optional_eq(&mut self, plain: Token, with_eq: Token) -> Token {
        self.advance();
        if self.peek() == Some('=') {
            self.advance();
            with_eq
        } else {
            plain
        }
    }

    fn doubled(&mut self, ch: char, token: Token, column: usize) -> Result<Token> {
        self.advance();
        if self.peek() == Some(ch) {
            self.advance();
            Ok(token)
        } else {
            Err(self.error(column, format!("expected '{}{}'", ch, ch)))
        }
    }

    // ── String literals ────────────────────────────────────

    fn read_string(&mut self, quote: char, column: usize) -> Result<Token> {
        self.advance(); // consume opening quote
        let mut value = String::new();

        loop {
            match self.advance() {
                None => return Err(self.error(column, "unterminated string".into())),
                Some(c) if c == quote => break,
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some('\'') => value.push('\''),
                    Some(c) => {
                        return Err(self.error(self.position, format!("invalid escape sequence '\\{}'", c)))
                    }
                    None => return Err(self.error(column, "unterminated escape sequence".into())),
                },
                Some(c) => value.push(c),
            }
        }

        Ok(Token::StringLiteral(value))
    }

    // ── Numbers ────────────────────────────────────────────

    fn read_number(&mut self, column: usize) -> Result<Token> {
        let start = self.position;
        let mut has_dot = false;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                self.advance();
            } else if ch == '.' && !has_dot && self.peek_ahead(1).is_some_and(|c| c.is_ascii_digit()) {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.input[start..self.position].iter().collect();

        if has_dot {
            text.parse::<f64>()
                .map(Token::FloatLiteral)
                .map_err(|_| self.error(column, format!("invalid float '{}'", text)))
        } else {
            text.parse::<i64>()
                .map(Token::IntegerLiteral)
                .map_err(|_| self.error(column, format!("invalid integer '{}'", text)))
        }
    }

    // ── Identifiers & Keywords ─────────────────────────────

    fn read_identifier_or_keyword(&mut self) -> Token {
        let start = self.position;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' {
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.input[start..self.position].iter().collect();

        match text.as_str() {
            "if" => Token::If,
            "else" => Token::Else,
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            _ => Token::Identifier(text),
        }
    }
}
