//! Recursive descent parser for contract expressions
//!
//! Precedence, lowest first:
//!
//! ```text
//! conditional  c ? a : b
//! or           ||
//! and          &&
//! equality     == !=
//! comparison   < <= > >=
//! additive     + -
//! term         * / %
//! unary        ! -
//! postfix      .field  .method(args)  [index]
//! primary      literal | name | call(args) | (expr) | [items] | if-expression
//! ```

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::tokenizer::{SpannedToken, Token, Tokenizer};
use crate::{Error, Result};

/// Parse a contract expression into an expression tree
///
/// # Errors
/// Returns `MalformedExpression` with the column of the first syntax error.
pub fn parse(text: &str) -> Result<Expr> {
    let tokens = Tokenizer::new(text).tokenize()?;
    let mut parser = Parser {
        source: text,
        tokens,
        position: 0,
    };
    let expr = parser.expression()?;
    parser.expect(&Token::Eof)?;
    Ok(expr)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<SpannedToken>,
    position: usize,
}

impl<'a> Parser<'a> {
    // ── Token helpers ──────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.position.min(self.tokens.len() - 1)].token
    }

    fn column(&self) -> usize {
        self.tokens[self.position.min(self.tokens.len() - 1)].column
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("{}", token)))
        }
    }

    fn unexpected(&self, wanted: &str) -> Error {
        Error::malformed(
            self.source,
            format!(
                "expected {}, found {} at column {}",
                wanted,
                self.peek(),
                self.column()
            ),
        )
    }

    // ── Grammar ────────────────────────────────────────────

    fn expression(&mut self) -> Result<Expr> {
        let condition = self.or()?;
        if self.eat(&Token::Question) {
            let then = self.expression()?;
            self.expect(&Token::Colon)?;
            let otherwise = self.expression()?;
            return Ok(Expr::Conditional(
                Box::new(condition),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(condition)
    }

    fn or(&mut self) -> Result<Expr> {
        let mut left = self.and()?;
        while self.eat(&Token::OrOr) {
            let right = self.and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut left = self.equality()?;
        while self.eat(&Token::AndAnd) {
            let right = self.equality()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::NotEq,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Token::Less => BinaryOp::Less,
                Token::LessEq => BinaryOp::LessEq,
                Token::Greater => BinaryOp::Greater,
                Token::GreaterEq => BinaryOp::GreaterEq,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)));
        }
        if self.eat(&Token::Minus) {
            return Ok(Expr::Unary(UnaryOp::Negate, Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let name = match self.peek() {
                    Token::Identifier(name) => name.clone(),
                    _ => return Err(self.unexpected("member name")),
                };
                self.advance();
                if self.eat(&Token::LParen) {
                    let args = self.arguments()?;
                    expr = Expr::MethodCall(Box::new(expr), name, args);
                } else {
                    expr = Expr::Member(Box::new(expr), name);
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.expression()?;
                self.expect(&Token::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    /// Arguments after an opening parenthesis, through the closing one
    fn arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(&Token::Comma)?;
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.peek().clone() {
            Token::Null => {
                self.advance();
                Ok(Expr::Null)
            }
            Token::True => {
                self.advance();
                Ok(Expr::Boolean(true))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Boolean(false))
            }
            Token::IntegerLiteral(i) => {
                self.advance();
                Ok(Expr::Integer(i))
            }
            Token::FloatLiteral(f) => {
                self.advance();
                Ok(Expr::Float(f))
            }
            Token::StringLiteral(s) => {
                self.advance();
                Ok(Expr::String(s))
            }
            Token::Identifier(name) => {
                self.advance();
                if self.eat(&Token::LParen) {
                    let args = self.arguments()?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Token::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.expression()?);
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        self.expect(&Token::Comma)?;
                    }
                }
                Ok(Expr::Array(items))
            }
            Token::If => self.if_expression(),
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// `if (c) { a } else if (d) { b } else { e }`; the final `else` is required
    fn if_expression(&mut self) -> Result<Expr> {
        self.expect(&Token::If)?;
        self.expect(&Token::LParen)?;
        let condition = self.expression()?;
        self.expect(&Token::RParen)?;
        let then = self.block()?;
        self.expect(&Token::Else)?;
        let otherwise = if self.check(&Token::If) {
            self.if_expression()?
        } else {
            self.block()?
        };
        Ok(Expr::Conditional(
            Box::new(condition),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn block(&mut self) -> Result<Expr> {
        self.expect(&Token::LBrace)?;
        let inner = self.expression()?;
        self.expect(&Token::RBrace)?;
        Ok(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Variable(name.into()))
    }

    #[test]
    fn test_parse_comparison() {
        assert_eq!(
            parse("amount>0").unwrap(),
            Expr::Binary(BinaryOp::Greater, var("amount"), Box::new(Expr::Integer(0)))
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        assert_eq!(
            parse("a || b && c").unwrap(),
            Expr::Binary(
                BinaryOp::Or,
                var("a"),
                Box::new(Expr::Binary(BinaryOp::And, var("b"), var("c")))
            )
        );
    }

    #[test]
    fn test_member_and_method_calls() {
        assert_eq!(
            parse("$this.name.equals(name)").unwrap(),
            Expr::MethodCall(
                Box::new(Expr::Member(var("$this"), "name".into())),
                "equals".into(),
                vec![Expr::Variable("name".into())]
            )
        );
    }

    #[test]
    fn test_if_else_chain() {
        let expr = parse("if (g1) { a } else if (g2) { b } else { c }").unwrap();
        assert_eq!(
            expr,
            Expr::Conditional(
                var("g1"),
                var("a"),
                Box::new(Expr::Conditional(var("g2"), var("b"), var("c")))
            )
        );
    }

    #[test]
    fn test_parenthesized_if_inside_conjunction() {
        assert!(parse("x > 0 && (if (g) { y } else { z })").is_ok());
    }

    #[test]
    fn test_ternary() {
        assert!(matches!(
            parse("a ? 1 : 2").unwrap(),
            Expr::Conditional(_, _, _)
        ));
    }

    #[test]
    fn test_array_and_index() {
        assert_eq!(
            parse("[1, 2][0]").unwrap(),
            Expr::Index(
                Box::new(Expr::Array(vec![Expr::Integer(1), Expr::Integer(2)])),
                Box::new(Expr::Integer(0))
            )
        );
    }

    #[test]
    fn test_if_without_else_rejected() {
        let err = parse("if (g) { a }").unwrap_err().to_string();
        assert!(err.contains("expected 'else'"));
    }

    #[test]
    fn test_unbalanced_parenthesis_rejected() {
        assert!(parse("(a && b").is_err());
        assert!(parse("a && b)").is_err());
    }

    #[test]
    fn test_trailing_operator_rejected() {
        let err = parse("a &&").unwrap_err().to_string();
        assert!(err.contains("expected an expression"));
    }
}
