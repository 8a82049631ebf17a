//! Pratt parser producing the expression AST.

use serde_json::Value;

use super::lexer::{tokenize, Token};
use super::{BinaryOp, Expr, UnaryOp};
use crate::error::NodeError;

fn err(msg: impl Into<String>) -> NodeError {
    NodeError::ExpressionError(msg.into())
}

/// Parse one expression. The whole input must be consumed.
pub fn parse(source: &str) -> Result<Expr, NodeError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(err("empty expression"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression(0)?;
    if parser.pos != parser.tokens.len() {
        return Err(err(format!(
            "unexpected trailing token at position {}",
            parser.pos
        )));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

fn binding_power(token: &Token) -> Option<(u8, BinaryOp)> {
    match token {
        Token::OrOr => Some((1, BinaryOp::Or)),
        Token::AndAnd => Some((2, BinaryOp::And)),
        Token::EqEq => Some((3, BinaryOp::Eq)),
        Token::NotEq => Some((3, BinaryOp::Ne)),
        Token::Lt => Some((4, BinaryOp::Lt)),
        Token::Le => Some((4, BinaryOp::Le)),
        Token::Gt => Some((4, BinaryOp::Gt)),
        Token::Ge => Some((4, BinaryOp::Ge)),
        Token::Plus => Some((5, BinaryOp::Add)),
        Token::Minus => Some((5, BinaryOp::Sub)),
        Token::Star => Some((6, BinaryOp::Mul)),
        Token::Slash => Some((6, BinaryOp::Div)),
        Token::Percent => Some((6, BinaryOp::Mod)),
        _ => None,
    }
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, want: &Token, what: &str) -> Result<(), NodeError> {
        match self.advance() {
            Some(ref t) if t == want => Ok(()),
            Some(t) => Err(err(format!("expected {}, found {:?}", what, t))),
            None => Err(err(format!("expected {}, found end of input", what))),
        }
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr, NodeError> {
        let mut lhs = self.prefix()?;
        loop {
            let Some((bp, op)) = self.peek().and_then(binding_power) else {
                break;
            };
            if bp < min_bp {
                break;
            }
            self.advance();
            // Left associative: parse the rhs one level tighter.
            let rhs = self.expression(bp + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, NodeError> {
        let expr = match self.advance() {
            None => return Err(err("unexpected end of expression")),
            Some(Token::Number(n)) => Expr::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            ),
            Some(Token::Str(s)) => Expr::Literal(Value::String(s)),
            Some(Token::True) => Expr::Literal(Value::Bool(true)),
            Some(Token::False) => Expr::Literal(Value::Bool(false)),
            Some(Token::Null) => Expr::Literal(Value::Null),
            Some(Token::Minus) => Expr::Unary(UnaryOp::Neg, Box::new(self.prefix()?)),
            Some(Token::Bang) => Expr::Unary(UnaryOp::Not, Box::new(self.prefix()?)),
            Some(Token::LParen) => {
                let inner = self.expression(0)?;
                self.expect(&Token::RParen, "')'")?;
                inner
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.advance();
                    let args = self.arguments()?;
                    Expr::Call(name, args)
                } else {
                    Expr::Ident(name)
                }
            }
            Some(t) => return Err(err(format!("unexpected token: {:?}", t))),
        };
        self.postfix(expr)
    }

    /// `.field` and `[index]` chains bind tighter than any operator.
    fn postfix(&mut self, mut expr: Expr) -> Result<Expr, NodeError> {
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    match self.advance() {
                        Some(Token::Ident(name)) => {
                            expr = Expr::Field(Box::new(expr), name);
                        }
                        other => {
                            return Err(err(format!(
                                "expected property name after '.', found {:?}",
                                other
                            )))
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.expression(0)?;
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, NodeError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.expression(0)?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                other => {
                    return Err(err(format!(
                        "expected ',' or ')' in argument list, found {:?}",
                        other
                    )))
                }
            }
        }
        Ok(args)
    }
}
