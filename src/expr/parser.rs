//! Recursive-descent parser for the condition DSL.
//!
//! One production per precedence level, mirroring the grammar:
//!
//! ```text
//! expr    := or_expr
//! or_expr := and_expr ( "or" and_expr )*
//! and_expr:= not_expr ( "and" not_expr )*
//! not_expr:= "not" not_expr | cmp
//! cmp     := add ( ("<"|"<="|">"|">="|"=="|"!="|"in"|"not in") add )?
//! add     := mul ( ("+"|"-") mul )*
//! mul     := unary ( ("*"|"/"|"%") unary )*
//! unary   := ("-"|"+") unary | atom
//! atom    := NUMBER | STRING | IDENT | IDENT "(" args? ")" | "(" expr ")" | list
//! list    := "[" (expr ("," expr)*)? "]"
//! ```
//!
//! Comparison is non-associative on purpose: `a < b < c` is a syntax error,
//! not a chained comparison.

use super::ExprError;
use super::ast::{BinaryOp, Expr, Number, UnaryOp};
use super::token::{Spanned, Token};

pub struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, tokens: Vec<Spanned>) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
        }
    }

    /// Parse a complete expression; trailing tokens are an error.
    pub fn parse_expression(mut self) -> Result<Expr, ExprError> {
        let expr = self.or_expr()?;
        if let Some(extra) = self.tokens.get(self.pos) {
            return Err(self.syntax_at(extra.offset, "unexpected trailing input"));
        }
        Ok(expr)
    }

    fn or_expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.and_expr()?;
        while self.eat(&Token::Or) {
            let rhs = self.and_expr()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.not_expr()?;
        while self.eat(&Token::And) {
            let rhs = self.not_expr()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Not) {
            let operand = self.not_expr()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.cmp()
    }

    fn cmp(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.add()?;
        let op = match self.peek() {
            Some(Token::Lt) => Some(BinaryOp::Lt),
            Some(Token::Le) => Some(BinaryOp::Le),
            Some(Token::Gt) => Some(BinaryOp::Gt),
            Some(Token::Ge) => Some(BinaryOp::Ge),
            Some(Token::Eq) => Some(BinaryOp::Eq),
            Some(Token::Ne) => Some(BinaryOp::Ne),
            Some(Token::In) => Some(BinaryOp::In),
            Some(Token::Not) => {
                // `not in` is the only infix use of `not`.
                if self.peek_ahead(1) == Some(&Token::In) {
                    Some(BinaryOp::NotIn)
                } else {
                    None
                }
            }
            _ => None,
        };
        let Some(op) = op else {
            return Ok(lhs);
        };
        self.pos += if op == BinaryOp::NotIn { 2 } else { 1 };
        let rhs = self.add()?;
        Ok(binary(op, lhs, rhs))
    }

    fn add(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.mul()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn mul(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Minus) {
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        if self.eat(&Token::Plus) {
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Pos,
                operand: Box::new(operand),
            });
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Expr, ExprError> {
        let Some(spanned) = self.tokens.get(self.pos).cloned() else {
            return Err(self.syntax_at(self.source.len(), "unexpected end of input"));
        };
        self.pos += 1;
        match spanned.token {
            Token::Int(v) => Ok(Expr::Number(Number::Int(v))),
            Token::Float(v) => Ok(Expr::Number(Number::Float(v))),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    let args = self.call_args()?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Token::LParen => {
                let inner = self.or_expr()?;
                self.expect(&Token::RParen, "expected `)`")?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if self.eat(&Token::RBracket) {
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.or_expr()?);
                    if self.eat(&Token::Comma) {
                        continue;
                    }
                    self.expect(&Token::RBracket, "expected `]`")?;
                    break;
                }
                Ok(Expr::List(items))
            }
            other => Err(self.syntax_at(
                spanned.offset,
                format!("unexpected token `{other:?}`"),
            )),
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.or_expr()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen, "expected `)` after arguments")?;
            break;
        }
        Ok(args)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_ahead(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|s| &s.token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, message: &str) -> Result<(), ExprError> {
        if self.eat(token) {
            Ok(())
        } else {
            let offset = self
                .tokens
                .get(self.pos)
                .map_or(self.source.len(), |s| s.offset);
            Err(self.syntax_at(offset, message))
        }
    }

    fn syntax_at(&self, position: usize, message: impl Into<String>) -> ExprError {
        ExprError::Syntax {
            position,
            message: message.into(),
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::super::parse;
    use super::*;

    #[test]
    fn precedence_mul_over_add() {
        let expr = parse("1 + 2 * 3").unwrap();
        let Expr::Binary { op, rhs, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn not_in_is_one_operator() {
        let expr = parse("x not in [1, 2]").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::NotIn, .. }));
    }

    #[test]
    fn chained_comparison_rejected() {
        assert!(parse("1 < x < 3").is_err());
    }

    #[test]
    fn subscript_rejected() {
        assert!(parse("xs[0]").is_err());
    }

    #[test]
    fn call_with_args() {
        let expr = parse("max(a, 2)").unwrap();
        let Expr::Call { name, args } = expr else {
            panic!("expected call");
        };
        assert_eq!(name, "max");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn empty_list_literal() {
        assert_eq!(parse("[]").unwrap(), Expr::List(vec![]));
    }
}
