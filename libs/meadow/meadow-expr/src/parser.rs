use crate::ast::{Base, CmpOp, Expr, Suffix};
use crate::error::ExprError;
use crate::lexer::{Lexer, Token};

pub struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    pub fn parse(src: &str) -> Result<Expr, ExprError> {
        let tokens = Lexer::new(src).tokenize()?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_pipe()?;
        parser.expect_eof()?;
        Ok(expr)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    fn peek_pos(&self) -> usize {
        self.tokens[self.pos].1
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.pos].0.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn expect_eof(&self) -> Result<(), ExprError> {
        if matches!(self.peek(), Token::Eof) {
            Ok(())
        } else {
            Err(ExprError::at(
                self.peek_pos(),
                format!("unexpected trailing token {:?}", self.peek()),
            ))
        }
    }

    fn expect(&mut self, tok: &Token) -> Result<(), ExprError> {
        if self.peek() == tok {
            self.bump();
            Ok(())
        } else {
            Err(ExprError::at(
                self.peek_pos(),
                format!("expected {tok:?}, found {:?}", self.peek()),
            ))
        }
    }

    fn parse_pipe(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_or()?;
        while matches!(self.peek(), Token::Pipe) {
            self.bump();
            let right = self.parse_or()?;
            left = Expr::Pipe(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Token::Or) {
            self.bump();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_not()?;
        while matches!(self.peek(), Token::And) {
            self.bump();
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if matches!(self.peek(), Token::Not) {
            self.bump();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_chain()?;
        let op = match self.peek() {
            Token::Eq => Some(CmpOp::Eq),
            Token::Ne => Some(CmpOp::Ne),
            Token::Lt => Some(CmpOp::Lt),
            Token::Le => Some(CmpOp::Le),
            Token::Gt => Some(CmpOp::Gt),
            Token::Ge => Some(CmpOp::Ge),
            _ => None,
        };
        match op {
            Some(op) => {
                self.bump();
                let right = self.parse_chain()?;
                Ok(Expr::Cmp(op, Box::new(left), Box::new(right)))
            }
            None => Ok(left),
        }
    }

    fn parse_chain(&mut self) -> Result<Expr, ExprError> {
        let base = self.parse_base()?;
        let mut suffixes = Vec::new();
        loop {
            match self.peek() {
                Token::Dot => {
                    self.bump();
                    match self.bump() {
                        Token::Ident(name) => suffixes.push(Suffix::Field(name)),
                        Token::Star => suffixes.push(Suffix::Wildcard),
                        other => {
                            return Err(ExprError::at(
                                self.peek_pos(),
                                format!("expected field name after '.', found {other:?}"),
                            ))
                        }
                    }
                }
                Token::LBracket => {
                    self.bump();
                    match self.peek().clone() {
                        Token::Star => {
                            self.bump();
                            suffixes.push(Suffix::Wildcard);
                        }
                        Token::Number(n) => {
                            self.bump();
                            suffixes.push(Suffix::Index(n as i64));
                        }
                        other => {
                            return Err(ExprError::at(
                                self.peek_pos(),
                                format!("expected index or '*' inside '[]', found {other:?}"),
                            ))
                        }
                    }
                    self.expect(&Token::RBracket)?;
                }
                _ => break,
            }
        }
        if suffixes.is_empty() {
            // No suffixes: if the base was an implicit field name, still
            // wrap it so evaluation is uniform.
            return Ok(match base {
                Base::Identity => Expr::Chain {
                    base: Box::new(Base::Identity),
                    suffixes: vec![],
                },
                other => Expr::Chain {
                    base: Box::new(other),
                    suffixes: vec![],
                },
            });
        }
        Ok(Expr::Chain {
            base: Box::new(base),
            suffixes,
        })
    }

    fn parse_base(&mut self) -> Result<Base, ExprError> {
        match self.bump() {
            Token::At => Ok(Base::Identity),
            Token::JsonLiteral(content) => {
                let value: serde_json::Value = serde_json::from_str(&content)
                    .map_err(|e| ExprError::at(self.peek_pos(), format!("invalid json literal: {e}")))?;
                Ok(Base::Literal(value))
            }
            Token::RawString(s) => Ok(Base::RawString(s)),
            Token::Number(n) => Ok(Base::Literal(serde_json::json!(n))),
            Token::LParen => {
                let inner = self.parse_pipe()?;
                self.expect(&Token::RParen)?;
                Ok(Base::Paren(Box::new(inner)))
            }
            Token::Ident(name) => {
                if matches!(self.peek(), Token::LParen) {
                    self.bump();
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Token::RParen) {
                        loop {
                            args.push(self.parse_pipe()?);
                            if matches!(self.peek(), Token::Comma) {
                                self.bump();
                                continue;
                            }
                            break;
                        }
                    }
                    self.expect(&Token::RParen)?;
                    Ok(Base::FunctionCall(name, args))
                } else {
                    // Bare identifier: field access off identity. Represent
                    // by pushing the field as if a chain had started.
                    Ok(Base::Paren(Box::new(Expr::Chain {
                        base: Box::new(Base::Identity),
                        suffixes: vec![Suffix::Field(name)],
                    })))
                }
            }
            other => Err(ExprError::at(
                self.peek_pos(),
                format!("unexpected token {other:?}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_field_chain() {
        let e = Parser::parse("response.body.id").unwrap();
        assert!(matches!(e, Expr::Chain { .. }));
    }

    #[test]
    fn parses_identity() {
        let e = Parser::parse("@").unwrap();
        assert_eq!(
            e,
            Expr::Chain {
                base: Box::new(Base::Identity),
                suffixes: vec![]
            }
        );
    }

    #[test]
    fn parses_function_call() {
        let e = Parser::parse("length(@)").unwrap();
        assert!(matches!(e, Expr::Chain { .. }));
    }

    #[test]
    fn parses_comparison_and_bool_ops() {
        let e = Parser::parse("a == `1` && b != 'x'").unwrap();
        assert!(matches!(e, Expr::And(_, _)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Parser::parse("a ===").is_err());
        assert!(Parser::parse("[[[").is_err());
    }
}
