use crate::error::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    At,
    Dot,
    Star,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Pipe,
    And,
    Or,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Ident(String),
    Number(f64),
    RawString(String),
    JsonLiteral(String),
    Eof,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r')) {
            self.pos += 1;
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<(Token, usize)>, ExprError> {
        let mut out = Vec::new();
        loop {
            self.skip_ws();
            let start = self.pos;
            let Some(c) = self.peek() else {
                out.push((Token::Eof, start));
                break;
            };
            let tok = match c {
                b'@' => {
                    self.bump();
                    Token::At
                }
                b'.' => {
                    self.bump();
                    Token::Dot
                }
                b'*' => {
                    self.bump();
                    Token::Star
                }
                b'[' => {
                    self.bump();
                    Token::LBracket
                }
                b']' => {
                    self.bump();
                    Token::RBracket
                }
                b'(' => {
                    self.bump();
                    Token::LParen
                }
                b')' => {
                    self.bump();
                    Token::RParen
                }
                b',' => {
                    self.bump();
                    Token::Comma
                }
                b'&' if self.peek2() == Some(b'&') => {
                    self.bump();
                    self.bump();
                    Token::And
                }
                b'|' if self.peek2() == Some(b'|') => {
                    self.bump();
                    self.bump();
                    Token::Or
                }
                b'|' => {
                    self.bump();
                    Token::Pipe
                }
                b'!' if self.peek2() == Some(b'=') => {
                    self.bump();
                    self.bump();
                    Token::Ne
                }
                b'!' => {
                    self.bump();
                    Token::Not
                }
                b'=' if self.peek2() == Some(b'=') => {
                    self.bump();
                    self.bump();
                    Token::Eq
                }
                b'<' if self.peek2() == Some(b'=') => {
                    self.bump();
                    self.bump();
                    Token::Le
                }
                b'<' => {
                    self.bump();
                    Token::Lt
                }
                b'>' if self.peek2() == Some(b'=') => {
                    self.bump();
                    self.bump();
                    Token::Ge
                }
                b'>' => {
                    self.bump();
                    Token::Gt
                }
                b'\'' => self.read_raw_string()?,
                b'`' => self.read_json_literal()?,
                b'-' | b'0'..=b'9' => self.read_number()?,
                c if c.is_ascii_alphabetic() || c == b'_' => self.read_ident(),
                other => {
                    return Err(ExprError::at(
                        start,
                        format!("unexpected character '{}'", other as char),
                    ))
                }
            };
            out.push((tok, start));
        }
        Ok(out)
    }

    fn read_ident(&mut self) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.pos += 1;
        }
        Token::Ident(String::from_utf8_lossy(&self.src[start..self.pos]).to_string())
    }

    fn read_number(&mut self) -> Result<Token, ExprError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') && matches!(self.peek2(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]);
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ExprError::at(start, format!("invalid number '{text}'")))
    }

    fn read_raw_string(&mut self) -> Result<Token, ExprError> {
        let start = self.pos;
        self.bump(); // opening '
        let mut s = String::new();
        loop {
            match self.bump() {
                Some(b'\'') => break,
                Some(b'\\') if self.peek() == Some(b'\'') => {
                    self.bump();
                    s.push('\'');
                }
                Some(c) => s.push(c as char),
                None => return Err(ExprError::at(start, "unterminated string literal")),
            }
        }
        Ok(Token::RawString(s))
    }

    fn read_json_literal(&mut self) -> Result<Token, ExprError> {
        let start = self.pos;
        self.bump(); // opening `
        let content_start = self.pos;
        loop {
            match self.bump() {
                Some(b'`') => break,
                Some(b'\\') if self.peek() == Some(b'`') => {
                    self.bump();
                }
                Some(_) => {}
                None => return Err(ExprError::at(start, "unterminated json literal")),
            }
        }
        let content = String::from_utf8_lossy(&self.src[content_start..self.pos - 1]).to_string();
        Ok(Token::JsonLiteral(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_chain() {
        let toks = Lexer::new("response.body[0].id").tokenize().unwrap();
        assert!(matches!(toks[0].0, Token::Ident(ref s) if s == "response"));
        assert!(matches!(toks[1].0, Token::Dot));
    }

    #[test]
    fn tokenizes_operators() {
        let toks = Lexer::new("a == `1` && b != 'x'").tokenize().unwrap();
        let kinds: Vec<&Token> = toks.iter().map(|(t, _)| t).collect();
        assert!(kinds.contains(&&Token::Eq));
        assert!(kinds.contains(&&Token::And));
        assert!(kinds.contains(&&Token::Ne));
    }
}
