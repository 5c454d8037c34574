//! Source → token stream.
//!
//! `next_token` returns the next token and keeps returning `Eof` forever
//! once the input is exhausted, so callers never need a separate
//! end-of-stream check.

use crate::error::CompileError;
use crate::token::{Span, Token, TokenKind, lookup_keyword};

pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Lex the whole input into a token vector, ending with a single `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let done = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.col)
    }

    fn skip_trivia(&mut self) -> Result<(), CompileError> {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.advance();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let start = self.span();
                    self.advance();
                    self.advance();
                    let mut closed = false;
                    while let Some(c) = self.peek() {
                        if c == b'*' && self.peek_at(1) == Some(b'/') {
                            self.advance();
                            self.advance();
                            closed = true;
                            break;
                        }
                        self.advance();
                    }
                    if !closed {
                        return Err(CompileError::new("unterminated block comment", start));
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    pub fn next_token(&mut self) -> Result<Token, CompileError> {
        self.skip_trivia()?;

        let start = self.span();
        let Some(c) = self.peek() else {
            return Ok(Token::new(TokenKind::Eof, "", start));
        };

        if c.is_ascii_digit() {
            return Ok(self.scan_number(start));
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            return Ok(self.scan_identifier(start));
        }

        self.advance();
        let (kind, len): (TokenKind, usize) = match c {
            b'+' => {
                if self.peek() == Some(b'+') {
                    self.advance();
                    (TokenKind::PlusPlus, 2)
                } else if self.peek() == Some(b'=') {
                    self.advance();
                    (TokenKind::PlusEq, 2)
                } else {
                    (TokenKind::Plus, 1)
                }
            }
            b'-' => {
                if self.peek() == Some(b'-') {
                    self.advance();
                    (TokenKind::MinusMinus, 2)
                } else if self.peek() == Some(b'=') {
                    self.advance();
                    (TokenKind::MinusEq, 2)
                } else {
                    (TokenKind::Minus, 1)
                }
            }
            b'*' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    (TokenKind::StarEq, 2)
                } else {
                    (TokenKind::Star, 1)
                }
            }
            b'/' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    (TokenKind::SlashEq, 2)
                } else {
                    (TokenKind::Slash, 1)
                }
            }
            b'%' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    (TokenKind::PercentEq, 2)
                } else {
                    (TokenKind::Percent, 1)
                }
            }
            b'=' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    (TokenKind::EqEq, 2)
                } else {
                    (TokenKind::Assign, 1)
                }
            }
            b'!' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    (TokenKind::BangEq, 2)
                } else {
                    (TokenKind::Bang, 1)
                }
            }
            b'<' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    (TokenKind::LtEq, 2)
                } else {
                    (TokenKind::Lt, 1)
                }
            }
            b'>' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    (TokenKind::GtEq, 2)
                } else {
                    (TokenKind::Gt, 1)
                }
            }
            b'&' => {
                if self.peek() == Some(b'&') {
                    self.advance();
                    (TokenKind::AmpAmp, 2)
                } else {
                    return Err(CompileError::new(
                        "unexpected character '&' (did you mean '&&'?)",
                        start,
                    ));
                }
            }
            b'|' => {
                if self.peek() == Some(b'|') {
                    self.advance();
                    (TokenKind::PipePipe, 2)
                } else {
                    return Err(CompileError::new(
                        "unexpected character '|' (did you mean '||'?)",
                        start,
                    ));
                }
            }
            b'(' => (TokenKind::LParen, 1),
            b')' => (TokenKind::RParen, 1),
            b'{' => (TokenKind::LBrace, 1),
            b'}' => (TokenKind::RBrace, 1),
            b'[' => (TokenKind::LBracket, 1),
            b']' => (TokenKind::RBracket, 1),
            b';' => (TokenKind::Semicolon, 1),
            b',' => (TokenKind::Comma, 1),
            other => {
                return Err(CompileError::new(
                    format!("unexpected character '{}'", other as char),
                    start,
                ));
            }
        };
        let lexeme = std::str::from_utf8(&self.source[self.pos - len..self.pos])
            .unwrap()
            .to_string();
        Ok(Token::new(kind, lexeme, start))
    }

    fn scan_identifier(&mut self, start: Span) -> Token {
        let begin = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.advance();
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.source[begin..self.pos])
            .unwrap()
            .to_string();
        let kind = lookup_keyword(&text).unwrap_or(TokenKind::Identifier);
        Token::new(kind, text, start)
    }

    fn scan_number(&mut self, start: Span) -> Token {
        let begin = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        let mut is_double = false;
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            is_double = true;
            self.advance();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        let text = std::str::from_utf8(&self.source[begin..self.pos])
            .unwrap()
            .to_string();
        let kind = if is_double {
            TokenKind::DoubleLiteral
        } else {
            TokenKind::IntLiteral
        };
        Token::new(kind, text, start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn skips_comments_and_whitespace() {
        let toks = kinds("  // hi\n/* block\ncomment */ 42");
        assert_eq!(toks, vec![TokenKind::IntLiteral, TokenKind::Eof]);
    }

    #[test]
    fn unterminated_block_comment_errors() {
        let err = Lexer::new("/* never closed").tokenize().unwrap_err();
        assert!(err.message.contains("unterminated block comment"));
    }

    #[test]
    fn numbers_and_doubles() {
        let toks = Lexer::new("42 3.14 5").tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::IntLiteral);
        assert_eq!(toks[1].kind, TokenKind::DoubleLiteral);
        assert_eq!(toks[2].kind, TokenKind::IntLiteral);
    }

    #[test]
    fn keywords_vs_identifiers() {
        let toks = kinds("int x while foo");
        assert_eq!(
            toks,
            vec![
                TokenKind::Int,
                TokenKind::Identifier,
                TokenKind::While,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn compound_operators() {
        let toks = kinds("+= -= *= /= %= == != <= >= ++ -- && ||");
        assert_eq!(
            toks,
            vec![
                TokenKind::PlusEq,
                TokenKind::MinusEq,
                TokenKind::StarEq,
                TokenKind::SlashEq,
                TokenKind::PercentEq,
                TokenKind::EqEq,
                TokenKind::BangEq,
                TokenKind::LtEq,
                TokenKind::GtEq,
                TokenKind::PlusPlus,
                TokenKind::MinusMinus,
                TokenKind::AmpAmp,
                TokenKind::PipePipe,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn bare_ampersand_is_an_error() {
        let err = Lexer::new("a & b").tokenize().unwrap_err();
        assert!(err.message.contains("&&"));
    }

    #[test]
    fn line_and_column_tracking() {
        let toks = Lexer::new("a\nbb c").tokenize().unwrap();
        assert_eq!(toks[0].span, Span::new(1, 1));
        assert_eq!(toks[1].span, Span::new(2, 1));
        assert_eq!(toks[2].span, Span::new(2, 4));
    }

    #[test]
    fn eof_is_sticky() {
        let mut lexer = Lexer::new("");
        assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Eof);
        assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Eof);
    }
}
