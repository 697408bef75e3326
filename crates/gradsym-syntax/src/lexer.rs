//! Lexer for the gradsym source language.
//!
//! Converts source text into a stream of tokens, interning identifiers into
//! a [`VarTable`] as a side effect.

use crate::token::{Span, Token, TokenKind};
use crate::vars::VarTable;
use std::str::Chars;

/// Lexer for gradsym source code.
pub struct Lexer<'a> {
    /// Source text being lexed.
    source: &'a str,
    /// Character iterator.
    chars: Chars<'a>,
    /// Current byte position.
    pos: usize,
    /// Current line number (1-indexed).
    line: u32,
    /// Current column number (1-indexed).
    column: u32,
    /// Start position of current token.
    token_start: usize,
    /// Start line of current token.
    token_start_line: u32,
    /// Start column of current token.
    token_start_column: u32,
    /// Variable name interner, populated on each identifier.
    vars: VarTable,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given source text.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars(),
            pos: 0,
            line: 1,
            column: 1,
            token_start: 0,
            token_start_line: 1,
            token_start_column: 1,
            vars: VarTable::new(),
        }
    }

    /// Tokenize the entire source, returning all tokens including EOF,
    /// together with the variable table built along the way.
    pub fn tokenize(mut self) -> (Vec<Token>, VarTable) {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let is_eof = token.is_eof();
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        (tokens, self.vars)
    }

    /// Get the next token.
    fn next_token(&mut self) -> Token {
        self.skip_whitespace();
        self.mark_token_start();

        let Some(c) = self.peek() else {
            return self.make_token(TokenKind::Eof);
        };

        if c.is_ascii_digit() {
            return self.lex_number();
        }

        if c.is_ascii_alphabetic() || c == '_' {
            return self.lex_identifier();
        }

        self.lex_operator_or_punctuation()
    }

    /// Skip whitespace characters.
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Mark the start of a new token.
    fn mark_token_start(&mut self) {
        self.token_start = self.pos;
        self.token_start_line = self.line;
        self.token_start_column = self.column;
    }

    /// Peek at the current character without consuming it.
    fn peek(&self) -> Option<char> {
        self.chars.clone().next()
    }

    /// Advance to the next character, returning the current one.
    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Create a token with the current span.
    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(
            kind,
            Span::new(
                self.token_start,
                self.pos,
                self.token_start_line,
                self.token_start_column,
            ),
        )
    }

    /// Get the text of the current token.
    fn token_text(&self) -> &'a str {
        &self.source[self.token_start..self.pos]
    }

    /// Lex a numeric literal: decimal digits with an optional fractional part.
    fn lex_number(&mut self) -> Token {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') {
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    self.advance();
                } else {
                    break;
                }
            }
        }

        let text = self.token_text();
        match text.parse::<f32>() {
            Ok(v) => self.make_token(TokenKind::Num(v)),
            Err(_) => self.make_token(TokenKind::Error(format!("invalid number: {}", text))),
        }
    }

    /// Lex an identifier or keyword. Identifiers are interned.
    fn lex_identifier(&mut self) -> Token {
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }

        let text = self.token_text();
        if let Some(keyword) = TokenKind::keyword(text) {
            self.make_token(keyword)
        } else {
            self.vars.intern(text);
            self.make_token(TokenKind::Ident(text.to_string()))
        }
    }

    /// Lex an operator or punctuation, multi-byte operators first.
    fn lex_operator_or_punctuation(&mut self) -> Token {
        let c = match self.advance() {
            Some(c) => c,
            None => return self.make_token(TokenKind::Eof),
        };

        match c {
            '(' => self.make_token(TokenKind::LParen),
            ')' => self.make_token(TokenKind::RParen),
            '{' => self.make_token(TokenKind::LBrace),
            '}' => self.make_token(TokenKind::RBrace),
            ';' => self.make_token(TokenKind::Semicolon),
            '+' => self.make_token(TokenKind::Plus),
            '-' => self.make_token(TokenKind::Minus),
            '*' => self.make_token(TokenKind::Star),
            '/' => self.make_token(TokenKind::Slash),
            '=' => {
                if self.peek() == Some('=') {
                    self.advance();
                    self.make_token(TokenKind::EqEq)
                } else {
                    self.make_token(TokenKind::Assign)
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.advance();
                    self.make_token(TokenKind::Ne)
                } else {
                    self.make_token(TokenKind::Error("invalid token".to_string()))
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.advance();
                    self.make_token(TokenKind::Le)
                } else {
                    self.make_token(TokenKind::Lt)
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.advance();
                    self.make_token(TokenKind::Ge)
                } else {
                    self.make_token(TokenKind::Gt)
                }
            }
            '&' => {
                if self.peek() == Some('&') {
                    self.advance();
                    self.make_token(TokenKind::AndAnd)
                } else {
                    self.make_token(TokenKind::Error("invalid token".to_string()))
                }
            }
            '|' => {
                if self.peek() == Some('|') {
                    self.advance();
                    self.make_token(TokenKind::OrOr)
                } else {
                    self.make_token(TokenKind::Error("invalid token".to_string()))
                }
            }
            _ => self.make_token(TokenKind::Error("invalid token".to_string())),
        }
    }
}
