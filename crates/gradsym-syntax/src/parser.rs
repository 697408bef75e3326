//! Recursive descent parser for the gradsym source language.
//!
//! Grammar:
//!
//! ```text
//! program ::= stmt+
//! stmt    ::= block | "return" expr ";" | "if" "(" expr ")" stmt ("else" stmt)? | expr ";"
//! block   ::= "{" stmt+ "}"
//! expr    ::= assign
//! assign  ::= logical ("=" assign)?
//! logical ::= equality (("&&"|"||") equality)*
//! equality::= relational (("=="|"!=") relational)*
//! rel     ::= add (("<"|"<="|">"|">=") add)*
//! add     ::= mul (("+"|"-") mul)*
//! mul     ::= unary (("*"|"/") unary)*
//! unary   ::= ("+"|"-")? unary | primary
//! primary ::= "(" expr ")" | number | ident
//! ```
//!
//! `>` and `>=` are desugared to `<`/`<=` with operands swapped.

use crate::ast::{BinOp, Node, NodeKind};
use crate::lexer::Lexer;
use crate::token::{Span, Token, TokenKind};
use crate::vars::VarTable;
use thiserror::Error;

/// Parser error.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid token at {span}")]
    InvalidToken { span: Span },
    #[error("unexpected token at {span}: expected {expected}, found {found}")]
    UnexpectedToken {
        expected: String,
        found: String,
        span: Span,
    },
    #[error("invalid syntax at {span}: {message}")]
    InvalidSyntax { message: String, span: Span },
}

impl ParseError {
    /// Get the source span where this error occurred.
    pub fn span(&self) -> Span {
        match self {
            ParseError::InvalidToken { span } => *span,
            ParseError::UnexpectedToken { span, .. } => *span,
            ParseError::InvalidSyntax { span, .. } => *span,
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parse a complete program, returning the variable table and the statement
/// list.
pub fn parse(source: &str) -> ParseResult<(VarTable, Vec<Node>)> {
    let mut parser = Parser::new(source)?;
    let program = parser.parse_program()?;
    Ok((parser.into_vars(), program))
}

/// Parser for gradsym source code.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    vars: VarTable,
}

impl Parser {
    /// Create a new parser from source text. Fails on the first lex error.
    pub fn new(source: &str) -> ParseResult<Self> {
        let (tokens, vars) = Lexer::new(source).tokenize();
        if let Some(err) = tokens.iter().find(|t| t.is_error()) {
            return Err(ParseError::InvalidToken { span: err.span });
        }
        Ok(Self {
            tokens,
            pos: 0,
            vars,
        })
    }

    /// Take the variable table out of the parser.
    pub fn into_vars(self) -> VarTable {
        self.vars
    }

    /// Parse statements until end of file.
    pub fn parse_program(&mut self) -> ParseResult<Vec<Node>> {
        let mut program = Vec::new();
        while !self.is_at_end() {
            program.push(self.parse_stmt()?);
        }
        Ok(program)
    }

    fn parse_stmt(&mut self) -> ParseResult<Node> {
        let start = self.current_span();

        match self.peek_kind() {
            TokenKind::LBrace => self.parse_block(),
            TokenKind::Return => {
                self.advance();
                let value = self.parse_expr()?;
                self.expect(TokenKind::Semicolon)?;
                let span = start.merge(self.prev_span());
                Ok(Node::new(NodeKind::Return(Box::new(value)), span))
            }
            TokenKind::If => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                let then_branch = self.parse_stmt()?;
                let else_branch = if self.match_token(TokenKind::Else) {
                    Some(Box::new(self.parse_stmt()?))
                } else {
                    None
                };
                let span = start.merge(self.prev_span());
                Ok(Node::new(
                    NodeKind::If {
                        cond: Box::new(cond),
                        then_branch: Box::new(then_branch),
                        else_branch,
                    },
                    span,
                ))
            }
            TokenKind::For => Err(ParseError::InvalidSyntax {
                message: "for loops are not supported".to_string(),
                span: start,
            }),
            _ => {
                let expr = self.parse_expr()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(expr)
            }
        }
    }

    fn parse_block(&mut self) -> ParseResult<Node> {
        let start = self.current_span();
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        loop {
            stmts.push(self.parse_stmt()?);
            if self.check(TokenKind::RBrace) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        let span = start.merge(self.prev_span());
        Ok(Node::new(NodeKind::Block(stmts), span))
    }

    fn parse_expr(&mut self) -> ParseResult<Node> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> ParseResult<Node> {
        let lhs = self.parse_logical()?;
        if self.match_token(TokenKind::Assign) {
            let rhs = self.parse_assign()?;
            let span = lhs.span.merge(rhs.span);
            return Ok(Node::new(
                NodeKind::Assign {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            ));
        }
        Ok(lhs)
    }

    fn parse_logical(&mut self) -> ParseResult<Node> {
        let mut node = self.parse_equality()?;
        loop {
            let op = if self.match_token(TokenKind::AndAnd) {
                BinOp::And
            } else if self.match_token(TokenKind::OrOr) {
                BinOp::Or
            } else {
                return Ok(node);
            };
            let rhs = self.parse_equality()?;
            node = Self::binary(op, node, rhs);
        }
    }

    fn parse_equality(&mut self) -> ParseResult<Node> {
        let mut node = self.parse_relational()?;
        loop {
            let op = if self.match_token(TokenKind::EqEq) {
                BinOp::Eq
            } else if self.match_token(TokenKind::Ne) {
                BinOp::Ne
            } else {
                return Ok(node);
            };
            let rhs = self.parse_relational()?;
            node = Self::binary(op, node, rhs);
        }
    }

    /// Relational operators. `a > b` parses as `b < a` and `a >= b` as
    /// `b <= a`, so the instruction set only needs `Lt` and `Le`.
    fn parse_relational(&mut self) -> ParseResult<Node> {
        let mut node = self.parse_add()?;
        loop {
            if self.match_token(TokenKind::Lt) {
                let rhs = self.parse_add()?;
                node = Self::binary(BinOp::Lt, node, rhs);
            } else if self.match_token(TokenKind::Le) {
                let rhs = self.parse_add()?;
                node = Self::binary(BinOp::Le, node, rhs);
            } else if self.match_token(TokenKind::Gt) {
                let rhs = self.parse_add()?;
                node = Self::binary(BinOp::Lt, rhs, node);
            } else if self.match_token(TokenKind::Ge) {
                let rhs = self.parse_add()?;
                node = Self::binary(BinOp::Le, rhs, node);
            } else {
                return Ok(node);
            }
        }
    }

    fn parse_add(&mut self) -> ParseResult<Node> {
        let mut node = self.parse_mul()?;
        loop {
            let op = if self.match_token(TokenKind::Plus) {
                BinOp::Add
            } else if self.match_token(TokenKind::Minus) {
                BinOp::Sub
            } else {
                return Ok(node);
            };
            let rhs = self.parse_mul()?;
            node = Self::binary(op, node, rhs);
        }
    }

    fn parse_mul(&mut self) -> ParseResult<Node> {
        let mut node = self.parse_unary()?;
        loop {
            let op = if self.match_token(TokenKind::Star) {
                BinOp::Mul
            } else if self.match_token(TokenKind::Slash) {
                BinOp::Div
            } else {
                return Ok(node);
            };
            let rhs = self.parse_unary()?;
            node = Self::binary(op, node, rhs);
        }
    }

    /// Unary plus is absorbed; unary minus lowers to `0 - x`.
    fn parse_unary(&mut self) -> ParseResult<Node> {
        let start = self.current_span();
        if self.match_token(TokenKind::Plus) {
            return self.parse_unary();
        }
        if self.match_token(TokenKind::Minus) {
            let operand = self.parse_unary()?;
            let span = start.merge(operand.span);
            let zero = Node::new(NodeKind::Num(0.0), start);
            return Ok(Node::new(
                NodeKind::Binary {
                    op: BinOp::Sub,
                    lhs: Box::new(zero),
                    rhs: Box::new(operand),
                },
                span,
            ));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> ParseResult<Node> {
        let start = self.current_span();

        if self.match_token(TokenKind::LParen) {
            let node = self.parse_expr()?;
            self.expect(TokenKind::RParen)?;
            return Ok(node);
        }

        match self.peek_kind() {
            TokenKind::Num(v) => {
                self.advance();
                Ok(Node::new(NodeKind::Num(v), start))
            }
            TokenKind::Ident(name) => {
                self.advance();
                // The lexer interned every identifier it saw.
                let offset = self.vars.id(&name).unwrap_or_default();
                Ok(Node::new(NodeKind::Var { offset }, start))
            }
            other => Err(ParseError::UnexpectedToken {
                expected: "expression".to_string(),
                found: other.to_string(),
                span: start,
            }),
        }
    }

    fn binary(op: BinOp, lhs: Node, rhs: Node) -> Node {
        let span = lhs.span.merge(rhs.span);
        Node::new(
            NodeKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            span,
        )
    }

    // === Token cursor helpers ===

    fn peek_kind(&self) -> TokenKind {
        self.tokens[self.pos.min(self.tokens.len() - 1)].kind.clone()
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn prev_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<()> {
        if self.match_token(kind.clone()) {
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken {
                expected: format!("\"{}\"", kind),
                found: self.peek_kind().to_string(),
                span: self.current_span(),
            })
        }
    }

    fn is_at_end(&self) -> bool {
        self.tokens[self.pos].is_eof()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn synth_program(n_vars: u8, bound: i32, threshold: i32) -> String {
        let assigns: Vec<String> = (0..n_vars)
            .map(|i| format!("v{} = {};", i, bound + i as i32))
            .collect();
        format!(
            "{}\nif (v0 > {}) {{ r = 1; }} else {{ r = 0; }}\nreturn r;",
            assigns.join("\n"),
            threshold
        )
    }

    proptest! {
        #[test]
        fn parser_accepts_synthesized_programs(
            n_vars in 1u8..=4,
            bound in -100i32..=100,
            threshold in -100i32..=100,
        ) {
            let source = synth_program(n_vars, bound, threshold);
            let (vars, program) = parse(&source).expect("synthesized program should parse");
            // v0..v{n-1} then r, interned in order of first appearance
            prop_assert_eq!(vars.len(), n_vars as usize + 1);
            prop_assert_eq!(vars.id("v0"), Some(0));
            prop_assert_eq!(program.len(), n_vars as usize + 2);
        }
    }
}
