//! Pratt parser: two tokens of lookahead, a precedence ladder, and prefix /
//! infix handlers selected by a match on the token tag. Errors accumulate
//! across the pass and are reported together.

use serde::{Deserialize, Serialize};

use crate::ast::Node;
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

/// All parse failures from one pass, joined line by line for display.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{}", .errors.join("\n"))]
pub struct ParseError {
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Or,
    And,
    Equals,
    LessGreater,
    Sum,
    Product,
    Prefix,
    StartsEndsWith,
    In,
    Call,
    Index,
    Member,
}

fn token_precedence(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Or => Precedence::Or,
        TokenKind::And => Precedence::And,
        TokenKind::Equal | TokenKind::NotEqual => Precedence::Equals,
        TokenKind::LessThan
        | TokenKind::GreaterThan
        | TokenKind::LessThanOrEqual
        | TokenKind::GreaterThanOrEqual => Precedence::LessGreater,
        TokenKind::Plus | TokenKind::Minus => Precedence::Sum,
        TokenKind::Asterisk | TokenKind::Slash | TokenKind::Percent => Precedence::Product,
        TokenKind::StartsWith | TokenKind::EndsWith => Precedence::StartsEndsWith,
        TokenKind::In => Precedence::In,
        TokenKind::LParen => Precedence::Call,
        TokenKind::LBracket => Precedence::Index,
        TokenKind::Stop => Precedence::Member,
        _ => Precedence::Lowest,
    }
}

fn has_infix(kind: TokenKind) -> bool {
    token_precedence(kind) != Precedence::Lowest
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    peek: Token,
    errors: Vec<String>,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Self {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token();
        let peek = lexer.next_token();
        Self {
            lexer,
            current,
            peek,
            errors: Vec::new(),
        }
    }

    /// Parse a single expression. Anything left over after it is an error.
    pub fn parse(mut self) -> Result<Node, ParseError> {
        let node = self.parse_expression(Precedence::Lowest);

        if self.peek.kind != TokenKind::Eof {
            self.error(format!(
                "multiple expressions found, next: {}",
                self.peek.literal
            ));
        }

        if !self.errors.is_empty() {
            return Err(ParseError {
                errors: self.errors,
            });
        }

        node.ok_or_else(|| ParseError {
            errors: vec!["empty expression".to_string()],
        })
    }

    fn parse_expression(&mut self, precedence: Precedence) -> Option<Node> {
        let mut left = self.parse_prefix()?;

        while self.peek.kind != TokenKind::Eof && precedence < token_precedence(self.peek.kind) {
            if !has_infix(self.peek.kind) {
                return Some(left);
            }
            self.next_token();
            left = self.parse_infix(left)?;
        }

        Some(left)
    }

    fn parse_prefix(&mut self) -> Option<Node> {
        match self.current.kind {
            TokenKind::Ident => Some(Node::Identifier(self.current.literal.clone())),
            TokenKind::Int => self.parse_integer_literal(),
            TokenKind::Float => self.parse_float_literal(),
            TokenKind::Str => Some(Node::Str(self.current.literal.clone())),
            TokenKind::True => Some(Node::Boolean(true)),
            TokenKind::False => Some(Node::Boolean(false)),
            TokenKind::Null => Some(Node::Null),
            TokenKind::Bang | TokenKind::Minus => self.parse_prefix_expression(),
            TokenKind::LParen => self.parse_grouped_expression(),
            TokenKind::LBracket => self.parse_array_literal(),
            _ => {
                self.error(format!("unexpected token: {}", self.current.literal));
                None
            }
        }
    }

    fn parse_infix(&mut self, left: Node) -> Option<Node> {
        match self.current.kind {
            TokenKind::LParen => self.parse_call_expression(left),
            TokenKind::LBracket => self.parse_index_expression(left),
            TokenKind::Stop => self.parse_member_expression(left),
            _ => self.parse_infix_expression(left),
        }
    }

    fn parse_integer_literal(&mut self) -> Option<Node> {
        match self.current.literal.parse::<i64>() {
            Ok(value) => Some(Node::Integer(value)),
            Err(_) => {
                self.error(format!("invalid integer literal: {}", self.current.literal));
                None
            }
        }
    }

    fn parse_float_literal(&mut self) -> Option<Node> {
        match self.current.literal.parse::<f64>() {
            Ok(value) => Some(Node::Float(value)),
            Err(_) => {
                self.error(format!("invalid float literal: {}", self.current.literal));
                None
            }
        }
    }

    fn parse_prefix_expression(&mut self) -> Option<Node> {
        let operator = self.current.literal.clone();
        self.next_token();

        let right = self.parse_expression(Precedence::Prefix)?;
        Some(Node::Prefix {
            operator,
            right: Box::new(right),
        })
    }

    fn parse_infix_expression(&mut self, left: Node) -> Option<Node> {
        let operator = self.current.literal.clone();
        let precedence = token_precedence(self.current.kind);
        self.next_token();

        let right = self.parse_expression(precedence)?;
        Some(Node::Infix {
            left: Box::new(left),
            operator,
            right: Box::new(right),
        })
    }

    fn parse_member_expression(&mut self, left: Node) -> Option<Node> {
        let precedence = token_precedence(self.current.kind);
        self.next_token();

        let member = self.parse_expression(precedence)?;
        Some(Node::Member {
            left: Box::new(left),
            member: Box::new(member),
        })
    }

    fn parse_grouped_expression(&mut self) -> Option<Node> {
        self.next_token();

        let node = self.parse_expression(Precedence::Lowest);
        if !self.expect_peek(TokenKind::RParen) {
            return None;
        }

        node
    }

    fn parse_call_expression(&mut self, function: Node) -> Option<Node> {
        let arguments = self.parse_expression_list(TokenKind::RParen)?;
        Some(Node::Call {
            function: Box::new(function),
            arguments,
        })
    }

    fn parse_index_expression(&mut self, left: Node) -> Option<Node> {
        self.next_token();

        let index = self.parse_expression(Precedence::Lowest)?;
        if !self.expect_peek(TokenKind::RBracket) {
            return None;
        }

        Some(Node::Index {
            left: Box::new(left),
            index: Box::new(index),
        })
    }

    fn parse_array_literal(&mut self) -> Option<Node> {
        let elements = self.parse_expression_list(TokenKind::RBracket)?;
        Some(Node::Array(elements))
    }

    fn parse_expression_list(&mut self, end: TokenKind) -> Option<Vec<Node>> {
        let mut list = Vec::new();

        if self.peek.kind == end {
            self.next_token();
            return Some(list);
        }

        self.next_token();
        list.push(self.parse_expression(Precedence::Lowest)?);

        while self.peek.kind == TokenKind::Comma {
            self.next_token();
            self.next_token();
            list.push(self.parse_expression(Precedence::Lowest)?);
        }

        if !self.expect_peek(end) {
            return None;
        }

        Some(list)
    }

    fn next_token(&mut self) {
        self.current = std::mem::replace(&mut self.peek, self.lexer.next_token());
    }

    fn expect_peek(&mut self, kind: TokenKind) -> bool {
        if self.peek.kind == kind {
            self.next_token();
            return true;
        }
        self.error(format!(
            "unexpected token: {}, expected {kind}",
            self.peek.literal
        ));
        false
    }

    fn error(&mut self, message: String) {
        self.errors.push(message);
    }
}
