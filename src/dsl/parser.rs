//! Parser for the filter DSL.
//!
//! Grammar (in rough EBNF):
//!
//! filter     = or_expr EOF
//! or_expr    = and_expr ("||" and_expr)*
//! and_expr   = unary_expr ("&&" unary_expr)*
//! unary_expr = "!" primary | primary
//! primary    = "(" or_expr ")" | comparison
//! comparison = IDENT compare_op value
//! compare_op = ">" | ">=" | "<" | "<=" | "==" | "==*" | "!=" | "!=*"
//!            | "=~" | "=~*" | "!~" | "!~*"
//! value      = STRING | RAW_STRING | NUMBER | DURATION | TIME | BOOL

use std::collections::BTreeSet;

use super::ast::{CompareOp, Comparison, Expr, LogicalOp, Node, NodeId};
use super::error::{FilterError, Result};
use super::lexer::{Lexer, unescape};
use super::literal::{parse_duration, parse_number, parse_time};
use super::regex_cache::RegexCache;
use super::token::{Token, TokenKind};

/// Maximum number of opening parentheses in one expression.
///
/// Counts every group in the input, not just the current nesting depth.
pub const MAX_PARENS: usize = 256;

/// Parser state.
struct Parser<'a> {
    lexer: Lexer<'a>,
    peeked: Option<Token>,
    nodes: Vec<Node>,
    identifiers: BTreeSet<String>,
    parens: usize,
    cache: &'a RegexCache,
}

impl<'a> Parser<'a> {
    fn new(lexer: Lexer<'a>, cache: &'a RegexCache) -> Self {
        Parser {
            lexer,
            peeked: None,
            nodes: Vec::new(),
            identifiers: BTreeSet::new(),
            parens: 0,
            cache,
        }
    }

    fn peek(&mut self) -> &Token {
        self.peeked.get_or_insert_with(|| self.lexer.next_token())
    }

    /// Consume the next token. Error tokens become lex errors here.
    fn advance(&mut self) -> Result<Token> {
        let tok = match self.peeked.take() {
            Some(tok) => tok,
            None => self.lexer.next_token(),
        };
        if tok.kind == TokenKind::Error {
            return Err(FilterError::lex(tok.text, tok.pos));
        }
        Ok(tok)
    }

    fn expect(&mut self, expected: TokenKind) -> Result<Token> {
        let tok = self.advance()?;
        if tok.kind != expected {
            return Err(unexpected(&format!("{expected}"), &tok));
        }
        Ok(tok)
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Parse OR expression: and_expr ("||" and_expr)*
    fn parse_or_expr(&mut self) -> Result<NodeId> {
        let mut left = self.parse_and_expr()?;

        while self.peek().kind == TokenKind::Or {
            self.advance()?;
            let right = self.parse_and_expr()?;
            left = self.push(Node::Binary {
                op: LogicalOp::Or,
                left,
                right,
            });
        }

        Ok(left)
    }

    /// Parse AND expression: unary_expr ("&&" unary_expr)*
    fn parse_and_expr(&mut self) -> Result<NodeId> {
        let mut left = self.parse_unary_expr()?;

        while self.peek().kind == TokenKind::And {
            self.advance()?;
            let right = self.parse_unary_expr()?;
            left = self.push(Node::Binary {
                op: LogicalOp::And,
                left,
                right,
            });
        }

        Ok(left)
    }

    /// Parse unary expression: "!" primary | primary
    fn parse_unary_expr(&mut self) -> Result<NodeId> {
        if self.peek().kind == TokenKind::Not {
            self.advance()?;
            let operand = self.parse_primary()?;
            return Ok(self.push(Node::Not { operand }));
        }
        self.parse_primary()
    }

    /// Parse primary expression: "(" or_expr ")" | comparison
    fn parse_primary(&mut self) -> Result<NodeId> {
        match self.peek().kind {
            TokenKind::LParen => {
                let open = self.advance()?;
                self.parens += 1;
                if self.parens > MAX_PARENS {
                    return Err(FilterError::parse(
                        format!(
                            "too many parentheses: exceeded limit {MAX_PARENS} at {}",
                            open.pos
                        ),
                        Some(open.pos),
                    ));
                }
                let inner = self.parse_or_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Ident => self.parse_comparison(),
            _ => {
                let tok = self.advance()?;
                Err(unexpected("left parenthesis or identifier", &tok))
            }
        }
    }

    /// Parse comparison: IDENT compare_op value
    fn parse_comparison(&mut self) -> Result<NodeId> {
        let field = self.expect(TokenKind::Ident)?;
        self.identifiers.insert(field.text.clone());

        let op_token = self.advance()?;
        let Some(op) = CompareOp::from_token(op_token.kind) else {
            return Err(unexpected("comparison operator", &op_token));
        };

        let value = self.advance()?;
        if !value.kind.is_value() {
            return Err(unexpected("value", &value));
        }
        if op_token.kind.is_case_insensitive_eq() && !value.kind.is_string() {
            return Err(FilterError::parse(
                format!(
                    "expected numeric comparison operator, got string-only operator at {}: {:?}",
                    op_token.pos, op_token.text
                ),
                Some(op_token.pos),
            ));
        }

        let literal = literal_text(&value);
        let regex = if op.is_regex() {
            if literal.is_empty() {
                return Err(FilterError::parse(
                    format!("invalid regex {literal:?} at {}: empty pattern", value.pos),
                    Some(value.pos),
                ));
            }
            let pattern = if op_token.kind.is_case_insensitive_regex() {
                format!("(?i){literal}")
            } else {
                literal.clone()
            };
            let re = self.cache.get_or_compile(&pattern).map_err(|err| {
                FilterError::parse(
                    format!("invalid regex {literal:?} at {}: {err}", value.pos),
                    Some(value.pos),
                )
                .with_source(err)
            })?;
            Some(re)
        } else {
            None
        };

        let (mut number, mut duration, mut time) = (None, None, None);
        match value.kind {
            TokenKind::Number => number = parse_number(&literal),
            TokenKind::Duration => duration = parse_duration(&literal),
            TokenKind::Time | TokenKind::String | TokenKind::RawString => {
                time = parse_time(&literal)
            }
            _ => {}
        }

        Ok(self.push(Node::Comparison(Comparison {
            field,
            op,
            op_token,
            value,
            literal,
            regex,
            number,
            duration,
            time,
        })))
    }
}

fn unexpected(expected: &str, got: &Token) -> FilterError {
    FilterError::parse(
        format!(
            "expected {expected}, got {} at {}: {:?}",
            got.kind, got.pos, got.text
        ),
        Some(got.pos),
    )
}

/// Literal text as compared: quotes stripped, escapes decoded for quoted
/// strings, raw strings untouched.
fn literal_text(tok: &Token) -> String {
    let inner = tok
        .text
        .get(1..tok.text.len().saturating_sub(1))
        .unwrap_or_default();
    match tok.kind {
        TokenKind::String => unescape(inner),
        TokenKind::RawString => inner.to_string(),
        _ => tok.text.clone(),
    }
}

fn parse_source(input: &[u8], cache: &RegexCache) -> Result<Expr> {
    if input.is_empty() {
        return Err(FilterError::parse("empty input", None));
    }

    let mut parser = Parser::new(Lexer::from_bytes(input), cache);
    let root = parser.parse_or_expr()?;

    // Ensure we consumed all tokens
    let tok = parser.advance()?;
    if tok.kind != TokenKind::Eof {
        return Err(FilterError::parse(
            format!("unexpected token after parsing: {:?} at {}", tok.text, tok.pos),
            Some(tok.pos),
        ));
    }

    tracing::trace!(
        nodes = parser.nodes.len(),
        identifiers = parser.identifiers.len(),
        "parsed filter"
    );
    Ok(Expr {
        nodes: parser.nodes,
        root,
        identifiers: parser.identifiers,
    })
}

impl Expr {
    /// Compile a filter using the process-wide regex cache.
    pub fn parse(input: &str) -> Result<Self> {
        Self::parse_with_cache(input, RegexCache::global())
    }

    /// Compile a filter, compiling regexes through `cache`.
    pub fn parse_with_cache(input: &str, cache: &RegexCache) -> Result<Self> {
        parse_source(input.as_bytes(), cache)
    }
}

/// Parse a filter DSL string into a compiled expression.
pub fn parse(input: &str) -> Result<Expr> {
    Expr::parse(input)
}

/// Like [`parse`], for input that may not be valid UTF-8.
///
/// Invalid sequences are reported as lex errors at their position.
pub fn parse_bytes(input: &[u8]) -> Result<Expr> {
    parse_source(input, RegexCache::global())
}
