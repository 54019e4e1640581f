//! Token model shared by the lexer and the parser.

use std::fmt;

/// Location of the first character of a token.
///
/// `offset` is a byte offset into the source; `line` and `column` are
/// 1-based, with columns counted in terminal display cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(offset: usize, line: usize, column: usize) -> Self {
        Self {
            offset,
            line,
            column,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Closed set of token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Error,
    Eof,
    Ident,

    // Comparison operators
    Gt,    // >
    Ge,    // >=
    Lt,    // <
    Le,    // <=
    Eq,    // ==
    EqI,   // ==*
    Ne,    // !=
    NeI,   // !=*
    Match,   // =~
    MatchI,  // =~*
    NMatch,  // !~
    NMatchI, // !~*

    // Logical operators
    And, // &&
    Or,  // ||
    Not, // !

    // Punctuation
    LParen,
    RParen,

    // Literals
    String,
    RawString,
    Number,
    Duration,
    Time,
    Bool,
}

impl TokenKind {
    /// Canonical spelling for operators and punctuation.
    pub fn literal(self) -> Option<&'static str> {
        let s = match self {
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Eq => "==",
            TokenKind::EqI => "==*",
            TokenKind::Ne => "!=",
            TokenKind::NeI => "!=*",
            TokenKind::Match => "=~",
            TokenKind::MatchI => "=~*",
            TokenKind::NMatch => "!~",
            TokenKind::NMatchI => "!~*",
            TokenKind::And => "&&",
            TokenKind::Or => "||",
            TokenKind::Not => "!",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            _ => return None,
        };
        Some(s)
    }

    /// Case-insensitive regex operators.
    pub fn is_case_insensitive_regex(self) -> bool {
        matches!(self, TokenKind::MatchI | TokenKind::NMatchI)
    }

    /// Case-insensitive equality operators, only valid against string literals.
    pub fn is_case_insensitive_eq(self) -> bool {
        matches!(self, TokenKind::EqI | TokenKind::NeI)
    }

    pub fn is_value(self) -> bool {
        matches!(
            self,
            TokenKind::String
                | TokenKind::RawString
                | TokenKind::Number
                | TokenKind::Duration
                | TokenKind::Time
                | TokenKind::Bool
        )
    }

    pub fn is_string(self) -> bool {
        matches!(self, TokenKind::String | TokenKind::RawString)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Error => "error",
            TokenKind::Eof => "EOF",
            TokenKind::Ident => "identifier",
            TokenKind::Gt => "\"greater than\" operator",
            TokenKind::Ge => "\"greater than or equal to\" operator",
            TokenKind::Lt => "\"less than\" operator",
            TokenKind::Le => "\"less than or equal to\" operator",
            TokenKind::Eq => "\"equal to\" operator",
            TokenKind::EqI => "\"case-insensitive equal to\" operator",
            TokenKind::Ne => "\"not equal to\" operator",
            TokenKind::NeI => "\"case-insensitive not equal to\" operator",
            TokenKind::Match => "regex matching operator",
            TokenKind::MatchI => "case-insensitive regex matching operator",
            TokenKind::NMatch => "negative regex matching operator",
            TokenKind::NMatchI => "case-insensitive negative regex matching operator",
            TokenKind::And => "logical AND operator",
            TokenKind::Or => "logical OR operator",
            TokenKind::Not => "logical NOT operator",
            TokenKind::LParen => "left parenthesis",
            TokenKind::RParen => "right parenthesis",
            TokenKind::String => "string",
            TokenKind::RawString => "raw string",
            TokenKind::Number => "number",
            TokenKind::Duration => "duration",
            TokenKind::Time => "time",
            TokenKind::Bool => "boolean",
        };
        f.write_str(name)
    }
}

/// A lexed token.
///
/// `text` is the exact source slice, quotes included. For error tokens it
/// holds the human-readable message instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub pos: Position,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, pos: Position) -> Self {
        Self {
            kind,
            text: text.into(),
            pos,
        }
    }
}

/// The six accepted spellings of boolean literals.
pub fn is_bool_literal(s: &str) -> bool {
    matches!(s, "true" | "True" | "TRUE" | "false" | "False" | "FALSE")
}
