//! Error taxonomy for lexing, parsing and evaluation.

use std::fmt;

use super::token::Position;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = FilterError> = std::result::Result<T, E>;

/// Stage that produced a [`FilterError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input rejected by the lexer.
    Lex,
    /// Well-formed tokens that do not form a valid expression.
    Parse,
    /// Failure while evaluating against a target.
    Eval,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Lex => "token error",
            ErrorKind::Parse => "parse error",
            ErrorKind::Eval => "eval error",
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FilterError {
    kind: ErrorKind,
    message: String,
    position: Option<Position>,
    #[source]
    source: Option<BoxError>,
}

impl FilterError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, position: Option<Position>) -> Self {
        Self {
            kind,
            message: message.into(),
            position,
            source: None,
        }
    }

    pub fn lex(message: impl Into<String>, position: Position) -> Self {
        Self::new(ErrorKind::Lex, message, Some(position))
    }

    pub fn parse(message: impl Into<String>, position: Option<Position>) -> Self {
        Self::new(ErrorKind::Parse, message, position)
    }

    pub fn eval(message: impl Into<String>, position: Option<Position>) -> Self {
        Self::new(ErrorKind::Eval, message, position)
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The message without the kind prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Where in the filter text the problem was found, if known.
    pub fn position(&self) -> Option<Position> {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_display_prefix() {
        let pos = Position::new(3, 1, 4);
        let err = FilterError::lex("unexpected character U+0023 '#' at 1:4", pos);
        assert_eq!(
            err.to_string(),
            "token error: unexpected character U+0023 '#' at 1:4"
        );
        assert_eq!(err.kind(), ErrorKind::Lex);
        assert_eq!(err.position(), Some(pos));

        let err = FilterError::parse("empty input", None);
        assert_eq!(err.to_string(), "parse error: empty input");

        let err = FilterError::eval("invalid number: \"x\"", None);
        assert_eq!(err.to_string(), "eval error: invalid number: \"x\"");
        assert_eq!(err.message(), "invalid number: \"x\"");
    }

    #[test]
    fn test_source_chain() {
        let cause: BoxError = "field not found: \"Age\"".into();
        let err = FilterError::eval("field not found: \"Age\"", None).with_source(cause);
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("field not found: \"Age\""));
    }
}
