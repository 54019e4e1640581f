//! Filter expression language.
//!
//! Syntax:
//!   Field > 10                  - numeric comparison (also >=, <, <=, ==, !=)
//!   Name == "x"                 - exact string match ('x' and `x` also work)
//!   Name ==* "x", Name !=* "x"  - case-insensitive string (in)equality
//!   Name =~ "^a", Name !~ "^a"  - regex match / non-match
//!   Name =~* "^a", Name !~* "^a" - case-insensitive regex
//!   Took < 1h30m                - duration comparison
//!   At >= 2024-01-01T00:00:00Z  - time comparison (RFC 3339)
//!   Flag == true                - booleans compare by their text
//!   expr1 && expr2              - AND
//!   expr1 || expr2              - OR (lower precedence than &&)
//!   !expr                       - NOT, binds to one comparison or group
//!   (expr)                      - grouping
//!
//! Filters are compiled once with [`parse`] and evaluated any number of
//! times, from any number of threads, with [`Expr::eval`].

mod ast;
mod error;
mod eval;
mod lexer;
mod literal;
mod parser;
mod regex_cache;
mod token;
mod value;

pub use ast::{CompareOp, Comparison, Expr, LogicalOp, Node, NodeId, NodeKind};
pub use error::{BoxError, ErrorKind, FilterError, Result};
pub use eval::{EPSILON, evaluate};
pub use lexer::Lexer;
pub use literal::{parse_duration, parse_number, parse_time};
pub use parser::{MAX_PARENS, parse, parse_bytes};
pub use regex_cache::RegexCache;
pub use token::{Position, Token, TokenKind};
pub use value::{FieldNotFound, FnTarget, LookupError, Target, Value};
