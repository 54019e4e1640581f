//! Lexer/tokenizer for the filter DSL.
//!
//! The lexer is pull-based: the parser asks for one token at a time. After an
//! error token or the EOF token has been produced, every further call returns
//! EOF.

use unicode_width::UnicodeWidthChar;
use winnow::combinator::{alt, opt, repeat};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{one_of, take_while};

use super::literal::{PResult, duration_unit};
use super::token::{Position, Token, TokenKind, is_bool_literal};

/// One decoded input character.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Ch {
    Char(char),
    Invalid,
    Eof,
}

/// Character-level scanner state.
pub struct Lexer<'a> {
    input: &'a [u8],
    offset: usize,
    line: usize,
    column: usize,
    start: Position,
    paren_depth: i64,
    done: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self::from_bytes(input.as_bytes())
    }

    /// Lex raw bytes. Invalid UTF-8 is reported as a lexical error rather
    /// than rejected up front.
    pub fn from_bytes(input: &'a [u8]) -> Self {
        Lexer {
            input,
            offset: 0,
            line: 1,
            column: 1,
            start: Position::new(0, 1, 1),
            paren_depth: 0,
            done: false,
        }
    }

    /// Produce the next token.
    pub fn next_token(&mut self) -> Token {
        if self.done {
            return Token::new(TokenKind::Eof, "", self.here());
        }

        self.skip_space();
        self.start = self.here();

        match self.lex_token() {
            Ok(kind) => {
                if kind == TokenKind::Eof {
                    self.done = true;
                }
                let text = String::from_utf8_lossy(&self.input[self.start.offset..self.offset]);
                Token::new(kind, text.into_owned(), self.start)
            }
            Err(message) => {
                self.done = true;
                Token::new(TokenKind::Error, message, self.start)
            }
        }
    }

    fn here(&self) -> Position {
        Position::new(self.offset, self.line, self.column)
    }

    fn reset(&mut self, pos: Position) {
        self.offset = pos.offset;
        self.line = pos.line;
        self.column = pos.column;
    }

    fn peek(&self) -> Ch {
        decode(&self.input[self.offset..]).0
    }

    fn bump(&mut self) -> Ch {
        let (ch, width) = decode(&self.input[self.offset..]);
        self.offset += width;
        match ch {
            Ch::Char('\n') => {
                self.line += 1;
                self.column = 1;
            }
            Ch::Char(c) => self.column += display_width(c),
            Ch::Invalid => self.column += 1,
            Ch::Eof => {}
        }
        ch
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Ch::Char(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn advance_to(&mut self, offset: usize) {
        while self.offset < offset {
            self.bump();
        }
    }

    fn skip_space(&mut self) {
        while let Ch::Char(' ' | '\t' | '\r' | '\n') = self.peek() {
            self.bump();
        }
    }

    fn lex_token(&mut self) -> Result<TokenKind, String> {
        match self.bump() {
            Ch::Eof => {
                if self.paren_depth > 0 {
                    return Err(format!("unclosed left parenthesis at {}", self.here()));
                }
                Ok(TokenKind::Eof)
            }
            Ch::Invalid => Err(format!("invalid utf8 encoding at {}", self.start)),
            Ch::Char('"') => self.lex_string('"'),
            Ch::Char('\'') => self.lex_string('\''),
            Ch::Char('`') => self.lex_raw_string(),
            Ch::Char('(') => {
                self.paren_depth += 1;
                Ok(TokenKind::LParen)
            }
            Ch::Char(')') => {
                self.paren_depth -= 1;
                if self.paren_depth < 0 {
                    return Err(format!("unexpected right parenthesis at {}", self.start));
                }
                Ok(TokenKind::RParen)
            }
            Ch::Char('=') => self.lex_eq(),
            Ch::Char('!') => Ok(self.lex_not()),
            Ch::Char('<') => Ok(if self.eat('=') {
                TokenKind::Le
            } else {
                TokenKind::Lt
            }),
            Ch::Char('>') => Ok(if self.eat('=') {
                TokenKind::Ge
            } else {
                TokenKind::Gt
            }),
            Ch::Char('&') => self.lex_doubled('&', TokenKind::And),
            Ch::Char('|') => self.lex_doubled('|', TokenKind::Or),
            Ch::Char(c) if c.is_ascii_digit() || matches!(c, '.' | '+' | '-') => {
                self.lex_numeric()
            }
            Ch::Char(c) if c.is_alphabetic() || c == '_' => Ok(self.lex_ident()),
            Ch::Char(c) => Err(format!(
                "unexpected character {} at {}",
                describe(c),
                self.start
            )),
        }
    }

    /// Operators starting with `=`; the `=` has been consumed.
    fn lex_eq(&mut self) -> Result<TokenKind, String> {
        if self.eat('=') {
            Ok(if self.eat('*') {
                TokenKind::EqI
            } else {
                TokenKind::Eq
            })
        } else if self.eat('~') {
            Ok(if self.eat('*') {
                TokenKind::MatchI
            } else {
                TokenKind::Match
            })
        } else {
            Err(format!(
                "unexpected character {} after '=' at {}",
                describe_next(self.peek()),
                self.here()
            ))
        }
    }

    /// Operators starting with `!`; a lone `!` is logical NOT.
    fn lex_not(&mut self) -> TokenKind {
        if self.eat('=') {
            if self.eat('*') {
                TokenKind::NeI
            } else {
                TokenKind::Ne
            }
        } else if self.eat('~') {
            if self.eat('*') {
                TokenKind::NMatchI
            } else {
                TokenKind::NMatch
            }
        } else {
            TokenKind::Not
        }
    }

    fn lex_doubled(&mut self, ch: char, kind: TokenKind) -> Result<TokenKind, String> {
        if self.eat(ch) {
            Ok(kind)
        } else {
            Err(format!(
                "unexpected character {} after '{}' at {}",
                describe_next(self.peek()),
                ch,
                self.here()
            ))
        }
    }

    /// Quoted string; the opening quote has been consumed.
    fn lex_string(&mut self, quote: char) -> Result<TokenKind, String> {
        loop {
            match self.peek() {
                Ch::Eof | Ch::Char('\n') => {
                    return Err(format!("unterminated quoted string at {}", self.here()));
                }
                Ch::Invalid => {
                    return Err(format!("invalid utf8 encoding in string at {}", self.here()));
                }
                Ch::Char('\\') => {
                    let at = self.here();
                    self.bump();
                    if !self.scan_escape() {
                        return Err(format!("invalid escape sequence in string at {at}"));
                    }
                }
                Ch::Char(c) => {
                    self.bump();
                    if c == quote {
                        return Ok(TokenKind::String);
                    }
                }
            }
        }
    }

    /// Validate one escape sequence; the backslash has been consumed.
    fn scan_escape(&mut self) -> bool {
        match self.bump() {
            Ch::Char('x') => self.scan_hex_escape(2),
            Ch::Char('u') => self.scan_hex_escape(4),
            Ch::Char(c) => simple_escape(c).is_some(),
            Ch::Invalid | Ch::Eof => false,
        }
    }

    fn scan_hex_escape(&mut self, digits: usize) -> bool {
        let mut value = 0u32;
        for _ in 0..digits {
            match self.peek() {
                Ch::Char(c) if c.is_ascii_hexdigit() => {
                    self.bump();
                    value = value * 16 + c.to_digit(16).unwrap_or(0);
                }
                _ => return false,
            }
        }
        char::from_u32(value).is_some()
    }

    /// Backtick string, no escapes; the opening backtick has been consumed.
    fn lex_raw_string(&mut self) -> Result<TokenKind, String> {
        loop {
            match self.bump() {
                Ch::Eof => return Err(format!("unterminated raw string at {}", self.here())),
                Ch::Invalid => {
                    return Err(format!(
                        "invalid utf8 encoding in raw string at {}",
                        self.here()
                    ));
                }
                Ch::Char('`') => return Ok(TokenKind::RawString),
                Ch::Char(_) => {}
            }
        }
    }

    fn lex_ident(&mut self) -> TokenKind {
        while let Ch::Char(c) = self.peek() {
            if !(c.is_alphanumeric() || c == '_') {
                break;
            }
            self.bump();
        }
        let text = &self.input[self.start.offset..self.offset];
        if std::str::from_utf8(text).is_ok_and(is_bool_literal) {
            TokenKind::Bool
        } else {
            TokenKind::Ident
        }
    }

    /// Time, duration or number, tried in that order from the token start.
    fn lex_numeric(&mut self) -> Result<TokenKind, String> {
        self.reset(self.start);
        let source = self.input;
        let rest = &source[self.start.offset..];

        let scanners: [(TokenKind, fn(&mut &[u8]) -> PResult<()>); 3] = [
            (TokenKind::Time, scan_time),
            (TokenKind::Duration, scan_duration),
            (TokenKind::Number, scan_number),
        ];
        for (kind, scan) in scanners {
            let mut input = rest;
            if scan(&mut input).is_ok() && input.len() < rest.len() {
                let end = self.start.offset + (rest.len() - input.len());
                self.advance_to(end);
                return Ok(kind);
            }
        }

        let c = decode(rest).0;
        Err(format!(
            "unexpected character {} at {}",
            describe_next(c),
            self.start
        ))
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    /// Yields tokens up to and including the terminal EOF or error token.
    fn next(&mut self) -> Option<Token> {
        if self.done {
            return None;
        }
        Some(self.next_token())
    }
}

/// Decode the character at the start of `bytes` and its encoded length.
fn decode(bytes: &[u8]) -> (Ch, usize) {
    let Some(&lead) = bytes.first() else {
        return (Ch::Eof, 0);
    };
    let width = match lead {
        0x00..=0x7f => 1,
        0xc2..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf4 => 4,
        _ => return (Ch::Invalid, 1),
    };
    match bytes
        .get(..width)
        .and_then(|b| std::str::from_utf8(b).ok())
        .and_then(|s| s.chars().next())
    {
        Some(c) => (Ch::Char(c), width),
        None => (Ch::Invalid, 1),
    }
}

/// Terminal column width; controls and zero-width characters count as one.
fn display_width(c: char) -> usize {
    c.width().unwrap_or(0).max(1)
}

fn describe(c: char) -> String {
    if c.is_control() {
        format!("U+{:04X}", c as u32)
    } else {
        format!("U+{:04X} '{}'", c as u32, c)
    }
}

fn describe_next(ch: Ch) -> String {
    match ch {
        Ch::Char(c) => format!("{c:?}"),
        Ch::Invalid => "invalid utf8".to_string(),
        Ch::Eof => "EOF".to_string(),
    }
}

fn simple_escape(c: char) -> Option<char> {
    let decoded = match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '\\' => '\\',
        '"' => '"',
        '\'' => '\'',
        '0' => '\0',
        'a' => '\x07',
        'b' => '\x08',
        'f' => '\x0c',
        'v' => '\x0b',
        _ => return None,
    };
    Some(decoded)
}

/// Decode the escapes of a quoted string body the lexer already validated.
pub(crate) fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(esc) = chars.next() else {
            out.push('\\');
            break;
        };
        let digits = match esc {
            'x' => 2,
            'u' => 4,
            _ => {
                out.push(simple_escape(esc).unwrap_or(esc));
                continue;
            }
        };
        let hex: String = chars.by_ref().take(digits).collect();
        match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
            Some(decoded) => out.push(decoded),
            None => {
                out.push('\\');
                out.push(esc);
                out.push_str(&hex);
            }
        }
    }
    out
}

fn digits<'i>(count: usize) -> impl Parser<&'i [u8], &'i [u8], ErrMode<ContextError>> {
    take_while(count, |c: u8| c.is_ascii_digit())
}

/// `YYYY-MM-DD(T|t)HH:MM:SS[.frac](Z|±HH:MM)`
fn scan_time(input: &mut &[u8]) -> PResult<()> {
    (digits(4), one_of(b'-'), digits(2), one_of(b'-'), digits(2))
        .void()
        .parse_next(input)?;
    one_of([b'T', b't']).parse_next(input)?;
    (digits(2), one_of(b':'), digits(2), one_of(b':'), digits(2))
        .void()
        .parse_next(input)?;
    opt((one_of(b'.'), take_while(1.., |c: u8| c.is_ascii_digit()))).parse_next(input)?;
    alt((
        one_of([b'Z', b'z']).void(),
        (one_of([b'+', b'-']), digits(2), one_of(b':'), digits(2)).void(),
    ))
    .parse_next(input)
}

/// Longest run of `<number><unit>` segments with an optional leading sign.
fn scan_duration(input: &mut &[u8]) -> PResult<()> {
    opt(one_of([b'+', b'-'])).parse_next(input)?;
    let _: () = repeat(1.., duration_segment).parse_next(input)?;
    Ok(())
}

fn duration_segment(input: &mut &[u8]) -> PResult<()> {
    take_while(1.., |c: u8| c.is_ascii_digit() || c == b'.').parse_next(input)?;
    duration_unit.void().parse_next(input)
}

/// Permissive number shape; conversion happens later and may still fail.
fn scan_number(input: &mut &[u8]) -> PResult<()> {
    opt(one_of([b'+', b'-'])).parse_next(input)?;
    let prefix = opt((one_of(b'0'), opt(one_of([b'x', b'X', b'o', b'O', b'b', b'B']))))
        .parse_next(input)?;
    let radix = prefix.and_then(|(_, r)| r).map(|r| r.to_ascii_lowercase());

    let digit: fn(u8) -> bool = match radix {
        Some(b'x') => |c| c.is_ascii_hexdigit() || c == b'_',
        Some(b'o') => |c| matches!(c, b'0'..=b'7' | b'_'),
        Some(_) => |c| matches!(c, b'0' | b'1' | b'_'),
        None => |c| c.is_ascii_digit() || c == b'_',
    };
    take_while(0.., digit).parse_next(input)?;
    if opt(one_of(b'.')).parse_next(input)?.is_some() {
        take_while(0.., digit).parse_next(input)?;
    }

    let exponent = match radix {
        Some(b'x') => Some([b'p', b'P']),
        Some(_) => None,
        None => Some([b'e', b'E']),
    };
    if let Some(marker) = exponent
        && opt(one_of(marker)).parse_next(input)?.is_some()
    {
        opt(one_of([b'+', b'-'])).parse_next(input)?;
        take_while(0.., |c: u8| c.is_ascii_digit() || c == b'_').parse_next(input)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input).map(|t| t.kind).collect()
    }

    fn texts(input: &str) -> Vec<(TokenKind, String)> {
        Lexer::new(input).map(|t| (t.kind, t.text)).collect()
    }

    #[test]
    fn test_simple_comparison() {
        let tokens: Vec<Token> = Lexer::new("Age>18").collect();
        assert_eq!(
            tokens,
            vec![
                Token::new(TokenKind::Ident, "Age", Position::new(0, 1, 1)),
                Token::new(TokenKind::Gt, ">", Position::new(3, 1, 4)),
                Token::new(TokenKind::Number, "18", Position::new(4, 1, 5)),
                Token::new(TokenKind::Eof, "", Position::new(6, 1, 7)),
            ]
        );
    }

    #[test]
    fn test_all_operators() {
        assert_eq!(
            kinds("> >= < <= == ==* != !=* =~ =~* !~ !~* && || ! ( )"),
            vec![
                TokenKind::Gt,
                TokenKind::Ge,
                TokenKind::Lt,
                TokenKind::Le,
                TokenKind::Eq,
                TokenKind::EqI,
                TokenKind::Ne,
                TokenKind::NeI,
                TokenKind::Match,
                TokenKind::MatchI,
                TokenKind::NMatch,
                TokenKind::NMatchI,
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Not,
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        for input in [
            "1", "+1", "-1", "1.5", ".5", "1e10", "1E-3", "0x1F", "0x1.fp3", "0o17", "0b101",
            "1_000",
        ] {
            assert_eq!(
                texts(input),
                vec![(TokenKind::Number, input.to_string()), (TokenKind::Eof, String::new())],
                "{input}"
            );
        }
    }

    #[test]
    fn test_number_followed_by_ident() {
        assert_eq!(
            texts("1xs"),
            vec![
                (TokenKind::Number, "1".to_string()),
                (TokenKind::Ident, "xs".to_string()),
                (TokenKind::Eof, String::new()),
            ]
        );
    }

    #[test]
    fn test_durations() {
        for input in [
            "1h", "1h30m", "500ms", "4000μs", "3µs", "10ns", "2us", "1.5h", "-1s", "+2m30s",
        ] {
            assert_eq!(
                texts(input),
                vec![(TokenKind::Duration, input.to_string()), (TokenKind::Eof, String::new())],
                "{input}"
            );
        }
    }

    #[test]
    fn test_duration_longest_match() {
        assert_eq!(
            texts("1h30"),
            vec![
                (TokenKind::Duration, "1h".to_string()),
                (TokenKind::Number, "30".to_string()),
                (TokenKind::Eof, String::new()),
            ]
        );
        assert_eq!(
            texts("1hour"),
            vec![
                (TokenKind::Duration, "1h".to_string()),
                (TokenKind::Ident, "our".to_string()),
                (TokenKind::Eof, String::new()),
            ]
        );
    }

    #[test]
    fn test_time_literals() {
        for input in [
            "2023-01-02T15:04:05Z",
            "2023-01-02t15:04:05.123z",
            "2023-01-02T15:04:05+09:00",
        ] {
            assert_eq!(
                texts(input),
                vec![(TokenKind::Time, input.to_string()), (TokenKind::Eof, String::new())],
                "{input}"
            );
        }
        // Not a complete date-time: falls back to number tokens.
        assert_eq!(kinds("2023-01")[..2], [TokenKind::Number, TokenKind::Number]);
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            texts(r#""a\"b" 'c' `d\n`"#),
            vec![
                (TokenKind::String, r#""a\"b""#.to_string()),
                (TokenKind::String, "'c'".to_string()),
                (TokenKind::RawString, r"`d\n`".to_string()),
                (TokenKind::Eof, String::new()),
            ]
        );
    }

    #[test]
    fn test_string_escapes_accepted() {
        let input = r#""\n\t\\\"\'\0\a\b\f\r\v\x41é""#;
        assert_eq!(kinds(input), vec![TokenKind::String, TokenKind::Eof]);
    }

    #[test]
    fn test_string_errors() {
        let tok = Lexer::new("\"abc").next_token();
        assert_eq!(tok.kind, TokenKind::Error);
        assert!(tok.text.contains("unterminated quoted string"));

        let tok = Lexer::new("\"ab\ncd\"").next_token();
        assert!(tok.text.contains("unterminated quoted string"));

        let tok = Lexer::new(r#""\q""#).next_token();
        assert!(tok.text.contains("invalid escape sequence"));

        let tok = Lexer::new(r#""\x4""#).next_token();
        assert!(tok.text.contains("invalid escape sequence"));

        let tok = Lexer::new("`abc").next_token();
        assert!(tok.text.contains("unterminated raw string"));
    }

    #[test]
    fn test_invalid_utf8() {
        let tok = Lexer::from_bytes(b"\"a\xffb\"").next_token();
        assert_eq!(tok.kind, TokenKind::Error);
        assert!(tok.text.contains("invalid utf8 encoding in string"));

        let tok = Lexer::from_bytes(b"`a\xff`").next_token();
        assert!(tok.text.contains("invalid utf8 encoding in raw string"));
    }

    #[test]
    fn test_bool_and_ident() {
        assert_eq!(
            kinds("true True TRUE false False FALSE tRue _x9"),
            vec![
                TokenKind::Bool,
                TokenKind::Bool,
                TokenKind::Bool,
                TokenKind::Bool,
                TokenKind::Bool,
                TokenKind::Bool,
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unicode_ident_and_wide_columns() {
        let tokens: Vec<Token> = Lexer::new("Class==\"軍師\"&&名前>1").collect();
        assert_eq!(tokens[2].pos, Position::new(7, 1, 8));
        assert_eq!(tokens[3].kind, TokenKind::And);
        assert_eq!(tokens[3].pos, Position::new(15, 1, 14));
        assert_eq!(tokens[4].kind, TokenKind::Ident);
        assert_eq!(tokens[4].text, "名前");
        assert_eq!(tokens[5].pos.column, 20);
    }

    #[test]
    fn test_lines() {
        let tokens: Vec<Token> = Lexer::new("A>1\n&&\n  B<2").collect();
        assert_eq!(tokens[3].pos, Position::new(4, 2, 1));
        assert_eq!(tokens[4].pos, Position::new(9, 3, 3));
    }

    #[test]
    fn test_lone_ampersand_and_pipe() {
        let tok = Lexer::new("A>1&B").nth(3).unwrap();
        assert_eq!(tok.kind, TokenKind::Error);
        assert_eq!(tok.text, "unexpected character 'B' after '&' at 1:5");

        let tok = Lexer::new("|").next_token();
        assert_eq!(tok.text, "unexpected character EOF after '|' at 1:2");
    }

    #[test]
    fn test_lone_equals() {
        let tok = Lexer::new("A=1").nth(1).unwrap();
        assert_eq!(tok.kind, TokenKind::Error);
        assert!(tok.text.contains("after '='"));
    }

    #[test]
    fn test_unexpected_character() {
        let tok = Lexer::new("A>1 # x").nth(3).unwrap();
        assert_eq!(tok.kind, TokenKind::Error);
        assert_eq!(tok.text, "unexpected character U+0023 '#' at 1:5");
    }

    #[test]
    fn test_parens() {
        assert_eq!(
            kinds("((A>1))"),
            vec![
                TokenKind::LParen,
                TokenKind::LParen,
                TokenKind::Ident,
                TokenKind::Gt,
                TokenKind::Number,
                TokenKind::RParen,
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );

        let last = Lexer::new("(A>1").last().unwrap();
        assert_eq!(last.kind, TokenKind::Error);
        assert!(last.text.contains("unclosed left parenthesis"));

        let tokens: Vec<Token> = Lexer::new("A>1) && B>2").collect();
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[3].kind, TokenKind::Error);
        assert_eq!(tokens[3].text, "unexpected right parenthesis at 1:4");
    }

    #[test]
    fn test_terminal_after_error() {
        let mut lexer = Lexer::new("#");
        assert_eq!(lexer.next_token().kind, TokenKind::Error);
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
        assert!(lexer.next().is_none());
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r"a\nb"), "a\nb");
        assert_eq!(unescape(r#"\"q\" \\"#), "\"q\" \\");
        assert_eq!(unescape(r"\x41é\0"), "Aé\0");
        assert_eq!(unescape("plain"), "plain");
    }
}
