//! Conversion of literal text into numbers, durations and time instants.
//!
//! These run eagerly at parse time and again at evaluation time when the
//! eager attempt failed.

use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use winnow::combinator::{alt, opt, preceded};
use winnow::prelude::*;
use winnow::token::{one_of, take_while};

// Manually define PResult for resilience against winnow version changes
pub(crate) type PResult<T> = Result<T, winnow::error::ErrMode<winnow::error::ContextError>>;

/// Duration units, longest spelling first where prefixes overlap.
pub(crate) fn duration_unit<'i>(input: &mut &'i [u8]) -> PResult<&'i [u8]> {
    alt(("ns", "us", "µs", "μs", "ms", "s", "m", "h")).parse_next(input)
}

fn unit_nanos(unit: &[u8]) -> u128 {
    match unit {
        b"ns" => 1,
        b"ms" => 1_000_000,
        b"s" => 1_000_000_000,
        b"m" => 60 * 1_000_000_000,
        b"h" => 3600 * 1_000_000_000,
        // us, µs, μs
        _ => 1_000,
    }
}

/// Parse a floating-point number.
///
/// Accepts decimal notation with optional fraction and exponent, and
/// hexadecimal mantissas with an optional binary `p` exponent. `_` may
/// separate digits. Octal and binary prefixes are not floats and fail, as
/// does any value that overflows `f64`.
pub fn parse_number(text: &str) -> Option<f64> {
    let (negative, body) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        parse_hex_float(&strip_underscores(hex, true, |c| c.is_ascii_hexdigit())?)?
    } else {
        // f64::from_str also takes "inf" and "NaN", which only string
        // literals can carry here.
        strip_underscores(body, false, |c| c.is_ascii_digit())?
            .parse::<f64>()
            .ok()?
    };

    // Only a spelled-out infinity may be infinite.
    if value.is_infinite() && !is_infinity(body) {
        return None;
    }

    Some(if negative { -value } else { value })
}

fn is_infinity(text: &str) -> bool {
    text.eq_ignore_ascii_case("inf") || text.eq_ignore_ascii_case("infinity")
}

/// Remove `_` digit separators, which must sit between two digits (or right
/// after a base prefix).
fn strip_underscores(
    text: &str,
    after_prefix: bool,
    is_digit: fn(u8) -> bool,
) -> Option<String> {
    if !text.contains('_') {
        return Some(text.to_string());
    }
    let bytes = text.as_bytes();
    for (i, &c) in bytes.iter().enumerate() {
        if c != b'_' {
            continue;
        }
        let before = if i == 0 {
            after_prefix
        } else {
            is_digit(bytes[i - 1])
        };
        let after = bytes.get(i + 1).is_some_and(|&b| is_digit(b));
        if !(before && after) {
            return None;
        }
    }
    Some(text.replace('_', ""))
}

fn parse_hex_float(text: &str) -> Option<f64> {
    let mut input = text.as_bytes();
    let (whole, frac, exp) = hex_float.parse_next(&mut input).ok()?;
    if !input.is_empty() || (whole.is_empty() && frac.is_empty()) {
        return None;
    }

    let mut mantissa = 0f64;
    for &c in whole.iter().chain(frac) {
        mantissa = mantissa * 16.0 + f64::from(char::from(c).to_digit(16)?);
    }
    if mantissa == 0.0 {
        return Some(0.0);
    }
    let exponent = exp - 4 * frac.len() as i32;
    Some(mantissa * 2f64.powi(exponent))
}

fn hex_float<'i>(input: &mut &'i [u8]) -> PResult<(&'i [u8], &'i [u8], i32)> {
    let whole = take_while(0.., |c: u8| c.is_ascii_hexdigit()).parse_next(input)?;
    let frac = opt(preceded(
        one_of(b'.'),
        take_while(0.., |c: u8| c.is_ascii_hexdigit()),
    ))
    .parse_next(input)?
    .unwrap_or_default();
    let exp = opt(preceded(one_of([b'p', b'P']), signed_decimal))
        .parse_next(input)?
        .unwrap_or(0);
    Ok((whole, frac, exp))
}

fn signed_decimal(input: &mut &[u8]) -> PResult<i32> {
    let sign = opt(one_of([b'+', b'-'])).parse_next(input)?;
    let digits = take_while(1..=6, |c: u8| c.is_ascii_digit()).parse_next(input)?;
    let magnitude = digits
        .iter()
        .fold(0i32, |acc, &c| acc * 10 + i32::from(c - b'0'));
    Ok(if sign == Some(b'-') { -magnitude } else { magnitude })
}

/// Parse a signed duration such as `1h30m`, `-1.5s` or `4000μs`.
///
/// Every segment needs a unit; the only unit-less form is `0`.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let mut input = text.as_bytes();
    let negative = match input.first() {
        Some(b'-') => {
            input = &input[1..];
            true
        }
        Some(b'+') => {
            input = &input[1..];
            false
        }
        _ => false,
    };
    if input == b"0" {
        return Some(Duration::ZERO);
    }
    if input.is_empty() {
        return None;
    }

    let mut total: u128 = 0;
    while !input.is_empty() {
        let (whole, frac, unit) = duration_term.parse_next(&mut input).ok()?;
        if whole.is_empty() && frac.is_empty() {
            return None;
        }
        let unit = unit_nanos(unit);

        let whole = whole.iter().try_fold(0u128, |acc, &c| {
            acc.checked_mul(10)?.checked_add(u128::from(c - b'0'))
        })?;
        total = total.checked_add(whole.checked_mul(unit)?)?;

        // Digits beyond nanosecond precision of an hour cannot matter.
        let frac = &frac[..frac.len().min(20)];
        if !frac.is_empty() {
            let numerator = frac
                .iter()
                .fold(0u128, |acc, &c| acc * 10 + u128::from(c - b'0'));
            let scale = 10u128.pow(frac.len() as u32);
            total = total.checked_add(numerator * unit / scale)?;
        }
    }

    let limit = if negative {
        1u128 << 63
    } else {
        i64::MAX as u128
    };
    if total > limit {
        return None;
    }
    let nanos = if negative {
        (total as i128).wrapping_neg() as i64
    } else {
        total as i64
    };
    Some(Duration::nanoseconds(nanos))
}

fn duration_term<'i>(input: &mut &'i [u8]) -> PResult<(&'i [u8], &'i [u8], &'i [u8])> {
    let whole = take_while(0.., |c: u8| c.is_ascii_digit()).parse_next(input)?;
    let frac = opt(preceded(
        one_of(b'.'),
        take_while(0.., |c: u8| c.is_ascii_digit()),
    ))
    .parse_next(input)?
    .unwrap_or_default();
    let unit = duration_unit.parse_next(input)?;
    Ok((whole, frac, unit))
}

/// Parse an RFC 3339 date-time.
pub fn parse_time(text: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(text, &Rfc3339).ok()
}
