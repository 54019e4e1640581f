//! Evaluator for compiled filter expressions.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use regex::Regex;
use time::{Duration, OffsetDateTime};

use super::ast::{CompareOp, Comparison, Expr, LogicalOp, Node, NodeId};
use super::error::{FilterError, Result};
use super::literal::{parse_duration, parse_number, parse_time};
use super::value::{Target, Value};

/// Absolute tolerance for numeric `==` and `!=`.
pub const EPSILON: f64 = 1e-9;

impl Expr {
    /// Evaluate against `target`.
    ///
    /// Each field is looked up at most once per call. `&&` and `||` stop as
    /// soon as the result is known, so fields only referenced on the skipped
    /// side are never looked up.
    pub fn eval<T: Target + ?Sized>(&self, target: &T) -> Result<bool> {
        let mut evaluator = Evaluator {
            expr: self,
            target,
            fields: HashMap::with_capacity(self.identifiers.len()),
        };
        evaluator.eval_node(self.root)
    }
}

/// Evaluate a compiled filter against a target.
pub fn evaluate<T: Target + ?Sized>(expr: &Expr, target: &T) -> Result<bool> {
    expr.eval(target)
}

struct Evaluator<'e, 't, T: ?Sized> {
    expr: &'e Expr,
    target: &'t T,
    fields: HashMap<&'e str, Value>,
}

/// Pending work for [`Evaluator::eval_node`].
enum Step {
    Visit(NodeId),
    /// The left operand of `op` has been evaluated; maybe visit `right`.
    Resume { op: LogicalOp, right: NodeId },
    Negate,
}

impl<'e, T: Target + ?Sized> Evaluator<'e, '_, T> {
    /// Walks the tree with an explicit stack, since left-folded `&&`/`||`
    /// chains are as deep as they are long.
    fn eval_node(&mut self, id: NodeId) -> Result<bool> {
        let expr = self.expr;
        let mut steps = vec![Step::Visit(id)];
        let mut result = false;
        while let Some(step) = steps.pop() {
            match step {
                Step::Visit(id) => match expr.node(id) {
                    Node::Binary { op, left, right } => {
                        steps.push(Step::Resume {
                            op: *op,
                            right: *right,
                        });
                        steps.push(Step::Visit(*left));
                    }
                    Node::Not { operand } => {
                        steps.push(Step::Negate);
                        steps.push(Step::Visit(*operand));
                    }
                    Node::Comparison(cmp) => {
                        let value = self.lookup(cmp)?;
                        result = compare(cmp, value)?;
                    }
                },
                // On short-circuit `result` already holds the answer.
                Step::Resume { op, right } => {
                    let decided = match op {
                        LogicalOp::And => !result,
                        LogicalOp::Or => result,
                    };
                    if !decided {
                        steps.push(Step::Visit(right));
                    }
                }
                Step::Negate => result = !result,
            }
        }
        Ok(result)
    }

    fn lookup(&mut self, cmp: &'e Comparison) -> Result<&Value> {
        match self.fields.entry(cmp.field_name()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let value = self.target.get_field(cmp.field_name()).map_err(|err| {
                    FilterError::eval(err.to_string(), Some(cmp.field.pos)).with_source(err)
                })?;
                tracing::trace!(field = cmp.field_name(), %value, "looked up field");
                Ok(entry.insert(value))
            }
        }
    }
}

/// Dispatch on the runtime kind of the field value.
fn compare(cmp: &Comparison, value: &Value) -> Result<bool> {
    match value {
        Value::Int(v) => compare_number(cmp, *v as f64),
        Value::Uint(v) => compare_number(cmp, *v as f64),
        Value::Float(v) => compare_number(cmp, *v),
        Value::Duration(v) => compare_duration(cmp, *v),
        Value::Time(v) => compare_time(cmp, *v),
        Value::Str(v) => compare_string(cmp, v),
        Value::Bool(_) | Value::Other(_) => compare_string(cmp, &value.to_string()),
    }
}

fn compare_string(cmp: &Comparison, value: &str) -> Result<bool> {
    let literal = cmp.literal.as_str();
    match cmp.op {
        CompareOp::Eq => Ok(value == literal),
        CompareOp::Ne => Ok(value != literal),
        CompareOp::EqFold => Ok(equal_fold(value, literal)),
        CompareOp::NeFold => Ok(!equal_fold(value, literal)),
        CompareOp::Match | CompareOp::MatchFold => Ok(regex(cmp)?.is_match(value)),
        CompareOp::NotMatch | CompareOp::NotMatchFold => Ok(!regex(cmp)?.is_match(value)),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            Err(invalid_operator(cmp, "string"))
        }
    }
}

fn compare_number(cmp: &Comparison, value: f64) -> Result<bool> {
    if !is_ordering(cmp.op) {
        return Err(invalid_operator(cmp, "number"));
    }
    let literal = match cmp.number {
        Some(n) => n,
        None => parse_number(&cmp.literal).ok_or_else(|| invalid_literal(cmp, "number"))?,
    };
    Ok(match cmp.op {
        CompareOp::Eq => (value - literal).abs() <= EPSILON,
        CompareOp::Ne => (value - literal).abs() > EPSILON,
        CompareOp::Lt => value < literal,
        CompareOp::Le => value <= literal,
        CompareOp::Gt => value > literal,
        _ => value >= literal,
    })
}

fn compare_duration(cmp: &Comparison, value: Duration) -> Result<bool> {
    if !is_ordering(cmp.op) {
        return Err(invalid_operator(cmp, "duration"));
    }
    let literal = match cmp.duration {
        Some(d) => d,
        None => parse_duration(&cmp.literal).ok_or_else(|| invalid_literal(cmp, "duration"))?,
    };
    cmp.op
        .apply(&value, &literal)
        .ok_or_else(|| invalid_operator(cmp, "duration"))
}

fn compare_time(cmp: &Comparison, value: OffsetDateTime) -> Result<bool> {
    if !is_ordering(cmp.op) {
        return Err(invalid_operator(cmp, "time"));
    }
    let literal = match cmp.time {
        Some(t) => t,
        None => parse_time(&cmp.literal).ok_or_else(|| invalid_literal(cmp, "time"))?,
    };
    cmp.op
        .apply(&value, &literal)
        .ok_or_else(|| invalid_operator(cmp, "time"))
}

fn is_ordering(op: CompareOp) -> bool {
    matches!(
        op,
        CompareOp::Eq
            | CompareOp::Ne
            | CompareOp::Lt
            | CompareOp::Le
            | CompareOp::Gt
            | CompareOp::Ge
    )
}

fn regex(cmp: &Comparison) -> Result<&Regex> {
    cmp.regex.as_ref().ok_or_else(|| {
        FilterError::eval(
            format!("regex {:?} was not compiled", cmp.literal),
            Some(cmp.value.pos),
        )
    })
}

/// Case-insensitive equality under simple Unicode case folding.
fn equal_fold(a: &str, b: &str) -> bool {
    if a.is_ascii() && b.is_ascii() {
        return a.eq_ignore_ascii_case(b);
    }
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

fn invalid_operator(cmp: &Comparison, kind: &str) -> FilterError {
    FilterError::eval(
        format!(
            "invalid operator for {kind}: {:?} at {}",
            cmp.op_token.text, cmp.op_token.pos
        ),
        Some(cmp.op_token.pos),
    )
}

fn invalid_literal(cmp: &Comparison, kind: &str) -> FilterError {
    FilterError::eval(
        format!("invalid {kind}: {:?} at {}", cmp.literal, cmp.value.pos),
        Some(cmp.value.pos),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::error::ErrorKind;
    use crate::dsl::regex_cache::RegexCache;
    use crate::dsl::value::{FieldNotFound, FnTarget, LookupError};
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use time::macros::datetime;

    fn fields(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn eval(input: &str, target: &HashMap<String, Value>) -> Result<bool> {
        Expr::parse_with_cache(input, &RegexCache::new())
            .unwrap()
            .eval(target)
    }

    fn check(input: &str, target: &HashMap<String, Value>) -> bool {
        eval(input, target).unwrap()
    }

    #[test]
    fn test_basic_comparison() {
        assert!(check("Age>18", &fields(&[("Age", Value::Int(20))])));
        assert!(!check("Age>18", &fields(&[("Age", Value::Int(15))])));
    }

    #[test]
    fn test_numeric_kinds() {
        let target = fields(&[
            ("I", Value::Int(-3)),
            ("U", Value::Uint(7)),
            ("F", Value::Float(2.5)),
        ]);
        assert!(check("I<0 && I>=-3 && I<=-3", &target));
        assert!(check("U==7 && U!=8", &target));
        assert!(check("F>2 && F<3 && F==2.5", &target));
        assert!(check("U==0x7 && F==0x1.4p1", &target));
        assert!(check("U==\"7\"", &target));
    }

    #[test]
    fn test_epsilon_boundary() {
        let target = fields(&[("X", Value::Float(3.14))]);
        assert!(check("X==3.1400000001", &target));
        assert!(!check("X!=3.1400000001", &target));
        assert!(!check("X==3.14000001", &target));
        assert!(check("X!=3.14000001", &target));
    }

    #[test]
    fn test_string_case_insensitive() {
        let expr = r#"Name==*"alice""#;
        assert!(check(expr, &fields(&[("Name", "Alice".into())])));
        assert!(!check(expr, &fields(&[("Name", "bob".into())])));
        assert!(check(r#"Name!=*"ALICE""#, &fields(&[("Name", "bob".into())])));
        assert!(check(r#"Name==*"ÄRGER""#, &fields(&[("Name", "ärger".into())])));
    }

    #[test]
    fn test_string_exact() {
        let target = fields(&[("Name", "Alice".into())]);
        assert!(check(r#"Name=="Alice""#, &target));
        assert!(!check(r#"Name=="alice""#, &target));
        assert!(check(r#"Name!="alice""#, &target));
        assert!(check("Name=='Alice'", &target));
    }

    #[test]
    fn test_regex() {
        let expr = r#"Email=~"^\\w+@example\\.com$""#;
        assert!(check(expr, &fields(&[("Email", "a@example.com".into())])));
        assert!(!check(expr, &fields(&[("Email", "a@other.com".into())])));

        let target = fields(&[("Email", "A@Example.com".into())]);
        assert!(check(r#"Email!~"example""#, &target));
        assert!(check(r#"Email=~*"example""#, &target));
        assert!(!check(r#"Email!~*"example""#, &target));
        assert!(check(r"Email=~`^\w@`", &target));
    }

    #[test]
    fn test_logical_composition() {
        let expr = "(A>1&&B<5)||C==0";
        let target = fields(&[("A", Value::Int(2)), ("B", Value::Int(3)), ("C", Value::Int(9))]);
        assert!(check(expr, &target));
        let target = fields(&[("A", Value::Int(0)), ("B", Value::Int(0)), ("C", Value::Int(1))]);
        assert!(!check(expr, &target));
        assert!(check("!(A>1) && !C==0", &target));
    }

    #[test]
    fn test_long_chains() {
        let target = fields(&[("A", Value::Int(2))]);
        let and_chain = vec!["A>1"; 100_000].join("&&");
        assert!(check(&and_chain, &target));

        let or_chain = format!("{}||A==2", vec!["A<0"; 100_000].join("||"));
        assert!(check(&or_chain, &target));

        let mixed = format!("{}&&!(A>1||A<0)", vec!["A>1"; 50_000].join("&&"));
        assert!(!check(&mixed, &target));
    }

    #[test]
    fn test_not_and_nesting() {
        let target = fields(&[("A", Value::Int(2)), ("B", Value::Int(0))]);
        assert!(check("!(!(A>1) || B==1) && !(B>0)", &target));
        assert!(!check("!(A>1 && (B==0 || B==1))", &target));
        assert!(check("A<0 || (B==1 || (A==2 && !B==1))", &target));
    }

    #[test]
    fn test_evaluate_function() {
        let expr = Expr::parse("A>1 && B==\"x\"").unwrap();
        let mut target = BTreeMap::new();
        target.insert("A".to_string(), Value::Int(2));
        target.insert("B".to_string(), Value::from("x"));
        assert!(evaluate(&expr, &target).unwrap());
        target.insert("B".to_string(), Value::from("y"));
        assert!(!evaluate(&expr, &target).unwrap());
    }

    #[test]
    fn test_round_trip_literals() {
        assert!(check(r#"S=="abc""#, &fields(&[("S", "abc".into())])));
        assert!(check(r"S==`a\nb`", &fields(&[("S", r"a\nb".into())])));
        assert!(!check(r"S==`a\nb`", &fields(&[("S", "a\nb".into())])));
        assert!(check(r#"S=="a\nb""#, &fields(&[("S", "a\nb".into())])));
        assert!(check(r#"S=="é\x41""#, &fields(&[("S", "éA".into())])));
    }

    #[test]
    fn test_duration() {
        let target = fields(&[("D", Value::Duration(Duration::minutes(90)))]);
        assert!(check("D==1h30m", &target));
        assert!(check("D>1h && D<=5400s", &target));
        assert!(check("D!=0", &target));
        assert!(check(r#"D=="90m""#, &target));
        let err = eval("D=~\"1h\"", &target).unwrap_err();
        assert!(err.message().starts_with("invalid operator for duration"));
        let err = eval("D==\"soon\"", &target).unwrap_err();
        assert_eq!(err.message(), "invalid duration: \"soon\" at 1:4");
    }

    #[test]
    fn test_time() {
        let target = fields(&[("T", Value::Time(datetime!(2023-06-01 12:00 UTC)))]);
        assert!(check("T>2023-01-01T00:00:00Z", &target));
        assert!(check("T==2023-06-01T21:00:00+09:00", &target));
        assert!(check(r#"T<"2024-01-01T00:00:00Z""#, &target));
        let err = eval("T<1h", &target).unwrap_err();
        assert_eq!(err.message(), "invalid time: \"1h\" at 1:3");
    }

    #[test]
    fn test_bool_and_other_compare_as_strings() {
        let target = fields(&[("B", Value::Bool(true)), ("O", Value::Other("[1,2]".into()))]);
        assert!(check("B==true", &target));
        assert!(!check("B==True", &target));
        assert!(check("B==*True", &target));
        assert!(check("O==`[1,2]`", &target));
        let err = eval("B>1", &target).unwrap_err();
        assert!(err.message().starts_with("invalid operator for string"));
    }

    #[test]
    fn test_type_operator_mismatch() {
        let err = eval("Name>1", &fields(&[("Name", "x".into())])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Eval);
        assert_eq!(
            err.to_string(),
            "eval error: invalid operator for string: \">\" at 1:5"
        );

        let err = eval(r#"N=~"1""#, &fields(&[("N", Value::Int(1))])).unwrap_err();
        assert!(err.message().starts_with("invalid operator for number"));
    }

    #[test]
    fn test_lazy_number_fallback() {
        let target = fields(&[("N", Value::Int(15))]);
        let err = eval("N==0o17", &target).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Eval);
        assert_eq!(err.message(), "invalid number: \"0o17\" at 1:4");

        let err = eval(r#"N=="fifteen""#, &target).unwrap_err();
        assert!(err.message().starts_with("invalid number: \"fifteen\""));

        let err = eval("N==1e400", &target).unwrap_err();
        assert_eq!(err.message(), "invalid number: \"1e400\" at 1:4");
    }

    #[test]
    fn test_lookup_failure_propagates() {
        let err = eval("Missing==1", &HashMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Eval);
        assert_eq!(err.to_string(), "eval error: field not found: \"Missing\"");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_short_circuit() {
        let target = FnTarget(|name: &str| -> std::result::Result<Value, LookupError> {
            match name {
                "Known" => Ok(Value::from("yes")),
                _ => Err(FieldNotFound(name.to_string()).into()),
            }
        });
        let expr = Expr::parse(r#"Known=="no" && UnknownField==1"#).unwrap();
        assert!(!expr.eval(&target).unwrap());
        let expr = Expr::parse(r#"Known=="yes" || UnknownField==1"#).unwrap();
        assert!(expr.eval(&target).unwrap());
        let expr = Expr::parse(r#"Known=="yes" && UnknownField==1"#).unwrap();
        assert!(expr.eval(&target).is_err());
    }

    #[test]
    fn test_lookup_cached_per_call() {
        let calls = RefCell::new(Vec::new());
        let target = FnTarget(|name: &str| -> std::result::Result<Value, LookupError> {
            calls.borrow_mut().push(name.to_string());
            Ok(Value::Int(5))
        });
        let expr = Expr::parse("A>1 && A<10 && B==5 && A!=3").unwrap();
        assert!(expr.eval(&target).unwrap());
        assert_eq!(*calls.borrow(), ["A", "B"]);

        assert!(expr.eval(&target).unwrap());
        assert_eq!(calls.borrow().len(), 4);
    }

    #[test]
    fn test_deterministic() {
        let expr = Expr::parse("(A>1&&B<5)||C==0").unwrap();
        let target: BTreeMap<String, Value> = [
            ("A".to_string(), Value::Int(2)),
            ("B".to_string(), Value::Int(3)),
            ("C".to_string(), Value::Int(9)),
        ]
        .into_iter()
        .collect();
        let first = expr.eval(&target).unwrap();
        for _ in 0..10 {
            assert_eq!(expr.eval(&target).unwrap(), first);
        }
    }

    #[test]
    fn test_concurrent_evaluation() {
        let expr = Expr::parse(r#"N>=50 && S=~"^item""#).unwrap();
        std::thread::scope(|scope| {
            for t in 0..4 {
                let expr = &expr;
                scope.spawn(move || {
                    for i in 0..100i64 {
                        let target =
                            fields(&[("N", Value::Int(i)), ("S", format!("item-{t}-{i}").into())]);
                        assert_eq!(expr.eval(&target).unwrap(), i >= 50);
                    }
                });
            }
        });
    }

    #[test]
    fn test_equal_fold() {
        assert!(equal_fold("Hello", "hELLO"));
        assert!(equal_fold("ÅNGSTRÖM", "ångström"));
        assert!(!equal_fold("Straße", "STRASSE"));
        assert!(!equal_fold("Hello", "Help"));
    }
}
