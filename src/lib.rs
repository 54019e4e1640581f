//! Compile and evaluate filter expressions such as
//! `(Age >= 18 && Name =~ "^A") || Role ==* "admin"` against records.
//!
//! ```
//! use std::collections::HashMap;
//! use sift::{Expr, Value};
//!
//! let expr = Expr::parse("Age > 18 && Name ==* \"alice\"").unwrap();
//! let mut record = HashMap::new();
//! record.insert("Age".to_string(), Value::Int(20));
//! record.insert("Name".to_string(), Value::from("Alice"));
//! assert!(expr.eval(&record).unwrap());
//! ```

pub mod dsl;
pub mod record;

pub use dsl::{
    ErrorKind, Expr, FieldNotFound, FilterError, FnTarget, LookupError, RegexCache, Target, Value,
    evaluate, parse, parse_bytes,
};
