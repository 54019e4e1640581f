//! Process-wide cache of compiled regular expressions.
//!
//! Parsing many filters that share patterns compiles each pattern once.
//! Compiled [`Regex`] values are cheap to clone and safe to share across
//! threads, so the cache hands out clones.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use regex::Regex;

#[derive(Debug, Default)]
pub struct RegexCache {
    patterns: DashMap<String, Regex>,
    compiles: AtomicUsize,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared instance used by [`Expr::parse`](crate::dsl::Expr::parse).
    pub fn global() -> &'static RegexCache {
        static GLOBAL: OnceLock<RegexCache> = OnceLock::new();
        GLOBAL.get_or_init(RegexCache::new)
    }

    /// Return the compiled pattern, compiling and storing it on first use.
    ///
    /// Two threads racing on the same new pattern may both compile it; the
    /// later insert wins and both results are equivalent.
    pub fn get_or_compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        if let Some(re) = self.patterns.get(pattern) {
            return Ok(re.clone());
        }

        let re = Regex::new(pattern)?;
        self.compiles.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(pattern, "compiled regex");
        self.patterns.insert(pattern.to_string(), re.clone());
        Ok(re)
    }

    /// Number of distinct patterns stored.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Number of successful compilations performed so far.
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::Relaxed)
    }
}
