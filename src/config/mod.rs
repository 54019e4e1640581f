use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use sift::record::FieldTypes;

/// Settings file, e.g.
///
/// ```yaml
/// filters:
///   adults: 'age >= 18'
///   slow: 'took > 1s && status != "ok"'
/// fields:
///   took: duration
///   seen: time
/// ```
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SiftConfig {
    /// Named filter expressions.
    #[serde(default)]
    pub filters: HashMap<String, String>,
    /// Type overrides for record fields.
    #[serde(default)]
    pub fields: FieldTypes,
}

impl SiftConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()
            .with_context(|| format!("Config: Failed to read {}", path.display()))?;
        Ok(settings.try_deserialize()?)
    }

    /// Look up a named filter.
    pub fn filter(&self, name: &str) -> anyhow::Result<&str> {
        self.filters.get(name).map(String::as_str).ok_or_else(|| {
            let mut known: Vec<&str> = self.filters.keys().map(String::as_str).collect();
            known.sort_unstable();
            anyhow!(
                "Config: No filter named {:?} (known: {})",
                name,
                known.join(", ")
            )
        })
    }

    /// Compile every named filter, reporting the first that fails.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut names: Vec<&String> = self.filters.keys().collect();
        names.sort();
        for name in names {
            sift::parse(&self.filters[name])
                .with_context(|| format!("Config: Invalid filter {name:?}"))?;
        }
        Ok(())
    }
}
