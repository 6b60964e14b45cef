//! Natural-key collision rewriting.

use std::collections::HashSet;

use crate::config::NaturalKeyConfig;

/// Rewrites repeated natural keys within one table's load.
///
/// The first occurrence of a key passes through unchanged. Every later
/// occurrence becomes `key + suffix`; the rewritten value is not recorded,
/// so a third occurrence maps to the same rewritten value as the second.
/// NULL compares as the empty string unless `skip_null` is set.
#[derive(Debug)]
pub struct DuplicateKeyResolver {
    seen: HashSet<String>,
    suffix: String,
    skip_null: bool,
    rewritten: u64,
}

impl DuplicateKeyResolver {
    pub fn new(suffix: impl Into<String>, skip_null: bool) -> Self {
        Self {
            seen: HashSet::new(),
            suffix: suffix.into(),
            skip_null,
            rewritten: 0,
        }
    }

    pub fn from_config(config: &NaturalKeyConfig) -> Self {
        Self::new(config.suffix.clone(), config.skip_null)
    }

    /// Effective key for the next row.
    pub fn resolve(&mut self, key: Option<&str>) -> Option<String> {
        if key.is_none() && self.skip_null {
            return None;
        }

        let literal = key.unwrap_or("");
        if self.seen.insert(literal.to_string()) {
            return key.map(str::to_string);
        }

        self.rewritten += 1;
        Some(format!("{}{}", literal, self.suffix))
    }

    /// Number of keys rewritten so far.
    pub fn rewritten(&self) -> u64 {
        self.rewritten
    }

    /// Number of distinct keys seen so far.
    pub fn distinct(&self) -> usize {
        self.seen.len()
    }
}
