use std::fmt;

use once_cell::sync::Lazy;
use serde::{Serialize, Serializer};
use unicode_normalization::UnicodeNormalization;

use crate::error::{EngineError, EngineResult};
use regex::Regex;

static KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("identifier key pattern to compile")
});

/// How identifiers of one entity are written when stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdScheme {
    pub prefix: &'static str,
    pub case_insensitive: bool,
}

/// A record identifier in its one canonical form.
///
/// Only [`IdScheme::normalize`] builds these. The key never carries the
/// scheme prefix; [`CanonicalId::formatted`] is the single place the prefix
/// is put back, so it is applied exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalId {
    key: String,
    prefix: &'static str,
}

impl CanonicalId {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stored form, bound for every lookup, update and join.
    pub fn formatted(&self) -> String {
        format!("{}{}", self.prefix, self.key)
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.key)
    }
}

impl Serialize for CanonicalId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl IdScheme {
    pub const fn new(prefix: &'static str, case_insensitive: bool) -> Self {
        IdScheme {
            prefix,
            case_insensitive,
        }
    }

    fn strip_prefix<'a>(&self, value: &'a str) -> Option<&'a str> {
        let head = value.get(..self.prefix.len())?;
        let matches = if self.case_insensitive {
            head.eq_ignore_ascii_case(self.prefix)
        } else {
            head == self.prefix
        };
        if matches {
            value.get(self.prefix.len()..)
        } else {
            None
        }
    }

    /// Canonicalizes an externally supplied identifier.
    ///
    /// Compatibility-folds the text (full-width digits and the like), trims
    /// it, strips every leading copy of the scheme prefix and lower-cases the
    /// key for case-insensitive schemes. Idempotent on its own output in
    /// either the key or the formatted form.
    pub fn normalize(&self, raw: &str) -> EngineResult<CanonicalId> {
        let folded: String = raw.nfkc().collect();
        let mut rest = folded.trim();
        if !self.prefix.is_empty() {
            while let Some(stripped) = self.strip_prefix(rest) {
                rest = stripped.trim_start();
            }
        }

        if rest.is_empty() {
            return Err(EngineError::validation("id", "Identifier is empty."));
        }
        if !KEY_PATTERN.is_match(rest) {
            return Err(EngineError::validation(
                "id",
                "Identifier contains unsupported characters.",
            ));
        }

        let key = if self.case_insensitive {
            rest.to_ascii_lowercase()
        } else {
            rest.to_string()
        };
        Ok(CanonicalId {
            key,
            prefix: self.prefix,
        })
    }

    /// Stored form of `raw` with the scheme prefix applied exactly once.
    pub fn format(&self, raw: &str) -> EngineResult<String> {
        self.normalize(raw).map(|id| id.formatted())
    }
}
