//! Version gate: decides whether a dataset version needs fresh insights.

use crate::error::{InsightsError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// How version tokens are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionScheme {
    /// Byte-wise string comparison. Not semver-aware: "10" < "9".
    #[default]
    Lexical,
    /// Both tokens are unsigned integers compared numerically.
    Ordinal,
}

impl fmt::Display for VersionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionScheme::Lexical => write!(f, "lexical"),
            VersionScheme::Ordinal => write!(f, "ordinal"),
        }
    }
}

impl VersionScheme {
    /// Order two version tokens under this scheme.
    pub fn compare(&self, new: &str, persisted: &str) -> Result<Ordering> {
        match self {
            VersionScheme::Lexical => Ok(new.cmp(persisted)),
            VersionScheme::Ordinal => {
                let parse = |token: &str| {
                    let invalid = |detail: String| InsightsError::VersionComparison {
                        new: new.to_string(),
                        persisted: persisted.to_string(),
                        reason: format!("'{}' is not an ordinal version: {}", token, detail),
                    };
                    // Digits only: `u64::from_str` would also take a leading '+'.
                    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
                        return Err(invalid("expected decimal digits only".to_string()));
                    }
                    token.parse::<u64>().map_err(|e| invalid(e.to_string()))
                };
                Ok(parse(new)?.cmp(&parse(persisted)?))
            }
        }
    }
}

/// Whether insights must be recomputed for `new_version`.
///
/// Runs when nothing was persisted yet (an empty stored token counts as
/// absent) or when the new version orders strictly after the stored one.
pub fn should_run(
    new_version: &str,
    last_persisted_version: Option<&str>,
    scheme: VersionScheme,
) -> Result<bool> {
    match last_persisted_version {
        None => Ok(true),
        Some(persisted) if persisted.is_empty() => Ok(true),
        Some(persisted) => Ok(scheme.compare(new_version, persisted)? == Ordering::Greater),
    }
}
