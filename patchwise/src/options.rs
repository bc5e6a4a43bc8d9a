use std::fmt;
use std::str::FromStr;

use anyhow::bail;

/// Ceiling on simultaneous knowledge-store lookups while scoring a candidate.
pub const DEFAULT_MAX_CONCURRENCY: usize = 50;

/// Which clean candidate wins when several upgrade targets have no known
/// vulnerabilities in their one-hop dependency set.
///
/// Valid inputs: `"first-clean"` (alias `"oldest"`) or `"newest"`,
/// case-insensitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VersionPreference {
    /// Stop at the lowest clean version above the installed one.
    #[default]
    FirstClean,
    /// Score every candidate and keep the highest clean one.
    Newest,
}

impl fmt::Display for VersionPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionPreference::FirstClean => write!(f, "first-clean"),
            VersionPreference::Newest => write!(f, "newest"),
        }
    }
}

impl FromStr for VersionPreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("first-clean") || s.eq_ignore_ascii_case("oldest") {
            return Ok(VersionPreference::FirstClean);
        }
        if s.eq_ignore_ascii_case("newest") {
            return Ok(VersionPreference::Newest);
        }
        bail!("invalid version preference: {s:?} (expected \"first-clean\" or \"newest\")")
    }
}

#[derive(Debug, Clone)]
pub struct PatchOptions {
    pub max_concurrency: usize,
    pub preference: VersionPreference,
    /// Treat vulnerabilities without a derivable fixed version as fatal
    /// instead of classifying the dependency `NONE`.
    pub strict_evidence: bool,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            preference: VersionPreference::default(),
            strict_evidence: false,
        }
    }
}
