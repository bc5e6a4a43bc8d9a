//! NVD records from the knowledge store and matching them against a single
//! package version.

use node_semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::PatchError;
use crate::patch::ToPatch;
use crate::store::VulnerabilityStore;
use crate::vulnerability::{Severity, Vulnerability};

/// Review states whose records are considered actionable.
pub const ACTIONABLE_STATUSES: &[&str] = &["Analyzed", "Modified"];

pub fn is_actionable(status: &str) -> bool {
    ACTIONABLE_STATUSES.contains(&status)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NvdItem {
    pub nvd_id: String,
    #[serde(default)]
    pub vuln_status: String,
    #[serde(default)]
    pub affected: Vec<NvdAffected>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metrics: Value,
}

/// One CPE match criterion of an NVD configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NvdAffected {
    pub criteria_dict: CriteriaDict,
    #[serde(default = "default_vulnerable")]
    pub vulnerable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_start_including: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_start_excluding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_end_including: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_end_excluding: Option<String>,
}

fn default_vulnerable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriteriaDict {
    #[serde(default)]
    pub vendor: String,
    pub product: String,
    #[serde(default)]
    pub version: String,
}

impl NvdItem {
    pub fn names_product(&self, name: &str) -> bool {
        self.affected
            .iter()
            .any(|a| a.criteria_dict.product.eq_ignore_ascii_case(name))
    }

    /// Highest-precedence CVSS score available (v3.1, v3.0, then v2).
    pub fn severity(&self) -> Option<Severity> {
        for key in ["cvssMetricV31", "cvssMetricV30", "cvssMetricV2"] {
            let Some(metric) = self.metrics.get(key).and_then(|m| m.get(0)) else {
                continue;
            };
            let cvss = metric.get("cvssData");
            let score = cvss.and_then(|c| c.get("baseScore")).and_then(Value::as_f64);
            let class = cvss
                .and_then(|c| c.get("baseSeverity"))
                .or_else(|| metric.get("baseSeverity"))
                .and_then(Value::as_str)
                .map(str::to_string);
            if score.is_some() || class.is_some() {
                return Some(Severity { score, class });
            }
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub version: Version,
    pub inclusive: bool,
}

/// Affected-version evidence normalised for one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AffectedVersions {
    Range {
        start: Option<Bound>,
        end: Option<Bound>,
    },
    Exact(Version),
    Universal,
}

fn bound(including: &Option<String>, excluding: &Option<String>) -> Result<Option<Bound>, ()> {
    let (raw, inclusive) = match (including, excluding) {
        (Some(v), _) => (v, true),
        (None, Some(v)) => (v, false),
        (None, None) => return Ok(None),
    };
    Version::parse(raw)
        .map(|version| Some(Bound { version, inclusive }))
        .map_err(|_| ())
}

/// Keep the vulnerable criteria naming `name` and classify each one.
pub fn normalize_affected(name: &str, affected: &[NvdAffected]) -> Vec<AffectedVersions> {
    affected
        .iter()
        .filter(|a| a.vulnerable && a.criteria_dict.product.eq_ignore_ascii_case(name))
        .filter_map(|a| {
            let start = bound(&a.version_start_including, &a.version_start_excluding);
            let end = bound(&a.version_end_including, &a.version_end_excluding);
            match (start, end) {
                (Ok(None), Ok(None)) => {}
                (Ok(start), Ok(end)) => return Some(AffectedVersions::Range { start, end }),
                _ => {
                    debug!(product = %a.criteria_dict.product, "dropping criterion with unparsable bound");
                    return None;
                }
            }
            match a.criteria_dict.version.trim() {
                "" | "*" | "-" => Some(AffectedVersions::Universal),
                v => Version::parse(v).ok().map(AffectedVersions::Exact),
            }
        })
        .collect()
}

pub fn match_range(affected: &[AffectedVersions], version: &Version) -> bool {
    affected.iter().any(|a| match a {
        AffectedVersions::Range { start, end } => {
            let above = start.as_ref().is_none_or(|b| {
                if b.inclusive {
                    *version >= b.version
                } else {
                    *version > b.version
                }
            });
            let below = end.as_ref().is_none_or(|b| {
                if b.inclusive {
                    *version <= b.version
                } else {
                    *version < b.version
                }
            });
            above && below
        }
        _ => false,
    })
}

pub fn match_exact(affected: &[AffectedVersions], version: &Version) -> bool {
    affected
        .iter()
        .any(|a| matches!(a, AffectedVersions::Exact(v) if v == version))
}

pub fn match_universal(affected: &[AffectedVersions], _version: &Version) -> bool {
    affected
        .iter()
        .any(|a| matches!(a, AffectedVersions::Universal))
}

/// Range, then exact, then universal; first hit wins.
pub fn affects(affected: &[AffectedVersions], version: &Version) -> bool {
    match_range(affected, version)
        || match_exact(affected, version)
        || match_universal(affected, version)
}

/// Count and collect the actionable NVD records affecting `name@version`.
#[instrument(skip(store), fields(store = store.name()))]
pub async fn vulnerabilities_affecting(
    store: &dyn VulnerabilityStore,
    name: &str,
    version: &str,
) -> Result<(usize, Vec<NvdItem>), PatchError> {
    let target = match Version::parse(version) {
        Ok(v) => v,
        Err(e) => {
            debug!(package = name, version, error = %e, "version does not parse, nothing can match");
            return Ok((0, vec![]));
        }
    };

    let records = store
        .records_for_package(name)
        .await
        .map_err(|e| PatchError::lookup(name, &e))?;

    let matched: Vec<NvdItem> = records
        .into_iter()
        .filter(|r| is_actionable(&r.vuln_status))
        .filter(|r| affects(&normalize_affected(name, &r.affected), &target))
        .collect();

    debug!(package = name, version, count = matched.len(), "vulnerabilities matched");
    Ok((matched.len(), matched))
}

/// Convert matched records into patch entries for a one-hop dependency.
pub fn to_patch_entries(items: &[NvdItem], name: &str, version: &str) -> Vec<ToPatch> {
    items
        .iter()
        .map(|item| ToPatch {
            dependency_name: name.to_string(),
            dependency_version: version.to_string(),
            path: vec![],
            vulnerability: Vulnerability {
                vulnerability_id: item.nvd_id.clone(),
                affected_dependency: name.to_string(),
                affected_version: version.to_string(),
                severity: item.severity(),
                sources: vec!["NVD".to_string()],
                evidence: None,
            },
        })
        .collect()
}
