//! npm-flavoured semantic version helpers.
//!
//! Parsing, ordering and range satisfaction are delegated to `node-semver`;
//! this module only adds the handful of list operations the engine needs on
//! top of it, plus `name@version` key handling.

use node_semver::{Range, Version};
use tracing::debug;

/// Build the `name@version` key used throughout the dependency graph.
pub fn package_key(name: &str, version: &str) -> String {
    format!("{name}@{version}")
}

/// Split a `name@version` key on its last `@`.
///
/// Scoped packages keep their leading `@`: `@scope/pkg@1.0.0` splits into
/// `("@scope/pkg", "1.0.0")`. Returns `None` when either half would be empty.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    let (name, version) = key.rsplit_once('@')?;
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some((name, version))
}

/// Parse and sort version strings in ascending semver order.
///
/// Strings that are not valid versions are dropped.
pub fn sort_versions<I, S>(raw: I) -> Vec<Version>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parsed: Vec<Version> = raw
        .into_iter()
        .filter_map(|s| match Version::parse(s.as_ref()) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(version = s.as_ref(), error = %e, "skipping unparsable version");
                None
            }
        })
        .collect();
    parsed.sort();
    parsed.dedup();
    parsed
}

/// Highest version in `versions` that satisfies `range`.
pub fn max_satisfying<'a>(versions: &'a [Version], range: &Range) -> Option<&'a Version> {
    versions.iter().filter(|v| range.satisfies(v)).max()
}

/// Whether a dependency constraint points at the local filesystem rather
/// than at a registry release.
pub fn is_local_constraint(constraint: &str) -> bool {
    let c = constraint.trim();
    c.contains("file:")
        || c.starts_with("link:")
        || c.starts_with("./")
        || c.starts_with("../")
        || c.starts_with('/')
        || c.starts_with("~/")
}
