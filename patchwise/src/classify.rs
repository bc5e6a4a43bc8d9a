//! Per-dependency patchability decision.

use std::collections::{BTreeMap, HashSet};

use node_semver::Version;
use tracing::{debug, instrument, warn};

use crate::diagnostics::{Diagnostics, ErrorKind};
use crate::error::PatchError;
use crate::patch::{PatchInfo, PatchType, ToPatch, VulnerabilityIdentity};
use crate::search::CandidateSearch;
use crate::version::{package_key, split_key};
use crate::vulnerability::Evidence;

/// Outcome of comparing a candidate's vulnerabilities with the installed ones.
#[derive(Debug, Default, PartialEq)]
pub struct Partition {
    /// Only in the candidate.
    pub introduced: Vec<ToPatch>,
    /// In both.
    pub unpatchable: Vec<ToPatch>,
    /// Only in the installed tree.
    pub patchable: Vec<ToPatch>,
}

pub fn partition_vulnerabilities(candidate: &[ToPatch], original: &[ToPatch]) -> Partition {
    let in_candidate: HashSet<VulnerabilityIdentity<'_>> =
        candidate.iter().map(ToPatch::identity).collect();
    let in_original: HashSet<VulnerabilityIdentity<'_>> =
        original.iter().map(ToPatch::identity).collect();

    let introduced = candidate
        .iter()
        .filter(|c| !in_original.contains(&c.identity()))
        .cloned()
        .collect();
    let (unpatchable, patchable): (Vec<ToPatch>, Vec<ToPatch>) = original
        .iter()
        .cloned()
        .partition(|o| in_candidate.contains(&o.identity()));

    Partition {
        introduced,
        unpatchable,
        patchable,
    }
}

/// Classifies the direct dependencies of one dependency list. Each key is
/// written once; later calls for the same key are skipped.
pub struct Classifier<'a> {
    search: &'a CandidateSearch,
    strict_evidence: bool,
    patches: BTreeMap<String, PatchInfo>,
}

impl<'a> Classifier<'a> {
    pub fn new(search: &'a CandidateSearch, strict_evidence: bool) -> Self {
        Self {
            search,
            strict_evidence,
            patches: BTreeMap::new(),
        }
    }

    pub fn into_patches(self) -> BTreeMap<String, PatchInfo> {
        self.patches
    }

    #[instrument(skip(self, entries, diagnostics), fields(entries = entries.len()))]
    pub async fn classify(
        &mut self,
        key: &str,
        entries: &[ToPatch],
        diagnostics: &mut Diagnostics,
    ) -> Result<(), PatchError> {
        if self.patches.get(key).is_some_and(PatchInfo::is_processed) {
            debug!("already classified, skipping");
            return Ok(());
        }

        let info = match entries {
            [only] if package_key(&only.dependency_name, &only.dependency_version) == key => {
                self.patch_vulnerable_itself(key, only, diagnostics)?
            }
            _ => match self.patch_transitive(key, entries, diagnostics).await? {
                Some(info) => info,
                None => return Ok(()),
            },
        };

        debug!(classification = %info.classification, recommended = ?info.recommended_version, "classified");
        self.patches.insert(key.to_string(), info);
        Ok(())
    }

    fn patch_vulnerable_itself(
        &self,
        key: &str,
        entry: &ToPatch,
        diagnostics: &mut Diagnostics,
    ) -> Result<PatchInfo, PatchError> {
        let mut info = PatchInfo {
            top_level_vulnerable: true,
            ..Default::default()
        };

        let fixed = match &entry.vulnerability.evidence {
            Some(Evidence::Universal) => {
                info.classification = PatchType::None;
                info.unpatchable.push(entry.clone());
                return Ok(info);
            }
            Some(Evidence::Range {
                fixed: Some(fixed), ..
            }) => Version::parse(fixed.trim()).ok(),
            _ => None,
        };

        match fixed {
            Some(version) => {
                info.classification = PatchType::Full;
                info.patchable.push(entry.clone());
                info.recommended_version = Some(version.to_string());
            }
            None => {
                let err = PatchError::UnsupportedEvidence {
                    vulnerability: entry.vulnerability.vulnerability_id.clone(),
                    evidence: entry
                        .vulnerability
                        .evidence
                        .as_ref()
                        .map_or("missing", Evidence::label),
                };
                if self.strict_evidence {
                    return Err(err);
                }
                warn!(dependency = key, error = %err, "no fix derivable, marking unpatchable");
                diagnostics.warn(err.kind(), Some(key), err.to_string());
                info.classification = PatchType::None;
                info.unpatchable.push(entry.clone());
            }
        }
        Ok(info)
    }

    async fn patch_transitive(
        &self,
        key: &str,
        entries: &[ToPatch],
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<PatchInfo>, PatchError> {
        let unpatchable = || PatchInfo {
            classification: PatchType::None,
            unpatchable: entries.to_vec(),
            ..Default::default()
        };

        let Some((name, version)) = split_key(key) else {
            diagnostics.warn(
                ErrorKind::GenericError,
                Some(key),
                "dependency key is not of the form name@version",
            );
            return Ok(Some(unpatchable()));
        };

        let info = match self.search.find_better_version(name, version, &self.patches).await {
            Ok(candidate) => PatchInfo {
                classification: PatchType::Full,
                patchable: entries.to_vec(),
                recommended_version: Some(candidate.version),
                ..Default::default()
            },
            Err(PatchError::NotFullyPatchable { best, .. }) => {
                let split = partition_vulnerabilities(&best.vulnerabilities, entries);
                PatchInfo {
                    top_level_vulnerable: false,
                    classification: PatchType::Partial,
                    unpatchable: split.unpatchable,
                    patchable: split.patchable,
                    introduced: split.introduced,
                    recommended_version: Some(best.version),
                }
            }
            Err(PatchError::NotPatchable(_)) => unpatchable(),
            Err(PatchError::AlreadyProcessed(_)) => {
                debug!("already classified, skipping");
                return Ok(None);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(dependency = key, error = %e, "search failed, marking unpatchable");
                diagnostics.warn(e.kind(), Some(key), e.to_string());
                unpatchable()
            }
        };
        Ok(Some(info))
    }
}

/// Classify every entry of `to_patch` in key order.
pub async fn patch_dependencies(
    search: &CandidateSearch,
    strict_evidence: bool,
    to_patch: &BTreeMap<String, Vec<ToPatch>>,
    diagnostics: &mut Diagnostics,
) -> Result<BTreeMap<String, PatchInfo>, PatchError> {
    let mut classifier = Classifier::new(search, strict_evidence);
    for (key, entries) in to_patch {
        classifier.classify(key, entries, diagnostics).await?;
    }
    Ok(classifier.into_patches())
}
