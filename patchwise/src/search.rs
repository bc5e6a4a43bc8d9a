//! Upgrade candidate search: enumerate newer releases of a direct dependency
//! and score each by the known vulnerabilities of its one-hop dependency set.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::PatchError;
use crate::nvd::{to_patch_entries, vulnerabilities_affecting};
use crate::options::{PatchOptions, VersionPreference};
use crate::patch::{PatchInfo, ToPatch};
use crate::registry::{possible_versions, resolve_one_hop, ResolvedDependency};
use crate::store::{PackageRegistry, VulnerabilityStore};
use crate::version::package_key;

/// A release considered as an upgrade target.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub version: String,
    /// Number of vulnerability records matched across the one-hop set.
    pub score: usize,
    pub vulnerabilities: Vec<ToPatch>,
}

#[derive(Clone)]
pub struct CandidateSearch {
    registry: Arc<dyn PackageRegistry>,
    store: Arc<dyn VulnerabilityStore>,
    options: PatchOptions,
    cancel: CancellationToken,
}

impl CandidateSearch {
    pub fn new(
        registry: Arc<dyn PackageRegistry>,
        store: Arc<dyn VulnerabilityStore>,
        options: PatchOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            store,
            options,
            cancel,
        }
    }

    async fn guarded<T>(
        &self,
        fut: impl Future<Output = Result<T, PatchError>>,
    ) -> Result<T, PatchError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PatchError::Cancelled),
            res = fut => res,
        }
    }

    /// Sum the vulnerability counts of `deps`, looking them up concurrently
    /// with at most `max_concurrency` queries in flight.
    #[instrument(skip_all, fields(deps = deps.len()))]
    pub async fn score_dependency_set(
        &self,
        deps: &[ResolvedDependency],
    ) -> Result<(usize, Vec<ToPatch>), PatchError> {
        let sem = Semaphore::new(self.options.max_concurrency.max(1));

        let lookups = deps.iter().map(|dep| {
            let sem = &sem;
            async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                let (count, items) = self
                    .guarded(vulnerabilities_affecting(
                        self.store.as_ref(),
                        &dep.name,
                        &dep.version,
                    ))
                    .await?;
                Ok::<_, PatchError>((count, to_patch_entries(&items, &dep.name, &dep.version)))
            }
        });

        let mut score = 0;
        let mut vulnerabilities = Vec::new();
        for result in join_all(lookups).await {
            let (count, entries) = result?;
            score += count;
            vulnerabilities.extend(entries);
        }
        Ok((score, vulnerabilities))
    }

    async fn score_candidate(&self, name: &str, version: String) -> Result<Candidate, PatchError> {
        let hop = self
            .guarded(resolve_one_hop(self.registry.as_ref(), name, &version))
            .await?;
        let (score, vulnerabilities) = self.score_dependency_set(&hop.into_all()).await?;
        debug!(package = name, %version, score, "candidate scored");
        Ok(Candidate {
            version,
            score,
            vulnerabilities,
        })
    }

    /// Find the release of `name` after `installed` whose one-hop set carries
    /// the fewest known vulnerabilities.
    ///
    /// Returns the clean winner, or [`PatchError::NotFullyPatchable`] with
    /// the lowest-scoring candidate when no release is clean.
    #[instrument(skip(self, state), fields(preference = %self.options.preference))]
    pub async fn find_better_version(
        &self,
        name: &str,
        installed: &str,
        state: &BTreeMap<String, PatchInfo>,
    ) -> Result<Candidate, PatchError> {
        let key = package_key(name, installed);
        if state.get(&key).is_some_and(PatchInfo::is_processed) {
            return Err(PatchError::AlreadyProcessed(key));
        }

        let versions = self
            .guarded(possible_versions(self.registry.as_ref(), name, Some(installed)))
            .await?;
        if versions.is_empty() {
            return Err(PatchError::NotPatchable(name.to_string()));
        }
        debug!(candidates = versions.len(), "searching newer releases");

        let newest = self.options.preference == VersionPreference::Newest;
        let mut clean: Option<Candidate> = None;
        let mut best: Option<Candidate> = None;

        for version in versions {
            if self.cancel.is_cancelled() {
                return Err(PatchError::Cancelled);
            }
            let candidate = self.score_candidate(name, version.to_string()).await?;

            if candidate.score == 0 {
                if !newest {
                    return Ok(candidate);
                }
                clean = Some(candidate);
                continue;
            }

            let better = match &best {
                None => true,
                Some(b) if newest => candidate.score <= b.score,
                Some(b) => candidate.score < b.score,
            };
            if better {
                best = Some(candidate);
            }
        }

        if let Some(candidate) = clean {
            return Ok(candidate);
        }
        match best {
            Some(best) => Err(PatchError::NotFullyPatchable {
                name: name.to_string(),
                best: Box::new(best),
            }),
            None => Err(PatchError::NotPatchable(name.to_string())),
        }
    }
}
