use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::bail;
use chrono::Utc;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::classify::patch_dependencies;
use crate::diagnostics::Diagnostics;
use crate::error::PatchError;
use crate::options::{PatchOptions, VersionPreference};
use crate::output::PatchOutput;
use crate::patch::WorkspacePatches;
use crate::sbom::{SbomDocument, WorkspaceGraph};
use crate::search::CandidateSearch;
use crate::store::{PackageRegistry, VulnerabilityStore};
use crate::vulnerability::{Vulnerability, VulnerabilityDocument};
use crate::walker::GraphWalker;

/// Runs patch resolution over every workspace of an analysis.
pub struct Patcher {
    search: CandidateSearch,
    options: PatchOptions,
    cancel: CancellationToken,
}

impl Patcher {
    pub fn builder() -> PatcherBuilder {
        PatcherBuilder {
            registry: None,
            store: None,
            options: PatchOptions::default(),
            cancel: None,
        }
    }

    #[instrument(skip_all, fields(workspaces = sbom.workspaces.len()))]
    pub async fn run(&self, sbom: &SbomDocument, vulns: &VulnerabilityDocument) -> PatchOutput {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut diagnostics = Diagnostics::default();

        if !sbom.analysis_info.succeeded() || !vulns.analysis_info.succeeded() {
            let err = PatchError::UpstreamFailure;
            let sbom_status = &sbom.analysis_info.status;
            let vuln_status = &vulns.analysis_info.status;
            warn!(%sbom_status, %vuln_status, "upstream analysis failed, skipping resolution");
            diagnostics.record_error(
                err.kind(),
                err.to_string(),
                format!("sbom status {sbom_status:?}, vulnerability status {vuln_status:?}"),
            );
            return PatchOutput::failure(started_at, clock, diagnostics);
        }

        let runs = sbom.workspaces.iter().map(|(name, graph)| {
            let found = vulns
                .workspaces
                .get(name)
                .map(|w| w.vulnerabilities.as_slice())
                .unwrap_or_default();
            async move { (name, self.patch_workspace(name, graph, found).await) }
        });

        let mut workspaces = BTreeMap::new();
        let mut fatal: Option<(String, PatchError)> = None;
        for (name, (result, diag)) in join_all(runs).await {
            diagnostics.extend(diag);
            match result {
                Ok(patches) => {
                    workspaces.insert(name.clone(), patches);
                }
                Err(e) => {
                    warn!(workspace = %name, error = %e, "workspace resolution failed");
                    if fatal.is_none() {
                        fatal = Some((name.clone(), e));
                    }
                }
            }
        }

        if let Some((name, err)) = fatal {
            diagnostics.record_error(
                err.kind(),
                err.to_string(),
                format!("workspace {name}: {err:?}"),
            );
            return PatchOutput::failure(started_at, clock, diagnostics);
        }

        info!(
            workspaces = workspaces.len(),
            warnings = diagnostics.warnings.len(),
            "patch resolution complete"
        );
        PatchOutput::success(workspaces, started_at, clock, diagnostics)
    }

    /// Resolve the direct and dev dependencies of one workspace. Diagnostics
    /// come back even when resolution fails.
    #[instrument(skip(self, graph, vulnerabilities), fields(vulnerabilities = vulnerabilities.len()))]
    pub async fn patch_workspace(
        &self,
        name: &str,
        graph: &WorkspaceGraph,
        vulnerabilities: &[Vulnerability],
    ) -> (Result<WorkspacePatches, PatchError>, Diagnostics) {
        let mut diagnostics = Diagnostics::default();
        let result = self.resolve(graph, vulnerabilities, &mut diagnostics).await;
        (result, diagnostics)
    }

    async fn resolve(
        &self,
        graph: &WorkspaceGraph,
        vulnerabilities: &[Vulnerability],
        diagnostics: &mut Diagnostics,
    ) -> Result<WorkspacePatches, PatchError> {
        if self.cancel.is_cancelled() {
            return Err(PatchError::Cancelled);
        }

        let walker = GraphWalker::new(graph, vulnerabilities);
        let direct = walker.collect(&graph.start.dependencies);
        let dev = walker.collect(&graph.start.dev_dependencies);

        let strict = self.options.strict_evidence;
        let patches = patch_dependencies(&self.search, strict, &direct, diagnostics).await?;
        let dev_patches = patch_dependencies(&self.search, strict, &dev, diagnostics).await?;
        Ok(WorkspacePatches {
            patches,
            dev_patches,
        })
    }
}

pub struct PatcherBuilder {
    registry: Option<Arc<dyn PackageRegistry>>,
    store: Option<Arc<dyn VulnerabilityStore>>,
    options: PatchOptions,
    cancel: Option<CancellationToken>,
}

impl PatcherBuilder {
    pub fn registry(mut self, registry: Arc<dyn PackageRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn vulnerability_store(mut self, store: Arc<dyn VulnerabilityStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn options(mut self, options: PatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.options.max_concurrency = n;
        self
    }

    pub fn preference(mut self, preference: VersionPreference) -> Self {
        self.options.preference = preference;
        self
    }

    pub fn strict_evidence(mut self, strict: bool) -> Self {
        self.options.strict_evidence = strict;
        self
    }

    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> anyhow::Result<Patcher> {
        let Some(registry) = self.registry else {
            bail!("a package registry is required");
        };
        let Some(store) = self.store else {
            bail!("a vulnerability store is required");
        };
        if self.options.max_concurrency == 0 {
            bail!("max concurrency must be at least 1");
        }
        let cancel = self.cancel.unwrap_or_default();
        Ok(Patcher {
            search: CandidateSearch::new(registry, store, self.options.clone(), cancel.clone()),
            options: self.options,
            cancel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::ErrorKind;
    use crate::nvd::NvdItem;
    use crate::output::AnalysisStatus;
    use crate::patch::PatchType;
    use crate::store::{DeclaredDependencies, MemoryStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStore {
        queries: AtomicUsize,
    }

    #[async_trait]
    impl PackageRegistry for CountingStore {
        async fn released_versions(&self, _name: &str) -> anyhow::Result<Vec<String>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }

        async fn declared_dependencies(
            &self,
            _name: &str,
            _version: &str,
        ) -> anyhow::Result<DeclaredDependencies> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(DeclaredDependencies::default())
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[async_trait]
    impl VulnerabilityStore for CountingStore {
        async fn records_for_package(&self, _name: &str) -> anyhow::Result<Vec<NvdItem>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn sbom(status: &str) -> SbomDocument {
        serde_json::from_value(json!({
            "workspaces": {
                ".": {
                    "start": {
                        "dependencies": [
                            {"name": "express", "version": "4.17.1"},
                            {"name": "lodash", "version": "4.17.20"}
                        ],
                        "dev_dependencies": [{"name": "mocha", "version": "9.0.0"}]
                    },
                    "dependencies": {
                        "express": {"4.17.1": {"key": "express@4.17.1", "dependencies": {"qs": "6.7.0"}}},
                        "qs": {"6.7.0": {"key": "qs@6.7.0"}},
                        "lodash": {"4.17.20": {"key": "lodash@4.17.20"}},
                        "mocha": {"9.0.0": {"key": "mocha@9.0.0"}}
                    }
                },
                "packages/api": {
                    "start": {"dependencies": [{"name": "lodash", "version": "4.17.20"}]},
                    "dependencies": {
                        "lodash": {"4.17.20": {"key": "lodash@4.17.20"}}
                    }
                }
            },
            "analysis_info": {"status": status}
        }))
        .unwrap()
    }

    fn vulns(status: &str) -> VulnerabilityDocument {
        let lodash = json!({
            "vulnerability_id": "CVE-2021-23337",
            "affected_dependency": "lodash",
            "affected_version": "4.17.20",
            "evidence": {"type": "range", "introduced": "0.0.0", "fixed": "4.17.21"}
        });
        serde_json::from_value(json!({
            "workspaces": {
                ".": {"vulnerabilities": [
                    {
                        "vulnerability_id": "CVE-2022-24999",
                        "affected_dependency": "qs",
                        "affected_version": "6.7.0",
                        "evidence": {"type": "range", "fixed": "6.7.3"}
                    },
                    lodash.clone()
                ]},
                "packages/api": {"vulnerabilities": [lodash]}
            },
            "analysis_info": {"status": status}
        }))
        .unwrap()
    }

    fn knowledge() -> MemoryStore {
        MemoryStore::default()
            .with_release("express", "4.17.1", &[("qs", "6.7.0")])
            .with_release("express", "4.17.3", &[("qs", "6.9.7")])
            .with_release("qs", "6.7.0", &[])
            .with_release("qs", "6.9.7", &[])
            .with_record(
                serde_json::from_value(json!({
                    "nvd_id": "CVE-2022-24999",
                    "vuln_status": "Analyzed",
                    "affected": [{
                        "criteriaDict": {"vendor": "qs_project", "product": "qs", "version": "*"},
                        "versionEndExcluding": "6.7.3"
                    }]
                }))
                .unwrap(),
            )
    }

    fn patcher_over(store: MemoryStore) -> Patcher {
        let store = Arc::new(store);
        Patcher::builder()
            .registry(store.clone())
            .vulnerability_store(store)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn resolves_every_workspace() {
        let output = patcher_over(knowledge())
            .run(&sbom("success"), &vulns("success"))
            .await;

        assert_eq!(output.analysis_info.status, AnalysisStatus::Success);
        let root = &output.workspaces["."];
        let express = &root.patches["express@4.17.1"];
        assert_eq!(express.classification, PatchType::Full);
        assert_eq!(express.recommended_version.as_deref(), Some("4.17.3"));
        assert!(!express.top_level_vulnerable);

        let lodash = &root.patches["lodash@4.17.20"];
        assert!(lodash.top_level_vulnerable);
        assert_eq!(lodash.recommended_version.as_deref(), Some("4.17.21"));
        assert!(root.dev_patches.is_empty());

        let api = &output.workspaces["packages/api"];
        assert_eq!(api.patches.len(), 1);
        assert!(output.analysis_info.public_errors.is_empty());
    }

    #[tokio::test]
    async fn upstream_failure_short_circuits() {
        let store = Arc::new(CountingStore::default());
        let patcher = Patcher::builder()
            .registry(store.clone())
            .vulnerability_store(store.clone())
            .build()
            .unwrap();

        for (s, v) in [
            ("failure", "success"),
            ("success", "failure"),
            ("started", "success"),
            ("success", "FAILURE"),
        ] {
            let output = patcher.run(&sbom(s), &vulns(v)).await;
            assert_eq!(output.analysis_info.status, AnalysisStatus::Failure);
            assert!(output.workspaces.is_empty());
            assert_eq!(
                output.analysis_info.public_errors[0].kind,
                ErrorKind::PreviousStageFailed
            );
        }
        assert_eq!(store.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_fails_the_run() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let store = Arc::new(knowledge());
        let patcher = Patcher::builder()
            .registry(store.clone())
            .vulnerability_store(store)
            .cancel_token(cancel)
            .build()
            .unwrap();

        let output = patcher.run(&sbom("success"), &vulns("success")).await;
        assert_eq!(output.analysis_info.status, AnalysisStatus::Failure);
        assert!(output.workspaces.is_empty());
        assert_eq!(output.analysis_info.public_errors.len(), 1);
        assert_eq!(output.analysis_info.public_errors[0].kind, ErrorKind::Cancelled);
        assert!(output.analysis_info.private_errors[0].description.contains("workspace"));
    }

    #[tokio::test]
    async fn workspace_without_vulnerabilities_has_empty_patches() {
        let mut vulns = vulns("success");
        vulns.workspaces.remove("packages/api");
        let output = patcher_over(knowledge()).run(&sbom("success"), &vulns).await;
        let api = &output.workspaces["packages/api"];
        assert!(api.patches.is_empty());
        assert!(api.dev_patches.is_empty());
    }

    #[test]
    fn builder_requires_stores() {
        let err = Patcher::builder().build().err().expect("should be an error");
        assert!(err.to_string().contains("registry"));

        let store = Arc::new(MemoryStore::default());
        let err = Patcher::builder()
            .registry(store)
            .build()
            .err()
            .expect("should be an error");
        assert!(err.to_string().contains("vulnerability store"));
    }

    #[test]
    fn builder_applies_options() {
        let store = Arc::new(MemoryStore::default());
        let patcher = Patcher::builder()
            .registry(store.clone())
            .vulnerability_store(store)
            .max_concurrency(7)
            .preference(VersionPreference::Newest)
            .strict_evidence(true)
            .build()
            .unwrap();
        assert_eq!(patcher.options.max_concurrency, 7);
        assert_eq!(patcher.options.preference, VersionPreference::Newest);
        assert!(patcher.options.strict_evidence);
    }

    #[test]
    fn builder_rejects_zero_concurrency() {
        let store = Arc::new(MemoryStore::default());
        let result = Patcher::builder()
            .registry(store.clone())
            .vulnerability_store(store)
            .max_concurrency(0)
            .build();
        assert!(result.is_err());
    }
}
