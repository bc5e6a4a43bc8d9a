use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{DeclaredDependencies, PackageRegistry};

#[derive(Debug, Default, Deserialize)]
struct Packument {
    #[serde(default)]
    versions: BTreeMap<String, DeclaredDependencies>,
}

/// Package registry backed by an npm-compatible HTTP registry.
pub struct NpmRegistry {
    client: reqwest::Client,
    base_url: String,
    // `None` records a 404 so unknown packages are not re-fetched.
    packuments: Mutex<HashMap<String, Option<Arc<Packument>>>>,
}

impl NpmRegistry {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("patchwise/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            packuments: Mutex::new(HashMap::new()),
        })
    }

    fn packument_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name.replace('/', "%2F"))
    }

    fn cached(&self, name: &str) -> Option<Option<Arc<Packument>>> {
        self.packuments.lock().ok()?.get(name).cloned()
    }

    #[instrument(skip(self))]
    async fn packument(&self, name: &str) -> Result<Option<Arc<Packument>>> {
        if let Some(hit) = self.cached(name) {
            return Ok(hit);
        }

        let url = self.packument_url(name);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status();
        let packument = if status == reqwest::StatusCode::NOT_FOUND {
            debug!("package not published");
            None
        } else if !status.is_success() {
            bail!("{url} returned HTTP {status}");
        } else {
            let packument: Packument = response
                .json()
                .await
                .with_context(|| format!("failed to parse packument from {url}"))?;
            Some(Arc::new(packument))
        };

        if let Ok(mut cache) = self.packuments.lock() {
            cache.insert(name.to_string(), packument.clone());
        }
        Ok(packument)
    }
}

#[async_trait]
impl PackageRegistry for NpmRegistry {
    async fn released_versions(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .packument(name)
            .await?
            .map(|p| p.versions.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn declared_dependencies(&self, name: &str, version: &str) -> Result<DeclaredDependencies> {
        self.packument(name)
            .await?
            .and_then(|p| p.versions.get(version).cloned())
            .with_context(|| format!("{name}@{version} is not published"))
    }

    fn name(&self) -> &str {
        "npm"
    }
}
