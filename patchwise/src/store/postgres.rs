use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use tracing::{debug, instrument};

use super::{DeclaredDependencies, PackageRegistry, VulnerabilityStore};
use crate::nvd::{NvdAffected, NvdItem};

const VERSIONS_QUERY: &str = r#"
    SELECT v.version
    FROM version AS v
    JOIN package AS p ON p.id = v."packageId"
    WHERE p.name = $1
"#;

const DECLARED_QUERY: &str = r#"
    SELECT v.dependencies, v.dev_dependencies
    FROM version AS v
    JOIN package AS p ON p.id = v."packageId"
    WHERE p.name = $1 AND v.version = $2
"#;

// Product names compare case-insensitively, as `nvd::normalize_affected` does.
const NVD_QUERY: &str = r#"
    SELECT n.nvd_id, n."vulnStatus" AS vuln_status, n."affectedFlattened" AS affected, n.metrics
    FROM nvd AS n
    WHERE n."vulnStatus" IN ('Analyzed', 'Modified')
      AND EXISTS (
            SELECT 1
            FROM jsonb_array_elements(n."affectedFlattened") AS a
            WHERE lower(a -> 'criteriaDict' ->> 'product') = lower($1)
          )
"#;

/// Knowledge database backed by PostgreSQL.
#[derive(Clone)]
pub struct PgKnowledgeStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct DeclaredRow {
    dependencies: Option<Json<BTreeMap<String, String>>>,
    dev_dependencies: Option<Json<BTreeMap<String, String>>>,
}

#[derive(sqlx::FromRow)]
struct NvdRow {
    nvd_id: String,
    vuln_status: String,
    affected: Option<Json<Vec<NvdAffected>>>,
    metrics: Option<Json<Value>>,
}

impl From<DeclaredRow> for DeclaredDependencies {
    fn from(row: DeclaredRow) -> Self {
        DeclaredDependencies {
            dependencies: row.dependencies.map(|j| j.0).unwrap_or_default(),
            dev_dependencies: row.dev_dependencies.map(|j| j.0).unwrap_or_default(),
        }
    }
}

impl From<NvdRow> for NvdItem {
    fn from(row: NvdRow) -> Self {
        NvdItem {
            nvd_id: row.nvd_id,
            vuln_status: row.vuln_status,
            affected: row.affected.map(|j| j.0).unwrap_or_default(),
            metrics: row.metrics.map(|j| j.0).unwrap_or(Value::Null),
        }
    }
}

impl PgKnowledgeStore {
    /// Build a pool that opens connections on first use.
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(database_url)
            .context("invalid knowledge database URL")?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl PackageRegistry for PgKnowledgeStore {
    #[instrument(skip(self))]
    async fn released_versions(&self, name: &str) -> Result<Vec<String>> {
        let versions: Vec<String> = sqlx::query_scalar(VERSIONS_QUERY)
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to query versions of {name}"))?;
        debug!(count = versions.len(), "versions loaded");
        Ok(versions)
    }

    #[instrument(skip(self))]
    async fn declared_dependencies(&self, name: &str, version: &str) -> Result<DeclaredDependencies> {
        let row: Option<DeclaredRow> = sqlx::query_as(DECLARED_QUERY)
            .bind(name)
            .bind(version)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to query dependencies of {name}@{version}"))?;
        row.map(DeclaredDependencies::from)
            .with_context(|| format!("{name}@{version} not found in knowledge database"))
    }

    fn name(&self) -> &str {
        "knowledge"
    }
}

#[async_trait]
impl VulnerabilityStore for PgKnowledgeStore {
    #[instrument(skip(self))]
    async fn records_for_package(&self, name: &str) -> Result<Vec<NvdItem>> {
        let rows: Vec<NvdRow> = sqlx::query_as(NVD_QUERY)
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to query NVD records for {name}"))?;
        debug!(count = rows.len(), "NVD records loaded");
        Ok(rows.into_iter().map(NvdItem::from).collect())
    }

    fn name(&self) -> &str {
        "knowledge"
    }
}
