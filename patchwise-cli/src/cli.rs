use std::path::PathBuf;

use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use patchwise::store::DEFAULT_NPM_REGISTRY_URL;
use patchwise::{VersionPreference, DEFAULT_MAX_CONCURRENCY};

/// Recommend upgrades for vulnerable npm dependencies
#[derive(Parser)]
#[command(name = "patchwise", version)]
pub struct Cli {
    /// Dependency graph document produced by the SBOM stage
    #[arg(long)]
    pub sbom: PathBuf,

    /// Vulnerability-match document produced by the vulnerability finder
    #[arg(long)]
    pub vulns: PathBuf,

    /// PostgreSQL URL of the knowledge database
    #[arg(long, env = "PATCHWISE_DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Offline knowledge snapshot (JSON) used instead of the database
    #[arg(long, conflicts_with = "database_url")]
    pub knowledge_file: Option<PathBuf>,

    /// Source of package versions and manifests: knowledge, npm
    #[arg(long, default_value = "knowledge")]
    pub registry: String,

    /// Base URL of the npm registry used with `--registry npm`
    #[arg(long, env = "PATCHWISE_NPM_REGISTRY_URL", default_value = DEFAULT_NPM_REGISTRY_URL)]
    pub npm_registry_url: String,

    /// Maximum simultaneous vulnerability lookups while scoring a candidate
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENCY)]
    pub max_concurrency: usize,

    /// Which clean upgrade to recommend: first-clean, newest
    #[arg(long, default_value_t = VersionPreference::FirstClean)]
    pub prefer: VersionPreference,

    /// Fail the run when a vulnerability gives no way to derive a fixed version
    #[arg(long)]
    pub strict_evidence: bool,

    /// Abort resolution after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    pub log_json: bool,

    /// Write results to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,
}
