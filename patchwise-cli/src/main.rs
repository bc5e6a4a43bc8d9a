mod cli;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::Cli;
use patchwise::store::{
    create_registry, MemoryStore, PackageRegistry, PgKnowledgeStore, VulnerabilityStore,
};
use patchwise::{formatter, load_document, PatchOutput, Patcher, SbomDocument, VulnerabilityDocument};

/// Exit status when a document was produced but the analysis failed.
const EXIT_ANALYSIS_FAILED: u8 = 2;

const MAX_POOL_CONNECTIONS: usize = 64;

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::builder()
        .with_default_directive(cli.verbose.tracing_level_filter().into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

type Knowledge = (Arc<dyn PackageRegistry>, Arc<dyn VulnerabilityStore>);

fn open_knowledge(cli: &Cli) -> anyhow::Result<Knowledge> {
    if let Some(path) = &cli.knowledge_file {
        let store = Arc::new(MemoryStore::from_path(path)?);
        info!(path = %path.display(), "using knowledge snapshot");
        let registry: Arc<dyn PackageRegistry> = store.clone();
        let vulnerabilities: Arc<dyn VulnerabilityStore> = store;
        return Ok((registry, vulnerabilities));
    }
    let Some(url) = &cli.database_url else {
        bail!("a knowledge source is required: pass --database-url (or PATCHWISE_DATABASE_URL) or --knowledge-file");
    };
    let connections = cli.max_concurrency.clamp(1, MAX_POOL_CONNECTIONS) as u32;
    let store = Arc::new(PgKnowledgeStore::connect_lazy(url, connections)?);
    let registry: Arc<dyn PackageRegistry> = store.clone();
    let vulnerabilities: Arc<dyn VulnerabilityStore> = store;
    Ok((registry, vulnerabilities))
}

/// Cancel `token` on Ctrl-C or once `timeout` elapses.
fn cancel_on_interrupt(token: CancellationToken, timeout: Option<Duration>) {
    tokio::spawn(async move {
        let interrupted = async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        let deadline = async {
            match timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = interrupted => warn!("interrupted, cancelling resolution"),
            _ = deadline => warn!("timeout reached, cancelling resolution"),
        }
        token.cancel();
    });
}

fn write_output(cli: &Cli, output: &PatchOutput) -> anyhow::Result<()> {
    let fmt = formatter(cli.json);
    match &cli.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            fmt.write_results(output, &mut writer)?;
            writer.flush()?;
        }
        None => {
            let mut stdout = io::stdout().lock();
            fmt.write_results(output, &mut stdout)?;
        }
    }
    Ok(())
}

async fn run(cli: &Cli) -> anyhow::Result<PatchOutput> {
    let sbom: SbomDocument = load_document(&cli.sbom)?;
    let vulns: VulnerabilityDocument = load_document(&cli.vulns)?;

    let (knowledge_registry, store) = open_knowledge(cli)?;
    let registry = create_registry(&cli.registry, knowledge_registry, &cli.npm_registry_url)?;

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone(), cli.timeout.map(Duration::from_secs));

    let patcher = Patcher::builder()
        .registry(registry)
        .vulnerability_store(store)
        .max_concurrency(cli.max_concurrency)
        .preference(cli.prefer)
        .strict_evidence(cli.strict_evidence)
        .cancel_token(cancel)
        .build()?;

    let output = patcher.run(&sbom, &vulns).await;
    write_output(cli, &output)?;
    Ok(output)
}

#[tokio::main]
async fn main() -> ExitCode {
    // clap's own usage exit code collides with EXIT_ANALYSIS_FAILED.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_tracing(&cli);

    match run(&cli).await {
        Ok(output) if output.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(EXIT_ANALYSIS_FAILED),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
