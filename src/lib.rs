pub mod audit;
pub mod cli;
pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod taxonomy;
pub mod worker;

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, GlobalArgs};
use crate::db::SqliteStore;
use crate::pipeline::chunk::PipelineOptions;
use crate::pipeline::lexicon::{LexiconMatcher, LexiconRefresher};
use crate::pipeline::llm::ChatCompletionsClient;
use crate::taxonomy::Taxonomy;
use crate::worker::{Worker, WorkerSettings};

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(path: &Path) -> Result<SqliteStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }
    SqliteStore::open(path).with_context(|| format!("failed to open database {}", path.display()))
}

fn load_taxonomy(global: &GlobalArgs) -> Result<Taxonomy> {
    match &global.taxonomy {
        Some(path) => Taxonomy::load(path).context("failed to load taxonomy"),
        None => Taxonomy::bundled().context("bundled taxonomy is invalid"),
    }
}

fn settings(global: &GlobalArgs) -> WorkerSettings {
    WorkerSettings {
        poll_interval: Duration::from_secs(global.poll_interval_secs.max(1)),
        stale_claim_after: Duration::from_secs(global.stale_claim_secs),
        options: PipelineOptions {
            high_recall: global.high_recall,
            deterministic: global.deterministic,
        },
    }
}

/// Dispatch one CLI invocation.
pub fn run(cli: Cli) -> Result<()> {
    let global = &cli.global;
    let db_path = global.db.clone().unwrap_or_else(config::default_db_path);

    tracing::info!(
        "{} v{} using {}",
        config::APP_NAME,
        config::APP_VERSION,
        db_path.display()
    );

    let store = open_store(&db_path)?;
    if let Commands::Migrate = cli.command {
        let tables = db::count_tables(store.conn())?;
        tracing::info!(tables, "Schema is current");
        return Ok(());
    }

    let taxonomy = load_taxonomy(global)?;
    let llm = ChatCompletionsClient::new(
        &global.llm_base_url,
        global.llm_api_key.clone(),
        Duration::from_secs(global.judge_timeout_secs),
    )
    .context("failed to build LLM client")?;

    let lexicon = Arc::new(LexiconMatcher::new());
    if let Err(e) = lexicon.refresh(&store) {
        tracing::warn!(error = %e, "Initial lexicon load failed, starting with no terms");
    }

    let worker = Worker::new(&store, &store, &llm, &taxonomy, &lexicon, settings(global));

    match &cli.command {
        Commands::Run(args) => {
            let outcome = worker
                .run_once(&args.job_id)
                .with_context(|| format!("job {} did not run to completion", args.job_id))?;
            tracing::info!(job_id = %args.job_id, ?outcome, "Run finished");
        }
        Commands::Serve => {
            let _refresher = LexiconRefresher::start(
                lexicon.clone(),
                db_path.clone(),
                Duration::from_secs(global.lexicon_refresh_secs.max(1)),
            );
            let shutdown = AtomicBool::new(false);
            worker.run_forever(&shutdown);
        }
        Commands::Migrate => {}
    }
    Ok(())
}
