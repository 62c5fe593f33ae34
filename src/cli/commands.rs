//! CLI commands implementation.

use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::{self, Settings};
use crate::dispatcher::Dispatcher;
use crate::error::PipelineError;
use crate::queue::{QueueBuilder, RunMode};
use crate::repository::{build_control_pool, build_repair_pool, init, DocumentRepository, RepairRepository};

#[derive(Parser)]
#[command(name = "foia-embed")]
#[command(about = "Document ingestion and embedding pipeline")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep the catalog and process queued documents
    Run {
        /// Restrict the run to one or more catalog project ids (all projects if omitted)
        #[arg(long = "project-id")]
        project_id: Vec<String>,

        /// Re-queue documents whose most recent log is `failure`
        #[arg(long)]
        retry_failed: bool,

        /// Re-queue documents whose most recent log is `skipped`
        #[arg(long)]
        retry_skipped: bool,

        /// Re-queue documents identified as repair candidates instead of a normal sweep
        #[arg(long)]
        repair: bool,

        /// Stop dispatching new work after this many minutes and drain in-flight workers
        #[arg(long)]
        timed: Option<u64>,

        /// Skip HNSW index creation at startup
        #[arg(long)]
        skip_hnsw_indexes: bool,

        /// Skip documents whose page count exceeds this cap
        #[arg(long)]
        page_cap: Option<u32>,
    },

    /// Wipe a project's documents/chunks/logs and reprocess it from scratch
    Reset {
        #[arg(long = "project-id")]
        project_id: String,
    },

    /// Print the repair-candidate classification without mutating anything
    RepairReport {
        /// Restrict the report to one or more catalog project ids (all projects if omitted)
        #[arg(long = "project-id")]
        project_id: Vec<String>,
    },
}

/// Checked before `Cli::parse()` so `-v`/`--verbose` can pick a default log
/// filter before `tracing-subscriber` is installed.
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = config::load_settings();

    match cli.command {
        Commands::Run {
            project_id,
            retry_failed,
            retry_skipped,
            repair,
            timed,
            skip_hnsw_indexes,
            page_cap,
        } => {
            cmd_run(
                settings,
                project_id,
                retry_failed,
                retry_skipped,
                repair,
                timed,
                skip_hnsw_indexes,
                page_cap,
            )
            .await
        }
        Commands::Reset { project_id } => cmd_reset(settings, project_id).await,
        Commands::RepairReport { project_id } => cmd_repair_report(settings, project_id).await,
    }
}

fn catalog_client(settings: &Settings) -> crate::catalog::HttpCatalogClient {
    crate::catalog::HttpCatalogClient::new(settings.catalog.base_url.clone(), settings.catalog.project_page_size)
}

#[allow(clippy::too_many_arguments)]
async fn cmd_run(
    mut settings: Settings,
    project_id: Vec<String>,
    retry_failed: bool,
    retry_skipped: bool,
    repair: bool,
    timed: Option<u64>,
    skip_hnsw_indexes: bool,
    page_cap: Option<u32>,
) -> anyhow::Result<()> {
    let mode = RunMode::from_flags(repair, retry_failed, retry_skipped, false)?;
    if let Some(minutes) = timed {
        if minutes == 0 {
            return Err(PipelineError::InvalidTimeLimit.into());
        }
    }

    if skip_hnsw_indexes {
        settings.vector_store.skip_hnsw_indexes = true;
    }
    if let Some(cap) = page_cap {
        settings.dispatcher.page_cap = Some(cap);
        // Worker children reconstruct `Settings` from the environment, not
        // from argv, so the override has to be inherited this way.
        std::env::set_var("PAGE_CAP", cap.to_string());
    }

    let control_pool = build_control_pool(&settings.vector_store.database_url)?;
    init::init_database(&control_pool, &settings.vector_store)?;

    let catalog = catalog_client(&settings);
    let documents = DocumentRepository::new(&control_pool);
    let repair_pool = build_repair_pool(&settings.vector_store.database_url)?;
    let repair_repo = RepairRepository::new(&repair_pool);

    let project_filter = if project_id.is_empty() { None } else { Some(project_id.as_slice()) };
    let builder = QueueBuilder::new(&catalog, &documents, &repair_repo);
    let tasks = builder.build(mode, project_filter).await?;

    if tasks.is_empty() {
        info!("queue is empty, nothing to do");
        return Ok(());
    }

    let dispatcher = Dispatcher::new(
        &documents,
        settings.dispatcher.files_concurrency_size,
        settings.dispatcher.phantom_threshold_hours,
    )?;
    let time_limit = timed.map(|minutes| Duration::from_secs(minutes * 60));
    let outcome = dispatcher.run(tasks, time_limit).await?;

    info!(
        documents_processed = outcome.documents_processed,
        time_limit_reached = outcome.time_limit_reached,
        process_pool_broken = outcome.process_pool_broken,
        "run complete"
    );

    if outcome.process_pool_broken {
        anyhow::bail!("worker pool broke down before the queue was drained");
    }
    Ok(())
}

async fn cmd_reset(settings: Settings, project_id: String) -> anyhow::Result<()> {
    let control_pool = build_control_pool(&settings.vector_store.database_url)?;
    init::init_database(&control_pool, &settings.vector_store)?;

    let catalog = catalog_client(&settings);
    let documents = DocumentRepository::new(&control_pool);
    let repair_pool = build_repair_pool(&settings.vector_store.database_url)?;
    let repair_repo = RepairRepository::new(&repair_pool);

    let builder = QueueBuilder::new(&catalog, &documents, &repair_repo);
    let tasks = builder.build(RunMode::Reset, Some(std::slice::from_ref(&project_id))).await?;

    if tasks.is_empty() {
        info!("no documents to reprocess for this project");
        return Ok(());
    }

    let dispatcher = Dispatcher::new(
        &documents,
        settings.dispatcher.files_concurrency_size,
        settings.dispatcher.phantom_threshold_hours,
    )?;
    let outcome = dispatcher.run(tasks, None).await?;
    info!(documents_processed = outcome.documents_processed, "reset run complete");
    Ok(())
}

async fn cmd_repair_report(settings: Settings, project_id: Vec<String>) -> anyhow::Result<()> {
    let control_pool = build_control_pool(&settings.vector_store.database_url)?;
    let documents = DocumentRepository::new(&control_pool);
    let repair_repo = RepairRepository::new(&control_pool);

    // Read-only: project ids are resolved against rows already persisted by
    // a prior run, never upserted from the catalog, so this command never
    // writes anything.
    let mut project_uuids = Vec::new();
    for external_id in &project_id {
        match documents.find_project_by_external_id(external_id)? {
            Some(project) => project_uuids.push(project.id),
            None => info!(project_id = %external_id, "no such project on record, skipping"),
        }
    }

    let filter = if project_id.is_empty() { None } else { Some(project_uuids.as_slice()) };
    let candidates = repair_repo.find_repair_candidates(filter)?;

    if candidates.is_empty() {
        println!("no repair candidates found");
        return Ok(());
    }

    let mut by_category: std::collections::HashMap<&'static str, usize> = std::collections::HashMap::new();
    for candidate in &candidates {
        *by_category.entry(candidate.category.as_str()).or_default() += 1;
        println!("{}\t{}\t{}", candidate.project_id, candidate.document_id, candidate.category.as_str());
    }
    println!("---");
    for (category, count) in by_category {
        println!("{category}: {count}");
    }
    Ok(())
}
