//! foia-embed - document ingestion and embedding pipeline binary.
//!
//! Sweeps a catalog of projects and documents into a vector-searchable
//! Postgres/pgvector store, dispatching one OS worker process per document.

use foia_embedder::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let default_filter = if cli::is_verbose() {
        "foia_embedder=info"
    } else {
        "foia_embedder=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli::worker::is_worker_invocation() {
        let code = cli::worker::run().await;
        std::process::exit(code);
    }

    cli::run().await
}
