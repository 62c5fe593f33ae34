//! Internal worker sub-mode: the body of every dispatcher-spawned child
//! process. Recognized ahead of clap parsing since its argv shape (a task
//! file path and a worker label) isn't a normal subcommand surface.

use std::path::Path;

use tracing::error;

use crate::config::{self, OcrBackendKind};
use crate::dispatcher::INTERNAL_WORKER_FLAG;
use crate::embedder::HttpEmbedder;
use crate::image_analysis::CloudImageAnalysisProvider;
use crate::keyword_extractor;
use crate::object_store::HttpObjectFetcher;
use crate::ocr::{CloudOcrProvider, OcrProvider, TesseractOcrProvider};
use crate::processor::{self, ProcessOutcome, ProcessorContext};
use crate::queue::DocumentTask;
use crate::repository::{build_worker_pool, DocumentRepository, RepairRepository};
use crate::tag_extractor::TagExtractor;

/// `true` if this process was invoked as an internal worker rather than
/// through the normal subcommand surface; checked before `Cli::parse()` so
/// the hidden flag never has to round-trip through clap.
pub fn is_worker_invocation() -> bool {
    std::env::args().nth(1).as_deref() == Some(INTERNAL_WORKER_FLAG)
}

/// Runs the worker body and returns the process exit code: 0 for a
/// successful/skipped document, 1 for anything that reached a `failure`
/// terminal log, 2 if the task file couldn't even be read (no log written
/// at all — the dispatcher's crash-exit handling covers this).
pub async fn run() -> i32 {
    let mut args = std::env::args().skip(2);
    let Some(task_path) = args.next() else {
        error!("internal worker invoked with no task file path");
        return 2;
    };
    let worker_label = args.next().unwrap_or_else(|| "worker-unknown".to_string());

    match run_task(Path::new(&task_path), &worker_label).await {
        Ok(ProcessOutcome::Failure(_)) => 1,
        Ok(_) => 0,
        Err(e) => {
            error!(error = %e, "worker failed before writing a terminal log");
            2
        }
    }
}

async fn run_task(task_path: &Path, worker_label: &str) -> crate::error::Result<ProcessOutcome> {
    let bytes = std::fs::read(task_path).map_err(crate::error::PipelineError::Io)?;
    let task: DocumentTask = serde_json::from_slice(&bytes)
        .map_err(|e| crate::error::PipelineError::Config(format!("invalid task file: {e}")))?;

    let settings = config::load_settings();

    let pool = build_worker_pool(&settings.vector_store.database_url, worker_label)?;
    let documents = DocumentRepository::new(&pool);
    let repair = RepairRepository::new(&pool);

    let object_fetcher = HttpObjectFetcher::new(
        settings.object_store.endpoint_uri.clone().unwrap_or_default(),
        settings.object_store.bucket_name.clone().unwrap_or_default(),
    );
    let embedder = HttpEmbedder::new(
        settings.embedding.endpoint_url.clone(),
        settings.vector_store.embedding_dimensions as usize,
    );
    let keyword_extractor = keyword_extractor::build(settings.keyword.algorithm, settings.keyword.extraction_workers);
    let tag_extractor = TagExtractor::new();

    let tesseract;
    let cloud;
    let ocr: Option<&dyn OcrProvider> = match settings.ocr_backend {
        OcrBackendKind::Tesseract => {
            tesseract = TesseractOcrProvider::detect();
            Some(&tesseract as &dyn OcrProvider)
        }
        OcrBackendKind::Cloud => {
            cloud = CloudOcrProvider::new(settings.ocr.cloud_endpoint.clone(), settings.ocr.cloud_api_key.clone());
            Some(&cloud as &dyn OcrProvider)
        }
    };

    let image_analysis_provider = CloudImageAnalysisProvider::new(
        settings.image_analysis.endpoint.clone(),
        settings.image_analysis.api_key.clone(),
    );
    let image_analysis: Option<&dyn crate::image_analysis::ImageAnalysisProvider> =
        if image_analysis_provider.is_available() {
            Some(&image_analysis_provider)
        } else {
            None
        };

    let ctx = ProcessorContext {
        object_fetcher: &object_fetcher,
        embedder: &embedder,
        ocr,
        image_analysis,
        keyword_extractor: keyword_extractor.as_ref(),
        tag_extractor: &tag_extractor,
        documents: &documents,
        repair: &repair,
        chunk_options: crate::chunker::ChunkOptions {
            chunk_size: settings.chunk.chunk_size,
            chunk_overlap: settings.chunk.chunk_overlap,
        },
        page_cap: settings.dispatcher.page_cap,
        render_dpi: settings.ocr.render_dpi,
        worker_id: worker_label.to_string(),
    };

    processor::process_document(&task, &ctx).await
}
