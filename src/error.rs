//! Crate-wide error types.

use thiserror::Error;

/// Errors that can surface from the pipeline's non-worker-boundary code
/// (queue building, repair analysis, dispatcher setup). Worker-boundary
/// errors are instead captured as a `FailureReason`/`SkipReason` pair and
/// written into a `ProcessingLog` row rather than propagated as a Rust
/// error — see `crate::processor`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("database pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("catalog request failed: {0}")]
    Catalog(String),

    #[error("object fetch failed: {0}")]
    Fetch(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("reset mode requires exactly one --project-id")]
    ResetRequiresSingleProject,

    #[error("--repair cannot be combined with --retry-failed or --retry-skipped")]
    RepairExcludesRetry,

    #[error("--timed must be a positive number of minutes")]
    InvalidTimeLimit,

    #[error("worker process could not be spawned: {0}")]
    WorkerSpawn(std::io::Error),

    #[error("worker pool is broken: fewer than 2 healthy workers remain")]
    PoolBroken,

    #[error("OCR request rejected ({category}): {detail}")]
    OcrRejected { category: &'static str, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a document's terminal status is `skipped`.
///
/// Skipped documents are never retried by a normal run; they require
/// `--retry-skipped` to be requeued.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SkipReason {
    LegacyDocFormatNotSupported,
    ExcelFilesNotSupported,
    PowerpointFilesNotSupported,
    UnsupportedFileType(String),
    UnknownFileType(String),
    NoFileExtension,
    ScannedOrImagePdf,
    NoReadableText,
    PageCapExceeded,
    ImageTooSmall,
}

impl SkipReason {
    /// The stable string written into `metrics.skip_reason`.
    pub fn code(&self) -> String {
        match self {
            SkipReason::LegacyDocFormatNotSupported => "legacy_doc_format_not_supported".into(),
            SkipReason::ExcelFilesNotSupported => "excel_files_not_supported".into(),
            SkipReason::PowerpointFilesNotSupported => "powerpoint_files_not_supported".into(),
            SkipReason::UnsupportedFileType(ext) => format!("unsupported_file_type_{ext}"),
            SkipReason::UnknownFileType(ext) => format!("unknown_file_type_{ext}"),
            SkipReason::NoFileExtension => "no_file_extension".into(),
            SkipReason::ScannedOrImagePdf => "scanned_or_image_pdf".into(),
            SkipReason::NoReadableText => "no_readable_text".into(),
            SkipReason::PageCapExceeded => "page_cap_exceeded".into(),
            SkipReason::ImageTooSmall => "image_too_small".into(),
        }
    }
}

/// Why a document's terminal status is `failure`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureReason {
    PrecheckFailed(String),
    FetchFailed(String),
    OcrFailed(String),
    PersistenceFailed(String),
    WorkerCrashed,
    Phantom,
    Other(String),
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::PrecheckFailed(_) => "precheck_failed",
            FailureReason::FetchFailed(_) => "fetch_failed",
            FailureReason::OcrFailed(_) => "ocr_failed",
            FailureReason::PersistenceFailed(_) => "persistence_failed",
            FailureReason::WorkerCrashed => "worker_crashed",
            FailureReason::Phantom => "phantom_worker",
            FailureReason::Other(_) => "error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            FailureReason::PrecheckFailed(m)
            | FailureReason::FetchFailed(m)
            | FailureReason::OcrFailed(m)
            | FailureReason::PersistenceFailed(m)
            | FailureReason::Other(m) => m.clone(),
            FailureReason::WorkerCrashed => "worker process exited abnormally".into(),
            FailureReason::Phantom => "worker exceeded the phantom-detection threshold".into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
