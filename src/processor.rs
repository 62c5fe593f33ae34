//! Document Processor (C11): the worker-process entry point combining the
//! object fetcher, pre-filter, validator/OCR gateway, text extractor,
//! chunker, embedder, and tag/keyword extractors into one per-document run,
//! terminating in exactly one `ProcessingLog` row.
//!
//! Every exit path here writes a terminal log before returning — the only
//! way this function propagates an error upward is if writing that very log
//! fails (a true database outage), which the dispatcher treats the same way
//! it treats a crashed worker process.

use std::io::Write;

use serde_json::{json, Value as Json};
use tracing::info;
use uuid::Uuid;

use crate::chunker::{self, ChunkOptions};
use crate::embedder::Embedder;
use crate::error::{FailureReason, PipelineError, Result, SkipReason};
use crate::extractor;
use crate::file_filter::{self, FilterOutcome};
use crate::image_analysis::ImageAnalysisProvider;
use crate::keyword_extractor::KeywordExtractor;
use crate::models::{LogStatus, NewDocument};
use crate::object_store::ObjectFetcher;
use crate::ocr::OcrProvider;
use crate::queue::DocumentTask;
use crate::repository::pool::retry_transient;
use crate::repository::{DocumentRepository, RepairRepository};
use crate::tag_extractor::TagExtractor;
use crate::text_extractor;
use crate::validator::{self, OcrMetrics, ValidationOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Success,
    Skipped(SkipReason),
    Failure(FailureReason),
}

/// Everything a single worker process needs to run the pipeline for one
/// document. Built once per worker and reused across however many
/// documents that worker is handed (normally one, under the OS-process
/// model — see `crate::dispatcher`).
pub struct ProcessorContext<'a> {
    pub object_fetcher: &'a dyn ObjectFetcher,
    pub embedder: &'a dyn Embedder,
    pub ocr: Option<&'a dyn OcrProvider>,
    pub image_analysis: Option<&'a dyn ImageAnalysisProvider>,
    pub keyword_extractor: &'a dyn KeywordExtractor,
    pub tag_extractor: &'a TagExtractor,
    pub documents: &'a DocumentRepository<'a>,
    pub repair: &'a RepairRepository<'a>,
    pub chunk_options: ChunkOptions,
    pub page_cap: Option<u32>,
    pub render_dpi: u32,
    pub worker_id: String,
}

fn skip_metrics(reason: &SkipReason) -> Json {
    json!({ "skip_reason": reason.code() })
}

fn failure_metrics(reason: &FailureReason) -> Json {
    json!({ "failure_code": reason.code(), "error": reason.message() })
}

fn terminal(
    ctx: &ProcessorContext<'_>,
    task: &DocumentTask,
    status: LogStatus,
    metrics: Json,
) -> Result<()> {
    ctx.documents
        .save_terminal_log(task.project_id, &task.document.external_id, status, &ctx.worker_id, metrics)
}

/// Dispatch extraction/validation by file extension, producing a
/// `ValidationOutcome` uniformly — parse/decode failures become
/// `Failure(PrecheckFailed)` rather than a propagated error, so the caller
/// has exactly one branch point for "what page sequence, if any, did we
/// get".
async fn validate_by_extension(
    extension: &str,
    bytes: &[u8],
    temp_path: &std::path::Path,
    ocr: Option<&dyn OcrProvider>,
    image_analysis: Option<&dyn ImageAnalysisProvider>,
    render_dpi: u32,
) -> (ValidationOutcome, OcrMetrics) {
    match extension {
        "pdf" => {
            let (native_pages, metadata) = match extractor::extract_pdf_native(bytes) {
                Ok(v) => v,
                Err(e) => {
                    return (
                        ValidationOutcome::Failure(FailureReason::PrecheckFailed(e.to_string())),
                        OcrMetrics::default(),
                    )
                }
            };
            if native_pages.is_empty() {
                return (
                    ValidationOutcome::Failure(FailureReason::PrecheckFailed("PDF has no pages".into())),
                    OcrMetrics::default(),
                );
            }
            let temp_path = temp_path.to_path_buf();
            validator::validate_pdf(&metadata, native_pages, ocr, move |page_number| {
                extractor::render_pdf_page_to_png(&temp_path, page_number, render_dpi)
            })
            .await
        }
        "jpg" | "jpeg" | "png" | "bmp" | "tiff" | "tif" | "gif" => {
            let Some((width, height)) = extractor::image_dimensions(bytes) else {
                return (
                    ValidationOutcome::Failure(FailureReason::PrecheckFailed(
                        "image could not be decoded".into(),
                    )),
                    OcrMetrics::default(),
                );
            };
            validator::validate_image(width, height, bytes, ocr, image_analysis).await
        }
        "docx" => match extractor::extract_docx(bytes) {
            Ok(pages) => (ValidationOutcome::Proceed(pages), OcrMetrics::default()),
            Err(e) => (
                ValidationOutcome::Failure(FailureReason::PrecheckFailed(e.to_string())),
                OcrMetrics::default(),
            ),
        },
        "rtf" => {
            let text = String::from_utf8_lossy(bytes).to_string();
            (
                ValidationOutcome::Proceed(extractor::extract_plain_text(&text, true)),
                OcrMetrics::default(),
            )
        }
        _ => {
            let text = String::from_utf8_lossy(bytes).to_string();
            (
                ValidationOutcome::Proceed(extractor::extract_plain_text(&text, false)),
                OcrMetrics::default(),
            )
        }
    }
}

pub async fn process_document(task: &DocumentTask, ctx: &ProcessorContext<'_>) -> Result<ProcessOutcome> {
    info!(document_id = %task.document.external_id, file_name = %task.document.file_name, "processing document");

    if let FilterOutcome::Skip(reason) = file_filter::classify(&task.document.file_name) {
        terminal(ctx, task, LogStatus::Skipped, skip_metrics(&reason))?;
        return Ok(ProcessOutcome::Skipped(reason));
    }

    if task.is_retry {
        ctx.repair
            .cleanup_document_content_for_retry(task.project_id, &task.document.external_id)?;
    }

    let bytes = match ctx.object_fetcher.fetch(&task.document.object_key).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let reason = FailureReason::FetchFailed(e.to_string());
            terminal(ctx, task, LogStatus::Failure, failure_metrics(&reason))?;
            return Ok(ProcessOutcome::Failure(reason));
        }
    };

    let extension = file_filter::extension_of(&task.document.file_name).unwrap_or_default();

    // Written once per document and dropped (hence deleted) on every return
    // path below — RAII stands in for the "delete on all exit paths" rule.
    let mut temp_file = tempfile::Builder::new()
        .suffix(&format!(".{extension}"))
        .tempfile()
        .map_err(PipelineError::Io)?;
    temp_file.write_all(&bytes).map_err(PipelineError::Io)?;
    let temp_path = temp_file.path().to_path_buf();

    let (outcome, ocr_metrics) = validate_by_extension(
        &extension,
        &bytes,
        &temp_path,
        ctx.ocr,
        ctx.image_analysis,
        ctx.render_dpi,
    )
    .await;

    let pages = match outcome {
        ValidationOutcome::Proceed(pages) => pages,
        ValidationOutcome::Skip(reason) => {
            terminal(ctx, task, LogStatus::Skipped, skip_metrics(&reason))?;
            return Ok(ProcessOutcome::Skipped(reason));
        }
        ValidationOutcome::Failure(reason) => {
            terminal(ctx, task, LogStatus::Failure, failure_metrics(&reason))?;
            return Ok(ProcessOutcome::Failure(reason));
        }
    };

    if let Some(cap) = ctx.page_cap {
        if pages.len() as u32 > cap {
            let reason = SkipReason::PageCapExceeded;
            terminal(ctx, task, LogStatus::Skipped, skip_metrics(&reason))?;
            return Ok(ProcessOutcome::Skipped(reason));
        }
    }

    let markdown_pages = text_extractor::to_markdown_pages(&pages);
    let mut chunks = chunker::chunk_pages(&markdown_pages, ctx.chunk_options);
    if chunks.is_empty() {
        let reason = SkipReason::NoReadableText;
        terminal(ctx, task, LogStatus::Skipped, skip_metrics(&reason))?;
        return Ok(ProcessOutcome::Skipped(reason));
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let embeddings = match ctx.embedder.embed_batch(&texts).await {
        Ok(v) => v,
        Err(e) => {
            let reason = FailureReason::Other(format!("chunk embedding failed: {e}"));
            terminal(ctx, task, LogStatus::Failure, failure_metrics(&reason))?;
            return Ok(ProcessOutcome::Failure(reason));
        }
    };
    for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
        chunk.embedding = embedding;
    }

    let document_keywords = match ctx.keyword_extractor.extract(&mut chunks).await {
        Ok(v) => v,
        Err(e) => {
            let reason = FailureReason::Other(format!("keyword extraction failed: {e}"));
            terminal(ctx, task, LogStatus::Failure, failure_metrics(&reason))?;
            return Ok(ProcessOutcome::Failure(reason));
        }
    };

    let document_tags = match ctx.tag_extractor.tag_document(ctx.embedder, &mut chunks).await {
        Ok(v) => v,
        Err(e) => {
            let reason = FailureReason::Other(format!("tag extraction failed: {e}"));
            terminal(ctx, task, LogStatus::Failure, failure_metrics(&reason))?;
            return Ok(ProcessOutcome::Failure(reason));
        }
    };

    let mut headings: Vec<String> = chunks.iter().filter_map(|c| c.heading_path.clone()).collect();
    headings.sort();
    headings.dedup();

    let mut document_text_parts: Vec<&str> = Vec::new();
    document_text_parts.extend(document_tags.iter().map(String::as_str));
    document_text_parts.extend(document_keywords.iter().map(String::as_str));
    document_text_parts.extend(headings.iter().map(String::as_str));
    if let Some(t) = task.document.document_type_id.as_deref() {
        document_text_parts.push(t);
    }
    if let Some(p) = task.document.proponent_name.as_deref() {
        document_text_parts.push(p);
    }
    let document_text = document_text_parts.join(" ");
    let document_embedding = match ctx.embedder.embed_one(&document_text).await {
        Ok(v) => v,
        Err(e) => {
            let reason = FailureReason::Other(format!("document embedding failed: {e}"));
            terminal(ctx, task, LogStatus::Failure, failure_metrics(&reason))?;
            return Ok(ProcessOutcome::Failure(reason));
        }
    };

    let base_metadata = task.document.base_metadata();
    for chunk in chunks.iter_mut() {
        chunk.finalize_metadata(&task.document.object_key, &base_metadata);
    }

    let mut document_metadata = base_metadata.clone();
    if let Json::Object(map) = &mut document_metadata {
        map.insert("s3_key".into(), Json::String(task.document.object_key.clone()));
        map.insert(
            "ocr_processing".into(),
            serde_json::to_value(&ocr_metrics).unwrap_or(Json::Null),
        );
    }

    let new_document = NewDocument {
        id: Uuid::new_v4(),
        project_id: task.project_id,
        external_id: task.document.external_id.clone(),
        file_name: task.document.file_name.clone(),
        file_extension: extension,
        object_key: task.document.object_key.clone(),
        tags: document_tags,
        keywords: document_keywords,
        headings,
        embedding: Some(pgvector::Vector::from(document_embedding)),
        metadata: document_metadata,
    };

    let success_metrics = json!({
        "page_count": pages.len(),
        "chunk_count": chunks.len(),
        "byte_size": bytes.len(),
        "ocr_processing": ocr_metrics,
    });

    let worker_id = ctx.worker_id.clone();
    let persist_result = retry_transient(|| {
        let new_document = new_document.clone();
        let chunks = chunks.clone();
        let metrics = success_metrics.clone();
        let worker_id = worker_id.clone();
        async move { ctx.documents.save_success(new_document, chunks, &worker_id, metrics) }
    })
    .await;

    match persist_result {
        Ok(()) => Ok(ProcessOutcome::Success),
        Err(e) => {
            let reason = FailureReason::PersistenceFailed(e.to_string());
            terminal(ctx, task, LogStatus::Failure, failure_metrics(&reason))?;
            Ok(ProcessOutcome::Failure(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_text_extension_proceeds_verbatim() {
        let (outcome, _) = validate_by_extension(
            "txt",
            b"hello world",
            std::path::Path::new("/nonexistent"),
            None,
            None,
            150,
        )
        .await;
        assert!(matches!(outcome, ValidationOutcome::Proceed(pages) if pages[0].text == "hello world"));
    }

    #[tokio::test]
    async fn rtf_extension_strips_control_words() {
        let (outcome, _) = validate_by_extension(
            "rtf",
            br#"{\rtf1 hello}"#,
            std::path::Path::new("/nonexistent"),
            None,
            None,
            150,
        )
        .await;
        assert!(matches!(outcome, ValidationOutcome::Proceed(pages) if pages[0].text.contains("hello")));
    }

    #[tokio::test]
    async fn garbage_pdf_bytes_become_precheck_failure() {
        let (outcome, _) =
            validate_by_extension("pdf", b"not a real pdf", std::path::Path::new("/nonexistent"), None, None, 150)
                .await;
        assert!(matches!(
            outcome,
            ValidationOutcome::Failure(FailureReason::PrecheckFailed(_))
        ));
    }

    #[tokio::test]
    async fn garbage_docx_bytes_become_precheck_failure() {
        let (outcome, _) = validate_by_extension(
            "docx",
            b"not a real docx",
            std::path::Path::new("/nonexistent"),
            None,
            None,
            150,
        )
        .await;
        assert!(matches!(
            outcome,
            ValidationOutcome::Failure(FailureReason::PrecheckFailed(_))
        ));
    }

    #[test]
    fn page_cap_reason_is_skip_not_failure() {
        let reason = SkipReason::PageCapExceeded;
        assert_eq!(skip_metrics(&reason)["skip_reason"], "page_cap_exceeded");
    }

    #[test]
    fn fetch_failure_metrics_carry_message() {
        let reason = FailureReason::FetchFailed("timeout".into());
        let metrics = failure_metrics(&reason);
        assert_eq!(metrics["failure_code"], "fetch_failed");
        assert!(metrics["error"].as_str().unwrap().contains("timeout"));
    }
}
