//! Cloud document-intelligence OCR backend: submit-then-poll, with backoff
//! that widens on each poll and backs off further on HTTP 429 (honoring
//! `Retry-After` when the service sends one), and categorized rejections
//! for the status codes that mean "don't bother retrying this document."

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::ocr::OcrProvider;

const MAX_POLLS: u32 = 120;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Status codes the service uses to mean "this request is malformed or
/// unauthorized, retrying it won't help" rather than "try again later."
fn rejection_category(status: reqwest::StatusCode) -> Option<&'static str> {
    match status.as_u16() {
        400 => Some("bad_request"),
        401 => Some("unauthorized"),
        403 => Some("forbidden"),
        413 => Some("payload_too_large"),
        _ => None,
    }
}

fn status_error(status: reqwest::StatusCode, phase: &str) -> PipelineError {
    match rejection_category(status) {
        Some(category) => PipelineError::OcrRejected {
            category,
            detail: format!("OCR {phase} returned {status}"),
        },
        None => PipelineError::Config(format!("OCR {phase} returned status {status}")),
    }
}

/// Parses a `Retry-After` header value, which is either a number of seconds
/// or an HTTP-date; this service only ever sends the former, so an
/// unparseable value is treated as absent rather than failed on.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Applies +/-30% jitter to a backoff interval so many pages backing off at
/// once don't all retry in lockstep.
fn jittered(interval: Duration) -> Duration {
    let factor = rand::Rng::gen_range(&mut rand::thread_rng(), 0.7..=1.3);
    Duration::from_secs_f64((interval.as_secs_f64() * factor).max(0.1))
}

pub struct CloudOcrProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl CloudOcrProvider {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("reqwest client builds with static config"),
            endpoint,
            api_key,
        }
    }

    async fn submit(&self, image_bytes: &[u8]) -> Result<String> {
        let mut req = self
            .client
            .post(format!("{}/analyze", self.endpoint.trim_end_matches('/')))
            .header("content-type", "application/octet-stream")
            .body(image_bytes.to_vec());
        if let Some(key) = &self.api_key {
            req = req.header("authorization", format!("Bearer {key}"));
        }
        let resp = req
            .send()
            .await
            .map_err(|e| PipelineError::Config(format!("OCR submit failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(status_error(resp.status(), "submit"));
        }
        let location = resp
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| PipelineError::Config("OCR submit missing operation-location".into()))?;
        Ok(location)
    }

    async fn poll_once(&self, operation_url: &str) -> Result<PollOutcome> {
        let mut req = self.client.get(operation_url);
        if let Some(key) = &self.api_key {
            req = req.header("authorization", format!("Bearer {key}"));
        }
        let resp = req
            .send()
            .await
            .map_err(|e| PipelineError::Config(format!("OCR poll failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Ok(PollOutcome::RateLimited(parse_retry_after(resp.headers())));
        }
        if !resp.status().is_success() {
            return Err(status_error(resp.status(), "poll"));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| PipelineError::Config(format!("OCR poll body malformed: {e}")))?;

        match body.get("status").and_then(|s| s.as_str()) {
            Some("succeeded") => {
                let text = body
                    .get("analyzeResult")
                    .and_then(|r| r.get("content"))
                    .and_then(|c| c.as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(PollOutcome::Done(text))
            }
            Some("failed") => Err(PipelineError::Config("OCR analysis failed".into())),
            _ => Ok(PollOutcome::Pending),
        }
    }
}

enum PollOutcome {
    Pending,
    RateLimited(Option<Duration>),
    Done(String),
}

#[async_trait]
impl OcrProvider for CloudOcrProvider {
    fn is_available(&self) -> bool {
        !self.endpoint.is_empty()
    }

    async fn extract_page_text(&self, image_bytes: &[u8]) -> Result<String> {
        let operation_url = self.submit(image_bytes).await?;

        // Poll cadence widens 3s -> 5s -> 10s, then holds at 10s, doubling
        // further (capped at 30s, jittered) whenever the service answers
        // 429 and gives no `Retry-After` of its own to honor instead.
        let mut interval = Duration::from_secs(3);
        for attempt in 0..MAX_POLLS {
            tokio::time::sleep(interval).await;
            match self.poll_once(&operation_url).await? {
                PollOutcome::Done(text) => return Ok(text),
                PollOutcome::RateLimited(retry_after) => {
                    interval = match retry_after {
                        Some(d) => d.min(MAX_BACKOFF),
                        None => jittered((interval * 2).min(MAX_BACKOFF)),
                    };
                    warn!(attempt, backoff_secs = interval.as_secs_f64(), "OCR poll rate limited, backing off");
                }
                PollOutcome::Pending => {
                    debug!(attempt, "OCR analysis still pending");
                    interval = match interval.as_secs() {
                        3 => Duration::from_secs(5),
                        5 => Duration::from_secs(10),
                        _ => interval,
                    };
                }
            }
        }
        Err(PipelineError::Config(format!(
            "OCR analysis did not complete within {MAX_POLLS} polls"
        )))
    }
}
