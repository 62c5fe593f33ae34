//! Image-analysis provider (optional fallback used by the Validator & OCR
//! Gateway's image branch, §4.5): when OCR fails on an image, and one of
//! these is configured, it produces a short description plus tags and
//! keywords, which become a single synthetic page's text so the rest of the
//! pipeline (chunker, tag/keyword extractors) never has to know the content
//! didn't come from OCR.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Default)]
pub struct ImageAnalysis {
    pub description: String,
    pub tags: Vec<String>,
    pub keywords: Vec<String>,
}

impl ImageAnalysis {
    /// Flattens description/tags/keywords into the text of a synthetic
    /// page. Downstream chunking/tagging treats it like any other page;
    /// nothing special is threaded through for "this page came from image
    /// analysis" beyond what `metrics.ocr_processing` records.
    pub fn as_synthetic_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if !self.description.is_empty() {
            parts.push(&self.description);
        }
        parts.extend(self.tags.iter().map(String::as_str));
        parts.extend(self.keywords.iter().map(String::as_str));
        parts.join(" ")
    }
}

#[async_trait]
pub trait ImageAnalysisProvider: Send + Sync {
    fn is_available(&self) -> bool;
    async fn analyze(&self, image_bytes: &[u8]) -> Result<ImageAnalysis>;
}

#[derive(Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    keywords: Vec<String>,
}

/// HTTP-backed image-analysis provider, one-shot POST/response (unlike the
/// cloud OCR backend, there is no operation to poll — a vision-captioning
/// endpoint answers synchronously).
pub struct CloudImageAnalysisProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl CloudImageAnalysisProvider {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("reqwest client builds with static config"),
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl ImageAnalysisProvider for CloudImageAnalysisProvider {
    fn is_available(&self) -> bool {
        !self.endpoint.is_empty()
    }

    async fn analyze(&self, image_bytes: &[u8]) -> Result<ImageAnalysis> {
        let mut req = self
            .client
            .post(format!("{}/describe", self.endpoint.trim_end_matches('/')))
            .header("content-type", "application/octet-stream")
            .body(image_bytes.to_vec());
        if let Some(key) = &self.api_key {
            req = req.header("authorization", format!("Bearer {key}"));
        }
        let resp = req
            .send()
            .await
            .map_err(|e| PipelineError::Config(format!("image analysis request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(PipelineError::Config(format!(
                "image analysis endpoint returned status {}",
                resp.status()
            )));
        }
        let body: AnalyzeResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::Config(format!("image analysis response malformed: {e}")))?;
        Ok(ImageAnalysis {
            description: body.description,
            tags: body.tags,
            keywords: body.keywords,
        })
    }
}

#[cfg(test)]
pub struct FakeImageAnalysisProvider {
    pub result: ImageAnalysis,
}

#[cfg(test)]
#[async_trait]
impl ImageAnalysisProvider for FakeImageAnalysisProvider {
    fn is_available(&self) -> bool {
        true
    }

    async fn analyze(&self, _image_bytes: &[u8]) -> Result<ImageAnalysis> {
        Ok(self.result.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_text_joins_description_tags_and_keywords() {
        let analysis = ImageAnalysis {
            description: "a scanned site map".into(),
            tags: vec!["map".into()],
            keywords: vec!["boundary".into()],
        };
        assert_eq!(analysis.as_synthetic_text(), "a scanned site map map boundary");
    }

    #[test]
    fn synthetic_text_of_empty_analysis_is_empty() {
        assert_eq!(ImageAnalysis::default().as_synthetic_text(), "");
    }

    #[tokio::test]
    async fn fake_provider_returns_configured_result() {
        let provider = FakeImageAnalysisProvider {
            result: ImageAnalysis {
                description: "x".into(),
                tags: vec![],
                keywords: vec![],
            },
        };
        let result = provider.analyze(b"").await.unwrap();
        assert_eq!(result.description, "x");
    }
}
