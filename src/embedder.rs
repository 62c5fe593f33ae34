//! Embedder (C7): produces a fixed-dimensional vector for a batch of texts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut batch = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        Ok(batch.pop().unwrap_or_default())
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// HTTP-backed embedder talking to a `sentence-transformers`-style
/// inference endpoint (the production deployment runs `all-mpnet-base-v2`
/// behind it, hence the 768-dimensional default everywhere else).
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint_url: String,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(endpoint_url: String, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .expect("reqwest client builds with static config"),
            endpoint_url,
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let resp = self
            .client
            .post(&self.endpoint_url)
            .json(&EmbedRequest { inputs: texts })
            .send()
            .await
            .map_err(|e| PipelineError::Config(format!("embedding request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(PipelineError::Config(format!(
                "embedding endpoint returned status {}",
                resp.status()
            )));
        }
        let body: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::Config(format!("embedding response malformed: {e}")))?;
        Ok(body.embeddings)
    }
}

/// Deterministic hash-based embedder for tests: same text always yields the
/// same vector, different text (almost always) yields a different one,
/// without needing a model endpoint.
pub struct FakeEmbedder {
    pub dimensions: usize,
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embedding(t, self.dimensions)).collect())
    }
}

fn hash_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    use sha2::{Digest, Sha256};
    let mut vector = Vec::with_capacity(dimensions);
    let mut counter: u32 = 0;
    while vector.len() < dimensions {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();
        for chunk in digest.chunks(4) {
            if vector.len() >= dimensions {
                break;
            }
            let mut buf = [0u8; 4];
            buf[..chunk.len()].copy_from_slice(chunk);
            let value = u32::from_le_bytes(buf) as f32 / u32::MAX as f32;
            vector.push(value * 2.0 - 1.0);
        }
        counter += 1;
    }
    vector
}
