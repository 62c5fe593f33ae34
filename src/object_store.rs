//! Object fetcher (C2): retrieves a document's raw bytes given its
//! catalog-assigned object key.

use async_trait::async_trait;

use crate::error::{PipelineError, Result};

#[async_trait]
pub trait ObjectFetcher: Send + Sync {
    async fn fetch(&self, object_key: &str) -> Result<Vec<u8>>;
}

/// Fetches objects from an S3-compatible store over plain HTTPS GET, the
/// way a presigned-URL or virtual-hosted-style bucket endpoint is reached.
pub struct HttpObjectFetcher {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
}

impl HttpObjectFetcher {
    pub fn new(endpoint: String, bucket: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("reqwest client builds with static config"),
            endpoint,
            bucket,
        }
    }
}

#[async_trait]
impl ObjectFetcher for HttpObjectFetcher {
    async fn fetch(&self, object_key: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.bucket,
            object_key.trim_start_matches('/')
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::Fetch(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(PipelineError::Fetch(format!(
                "fetching {object_key} failed with status {}",
                resp.status()
            )));
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| PipelineError::Fetch(e.to_string()))
    }
}

/// Filesystem-backed fetcher for tests: `object_key` is a path relative to
/// a root directory instead of a bucket key.
pub struct FilesystemObjectFetcher {
    pub root: std::path::PathBuf,
}

#[async_trait]
impl ObjectFetcher for FilesystemObjectFetcher {
    async fn fetch(&self, object_key: &str) -> Result<Vec<u8>> {
        let path = self.root.join(object_key);
        tokio::fs::read(&path)
            .await
            .map_err(|e| PipelineError::Fetch(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn filesystem_fetcher_reads_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("doc.pdf");
        std::fs::File::create(&file_path)
            .unwrap()
            .write_all(b"%PDF-1.4 fixture")
            .unwrap();

        let fetcher = FilesystemObjectFetcher {
            root: dir.path().to_path_buf(),
        };
        let bytes = fetcher.fetch("doc.pdf").await.unwrap();
        assert_eq!(&bytes[..4], b"%PDF");
    }

    #[tokio::test]
    async fn filesystem_fetcher_errors_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FilesystemObjectFetcher {
            root: dir.path().to_path_buf(),
        };
        assert!(fetcher.fetch("missing.pdf").await.is_err());
    }
}
