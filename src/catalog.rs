//! Catalog client (C1): lists the projects and documents to ingest.
//!
//! The production implementation talks to the document-search service's
//! paginated project/document listing endpoints; tests run against
//! `FakeCatalogClient`, which holds an in-memory fixture instead.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogProject {
    pub external_id: String,
    pub name: String,
}

/// One entry from the catalog's document listing. `document_type_id`,
/// `document_date`, `document_status`, and `proponent_name` mirror the
/// `type`/`documentDate`/`proponent.name` fields the catalog API exposes
/// (§6.1) and become part of a document's `base_metadata` so the persisted
/// `metadata` JSON carries the same fields the schema's expression indexes
/// query (`idx_documents_type`, `idx_documents_date`, `idx_documents_published`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub external_id: String,
    pub file_name: String,
    pub object_key: String,
    #[serde(default)]
    pub document_type_id: Option<String>,
    #[serde(default)]
    pub document_date: Option<String>,
    #[serde(default)]
    pub document_status: Option<String>,
    #[serde(default)]
    pub proponent_name: Option<String>,
    /// `internalSize`/`fileSize`: byte count as reported by the catalog,
    /// string-typed upstream — non-integer or missing is treated as unknown.
    #[serde(default)]
    pub byte_size: Option<u64>,
}

impl CatalogDocument {
    /// The `metadata` seed every processed chunk/document row is built
    /// from, before stage-specific fields (tags, keywords, s3_key, ...) are
    /// merged in.
    pub fn base_metadata(&self) -> Json {
        json!({
            "document_type_id": self.document_type_id,
            "document_date": self.document_date,
            "document_status": self.document_status,
            "proponent_name": self.proponent_name,
            "byte_size": self.byte_size,
        })
    }
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<CatalogProject>>;
    async fn list_documents(&self, project_external_id: &str) -> Result<Vec<CatalogDocument>>;
}

pub struct HttpCatalogClient {
    client: reqwest::Client,
    base_url: String,
    page_size: u32,
}

impl HttpCatalogClient {
    pub fn new(base_url: String, page_size: u32) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("reqwest client builds with static config"),
            base_url,
            page_size,
        }
    }

    async fn get_page<T: for<'de> Deserialize<'de>>(&self, path: &str, offset: u32) -> Result<Vec<T>> {
        let url = format!(
            "{}{}?limit={}&offset={}",
            self.base_url.trim_end_matches('/'),
            path,
            self.page_size,
            offset
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::Catalog(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(PipelineError::Catalog(format!(
                "catalog request to {url} failed with status {}",
                resp.status()
            )));
        }
        resp.json::<Vec<T>>()
            .await
            .map_err(|e| PipelineError::Catalog(e.to_string()))
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn list_projects(&self) -> Result<Vec<CatalogProject>> {
        let mut all = Vec::new();
        let mut offset = 0;
        loop {
            let page: Vec<CatalogProject> = self.get_page("/projects", offset).await?;
            let got = page.len() as u32;
            all.extend(page);
            if got < self.page_size {
                break;
            }
            offset += self.page_size;
        }
        Ok(all)
    }

    async fn list_documents(&self, project_external_id: &str) -> Result<Vec<CatalogDocument>> {
        let mut all = Vec::new();
        let mut offset = 0;
        loop {
            let path = format!("/projects/{project_external_id}/documents");
            let page: Vec<CatalogDocument> = self.get_page(&path, offset).await?;
            let got = page.len() as u32;
            all.extend(page);
            if got < self.page_size {
                break;
            }
            offset += self.page_size;
        }
        Ok(all)
    }
}

/// In-memory catalog for tests and the `reset`/`repair-report` dry paths
/// that don't need a live service.
pub struct FakeCatalogClient {
    pub projects: Vec<CatalogProject>,
    pub documents: std::collections::HashMap<String, Vec<CatalogDocument>>,
}

#[async_trait]
impl CatalogClient for FakeCatalogClient {
    async fn list_projects(&self) -> Result<Vec<CatalogProject>> {
        Ok(self.projects.clone())
    }

    async fn list_documents(&self, project_external_id: &str) -> Result<Vec<CatalogDocument>> {
        Ok(self
            .documents
            .get(project_external_id)
            .cloned()
            .unwrap_or_default())
    }
}
