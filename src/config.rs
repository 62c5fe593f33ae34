//! Process-wide configuration, loaded once at startup from the environment.
//!
//! Mirrors the shape of the original settings module: one struct per concern
//! (vector store, chunking, dispatcher, catalog, object store, embedding,
//! keyword extraction), aggregated into a single `Settings`. Every field has
//! an environment-variable source so the binary runs in a container without
//! a config file.

use serde::{Deserialize, Serialize};

pub const DEFAULT_EMBEDDING_DIMENSIONS: i32 = 768;
pub const DEFAULT_PHANTOM_THRESHOLD_HOURS: u64 = 4;
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreSettings {
    pub database_url: String,
    pub embedding_dimensions: i32,
    pub auto_create_extension: bool,
    pub reset_db: bool,
    pub skip_hnsw_indexes: bool,
}

impl Default for VectorStoreSettings {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            auto_create_extension: true,
            reset_db: false,
            skip_hnsw_indexes: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSettings {
    /// Number of concurrent worker processes (`W` in the dispatcher contract).
    pub files_concurrency_size: usize,
    /// Hours a worker may hold a single document before being declared a phantom.
    pub phantom_threshold_hours: u64,
    /// Optional hard cap on pages per document; documents above it are skipped.
    pub page_cap: Option<u32>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            files_concurrency_size: 4,
            phantom_threshold_hours: DEFAULT_PHANTOM_THRESHOLD_HOURS,
            page_cap: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSettings {
    pub base_url: String,
    pub project_page_size: u32,
    pub documents_page_size: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectStoreSettings {
    pub bucket_name: Option<String>,
    pub endpoint_uri: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    pub endpoint_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordAlgorithm {
    #[default]
    Standard,
    Fast,
    Simplified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrBackendKind {
    #[default]
    Tesseract,
    Cloud,
}

pub const DEFAULT_OCR_RENDER_DPI: u32 = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSettings {
    pub cloud_endpoint: String,
    pub cloud_api_key: Option<String>,
    /// DPI used to rasterize PDF pages before OCR; reduced per-page by the
    /// extractor when a page's `/MediaBox` would otherwise produce a pixmap
    /// exceeding ~50MB at this DPI.
    pub render_dpi: u32,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            cloud_endpoint: String::new(),
            cloud_api_key: None,
            render_dpi: DEFAULT_OCR_RENDER_DPI,
        }
    }
}

/// Optional fallback consulted by the image branch of the Validator & OCR
/// Gateway when OCR fails (§4.5). Unconfigured by default: an empty
/// `endpoint` makes `CloudImageAnalysisProvider::is_available` return
/// `false`, so a failed-OCR image just becomes `failure`/`ocr_failed` as
/// before.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageAnalysisSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordSettings {
    pub algorithm: KeywordAlgorithm,
    pub extraction_workers: usize,
}

impl Default for KeywordSettings {
    fn default() -> Self {
        Self {
            algorithm: KeywordAlgorithm::default(),
            extraction_workers: 4,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub vector_store: VectorStoreSettings,
    pub chunk: ChunkSettings,
    pub dispatcher: DispatcherSettings,
    pub catalog: CatalogSettings,
    pub object_store: ObjectStoreSettings,
    pub embedding: EmbeddingSettings,
    pub keyword: KeywordSettings,
    pub ocr_backend: OcrBackendKind,
    pub ocr: OcrSettings,
    pub image_analysis: ImageAnalysisSettings,
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Load settings from the environment. Expects `dotenvy::dotenv()` to have
/// already been called by `main` so a local `.env` file is visible here.
pub fn load_settings() -> Settings {
    Settings {
        vector_store: VectorStoreSettings {
            database_url: std::env::var("VECTOR_DB_URL").unwrap_or_default(),
            embedding_dimensions: env_parsed("EMBEDDING_DIMENSIONS", DEFAULT_EMBEDDING_DIMENSIONS),
            auto_create_extension: env_bool("AUTO_CREATE_PGVECTOR_EXTENSION", true),
            reset_db: env_bool("RESET_DB", false),
            skip_hnsw_indexes: env_bool("SKIP_HNSW_INDEXES", false),
        },
        chunk: ChunkSettings {
            chunk_size: env_parsed("CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
            chunk_overlap: env_parsed("CHUNK_OVERLAP", DEFAULT_CHUNK_OVERLAP),
        },
        dispatcher: DispatcherSettings {
            files_concurrency_size: env_parsed("FILES_CONCURRENCY_SIZE", 4),
            phantom_threshold_hours: env_parsed(
                "PHANTOM_THRESHOLD_HOURS",
                DEFAULT_PHANTOM_THRESHOLD_HOURS,
            ),
            page_cap: std::env::var("PAGE_CAP").ok().and_then(|v| v.parse().ok()),
        },
        catalog: CatalogSettings {
            base_url: std::env::var("DOCUMENT_SEARCH_URL").unwrap_or_default(),
            project_page_size: env_parsed("CATALOG_PROJECT_PAGE_SIZE", 50),
            documents_page_size: env_parsed("CATALOG_DOCUMENTS_PAGE_SIZE", 50),
        },
        object_store: ObjectStoreSettings {
            bucket_name: std::env::var("S3_BUCKET_NAME").ok(),
            endpoint_uri: std::env::var("S3_ENDPOINT_URI").ok(),
        },
        embedding: EmbeddingSettings {
            endpoint_url: std::env::var("EMBEDDING_ENDPOINT_URL").unwrap_or_default(),
        },
        keyword: KeywordSettings {
            algorithm: match std::env::var("KEYWORD_ALGORITHM").as_deref() {
                Ok("fast") => KeywordAlgorithm::Fast,
                Ok("simplified") => KeywordAlgorithm::Simplified,
                _ => KeywordAlgorithm::Standard,
            },
            extraction_workers: env_parsed(
                "KEYWORD_EXTRACTION_WORKERS",
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4),
            ),
        },
        ocr_backend: match std::env::var("OCR_BACKEND").as_deref() {
            Ok("cloud") => OcrBackendKind::Cloud,
            _ => OcrBackendKind::Tesseract,
        },
        ocr: OcrSettings {
            cloud_endpoint: std::env::var("OCR_CLOUD_ENDPOINT").unwrap_or_default(),
            cloud_api_key: std::env::var("OCR_CLOUD_API_KEY").ok(),
            render_dpi: env_parsed("OCR_RENDER_DPI", DEFAULT_OCR_RENDER_DPI),
        },
        image_analysis: ImageAnalysisSettings {
            endpoint: std::env::var("IMAGE_ANALYSIS_ENDPOINT").unwrap_or_default(),
            api_key: std::env::var("IMAGE_ANALYSIS_API_KEY").ok(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_has_sane_chunking() {
        let settings = Settings::default();
        assert_eq!(settings.chunk.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(settings.chunk.chunk_overlap, DEFAULT_CHUNK_OVERLAP);
    }

    #[test]
    fn default_embedding_dimensions_match_mpnet() {
        let settings = Settings::default();
        assert_eq!(settings.vector_store.embedding_dimensions, 768);
    }
}
