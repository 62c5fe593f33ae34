//! Row types for the four persisted tables, plus the `ChunkRecord` shape
//! used internally to pass a chunk through tagging/keyword extraction
//! before it is written.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use pgvector::Vector;
use serde_json::Value as Json;
use uuid::Uuid;

use crate::schema::{document_chunks, documents, processing_logs, projects};

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = projects)]
pub struct Project {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub metadata: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = projects)]
pub struct NewProject<'a> {
    pub id: Uuid,
    pub external_id: &'a str,
    pub name: &'a str,
    pub metadata: Json,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: Uuid,
    pub project_id: Uuid,
    pub external_id: String,
    pub file_name: String,
    pub file_extension: String,
    pub object_key: String,
    pub tags: Vec<String>,
    pub keywords: Vec<String>,
    pub headings: Vec<String>,
    pub embedding: Option<Vector>,
    pub metadata: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub project_id: Uuid,
    pub external_id: String,
    pub file_name: String,
    pub file_extension: String,
    pub object_key: String,
    pub tags: Vec<String>,
    pub keywords: Vec<String>,
    pub headings: Vec<String>,
    pub embedding: Option<Vector>,
    pub metadata: Json,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = document_chunks)]
pub struct DocumentChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub project_id: Uuid,
    pub chunk_index: i32,
    pub content: String,
    pub heading_path: Option<String>,
    pub tags: Vec<String>,
    pub keywords: Vec<String>,
    pub embedding: Vector,
    pub metadata: Json,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = document_chunks)]
pub struct NewDocumentChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub project_id: Uuid,
    pub chunk_index: i32,
    pub content: String,
    pub heading_path: Option<String>,
    pub tags: Vec<String>,
    pub keywords: Vec<String>,
    pub embedding: Vector,
    pub metadata: Json,
}

/// Status values a `ProcessingLog` row may carry. Kept as plain strings in
/// the schema (so ad hoc repair SQL doesn't need a cast) with this enum as
/// the typed boundary the rest of the crate programs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatus {
    Success,
    Failure,
    Skipped,
}

impl LogStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Failure => "failure",
            LogStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(LogStatus::Success),
            "failure" => Some(LogStatus::Failure),
            "skipped" => Some(LogStatus::Skipped),
            _ => None,
        }
    }
}

/// A `processing_logs` row. `document_id` is the catalog's opaque document
/// id (not a foreign key — see `crate::schema`), so this row can exist with
/// no corresponding `Document` row at all, per invariants 3-4.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = processing_logs)]
pub struct ProcessingLog {
    pub id: Uuid,
    pub project_id: Uuid,
    pub document_id: String,
    pub status: String,
    pub metrics: Json,
    pub worker_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = processing_logs)]
pub struct NewProcessingLog {
    pub id: Uuid,
    pub project_id: Uuid,
    pub document_id: String,
    pub status: String,
    pub metrics: Json,
    pub worker_id: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// A chunk in flight between extraction and persistence, before it has a
/// `document_id` or is written to `document_chunks`. Tagging and keyword
/// extraction both take and return this shape rather than a raw string, so
/// every stage after chunking operates on one record type instead of the
/// ad hoc dict/tuple shapes a duck-typed pipeline tends to accumulate.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: Uuid,
    pub chunk_index: i32,
    pub content: String,
    pub heading_path: Option<String>,
    pub tags: Vec<String>,
    pub keywords: Vec<String>,
    pub embedding: Vec<f32>,
    pub metadata: Json,
}

impl ChunkRecord {
    pub fn new(chunk_index: i32, content: String, heading_path: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            chunk_index,
            content,
            heading_path,
            tags: Vec::new(),
            keywords: Vec::new(),
            embedding: Vec::new(),
            metadata: Json::Object(Default::default()),
        }
    }

    /// Merge the document's base metadata, the chunk's page number, s3 key,
    /// and its own tags/keywords into `metadata`, per the DocumentChunk
    /// attribute list: `chunk_metadata` carries all of these together.
    pub fn finalize_metadata(&mut self, object_key: &str, base_metadata: &Json) {
        let mut merged = base_metadata.clone();
        if let Json::Object(map) = &mut merged {
            if let Json::Object(existing) = &self.metadata {
                for (k, v) in existing {
                    map.insert(k.clone(), v.clone());
                }
            }
            map.insert("s3_key".into(), Json::String(object_key.to_string()));
            if let Some(path) = &self.heading_path {
                map.insert("headings".into(), Json::String(path.clone()));
            }
            map.insert(
                "keywords".into(),
                Json::Array(self.keywords.iter().cloned().map(Json::String).collect()),
            );
            map.insert(
                "tags".into(),
                Json::Array(self.tags.iter().cloned().map(Json::String).collect()),
            );
        }
        self.metadata = merged;
    }

    pub fn into_new_document_chunk(self, document_id: Uuid, project_id: Uuid) -> NewDocumentChunk {
        NewDocumentChunk {
            id: self.id,
            document_id,
            project_id,
            chunk_index: self.chunk_index,
            content: self.content,
            heading_path: self.heading_path,
            tags: self.tags,
            keywords: self.keywords,
            embedding: Vector::from(self.embedding),
            metadata: self.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_metadata_merges_base_and_chunk_fields() {
        let mut record = ChunkRecord::new(0, "body".into(), Some("Intro > History".into()));
        record.tags = vec!["environmental".into()];
        record.keywords = vec!["site history".into()];
        let base = serde_json::json!({"document_type_id": "report", "page_number": 3});

        record.finalize_metadata("proj-1/doc.pdf", &base);

        assert_eq!(record.metadata["document_type_id"], "report");
        assert_eq!(record.metadata["s3_key"], "proj-1/doc.pdf");
        assert_eq!(record.metadata["headings"], "Intro > History");
        assert_eq!(record.metadata["tags"][0], "environmental");
        assert_eq!(record.metadata["keywords"][0], "site history");
    }
}
