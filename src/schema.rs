//! Diesel table definitions for the Postgres + pgvector persistence layer.
//!
//! `processing_logs.document_id` is deliberately a bare `Text` column, not a
//! foreign key into `documents`: a `failure`/`skipped` log is written for
//! documents that never get a `documents` row (invariants 3-4 in the data
//! model), so a FK there would make those terminal statuses unwritable.
//! `document_chunks.document_id` is likewise a bare `Uuid` with no foreign
//! key into `documents`, for the same reason in reverse: invariant 1 and
//! the repair service's `orphaned_chunks` category both require that a
//! chunk can outlive or precede its document row, which a hard
//! `REFERENCES ... ON DELETE CASCADE` would make unreachable. `document_chunks`
//! carries its own `project_id` alongside `document_id` per the data
//! model's DocumentChunk attributes — both the required composite index
//! and the repair queries read it directly rather than joining through
//! `documents` for it.
//!
//! Indexes (HNSW on the two `embedding` columns, B-tree/expression indexes
//! on status and metadata fields) are created by migrations, not declared
//! here — `diesel::table!` only needs to know column types.

diesel::table! {
    projects (id) {
        id -> Uuid,
        external_id -> Text,
        name -> Text,
        metadata -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;
    use pgvector::sql_types::Vector;

    documents (id) {
        id -> Uuid,
        project_id -> Uuid,
        external_id -> Text,
        file_name -> Text,
        file_extension -> Text,
        object_key -> Text,
        tags -> Array<Text>,
        keywords -> Array<Text>,
        headings -> Array<Text>,
        embedding -> Nullable<Vector>,
        metadata -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;
    use pgvector::sql_types::Vector;

    document_chunks (id) {
        id -> Uuid,
        document_id -> Uuid,
        project_id -> Uuid,
        chunk_index -> Int4,
        content -> Text,
        heading_path -> Nullable<Text>,
        tags -> Array<Text>,
        keywords -> Array<Text>,
        embedding -> Vector,
        metadata -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    processing_logs (id) {
        id -> Uuid,
        project_id -> Uuid,
        document_id -> Text,
        status -> Text,
        metrics -> Jsonb,
        worker_id -> Nullable<Text>,
        started_at -> Timestamptz,
        processed_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(documents -> projects (project_id));
diesel::joinable!(document_chunks -> documents (document_id));
diesel::joinable!(document_chunks -> projects (project_id));
diesel::joinable!(processing_logs -> projects (project_id));

diesel::allow_tables_to_appear_in_same_query!(
    projects,
    documents,
    document_chunks,
    processing_logs,
);
