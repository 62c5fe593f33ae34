use cetane::prelude::*;

/// Base schema. HNSW vector indexes are created at startup by
/// `crate::repository::init`, not here, since whether they're built is a
/// runtime choice (`skip_hnsw_indexes`) rather than a fixed migration step.
pub fn migration() -> Migration {
    Migration::new("0001_initial_schema")
        .operation(RunSql::portable().for_backend(
            "postgres",
            "CREATE EXTENSION IF NOT EXISTS vector",
        ))
        .operation(
            RunSql::portable().for_backend(
                "postgres",
                r#"CREATE TABLE IF NOT EXISTS projects (
    id UUID PRIMARY KEY,
    external_id TEXT NOT NULL,
    name TEXT NOT NULL,
    metadata JSONB NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT projects_external_id_unique UNIQUE (external_id)
)"#,
            ),
        )
        .operation(
            RunSql::portable().for_backend(
                "postgres",
                r#"CREATE TABLE IF NOT EXISTS documents (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    external_id TEXT NOT NULL,
    file_name TEXT NOT NULL,
    file_extension TEXT NOT NULL,
    object_key TEXT NOT NULL,
    tags TEXT[] NOT NULL DEFAULT '{}',
    keywords TEXT[] NOT NULL DEFAULT '{}',
    headings TEXT[] NOT NULL DEFAULT '{}',
    embedding vector(768),
    metadata JSONB NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT documents_project_external_unique UNIQUE (project_id, external_id)
)"#,
            ),
        )
        .operation(
            RunSql::portable().for_backend(
                "postgres",
                r#"CREATE TABLE IF NOT EXISTS document_chunks (
    id UUID PRIMARY KEY,
    document_id UUID NOT NULL,
    project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    heading_path TEXT,
    tags TEXT[] NOT NULL DEFAULT '{}',
    keywords TEXT[] NOT NULL DEFAULT '{}',
    embedding vector(768) NOT NULL,
    metadata JSONB NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT document_chunks_document_index_unique UNIQUE (document_id, chunk_index)
)"#,
            ),
        )
        .operation(
            // document_id here is the catalog's opaque document id, not a
            // foreign key: failure/skipped logs are written for documents
            // that never get a `documents` row (data model invariants 3-4).
            RunSql::portable().for_backend(
                "postgres",
                r#"CREATE TABLE IF NOT EXISTS processing_logs (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    document_id TEXT NOT NULL,
    status TEXT NOT NULL,
    metrics JSONB NOT NULL DEFAULT '{}',
    worker_id TEXT,
    started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    processed_at TIMESTAMPTZ
)"#,
            ),
        )
        .operation(RunSql::portable().for_backend(
            "postgres",
            "CREATE INDEX IF NOT EXISTS idx_documents_project ON documents(project_id)",
        ))
        .operation(RunSql::portable().for_backend(
            "postgres",
            "CREATE INDEX IF NOT EXISTS idx_documents_type ON documents((metadata->>'document_type_id'))",
        ))
        .operation(RunSql::portable().for_backend(
            "postgres",
            "CREATE INDEX IF NOT EXISTS idx_documents_date ON documents((metadata->>'document_date'))",
        ))
        .operation(RunSql::portable().for_backend(
            "postgres",
            "CREATE INDEX IF NOT EXISTS idx_documents_status ON documents((metadata->>'document_status'))",
        ))
        .operation(
            RunSql::portable().for_backend(
                "postgres",
                "CREATE INDEX IF NOT EXISTS idx_documents_published ON documents(id) WHERE metadata->>'document_status' = 'published'",
            ),
        )
        .operation(RunSql::portable().for_backend(
            "postgres",
            "CREATE INDEX IF NOT EXISTS idx_document_chunks_project_document ON document_chunks(project_id, document_id)",
        ))
        .operation(RunSql::portable().for_backend(
            "postgres",
            "CREATE INDEX IF NOT EXISTS idx_processing_logs_project_document ON processing_logs(project_id, document_id, processed_at DESC)",
        ))
        .operation(
            RunSql::portable().for_backend(
                "postgres",
                "CREATE INDEX IF NOT EXISTS idx_processing_logs_failure ON processing_logs(project_id) WHERE status = 'failure'",
            ),
        )
        .operation(
            RunSql::portable().for_backend(
                "postgres",
                "CREATE INDEX IF NOT EXISTS idx_processing_logs_skipped ON processing_logs(project_id) WHERE status = 'skipped'",
            ),
        )
}
