//! Repair Service (C12) round-trip test against a real database: seeds each
//! of the four inconsistent (ProcessingLog, Document, DocumentChunk) states
//! from §4.7 directly via SQL, then verifies that `bulk_cleanup_repair_
//! candidates` leaves zero repair candidates behind (testable property 6).
//!
//! Gated on `DATABASE_URL` — see `tests/queue_modes.rs` for the rationale.

use diesel::prelude::*;
use diesel::sql_types::{Text, Uuid as SqlUuid};
use uuid::Uuid;

use foia_embedder::config::VectorStoreSettings;
use foia_embedder::repository::init::init_database;
use foia_embedder::repository::{build_control_pool, DocumentRepository, PgPool, RepairRepository};
use foia_embedder::schema::projects;

fn database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

fn test_pool(database_url: &str) -> PgPool {
    let pool = build_control_pool(database_url).expect("build test pool");
    let settings = VectorStoreSettings {
        database_url: database_url.to_string(),
        auto_create_extension: true,
        reset_db: false,
        skip_hnsw_indexes: true,
        ..Default::default()
    };
    init_database(&pool, &settings).expect("prepare schema");
    pool
}

struct Fixture {
    pool: PgPool,
    project_external_id: String,
    project_id: Uuid,
}

impl Fixture {
    fn new() -> Self {
        let database_url = database_url().expect("checked by caller");
        let pool = test_pool(&database_url);
        let project_external_id = format!("proj-{}", Uuid::new_v4());
        let project_id = DocumentRepository::new(&pool)
            .find_or_create_project(&project_external_id, "Repair Fixture", serde_json::json!({}))
            .unwrap()
            .id;
        Self {
            pool,
            project_external_id,
            project_id,
        }
    }

    /// Insert a bare `document_chunks` row with no owning `documents` row,
    /// for the `partial_failure`/`incomplete_processing`/`orphaned_chunks`
    /// fixtures. Raw SQL rather than the repository layer, since none of
    /// those inconsistent states are reachable through `save_success`/
    /// `save_terminal_log` alone — they only arise from a crash mid-run.
    fn insert_orphan_chunk(&self, document_uuid: Uuid) {
        let mut conn = self.pool.get().unwrap();
        diesel::sql_query(
            "INSERT INTO document_chunks \
             (id, document_id, project_id, chunk_index, content, tags, keywords, embedding, metadata) \
             VALUES ($1, $2, $3, 0, 'orphan body', '{}', '{}', array_fill(0, ARRAY[768])::vector, '{}')",
        )
        .bind::<SqlUuid, _>(Uuid::new_v4())
        .bind::<SqlUuid, _>(document_uuid)
        .bind::<SqlUuid, _>(self.project_id)
        .execute(&mut conn)
        .unwrap();
    }

    /// Insert a bare `documents` row (no chunks) so a chunk fixture can be
    /// paired with a real owning document, for the `incomplete_processing`
    /// fixture — unlike `orphaned_chunks`, that state requires a document
    /// row to actually exist.
    fn insert_document_row(&self, document_uuid: Uuid) {
        let mut conn = self.pool.get().unwrap();
        diesel::sql_query(
            "INSERT INTO documents \
             (id, project_id, external_id, file_name, file_extension, object_key, tags, keywords, headings, metadata) \
             VALUES ($1, $2, $3, 'doc.pdf', 'pdf', 'docs/doc.pdf', '{}', '{}', '{}', '{}')",
        )
        .bind::<SqlUuid, _>(document_uuid)
        .bind::<SqlUuid, _>(self.project_id)
        .bind::<Text, _>(document_uuid.to_string())
        .execute(&mut conn)
        .unwrap();
    }

    fn insert_log(&self, document_id: &str, status: &str) {
        let mut conn = self.pool.get().unwrap();
        diesel::sql_query(
            "INSERT INTO processing_logs (id, project_id, document_id, status, metrics, processed_at) \
             VALUES ($1, $2, $3, $4, '{}', now())",
        )
        .bind::<SqlUuid, _>(Uuid::new_v4())
        .bind::<SqlUuid, _>(self.project_id)
        .bind::<Text, _>(document_id)
        .bind::<Text, _>(status)
        .execute(&mut conn)
        .unwrap();
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let repair = RepairRepository::new(&self.pool);
        let _ = repair.cleanup_project_data(self.project_id);
    }
}

#[tokio::test]
async fn repair_round_trip_leaves_zero_candidates() {
    let Some(_) = database_url() else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    let fixture = Fixture::new();
    let repair = RepairRepository::new(&fixture.pool);

    // partial_failure: a failed log with leftover chunks under its own
    // document id (simulating a worker that persisted chunks, then crashed
    // before/without the final document+log transaction landed cleanly,
    // followed by a failure log on a later attempt).
    let partial_failure_doc = Uuid::new_v4();
    fixture.insert_orphan_chunk(partial_failure_doc);
    fixture.insert_log(&partial_failure_doc.to_string(), "failure");

    // incomplete_processing: a document row exists, chunks exist, no log at
    // all for that id. The document row is what distinguishes this from
    // orphaned_chunks below.
    let incomplete_doc = Uuid::new_v4();
    fixture.insert_document_row(incomplete_doc);
    fixture.insert_orphan_chunk(incomplete_doc);

    // orphaned_chunks: chunks exist, no document row, and no log at all —
    // `classify` checks the missing-document-row case before the
    // missing-log case, so this still lands on `OrphanedChunks` rather than
    // `IncompleteProcessing`.
    let orphaned_doc = Uuid::new_v4();
    fixture.insert_orphan_chunk(orphaned_doc);
    fixture.insert_orphan_chunk(orphaned_doc);

    // inconsistent_success: a success log with no chunks at all.
    fixture.insert_log("inconsistent-success-doc", "success");

    let candidates = repair
        .find_repair_candidates(Some(&[fixture.project_id]))
        .unwrap();
    assert_eq!(
        candidates.len(),
        4,
        "expected one candidate per seeded inconsistent document, got {candidates:?}"
    );

    let cleaned = repair
        .bulk_cleanup_repair_candidates(Some(&[fixture.project_id]))
        .await
        .unwrap();
    assert_eq!(cleaned.len(), 4);

    let remaining = repair
        .find_repair_candidates(Some(&[fixture.project_id]))
        .unwrap();
    assert!(
        remaining.is_empty(),
        "repair must leave zero candidates behind, found {remaining:?}"
    );

    // inconsistent_success's cleanup only removes the log (§4.7: "no
    // chunks to delete"); confirm the project itself is untouched.
    let mut conn = fixture.pool.get().unwrap();
    let project_still_exists: bool = diesel::select(diesel::dsl::exists(
        projects::table.filter(projects::id.eq(fixture.project_id)),
    ))
    .get_result(&mut conn)
    .unwrap();
    assert!(project_still_exists);
}
