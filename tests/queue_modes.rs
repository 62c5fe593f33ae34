//! Work Queue Builder (C13) integration tests, exercised against a real
//! Postgres + pgvector database rather than `FakeCatalogClient` alone,
//! since `QueueBuilder` reads and writes `ProcessingLog` directly.
//!
//! Gated on `DATABASE_URL`: CI and local developers with a disposable
//! Postgres instance set it and get full coverage; everyone else gets a
//! skipped-with-message test rather than a hard failure, matching the
//! teacher's own posture of keeping schema-parity tests runnable without
//! bespoke infrastructure (see `tests/migration_parity.rs` in the teacher).

use std::collections::HashMap;

use diesel::prelude::*;
use uuid::Uuid;

use foia_embedder::catalog::{CatalogDocument, CatalogProject, FakeCatalogClient};
use foia_embedder::config::VectorStoreSettings;
use foia_embedder::models::LogStatus;
use foia_embedder::queue::{QueueBuilder, RunMode};
use foia_embedder::repository::init::init_database;
use foia_embedder::repository::{build_control_pool, DocumentRepository, PgPool, RepairRepository};
use foia_embedder::schema::{document_chunks, documents, processing_logs, projects};

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

/// Every test gets its own randomly-named project so concurrent `#[tokio::test]`
/// runs against the same database never collide, and tears itself down at
/// the end via `RepairRepository::cleanup_project_data`.
struct Fixture {
    pool: PgPool,
    project_external_id: String,
}

impl Fixture {
    fn new() -> Self {
        let database_url = database_url().expect("checked by caller");
        let pool = test_pool(&database_url);
        Self {
            pool,
            project_external_id: format!("proj-{}", Uuid::new_v4()),
        }
    }

    fn catalog(&self, documents: Vec<CatalogDocument>) -> FakeCatalogClient {
        let mut by_project = HashMap::new();
        by_project.insert(self.project_external_id.clone(), documents);
        FakeCatalogClient {
            projects: vec![CatalogProject {
                external_id: self.project_external_id.clone(),
                name: "Integration Fixture".into(),
            }],
            documents: by_project,
        }
    }

    fn project_row_id(&self) -> Uuid {
        let docs = DocumentRepository::new(&self.pool);
        docs.find_or_create_project(
            &self.project_external_id,
            "Integration Fixture",
            serde_json::json!({}),
        )
        .unwrap()
        .id
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let repair = RepairRepository::new(&self.pool);
        if let Ok(mut conn) = self.pool.get() {
            let row: Option<Uuid> = projects::table
                .filter(projects::external_id.eq(&self.project_external_id))
                .select(projects::id)
                .first(&mut conn)
                .optional()
                .unwrap_or(None);
            if let Some(id) = row {
                let _ = repair.cleanup_project_data(id);
            }
        }
    }
}

fn doc(external_id: &str) -> CatalogDocument {
    CatalogDocument {
        external_id: external_id.into(),
        file_name: format!("{external_id}.pdf"),
        object_key: format!("docs/{external_id}.pdf"),
        document_type_id: Some("report".into()),
        document_date: None,
        document_status: Some("published".into()),
        proponent_name: Some("Acme Co".into()),
        byte_size: Some(2048),
    }
}

#[tokio::test]
async fn normal_mode_excludes_documents_with_any_terminal_log() {
    let Some(_) = database_url() else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    let fixture = Fixture::new();
    let project_id = fixture.project_row_id();
    let catalog = fixture.catalog(vec![doc("doc-a"), doc("doc-b"), doc("doc-c")]);

    let docs_repo = DocumentRepository::new(&fixture.pool);
    let repair_repo = RepairRepository::new(&fixture.pool);

    // doc-a already succeeded, doc-b already failed; only doc-c is unseen.
    docs_repo
        .save_terminal_log(project_id, "doc-a", LogStatus::Success, "w1", serde_json::json!({}))
        .unwrap();
    docs_repo
        .save_terminal_log(project_id, "doc-b", LogStatus::Failure, "w1", serde_json::json!({}))
        .unwrap();

    let builder = QueueBuilder::new(&catalog, &docs_repo, &repair_repo);
    let tasks = builder.build(RunMode::Normal, Some(std::slice::from_ref(&fixture.project_external_id))).await.unwrap();

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].document.external_id, "doc-c");
    assert!(!tasks[0].is_retry);
}

#[tokio::test]
async fn retry_failed_bulk_cleans_and_requeues_only_failures() {
    let Some(_) = database_url() else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    let fixture = Fixture::new();
    let project_id = fixture.project_row_id();
    let catalog = fixture.catalog(vec![doc("doc-a"), doc("doc-b")]);

    let docs_repo = DocumentRepository::new(&fixture.pool);
    let repair_repo = RepairRepository::new(&fixture.pool);

    docs_repo
        .save_terminal_log(project_id, "doc-a", LogStatus::Failure, "w1", serde_json::json!({}))
        .unwrap();
    docs_repo
        .save_terminal_log(project_id, "doc-b", LogStatus::Success, "w1", serde_json::json!({}))
        .unwrap();

    let builder = QueueBuilder::new(&catalog, &docs_repo, &repair_repo);
    let tasks = builder
        .build(RunMode::RetryFailed, Some(std::slice::from_ref(&fixture.project_external_id)))
        .await
        .unwrap();

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].document.external_id, "doc-a");
    assert!(tasks[0].is_retry);

    // The bulk cleanup must have removed doc-a's failure log (S3: "bulk
    // cleanup removes ... 1 log"), so it no longer shows up as failed.
    assert_eq!(docs_repo.latest_log_status(project_id, "doc-a").unwrap(), None);
    assert_eq!(
        docs_repo.latest_log_status(project_id, "doc-b").unwrap(),
        Some(LogStatus::Success)
    );
}

#[tokio::test]
async fn retry_skipped_does_not_bulk_clean_anything() {
    let Some(_) = database_url() else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    let fixture = Fixture::new();
    let project_id = fixture.project_row_id();
    let catalog = fixture.catalog(vec![doc("doc-a")]);

    let docs_repo = DocumentRepository::new(&fixture.pool);
    let repair_repo = RepairRepository::new(&fixture.pool);

    docs_repo
        .save_terminal_log(project_id, "doc-a", LogStatus::Skipped, "w1", serde_json::json!({"skip_reason": "unknown_file_type_xyz"}))
        .unwrap();

    let builder = QueueBuilder::new(&catalog, &docs_repo, &repair_repo);
    let tasks = builder
        .build(RunMode::RetrySkipped, Some(std::slice::from_ref(&fixture.project_external_id)))
        .await
        .unwrap();

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].document.external_id, "doc-a");
    // Skipped documents carry no chunks/document row to clean up; the log
    // itself is left in place (it's only cleared once reprocessing writes
    // a new terminal log), matching §4.1's "NO pre-cleanup" rule.
    assert_eq!(
        docs_repo.latest_log_status(project_id, "doc-a").unwrap(),
        Some(LogStatus::Skipped)
    );
}

#[tokio::test]
async fn reset_round_trip_wipes_and_requeues_every_catalog_document() {
    let Some(_) = database_url() else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    let fixture = Fixture::new();
    let project_id = fixture.project_row_id();
    let catalog = fixture.catalog(vec![doc("doc-a"), doc("doc-b"), doc("doc-c")]);

    let docs_repo = DocumentRepository::new(&fixture.pool);
    let repair_repo = RepairRepository::new(&fixture.pool);

    // Prior state: all three previously succeeded, with real document and
    // chunk rows (testable property 7's starting condition).
    for external_id in ["doc-a", "doc-b", "doc-c"] {
        let new_document = foia_embedder::models::NewDocument {
            id: Uuid::new_v4(),
            project_id,
            external_id: external_id.into(),
            file_name: format!("{external_id}.pdf"),
            file_extension: "pdf".into(),
            object_key: format!("docs/{external_id}.pdf"),
            tags: vec![],
            keywords: vec![],
            headings: vec![],
            embedding: Some(pgvector::Vector::from(vec![0.0_f32; 768])),
            metadata: serde_json::json!({}),
        };
        let chunk = foia_embedder::models::ChunkRecord {
            id: Uuid::new_v4(),
            chunk_index: 0,
            content: "body text".into(),
            heading_path: None,
            tags: vec![],
            keywords: vec![],
            embedding: vec![0.0_f32; 768],
            metadata: serde_json::json!({}),
        };
        docs_repo
            .save_success(new_document, vec![chunk], "w1", serde_json::json!({}))
            .unwrap();
    }

    let builder = QueueBuilder::new(&catalog, &docs_repo, &repair_repo);
    let tasks = builder
        .build(RunMode::Reset, Some(std::slice::from_ref(&fixture.project_external_id)))
        .await
        .unwrap();

    assert_eq!(tasks.len(), 3);
    assert!(tasks.iter().all(|t| !t.is_retry));

    // `cleanup_project_data` deletes the project row along with everything
    // under it, and `build_reset` re-upserts a fresh one before queuing —
    // so the project's internal id changes across the reset. Check the
    // new id (what every queued task now carries) rather than the
    // pre-reset `project_id` captured above, which no longer names any row.
    let new_project_id = tasks[0].project_id;
    assert!(tasks.iter().all(|t| t.project_id == new_project_id));
    assert_ne!(new_project_id, project_id);

    // Check counts against the *old* `project_id`, not `new_project_id`: no
    // task has written anything under the new id yet (that only happens
    // once a worker processes it), so asserting zero rows there would be
    // true trivially. The actual property under test is that the prior
    // documents/chunks/logs seeded above, which lived under the old id,
    // were wiped by `cleanup_project_data` rather than left behind.
    let mut conn = fixture.pool.get().unwrap();
    let remaining_documents: i64 = documents::table
        .filter(documents::project_id.eq(project_id))
        .count()
        .get_result(&mut conn)
        .unwrap();
    let remaining_chunks: i64 = document_chunks::table
        .filter(document_chunks::project_id.eq(project_id))
        .count()
        .get_result(&mut conn)
        .unwrap();
    let remaining_logs: i64 = processing_logs::table
        .filter(processing_logs::project_id.eq(project_id))
        .count()
        .get_result(&mut conn)
        .unwrap();
    let old_project_row_exists: bool = diesel::select(diesel::dsl::exists(
        projects::table.filter(projects::id.eq(project_id)),
    ))
    .get_result(&mut conn)
    .unwrap();

    assert_eq!(remaining_documents, 0, "reset must wipe the prior project's documents");
    assert_eq!(remaining_chunks, 0, "reset must wipe the prior project's chunks");
    assert_eq!(remaining_logs, 0, "reset must wipe the prior project's logs");
    assert!(!old_project_row_exists, "reset must wipe the prior project row itself");
}
