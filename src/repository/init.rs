//! Startup-time database preparation: pgvector extension, schema migrations,
//! optional HNSW index creation, and the `--reset` wipe path.

use cetane::backend::Postgres as CetaneBackend;
use cetane::migrator::{MigrationStateStore, Migrator};
use diesel::connection::SimpleConnection;
use diesel::sql_query;
use diesel::RunQueryDsl;
use tracing::{info, warn};

use crate::config::VectorStoreSettings;
use crate::error::{PipelineError, Result};
use crate::migrations;
use crate::repository::pool::PgPool;

/// Run once at process startup, before any worker is dispatched.
///
/// Creates the `vector` extension if `auto_create_extension` is set, applies
/// pending migrations, and (unless `skip_hnsw_indexes` is set) builds the
/// HNSW indexes used for nearest-neighbor search. HNSW index builds are slow
/// on a large existing table, which is why they're gated separately from the
/// rest of the schema rather than baked into the migration itself.
pub fn init_database(pool: &PgPool, settings: &VectorStoreSettings) -> Result<()> {
    let mut conn = pool.get()?;

    if settings.reset_db {
        warn!("reset_db set, dropping all pipeline tables before migrating");
        drop_all_tables(&mut conn)?;
    }

    if settings.auto_create_extension {
        sql_query("CREATE EXTENSION IF NOT EXISTS vector").execute(&mut conn)?;
    }

    // A second connection executes the migration SQL itself while the first
    // tracks applied-migration state, so neither needs to alias the other.
    let mut state_conn = pool.get()?;
    run_migrations(&mut state_conn, &mut conn)?;

    if settings.skip_hnsw_indexes {
        info!("skip_hnsw_indexes set, leaving vector indexes absent");
    } else {
        ensure_hnsw_indexes(&mut conn)?;
    }

    Ok(())
}

/// Dev-only: drop every table this crate owns, including cetane's own
/// migration-state table, so the next `run_migrations` call recreates the
/// schema from scratch. Never invoked unless `RESET_DB` is set explicitly.
fn drop_all_tables(conn: &mut diesel::PgConnection) -> Result<()> {
    conn.batch_execute(
        "DROP TABLE IF EXISTS processing_logs CASCADE;
         DROP TABLE IF EXISTS document_chunks CASCADE;
         DROP TABLE IF EXISTS documents CASCADE;
         DROP TABLE IF EXISTS projects CASCADE;
         DROP TABLE IF EXISTS __cetane_migrations CASCADE;",
    )
    .map_err(PipelineError::from)?;
    Ok(())
}

fn migration_error(msg: impl std::fmt::Display) -> PipelineError {
    PipelineError::Config(format!("migration failed: {msg}"))
}

/// State store backed by the same sync `PgConnection` the rest of the crate
/// uses, rather than the teacher's async `tokio_postgres::Client` — workers
/// run one document at a time and have no other use for an async driver.
struct DieselMigrationState<'a> {
    conn: &'a mut diesel::PgConnection,
}

impl<'a> DieselMigrationState<'a> {
    fn new(conn: &'a mut diesel::PgConnection) -> Result<Self> {
        sql_query(
            "CREATE TABLE IF NOT EXISTS __cetane_migrations (
                name TEXT PRIMARY KEY NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(conn)
        .map_err(PipelineError::from)?;
        Ok(Self { conn })
    }
}

impl MigrationStateStore for DieselMigrationState<'_> {
    fn applied_migrations(&mut self) -> std::result::Result<Vec<String>, String> {
        #[derive(diesel::QueryableByName)]
        struct Name {
            #[diesel(sql_type = diesel::sql_types::Text)]
            name: String,
        }
        sql_query("SELECT name FROM __cetane_migrations ORDER BY name")
            .load::<Name>(self.conn)
            .map(|rows| rows.into_iter().map(|r| r.name).collect())
            .map_err(|e| e.to_string())
    }

    fn mark_applied(&mut self, name: &str) -> std::result::Result<(), String> {
        sql_query("INSERT INTO __cetane_migrations (name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind::<diesel::sql_types::Text, _>(name)
            .execute(self.conn)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn mark_unapplied(&mut self, name: &str) -> std::result::Result<(), String> {
        sql_query("DELETE FROM __cetane_migrations WHERE name = $1")
            .bind::<diesel::sql_types::Text, _>(name)
            .execute(self.conn)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

fn run_migrations(
    state_conn: &mut diesel::PgConnection,
    exec_conn: &mut diesel::PgConnection,
) -> Result<()> {
    let registry = migrations::registry();
    let backend = CetaneBackend;
    let state = DieselMigrationState::new(state_conn)?;
    let mut migrator = Migrator::new(&registry, &backend, state);

    let applied = migrator
        .migrate_forward(|sql| exec_conn.batch_execute(sql).map_err(|e| e.to_string()))
        .map_err(migration_error)?;

    for name in &applied {
        info!(migration = %name, "applied migration");
    }
    if applied.is_empty() {
        info!("no pending migrations");
    }
    Ok(())
}

fn ensure_hnsw_indexes(conn: &mut diesel::PgConnection) -> Result<()> {
    let statements = [
        "CREATE INDEX IF NOT EXISTS idx_document_chunks_embedding_hnsw \
         ON document_chunks USING hnsw (embedding vector_cosine_ops) \
         WITH (m = 32, ef_construction = 400)",
        "CREATE INDEX IF NOT EXISTS idx_documents_embedding_hnsw \
         ON documents USING hnsw (embedding vector_cosine_ops) \
         WITH (m = 32, ef_construction = 400)",
    ];
    for stmt in statements {
        if let Err(e) = sql_query(stmt).execute(conn) {
            warn!(error = %e, "failed to create HNSW index, continuing without it");
        }
    }
    Ok(())
}
