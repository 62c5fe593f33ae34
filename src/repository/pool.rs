//! Connection pool construction.
//!
//! Each ingestion worker (see `crate::dispatcher`) is a separate OS process
//! and opens its own small pool rather than sharing one across the fleet, so
//! there's no cross-process prepared-statement cache to coordinate. The
//! dispatcher and repair service, which run in the long-lived parent
//! process, get their own pools sized for bookkeeping/bulk-cleanup queries
//! instead. Every pool sets a unique `application_name`, `sslmode=prefer`,
//! and a `statement_timeout`/`lock_timeout` on each connection as soon as
//! it's established.

use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};

use crate::error::{PipelineError, Result};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Debug)]
struct SessionSettings {
    application_name: String,
    statement_timeout_ms: u64,
    lock_timeout_ms: u64,
}

impl CustomizeConnection<PgConnection, diesel::r2d2::Error> for SessionSettings {
    fn on_acquire(&self, conn: &mut PgConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        let sql = format!(
            "SET application_name = '{}'; SET statement_timeout = {}; SET lock_timeout = {};",
            self.application_name.replace('\'', ""),
            self.statement_timeout_ms,
            self.lock_timeout_ms,
        );
        conn.batch_execute(&sql)
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

fn with_sslmode_prefer(database_url: &str) -> String {
    if database_url.contains("sslmode=") {
        database_url.to_string()
    } else {
        let sep = if database_url.contains('?') { '&' } else { '?' };
        format!("{database_url}{sep}sslmode=prefer")
    }
}

fn build_pool_with_settings(
    database_url: &str,
    max_size: u32,
    application_name: &str,
    statement_timeout_ms: u64,
    lock_timeout_ms: u64,
) -> Result<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(with_sslmode_prefer(database_url));
    Pool::builder()
        .max_size(max_size)
        .connection_customizer(Box::new(SessionSettings {
            application_name: application_name.to_string(),
            statement_timeout_ms,
            lock_timeout_ms,
        }))
        .build(manager)
        .map_err(|e| PipelineError::Config(format!("failed to build connection pool: {e}")))
}

/// Pool sized for the dispatcher's own bookkeeping queries (queue building,
/// progress polling) — a handful of short queries against the whole
/// project rather than one document's worth of writes at a time.
pub fn build_control_pool(database_url: &str) -> Result<PgPool> {
    build_pool_with_settings(database_url, 4, "foia-embedder-dispatcher", 30_000, 10_000)
}

/// Pool sized for a single ingestion worker: size 1 with overflow 2, per
/// the per-worker connection policy (§4.8).
pub fn build_worker_pool(database_url: &str, worker_id: &str) -> Result<PgPool> {
    let application_name = format!("foia-embedder-worker-{worker_id}");
    build_pool_with_settings(database_url, 3, &application_name, 30_000, 10_000)
}

/// Dedicated pool for the repair/cleanup paths (§4.7): a long statement
/// timeout and lock timeout since bulk deletes can legitimately take a
/// while and must not be starved by a concurrent worker's short lock hold.
pub fn build_repair_pool(database_url: &str) -> Result<PgPool> {
    build_pool_with_settings(
        database_url,
        2,
        "foia-embedder-repair",
        300_000,
        60_000,
    )
}

pub fn get_conn(pool: &PgPool) -> Result<PgPooledConnection> {
    Ok(pool.get()?)
}

/// Retry a fallible operation against a transient connection error
/// (SSL/EOF-class failures) up to 3 attempts total, with exponential
/// backoff starting at 200ms. Used by the repair service's bulk-cleanup
/// operations, which run unattended ahead of the worker pool and should
/// not abort a whole run over one dropped connection.
pub async fn retry_transient<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    let mut backoff = Duration::from_millis(200);
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < 2 && is_transient(&e) => {
                attempt += 1;
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_transient(error: &PipelineError) -> bool {
    match error {
        PipelineError::Database(diesel::result::Error::DatabaseError(_, info)) => {
            let msg = info.message().to_lowercase();
            msg.contains("ssl") || msg.contains("eof") || msg.contains("connection")
        }
        PipelineError::Pool(_) => true,
        _ => false,
    }
}
