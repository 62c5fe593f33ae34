//! Document, chunk and processing-log persistence.
//!
//! `save_success` ties a document, its chunks and its terminal processing
//! log together in a single transaction, matching invariant 2 from the data
//! model: a document row only exists alongside a `success` log, never a
//! `failure`/`skipped` one. `save_terminal_log` is deliberately a separate,
//! smaller transaction (§4.8) used for the `failure`/`skipped` paths, which
//! never touch `documents` or `document_chunks` at all.

use std::collections::HashMap;

use diesel::prelude::*;
use serde_json::Value as Json;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ChunkRecord, LogStatus, NewDocument, NewProcessingLog, NewProject, Project};
use crate::repository::pool::PgPool;
use crate::schema::{document_chunks, documents, processing_logs, projects};

pub struct DocumentRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> DocumentRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Upsert the owning project. Called before a document is processed
    /// (success, failure, or skip alike), since `processing_logs.project_id`
    /// is a real foreign key and must already exist.
    pub fn find_or_create_project(
        &self,
        external_id: &str,
        name: &str,
        metadata: Json,
    ) -> Result<Project> {
        let mut conn = self.pool.get()?;
        if let Some(existing) = projects::table
            .filter(projects::external_id.eq(external_id))
            .first::<Project>(&mut conn)
            .optional()?
        {
            return Ok(existing);
        }
        let new_project = NewProject {
            id: Uuid::new_v4(),
            external_id,
            name,
            metadata,
        };
        diesel::insert_into(projects::table)
            .values(&new_project)
            .execute(&mut conn)?;
        Ok(projects::table
            .filter(projects::id.eq(new_project.id))
            .first::<Project>(&mut conn)?)
    }

    /// Read-only counterpart to `find_or_create_project`, used by
    /// `repair-report` so a typo'd or not-yet-seen project id doesn't
    /// silently create a row in a command that promises not to mutate
    /// anything.
    pub fn find_project_by_external_id(&self, external_id: &str) -> Result<Option<Project>> {
        let mut conn = self.pool.get()?;
        Ok(projects::table
            .filter(projects::external_id.eq(external_id))
            .first::<Project>(&mut conn)
            .optional()?)
    }

    /// Persist a successfully processed document: the document row, every
    /// chunk, and a `success` processing log, all or nothing.
    pub fn save_success(
        &self,
        new_document: NewDocument,
        chunks: Vec<ChunkRecord>,
        worker_id: &str,
        metrics: Json,
    ) -> Result<()> {
        let mut conn = self.pool.get()?;
        let document_id = new_document.id;
        let project_id = new_document.project_id;
        let document_external_id = new_document.external_id.clone();
        conn.transaction(|conn| {
            diesel::insert_into(documents::table)
                .values(&new_document)
                .execute(conn)?;

            let rows: Vec<_> = chunks
                .into_iter()
                .map(|c| c.into_new_document_chunk(document_id, project_id))
                .collect();
            if !rows.is_empty() {
                diesel::insert_into(document_chunks::table)
                    .values(&rows)
                    .execute(conn)?;
            }

            let log = NewProcessingLog {
                id: Uuid::new_v4(),
                project_id,
                document_id: document_external_id,
                status: LogStatus::Success.as_str().to_string(),
                metrics,
                worker_id: Some(worker_id.to_string()),
                processed_at: Some(chrono::Utc::now()),
            };
            diesel::insert_into(processing_logs::table)
                .values(&log)
                .execute(conn)?;

            diesel::result::QueryResult::Ok(())
        })?;
        Ok(())
    }

    /// Record a `failure` or `skipped` terminal log. No document row or
    /// chunks are written on this path, per invariants 3-4.
    pub fn save_terminal_log(
        &self,
        project_id: Uuid,
        document_external_id: &str,
        status: LogStatus,
        worker_id: &str,
        metrics: Json,
    ) -> Result<()> {
        let mut conn = self.pool.get()?;
        let log = NewProcessingLog {
            id: Uuid::new_v4(),
            project_id,
            document_id: document_external_id.to_string(),
            status: status.as_str().to_string(),
            metrics,
            worker_id: Some(worker_id.to_string()),
            processed_at: Some(chrono::Utc::now()),
        };
        diesel::insert_into(processing_logs::table)
            .values(&log)
            .execute(&mut conn)?;
        Ok(())
    }

    /// The status of the most recent `processing_logs` row for one
    /// document, or `None` if it has never been processed.
    pub fn latest_log_status(
        &self,
        project_id: Uuid,
        document_external_id: &str,
    ) -> Result<Option<LogStatus>> {
        let mut conn = self.pool.get()?;
        let status: Option<String> = processing_logs::table
            .filter(processing_logs::project_id.eq(project_id))
            .filter(processing_logs::document_id.eq(document_external_id))
            .order(processing_logs::processed_at.desc())
            .select(processing_logs::status)
            .first(&mut conn)
            .optional()?;
        Ok(status.and_then(|s| LogStatus::parse(&s)))
    }

    /// The status and `metrics` JSON of the most recent `processing_logs`
    /// row for one document. Used by the dispatcher to recover a just-
    /// completed document's page/byte counts for the throughput summary,
    /// since a worker is a separate process and reports outcomes only by
    /// writing this row, never over a shared channel.
    pub fn latest_log_status_and_metrics(
        &self,
        project_id: Uuid,
        document_external_id: &str,
    ) -> Result<Option<(LogStatus, Json)>> {
        let mut conn = self.pool.get()?;
        let row: Option<(String, Json)> = processing_logs::table
            .filter(processing_logs::project_id.eq(project_id))
            .filter(processing_logs::document_id.eq(document_external_id))
            .order(processing_logs::processed_at.desc())
            .select((processing_logs::status, processing_logs::metrics))
            .first(&mut conn)
            .optional()?;
        Ok(row.and_then(|(status, metrics)| LogStatus::parse(&status).map(|s| (s, metrics))))
    }

    /// The most recent log status for every document in a project that has
    /// ever been logged, keyed by the catalog's document id. Used by the
    /// work queue builder to classify documents into normal/retry buckets
    /// without a per-document round trip.
    pub fn latest_statuses_for_project(
        &self,
        project_id: Uuid,
    ) -> Result<HashMap<String, LogStatus>> {
        #[derive(QueryableByName)]
        struct Row {
            #[diesel(sql_type = diesel::sql_types::Text)]
            document_id: String,
            #[diesel(sql_type = diesel::sql_types::Text)]
            status: String,
        }
        let mut conn = self.pool.get()?;
        let rows: Vec<Row> = diesel::sql_query(
            "SELECT DISTINCT ON (document_id) document_id, status \
             FROM processing_logs WHERE project_id = $1 \
             ORDER BY document_id, processed_at DESC NULLS LAST",
        )
        .bind::<diesel::sql_types::Uuid, _>(project_id)
        .load(&mut conn)?;

        Ok(rows
            .into_iter()
            .filter_map(|r| LogStatus::parse(&r.status).map(|s| (r.document_id, s)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_status_round_trips_through_as_str() {
        for status in [LogStatus::Success, LogStatus::Failure, LogStatus::Skipped] {
            assert_eq!(LogStatus::parse(status.as_str()), Some(status));
        }
    }
}
