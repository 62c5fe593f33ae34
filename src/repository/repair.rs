//! Repair Service (C12): classifies inconsistent (ProcessingLog, Document,
//! DocumentChunk) states and performs the bulk/per-document cleanups that
//! make a document eligible for requeue.
//!
//! The SQL here only gathers the raw per-document state (does a document
//! row exist, how many chunks does it have, what did its latest log say);
//! `classify` turns that state into a `RepairCategory` as a pure function so
//! the classification rules themselves can be unit tested without a
//! database.

use diesel::prelude::*;
use uuid::Uuid;

use crate::error::Result;
use crate::models::LogStatus;
use crate::repository::pool::{retry_transient, PgPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairCategory {
    PartialFailure,
    IncompleteProcessing,
    OrphanedChunks,
    InconsistentSuccess,
}

impl RepairCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            RepairCategory::PartialFailure => "partial_failure",
            RepairCategory::IncompleteProcessing => "incomplete_processing",
            RepairCategory::OrphanedChunks => "orphaned_chunks",
            RepairCategory::InconsistentSuccess => "inconsistent_success",
        }
    }
}

/// Raw per-document state the four repair predicates (§4.7) are evaluated
/// against.
#[derive(Debug, Clone, Copy)]
pub struct DocumentState {
    pub has_document_row: bool,
    pub chunk_count: i64,
    pub latest_log_status: Option<LogStatus>,
}

/// Classify one document's state into a repair category, or `None` if it's
/// consistent. A failed document with leftover chunks is a partial failure
/// even though it would also match "chunks with no document" if the
/// document row happened to be missing too. The missing-document check runs
/// before the missing-log check: chunks with no document row are always an
/// `OrphanedChunks` case regardless of whether a log exists for them,
/// because `cleanup_orphaned_chunks` is the only cleanup path that deletes
/// by the chunk's raw document UUID rather than by joining through
/// `documents.external_id` — a logless orphan routed to
/// `IncompleteProcessing` instead would never actually get cleaned up, since
/// `cleanup_document_data`'s subquery finds no matching `documents` row.
pub fn classify(state: DocumentState) -> Option<RepairCategory> {
    if state.latest_log_status == Some(LogStatus::Failure) && state.chunk_count > 0 {
        return Some(RepairCategory::PartialFailure);
    }
    if state.chunk_count > 0 && !state.has_document_row {
        return Some(RepairCategory::OrphanedChunks);
    }
    if state.chunk_count > 0 && state.latest_log_status.is_none() {
        return Some(RepairCategory::IncompleteProcessing);
    }
    if state.latest_log_status == Some(LogStatus::Success) && state.chunk_count == 0 {
        return Some(RepairCategory::InconsistentSuccess);
    }
    None
}

#[derive(Debug, Clone)]
pub struct RepairCandidate {
    pub project_id: Uuid,
    pub document_id: String,
    pub category: RepairCategory,
}

#[derive(QueryableByName)]
struct CandidateRow {
    #[diesel(sql_type = diesel::sql_types::Uuid)]
    project_id: Uuid,
    #[diesel(sql_type = diesel::sql_types::Text)]
    document_id: String,
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Text>)]
    latest_status: Option<String>,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    chunk_count: i64,
    #[diesel(sql_type = diesel::sql_types::Bool)]
    has_document_row: bool,
}

// `document_chunks` is grouped by its raw `document_id` UUID (not joined
// through `documents` by external id) so a chunk whose document row is
// genuinely missing still surfaces as a row here, with its document UUID
// standing in for the usual external id. `document_chunks.document_id`
// deliberately carries no foreign key into `documents` (mirroring
// `processing_logs.document_id`'s treatment) precisely so this state is
// reachable at all — a hard `REFERENCES ... ON DELETE CASCADE` would make
// orphaned chunks impossible to observe, since deleting the document row
// would always take its chunks down with it in the same statement.
const STATE_QUERY: &str = r#"
WITH chunk_state AS (
    SELECT
        cc.project_id,
        coalesce(dr.external_id, cc.document_id::text) AS document_id,
        cc.chunk_count,
        (dr.id IS NOT NULL) AS has_document_row
    FROM (
        SELECT project_id, document_id, count(*) AS chunk_count
        FROM document_chunks
        GROUP BY project_id, document_id
    ) cc
    LEFT JOIN documents dr ON dr.id = cc.document_id AND dr.project_id = cc.project_id
),
latest_logs AS (
    SELECT DISTINCT ON (project_id, document_id) project_id, document_id, status
    FROM processing_logs
    ORDER BY project_id, document_id, processed_at DESC NULLS LAST
),
doc_rows AS (
    SELECT project_id, external_id AS document_id FROM documents
)
SELECT
    coalesce(cs.project_id, ll.project_id, dr.project_id) AS project_id,
    coalesce(cs.document_id, ll.document_id, dr.document_id) AS document_id,
    ll.status AS latest_status,
    coalesce(cs.chunk_count, 0) AS chunk_count,
    coalesce(cs.has_document_row, dr.document_id IS NOT NULL) AS has_document_row
FROM chunk_state cs
FULL OUTER JOIN latest_logs ll
    ON ll.project_id = cs.project_id AND ll.document_id = cs.document_id
FULL OUTER JOIN doc_rows dr
    ON dr.project_id = coalesce(cs.project_id, ll.project_id)
   AND dr.document_id = coalesce(cs.document_id, ll.document_id)
"#;

pub struct RepairRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> RepairRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    fn document_states(&self, project_ids: Option<&[Uuid]>) -> Result<Vec<CandidateRow>> {
        let mut conn = self.pool.get()?;
        let rows = match project_ids {
            Some(ids) => diesel::sql_query(format!(
                "{STATE_QUERY} WHERE coalesce(cs.project_id, ll.project_id, dr.project_id) = ANY($1)"
            ))
            .bind::<diesel::sql_types::Array<diesel::sql_types::Uuid>, _>(ids.to_vec())
            .load::<CandidateRow>(&mut conn)?,
            None => diesel::sql_query(STATE_QUERY).load::<CandidateRow>(&mut conn)?,
        };
        Ok(rows)
    }

    /// All documents whose (log, document, chunk) state is one of the four
    /// inconsistent categories in §4.7.
    pub fn find_repair_candidates(&self, project_ids: Option<&[Uuid]>) -> Result<Vec<RepairCandidate>> {
        Ok(self
            .document_states(project_ids)?
            .into_iter()
            .filter_map(|row| {
                let state = DocumentState {
                    has_document_row: row.has_document_row,
                    chunk_count: row.chunk_count,
                    latest_log_status: row.latest_status.as_deref().and_then(LogStatus::parse),
                };
                classify(state).map(|category| RepairCandidate {
                    project_id: row.project_id,
                    document_id: row.document_id,
                    category,
                })
            })
            .collect())
    }

    /// Documents whose most recent log is `failure`, regardless of whether
    /// they'd also classify as a repair candidate (a failed document with no
    /// leftover chunks still needs its log cleared before a retry).
    pub fn find_failed_documents(&self, project_ids: Option<&[Uuid]>) -> Result<Vec<(Uuid, String)>> {
        Ok(self
            .document_states(project_ids)?
            .into_iter()
            .filter(|row| row.latest_status.as_deref() == Some("failure"))
            .map(|row| (row.project_id, row.document_id))
            .collect())
    }

    /// Documents whose most recent log is `skipped`.
    pub fn find_skipped_documents(&self, project_ids: Option<&[Uuid]>) -> Result<Vec<(Uuid, String)>> {
        Ok(self
            .document_states(project_ids)?
            .into_iter()
            .filter(|row| row.latest_status.as_deref() == Some("skipped"))
            .map(|row| (row.project_id, row.document_id))
            .collect())
    }

    /// Delete every chunk, the document row, and all processing logs for
    /// one document. Used directly by `--repair` and as the shared
    /// implementation behind the bulk cleanup operations below.
    pub fn cleanup_document_data(&self, project_id: Uuid, document_id: &str) -> Result<()> {
        let mut conn = self.pool.get()?;
        conn.transaction(|conn| {
            diesel::sql_query(
                "DELETE FROM document_chunks WHERE project_id = $1 AND document_id IN \
                 (SELECT id FROM documents WHERE project_id = $1 AND external_id = $2)",
            )
            .bind::<diesel::sql_types::Uuid, _>(project_id)
            .bind::<diesel::sql_types::Text, _>(document_id)
            .execute(conn)?;

            diesel::sql_query("DELETE FROM documents WHERE project_id = $1 AND external_id = $2")
                .bind::<diesel::sql_types::Uuid, _>(project_id)
                .bind::<diesel::sql_types::Text, _>(document_id)
                .execute(conn)?;

            diesel::sql_query(
                "DELETE FROM processing_logs WHERE project_id = $1 AND document_id = $2",
            )
            .bind::<diesel::sql_types::Uuid, _>(project_id)
            .bind::<diesel::sql_types::Text, _>(document_id)
            .execute(conn)?;

            diesel::result::QueryResult::Ok(())
        })?;
        Ok(())
    }

    /// Delete a document's chunks and document row but preserve its
    /// processing logs, so a second failed retry attempt still has history.
    /// Used by the Document Processor's per-document pre-cleanup on retry.
    pub fn cleanup_document_content_for_retry(&self, project_id: Uuid, document_id: &str) -> Result<()> {
        let mut conn = self.pool.get()?;
        conn.transaction(|conn| {
            diesel::sql_query(
                "DELETE FROM document_chunks WHERE project_id = $1 AND document_id IN \
                 (SELECT id FROM documents WHERE project_id = $1 AND external_id = $2)",
            )
            .bind::<diesel::sql_types::Uuid, _>(project_id)
            .bind::<diesel::sql_types::Text, _>(document_id)
            .execute(conn)?;

            diesel::sql_query("DELETE FROM documents WHERE project_id = $1 AND external_id = $2")
                .bind::<diesel::sql_types::Uuid, _>(project_id)
                .bind::<diesel::sql_types::Text, _>(document_id)
                .execute(conn)?;

            diesel::result::QueryResult::Ok(())
        })?;
        Ok(())
    }

    /// Delete only the processing logs for a document (the
    /// `inconsistent_success` repair action: a success log with no chunks
    /// to clean up).
    fn cleanup_logs_only(&self, project_id: Uuid, document_id: &str) -> Result<()> {
        let mut conn = self.pool.get()?;
        diesel::sql_query("DELETE FROM processing_logs WHERE project_id = $1 AND document_id = $2")
            .bind::<diesel::sql_types::Uuid, _>(project_id)
            .bind::<diesel::sql_types::Text, _>(document_id)
            .execute(&mut conn)?;
        Ok(())
    }

    /// Delete only the chunks for a document with no document row (the
    /// `orphaned_chunks` repair action). `document_id` here is the chunks'
    /// raw document UUID rendered as text — `find_repair_candidates` falls
    /// back to that representation precisely when no document row exists to
    /// supply an external id — so the delete targets `document_chunks`
    /// directly rather than going through `documents.external_id`.
    fn cleanup_orphaned_chunks(&self, project_id: Uuid, document_id: &str) -> Result<()> {
        let document_uuid: Uuid = document_id
            .parse()
            .map_err(|_| crate::error::PipelineError::Config(format!(
                "orphaned chunk cleanup expected a document UUID, got {document_id:?}"
            )))?;
        let mut conn = self.pool.get()?;
        diesel::sql_query("DELETE FROM document_chunks WHERE project_id = $1 AND document_id = $2")
            .bind::<diesel::sql_types::Uuid, _>(project_id)
            .bind::<diesel::sql_types::Uuid, _>(document_uuid)
            .execute(&mut conn)?;
        Ok(())
    }

    /// Full wipe of a project: every chunk, document, log, and the project
    /// row itself, in child-to-parent order. Used by `--reset`.
    pub fn cleanup_project_data(&self, project_id: Uuid) -> Result<()> {
        let mut conn = self.pool.get()?;
        conn.transaction(|conn| {
            diesel::sql_query("DELETE FROM processing_logs WHERE project_id = $1")
                .bind::<diesel::sql_types::Uuid, _>(project_id)
                .execute(conn)?;
            diesel::sql_query("DELETE FROM document_chunks WHERE project_id = $1")
                .bind::<diesel::sql_types::Uuid, _>(project_id)
                .execute(conn)?;
            diesel::sql_query("DELETE FROM documents WHERE project_id = $1")
                .bind::<diesel::sql_types::Uuid, _>(project_id)
                .execute(conn)?;
            diesel::sql_query("DELETE FROM projects WHERE id = $1")
                .bind::<diesel::sql_types::Uuid, _>(project_id)
                .execute(conn)?;
            diesel::result::QueryResult::Ok(())
        })?;
        Ok(())
    }

    /// Bulk-clean every document whose most recent log is `failure`, in
    /// batches of 100, returning the cleaned `(project_id, document_id)`
    /// pairs for the work queue builder to requeue.
    pub async fn bulk_cleanup_failed_documents(
        &self,
        project_ids: Option<&[Uuid]>,
    ) -> Result<Vec<(Uuid, String)>> {
        let failed = self.find_failed_documents(project_ids)?;
        for batch in failed.chunks(100) {
            for (project_id, document_id) in batch {
                let project_id = *project_id;
                let document_id = document_id.clone();
                retry_transient(|| async {
                    self.cleanup_document_data(project_id, &document_id)
                })
                .await?;
            }
        }
        Ok(failed)
    }

    /// Bulk-clean every repair candidate, applying the action in §4.7's
    /// table (full cleanup for three categories, logs-only for the
    /// fourth), returning the cleaned pairs for requeue.
    pub async fn bulk_cleanup_repair_candidates(
        &self,
        project_ids: Option<&[Uuid]>,
    ) -> Result<Vec<(Uuid, String)>> {
        let candidates = self.find_repair_candidates(project_ids)?;
        for batch in candidates.chunks(100) {
            for candidate in batch {
                let project_id = candidate.project_id;
                let document_id = candidate.document_id.clone();
                match candidate.category {
                    RepairCategory::InconsistentSuccess => {
                        retry_transient(|| async { self.cleanup_logs_only(project_id, &document_id) })
                            .await?;
                    }
                    RepairCategory::OrphanedChunks => {
                        retry_transient(|| async {
                            self.cleanup_orphaned_chunks(project_id, &document_id)
                        })
                        .await?;
                    }
                    RepairCategory::PartialFailure | RepairCategory::IncompleteProcessing => {
                        retry_transient(|| async {
                            self.cleanup_document_data(project_id, &document_id)
                        })
                        .await?;
                    }
                }
            }
        }
        Ok(candidates
            .into_iter()
            .map(|c| (c.project_id, c.document_id))
            .collect())
    }

    /// Delete only the `skipped` logs for a project (or all projects):
    /// skipped documents have no chunks/document rows to clean up.
    pub fn bulk_cleanup_skipped_documents(&self, project_ids: Option<&[Uuid]>) -> Result<usize> {
        let mut conn = self.pool.get()?;
        let affected = match project_ids {
            Some(ids) => diesel::sql_query(
                "DELETE FROM processing_logs WHERE status = 'skipped' AND project_id = ANY($1)",
            )
            .bind::<diesel::sql_types::Array<diesel::sql_types::Uuid>, _>(ids.to_vec())
            .execute(&mut conn)?,
            None => diesel::sql_query("DELETE FROM processing_logs WHERE status = 'skipped'")
                .execute(&mut conn)?,
        };
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(has_doc: bool, chunks: i64, status: Option<LogStatus>) -> DocumentState {
        DocumentState {
            has_document_row: has_doc,
            chunk_count: chunks,
            latest_log_status: status,
        }
    }

    #[test]
    fn failure_with_chunks_is_partial_failure() {
        let result = classify(state(true, 3, Some(LogStatus::Failure)));
        assert_eq!(result, Some(RepairCategory::PartialFailure));
    }

    #[test]
    fn chunks_with_no_log_is_incomplete_processing() {
        let result = classify(state(true, 2, None));
        assert_eq!(result, Some(RepairCategory::IncompleteProcessing));
    }

    #[test]
    fn chunks_with_no_document_row_is_orphaned() {
        let result = classify(state(false, 2, Some(LogStatus::Success)));
        assert_eq!(result, Some(RepairCategory::OrphanedChunks));
    }

    #[test]
    fn chunks_with_no_document_row_and_no_log_is_orphaned_not_incomplete() {
        let result = classify(state(false, 2, None));
        assert_eq!(result, Some(RepairCategory::OrphanedChunks));
    }

    #[test]
    fn success_with_no_chunks_is_inconsistent_success() {
        let result = classify(state(true, 0, Some(LogStatus::Success)));
        assert_eq!(result, Some(RepairCategory::InconsistentSuccess));
    }

    #[test]
    fn success_with_chunks_is_healthy() {
        assert_eq!(classify(state(true, 4, Some(LogStatus::Success))), None);
    }

    #[test]
    fn skipped_with_no_chunks_is_healthy() {
        assert_eq!(classify(state(false, 0, Some(LogStatus::Skipped))), None);
    }

    #[test]
    fn never_processed_with_no_chunks_is_healthy() {
        assert_eq!(classify(state(false, 0, None)), None);
    }
}
