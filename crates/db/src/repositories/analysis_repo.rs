//! Repository for the `analyses` table.
//!
//! State transitions are applied to the domain record in memory while the
//! row is locked with `SELECT ... FOR UPDATE`, then written back with
//! [`AnalysisRepo::save`] in the same transaction. Status, error reason,
//! frames and lease therefore always change together.

use carlitos_core::analysis::Analysis;
use carlitos_core::types::DbId;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use crate::models::analysis::AnalysisRow;

/// Column list for `analyses` queries.
const COLUMNS: &str = "\
    id, video_id, status, frames, feedback, error_reason, \
    generation, attempts, leased_until, created_at, updated_at";

fn decode(row: AnalysisRow) -> Result<Analysis, sqlx::Error> {
    Analysis::try_from(row).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

pub struct AnalysisRepo;

impl AnalysisRepo {
    /// Point-in-time read of the analysis for a video.
    pub async fn find_by_video(
        pool: &PgPool,
        video_id: DbId,
    ) -> Result<Option<Analysis>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM analyses WHERE video_id = $1");
        sqlx::query_as::<_, AnalysisRow>(&query)
            .bind(video_id)
            .fetch_optional(pool)
            .await?
            .map(decode)
            .transpose()
    }

    /// Lock the analysis row for a video until the transaction ends.
    pub async fn find_by_video_for_update(
        conn: &mut PgConnection,
        video_id: DbId,
    ) -> Result<Option<Analysis>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM analyses WHERE video_id = $1 FOR UPDATE");
        sqlx::query_as::<_, AnalysisRow>(&query)
            .bind(video_id)
            .fetch_optional(&mut *conn)
            .await?
            .map(decode)
            .transpose()
    }

    /// Insert `analysis` unless the video already has one.
    ///
    /// Returns `true` when a row was inserted. Concurrent callers racing on
    /// the same video are serialized by the unique `video_id` constraint.
    pub async fn insert_if_absent(
        conn: &mut PgConnection,
        analysis: &Analysis,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO analyses (id, video_id, status, generation, attempts, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (video_id) DO NOTHING",
        )
        .bind(analysis.id)
        .bind(analysis.video_id)
        .bind(analysis.status.as_str())
        .bind(analysis.generation)
        .bind(analysis.attempts)
        .bind(analysis.created_at)
        .bind(analysis.updated_at)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Write every mutable field of `analysis` back to its row.
    pub async fn save(conn: &mut PgConnection, analysis: &Analysis) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE analyses SET \
                status = $2, frames = $3, feedback = $4, error_reason = $5, \
                generation = $6, attempts = $7, leased_until = $8, updated_at = $9 \
             WHERE id = $1",
        )
        .bind(analysis.id)
        .bind(analysis.status.as_str())
        .bind(analysis.frames.as_ref().map(Json))
        .bind(analysis.feedback.as_ref().map(Json))
        .bind(analysis.error_reason.as_deref())
        .bind(analysis.generation)
        .bind(analysis.attempts)
        .bind(analysis.leased_until)
        .bind(analysis.updated_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
