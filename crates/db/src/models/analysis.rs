//! Analysis rows and their conversion to the domain record.

use carlitos_core::analysis::{Analysis, AnalysisStatus};
use carlitos_core::error::CoreError;
use carlitos_core::feedback::Feedback;
use carlitos_core::pose::FrameResult;
use carlitos_core::types::{DbId, Timestamp};
use sqlx::types::Json;
use sqlx::FromRow;

/// A row from the `analyses` table.
#[derive(Debug, Clone, FromRow)]
pub struct AnalysisRow {
    pub id: DbId,
    pub video_id: DbId,
    pub status: String,
    pub frames: Option<Json<Vec<FrameResult>>>,
    pub feedback: Option<Json<Feedback>>,
    pub error_reason: Option<String>,
    pub generation: i64,
    pub attempts: i32,
    pub leased_until: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<AnalysisRow> for Analysis {
    type Error = CoreError;

    fn try_from(row: AnalysisRow) -> Result<Self, Self::Error> {
        Ok(Analysis {
            id: row.id,
            video_id: row.video_id,
            status: AnalysisStatus::parse(&row.status)?,
            frames: row.frames.map(|Json(frames)| frames),
            feedback: row.feedback.map(|Json(feedback)| feedback),
            error_reason: row.error_reason,
            generation: row.generation,
            attempts: row.attempts,
            leased_until: row.leased_until,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
