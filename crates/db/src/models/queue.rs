//! Analysis queue rows.

use carlitos_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `analysis_queue` table.
#[derive(Debug, Clone, FromRow)]
pub struct QueueMessageRow {
    pub id: i64,
    pub video_id: DbId,
    pub generation: i64,
    pub attempt: i32,
    pub available_at: Timestamp,
    pub claimed_until: Option<Timestamp>,
    pub deliveries: i32,
    pub created_at: Timestamp,
}
