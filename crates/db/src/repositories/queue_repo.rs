//! Repository for the `analysis_queue` table.
//!
//! A message stays in the table until acknowledged. Claiming sets
//! `claimed_until`; a message whose claim expired (the worker died) becomes
//! claimable again, which gives at-least-once delivery.

use carlitos_core::types::DbId;
use sqlx::PgPool;

use crate::models::queue::QueueMessageRow;

/// Column list for `analysis_queue` queries.
const COLUMNS: &str =
    "id, video_id, generation, attempt, available_at, claimed_until, deliveries, created_at";

pub struct QueueRepo;

impl QueueRepo {
    /// Add a message that becomes claimable after `delay_secs`.
    pub async fn enqueue(
        pool: &PgPool,
        video_id: DbId,
        generation: i64,
        attempt: i32,
        delay_secs: f64,
    ) -> Result<QueueMessageRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO analysis_queue (video_id, generation, attempt, available_at) \
             VALUES ($1, $2, $3, NOW() + make_interval(secs => $4)) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueueMessageRow>(&query)
            .bind(video_id)
            .bind(generation)
            .bind(attempt)
            .bind(delay_secs)
            .fetch_one(pool)
            .await
    }

    /// Atomically claim the oldest available message for `lease_secs`.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent workers never
    /// claim the same message.
    pub async fn claim_next(
        pool: &PgPool,
        lease_secs: f64,
    ) -> Result<Option<QueueMessageRow>, sqlx::Error> {
        let query = format!(
            "UPDATE analysis_queue \
             SET claimed_until = NOW() + make_interval(secs => $1), \
                 deliveries = deliveries + 1 \
             WHERE id = ( \
                 SELECT id FROM analysis_queue \
                 WHERE available_at <= NOW() \
                   AND (claimed_until IS NULL OR claimed_until < NOW()) \
                 ORDER BY available_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueueMessageRow>(&query)
            .bind(lease_secs)
            .fetch_optional(pool)
            .await
    }

    /// Push the claim of a message still being processed `lease_secs` into
    /// the future. Returns `false` if it was acked or released meanwhile.
    pub async fn extend_claim(pool: &PgPool, id: i64, lease_secs: f64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE analysis_queue \
             SET claimed_until = NOW() + make_interval(secs => $2) \
             WHERE id = $1 AND claimed_until IS NOT NULL",
        )
        .bind(id)
        .bind(lease_secs)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a processed message. Returns `false` if it was already gone.
    pub async fn ack(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM analysis_queue WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Release a claimed message and make it claimable again after
    /// `delay_secs`, carrying the next attempt number.
    pub async fn reschedule(
        pool: &PgPool,
        id: i64,
        attempt: i32,
        delay_secs: f64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE analysis_queue \
             SET attempt = $2, \
                 available_at = NOW() + make_interval(secs => $3), \
                 claimed_until = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .bind(attempt)
        .bind(delay_secs)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Messages not currently claimed (available now or delayed).
    pub async fn pending_count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM analysis_queue \
             WHERE claimed_until IS NULL OR claimed_until < NOW()",
        )
        .fetch_one(pool)
        .await
    }
}
