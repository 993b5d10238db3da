//! Job queue seam: durable, at-least-once delivery of analysis requests.

use std::time::Duration;

use async_trait::async_trait;
use carlitos_core::types::DbId;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue database error: {0}")]
    Database(sqlx::Error),

    /// No connection could be obtained; the queue itself may be fine.
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                QueueError::Unavailable(err.to_string())
            }
            other => QueueError::Database(other),
        }
    }
}

/// The message body: which analysis generation to run, and which attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub video_id: DbId,
    pub generation: i64,
    /// 1-based attempt number within the generation.
    pub attempt: i32,
}

impl AnalysisRequest {
    pub fn first_attempt(video_id: DbId, generation: i64) -> Self {
        Self {
            video_id,
            generation,
            attempt: 1,
        }
    }
}

/// A claimed message. It stays invisible to other consumers until its claim
/// expires, it is acknowledged, or it is rescheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: i64,
    pub request: AnalysisRequest,
    /// How many times this message has been handed out, this time included.
    pub deliveries: i32,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Make `request` claimable after `delay`. Never waits for processing.
    async fn enqueue(&self, request: AnalysisRequest, delay: Duration) -> Result<(), QueueError>;

    /// Claim the next available message, hiding it from other consumers
    /// for `lease`.
    async fn claim(&self, lease: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Keep a claimed message hidden for another `lease` from now. No effect
    /// once the message was acked or rescheduled.
    async fn extend_claim(&self, delivery: &Delivery, lease: Duration) -> Result<(), QueueError>;

    /// Processing finished; remove the message.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Release the message for redelivery after `delay` as attempt `attempt`.
    async fn retry_later(
        &self,
        delivery: &Delivery,
        attempt: i32,
        delay: Duration,
    ) -> Result<(), QueueError>;

    /// Messages waiting for a consumer (available now or delayed).
    async fn pending_count(&self) -> Result<i64, QueueError>;
}
