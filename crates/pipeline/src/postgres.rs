//! PostgreSQL implementations of [`AnalysisStore`] and [`JobQueue`].

use std::time::Duration;

use async_trait::async_trait;
use carlitos_core::analysis::Analysis;
use carlitos_core::types::{DbId, Timestamp};
use carlitos_db::repositories::{AnalysisRepo, QueueRepo, VideoRepo};
use carlitos_db::DbPool;

use crate::queue::{AnalysisRequest, Delivery, JobQueue, QueueError};
use crate::store::{AnalysisStore, StoreError, Transition, VideoRef};

pub struct PgAnalysisStore {
    pool: DbPool,
}

impl PgAnalysisStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnalysisStore for PgAnalysisStore {
    async fn find_video(&self, video_id: DbId) -> Result<Option<VideoRef>, StoreError> {
        let video = VideoRepo::find_active(&self.pool, video_id).await?;
        Ok(video.map(|v| VideoRef {
            id: v.id,
            stroke_type: v.stroke_type(),
            storage_path: v.storage_path,
        }))
    }

    async fn find_analysis(&self, video_id: DbId) -> Result<Option<Analysis>, StoreError> {
        Ok(AnalysisRepo::find_by_video(&self.pool, video_id).await?)
    }

    async fn reset_for_submission(
        &self,
        video_id: DbId,
        now: Timestamp,
    ) -> Result<Analysis, StoreError> {
        let mut tx = self.pool.begin().await?;

        let fresh = Analysis::new(uuid::Uuid::now_v7(), video_id, now);
        let inserted = AnalysisRepo::insert_if_absent(&mut tx, &fresh).await?;
        let mut analysis = AnalysisRepo::find_by_video_for_update(&mut tx, video_id)
            .await?
            .ok_or(StoreError::AnalysisNotFound(video_id))?;

        if !inserted {
            analysis.retrigger(now)?;
            AnalysisRepo::save(&mut tx, &analysis).await?;
        }

        tx.commit().await?;
        Ok(analysis)
    }

    async fn transition(
        &self,
        video_id: DbId,
        transition: Transition,
    ) -> Result<Analysis, StoreError> {
        let mut tx = self.pool.begin().await?;

        let mut analysis = AnalysisRepo::find_by_video_for_update(&mut tx, video_id)
            .await?
            .ok_or(StoreError::AnalysisNotFound(video_id))?;
        // On error the transaction is dropped and rolled back.
        transition(&mut analysis)?;
        AnalysisRepo::save(&mut tx, &analysis).await?;

        tx.commit().await?;
        Ok(analysis)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(carlitos_db::health_check(&self.pool).await?)
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

pub struct PgJobQueue {
    pool: DbPool,
}

impl PgJobQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, request: AnalysisRequest, delay: Duration) -> Result<(), QueueError> {
        let row = QueueRepo::enqueue(
            &self.pool,
            request.video_id,
            request.generation,
            request.attempt,
            delay.as_secs_f64(),
        )
        .await?;
        tracing::debug!(message_id = row.id, video_id = %request.video_id, "Analysis request enqueued");
        Ok(())
    }

    async fn claim(&self, lease: Duration) -> Result<Option<Delivery>, QueueError> {
        let row = QueueRepo::claim_next(&self.pool, lease.as_secs_f64()).await?;
        Ok(row.map(|row| Delivery {
            id: row.id,
            request: AnalysisRequest {
                video_id: row.video_id,
                generation: row.generation,
                attempt: row.attempt,
            },
            deliveries: row.deliveries,
        }))
    }

    async fn extend_claim(&self, delivery: &Delivery, lease: Duration) -> Result<(), QueueError> {
        QueueRepo::extend_claim(&self.pool, delivery.id, lease.as_secs_f64()).await?;
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        QueueRepo::ack(&self.pool, delivery.id).await?;
        Ok(())
    }

    async fn retry_later(
        &self,
        delivery: &Delivery,
        attempt: i32,
        delay: Duration,
    ) -> Result<(), QueueError> {
        QueueRepo::reschedule(&self.pool, delivery.id, attempt, delay.as_secs_f64()).await?;
        Ok(())
    }

    async fn pending_count(&self) -> Result<i64, QueueError> {
        Ok(QueueRepo::pending_count(&self.pool).await?)
    }
}
