//! The operations exposed to callers: submit an analysis, read it back,
//! and get coaching feedback for it.

use std::sync::Arc;
use std::time::Duration;

use carlitos_core::analysis::{AnalysisSnapshot, AnalysisStatus};
use carlitos_core::error::CoreError;
use carlitos_core::types::DbId;
use chrono::Utc;
use serde::Serialize;

use crate::feedback::{FeedbackResult, FeedbackService};
use crate::queue::{AnalysisRequest, JobQueue};
use crate::store::{AnalysisStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("video {0} not found")]
    VideoNotFound(DbId),

    #[error("no analysis exists for video {0}")]
    AnalysisNotFound(DbId),

    #[error("analysis is not completed (status: {status})")]
    NotCompleted { status: AnalysisStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ServiceError> for CoreError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::VideoNotFound(id) => CoreError::NotFound {
                entity: "Video",
                id,
            },
            ServiceError::AnalysisNotFound(id) => CoreError::NotFound {
                entity: "Analysis",
                id,
            },
            ServiceError::NotCompleted { status } => CoreError::Precondition(format!(
                "Analysis is not completed (status: {status})"
            )),
            ServiceError::Store(StoreError::Transition(e)) => e.into(),
            ServiceError::Store(e) => CoreError::Internal(e.to_string()),
        }
    }
}

/// Result of [`AnalysisService::submit_analysis`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Analysis is `Pending` and a request for `generation` is queued.
    Accepted { generation: i64 },
    /// Analysis is `Pending` but the request could not be queued; it stays
    /// pending until re-submitted.
    SchedulingFailed { generation: i64, reason: String },
}

impl SubmitOutcome {
    pub fn generation(&self) -> i64 {
        match self {
            SubmitOutcome::Accepted { generation }
            | SubmitOutcome::SchedulingFailed { generation, .. } => *generation,
        }
    }
}

pub struct AnalysisService {
    store: Arc<dyn AnalysisStore>,
    queue: Arc<dyn JobQueue>,
    feedback: FeedbackService,
}

impl AnalysisService {
    pub fn new(
        store: Arc<dyn AnalysisStore>,
        queue: Arc<dyn JobQueue>,
        feedback: FeedbackService,
    ) -> Self {
        Self {
            store,
            queue,
            feedback,
        }
    }

    /// Create the analysis for a video, or re-trigger it, and queue the
    /// first attempt. Returns without waiting for processing.
    ///
    /// A queueing failure is logged and reported in the outcome but never
    /// turned into an error.
    pub async fn submit_analysis(&self, video_id: DbId) -> Result<SubmitOutcome, ServiceError> {
        if self.store.find_video(video_id).await?.is_none() {
            return Err(ServiceError::VideoNotFound(video_id));
        }

        let analysis = self.store.reset_for_submission(video_id, Utc::now()).await?;
        let generation = analysis.generation;
        tracing::info!(video_id = %video_id, generation, "Analysis submitted");

        let request = AnalysisRequest::first_attempt(video_id, generation);
        match self.queue.enqueue(request, Duration::ZERO).await {
            Ok(()) => Ok(SubmitOutcome::Accepted { generation }),
            Err(e) => {
                tracing::error!(
                    video_id = %video_id,
                    generation,
                    error = %e,
                    "Failed to enqueue analysis request",
                );
                Ok(SubmitOutcome::SchedulingFailed {
                    generation,
                    reason: e.to_string(),
                })
            }
        }
    }

    pub async fn get_analysis(&self, video_id: DbId) -> Result<AnalysisSnapshot, ServiceError> {
        if self.store.find_video(video_id).await?.is_none() {
            return Err(ServiceError::VideoNotFound(video_id));
        }
        let analysis = self
            .store
            .find_analysis(video_id)
            .await?
            .ok_or(ServiceError::AnalysisNotFound(video_id))?;
        Ok(analysis.snapshot())
    }

    pub async fn get_or_generate_feedback(
        &self,
        video_id: DbId,
        force: bool,
    ) -> Result<FeedbackResult, ServiceError> {
        self.feedback.get_or_generate(video_id, force).await
    }

    pub async fn health(&self) -> Result<(), ServiceError> {
        Ok(self.store.ping().await?)
    }

    /// Queued analysis requests, or `None` when the queue cannot be read.
    pub async fn queue_depth(&self) -> Option<i64> {
        match self.queue.pending_count().await {
            Ok(depth) => Some(depth),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read analysis queue depth");
                None
            }
        }
    }
}
