//! Persistence seam for videos and analyses.

use async_trait::async_trait;
use carlitos_core::analysis::{Analysis, TransitionError};
use carlitos_core::types::{DbId, Timestamp};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no analysis exists for video {0}")]
    AnalysisNotFound(DbId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// What the pipeline needs to know about an uploaded video.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRef {
    pub id: DbId,
    pub storage_path: String,
    pub stroke_type: Option<String>,
}

/// A state change applied to the locked analysis record. When it returns
/// an error nothing is written.
pub type Transition = Box<dyn FnOnce(&mut Analysis) -> Result<(), TransitionError> + Send>;

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Active (not soft-deleted) video by id.
    async fn find_video(&self, video_id: DbId) -> Result<Option<VideoRef>, StoreError>;

    async fn find_analysis(&self, video_id: DbId) -> Result<Option<Analysis>, StoreError>;

    /// Create the analysis for `video_id`, or re-trigger the existing one.
    /// Either way the returned record is `Pending` under a fresh generation.
    async fn reset_for_submission(
        &self,
        video_id: DbId,
        now: Timestamp,
    ) -> Result<Analysis, StoreError>;

    /// Apply `transition` to the analysis of `video_id` and persist the
    /// result as one atomic write.
    async fn transition(&self, video_id: DbId, transition: Transition)
        -> Result<Analysis, StoreError>;

    /// Cheap reachability check for health reporting.
    async fn ping(&self) -> Result<(), StoreError>;
}
