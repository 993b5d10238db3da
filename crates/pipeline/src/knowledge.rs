//! Knowledge-base collaborator: drills the feedback may recommend.

use async_trait::async_trait;
use carlitos_core::feedback::DrillCandidate;
use carlitos_db::repositories::DrillRepo;
use carlitos_db::DbPool;

#[derive(Debug, thiserror::Error)]
#[error("knowledge base unavailable: {0}")]
pub struct KnowledgeBaseError(pub String);

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn list_candidate_drills(&self) -> Result<Vec<DrillCandidate>, KnowledgeBaseError>;
}

/// Drills read from the `drills` table.
pub struct PgKnowledgeBase {
    pool: DbPool,
}

impl PgKnowledgeBase {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KnowledgeBase for PgKnowledgeBase {
    async fn list_candidate_drills(&self) -> Result<Vec<DrillCandidate>, KnowledgeBaseError> {
        DrillRepo::list_candidates(&self.pool)
            .await
            .map_err(|e| KnowledgeBaseError(e.to_string()))
    }
}

/// A fixed drill list.
#[derive(Default)]
pub struct StaticKnowledgeBase {
    drills: Vec<DrillCandidate>,
}

impl StaticKnowledgeBase {
    pub fn new(drills: Vec<DrillCandidate>) -> Self {
        Self { drills }
    }
}

#[async_trait]
impl KnowledgeBase for StaticKnowledgeBase {
    async fn list_candidate_drills(&self) -> Result<Vec<DrillCandidate>, KnowledgeBaseError> {
        Ok(self.drills.clone())
    }
}
