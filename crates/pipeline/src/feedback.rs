//! Feedback cache: coaching feedback for a completed analysis, generated
//! once through the language model and then served from the analysis row.

use std::sync::Arc;

use carlitos_core::analysis::{Analysis, TransitionError};
use carlitos_core::feedback::{
    build_prompt, parse_response, response_schema, DegradedReason, Feedback, FeedbackRequest,
};
use carlitos_core::metrics::summarize;
use carlitos_core::types::DbId;
use chrono::Utc;
use serde::Serialize;

use crate::knowledge::KnowledgeBase;
use crate::llm::{LanguageModel, LlmError};
use crate::service::ServiceError;
use crate::store::{AnalysisStore, StoreError};

/// Where the returned feedback came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum FeedbackSource {
    Cached,
    Generated,
    /// Best-effort explanatory feedback; not cached.
    Degraded(DegradedReason),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackResult {
    pub feedback: Feedback,
    pub source: FeedbackSource,
}

impl FeedbackResult {
    fn degraded(reason: DegradedReason) -> Self {
        Self {
            feedback: Feedback::degraded(reason),
            source: FeedbackSource::Degraded(reason),
        }
    }
}

pub struct FeedbackService {
    store: Arc<dyn AnalysisStore>,
    knowledge: Arc<dyn KnowledgeBase>,
    model: Arc<dyn LanguageModel>,
}

impl FeedbackService {
    pub fn new(
        store: Arc<dyn AnalysisStore>,
        knowledge: Arc<dyn KnowledgeBase>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            store,
            knowledge,
            model,
        }
    }

    /// Return the cached feedback for the video's analysis, generating and
    /// caching it first when absent or when `force` is set.
    ///
    /// Fails without touching the model unless the analysis is `Completed`.
    #[tracing::instrument(skip_all, fields(video_id = %video_id, force = force))]
    pub async fn get_or_generate(
        &self,
        video_id: DbId,
        force: bool,
    ) -> Result<FeedbackResult, ServiceError> {
        let video = self
            .store
            .find_video(video_id)
            .await?
            .ok_or(ServiceError::VideoNotFound(video_id))?;
        let analysis = self
            .store
            .find_analysis(video_id)
            .await?
            .ok_or(ServiceError::AnalysisNotFound(video_id))?;

        let Some(frames) = analysis.completed_frames() else {
            return Err(ServiceError::NotCompleted {
                status: analysis.status,
            });
        };

        if !force {
            if let Some(cached) = analysis.cached_feedback() {
                tracing::debug!("Serving cached feedback");
                return Ok(FeedbackResult {
                    feedback: cached.clone(),
                    source: FeedbackSource::Cached,
                });
            }
        }

        let request = FeedbackRequest {
            stroke_type: video.stroke_type,
            metrics: summarize(frames),
        };
        let candidates = match self.knowledge.list_candidate_drills().await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "Drill candidates unavailable, generating without them");
                Vec::new()
            }
        };

        let prompt = build_prompt(&request, &candidates);
        let raw = match self.model.generate_structured(&prompt, &response_schema()).await {
            Ok(raw) => raw,
            Err(LlmError::NotConfigured) => {
                tracing::warn!("Language model not configured, returning degraded feedback");
                return Ok(FeedbackResult::degraded(DegradedReason::NotConfigured));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Feedback generation failed");
                return Ok(FeedbackResult::degraded(DegradedReason::Unavailable));
            }
        };
        let feedback = match parse_response(&raw, &candidates) {
            Ok(feedback) => feedback,
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable feedback response");
                return Ok(FeedbackResult::degraded(DegradedReason::Unparseable));
            }
        };

        self.cache(&analysis, feedback.clone()).await?;
        tracing::info!(drills = feedback.recommended_drills.len(), "Feedback generated");
        Ok(FeedbackResult {
            feedback,
            source: FeedbackSource::Generated,
        })
    }

    /// Store `feedback` on the analysis it was generated from. A re-trigger
    /// that happened meanwhile wins; the feedback is then returned uncached.
    async fn cache(&self, analysis: &Analysis, feedback: Feedback) -> Result<(), StoreError> {
        let generation = analysis.generation;
        let attached = self
            .store
            .transition(
                analysis.video_id,
                Box::new(move |a: &mut Analysis| {
                    a.attach_feedback(generation, feedback, Utc::now())
                }),
            )
            .await;
        match attached {
            Ok(_) => Ok(()),
            Err(StoreError::Transition(
                err @ (TransitionError::Stale { .. } | TransitionError::Illegal { .. }),
            )) => {
                tracing::warn!(error = %err, "Analysis changed during generation, feedback not cached");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

