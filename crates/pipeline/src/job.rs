//! One analysis attempt, end to end.
//!
//! [`AnalysisJobRunner::run`] claims the analysis row for the attempt,
//! runs the extractor, and records the outcome. Every write names the
//! generation the request was issued for, so a result produced for a
//! superseded generation is discarded instead of overwriting the newer
//! state. Errors from the extractor never escape: they become either a
//! scheduled retry or a terminal failure.

use std::sync::Arc;
use std::time::Duration;

use carlitos_core::analysis::{Analysis, AnalysisStatus, TransitionError};
use carlitos_core::retry::{RetryDecision, RetryPolicy};
use chrono::{TimeDelta, Utc};

use crate::extractor::LandmarkExtractor;
use crate::lease;
use crate::queue::AnalysisRequest;
use crate::store::{AnalysisStore, StoreError};

/// Reason recorded when the video disappeared before processing.
pub const VIDEO_NOT_FOUND: &str = "video not found";

/// Reason recorded when every attempt ended with its worker gone.
pub const ATTEMPTS_ABANDONED: &str = "attempts exhausted: worker stopped before finishing";

/// Upper bound on the row lease.
const MAX_LEASE: Duration = Duration::from_secs(7 * 24 * 3600);

/// A deferred request is re-checked at least this often, so it starts soon
/// after a superseded attempt releases the lease.
const MAX_DEFER: Duration = Duration::from_secs(15);

/// Why a request was dropped without running.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// A re-trigger started a newer generation.
    Superseded { current: i64 },
    /// The analysis already reached a terminal state for this generation.
    AlreadyFinished,
    /// The analysis row no longer exists.
    Missing,
}

/// What the queue consumer should do with the message.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Frames persisted; ack.
    Completed { frames: usize },
    /// Attempt failed with budget left; redeliver as `next_attempt` after `delay`.
    RetryScheduled { next_attempt: i32, delay: Duration },
    /// Terminal failure recorded; ack.
    Failed { reason: String },
    /// Nothing to do; ack.
    Skipped(SkipReason),
    /// Another attempt holds the analysis; redeliver unchanged after `delay`.
    Deferred { delay: Duration },
}

pub struct AnalysisJobRunner {
    store: Arc<dyn AnalysisStore>,
    extractor: Arc<LandmarkExtractor>,
    retry: RetryPolicy,
    lease: TimeDelta,
    renew_every: Duration,
}

impl AnalysisJobRunner {
    pub fn new(
        store: Arc<dyn AnalysisStore>,
        extractor: Arc<LandmarkExtractor>,
        retry: RetryPolicy,
        lease: Duration,
    ) -> Self {
        let lease = lease.min(MAX_LEASE);
        Self {
            store,
            extractor,
            retry,
            lease: TimeDelta::from_std(lease).unwrap_or(TimeDelta::hours(1)),
            renew_every: lease::renewal_interval(lease),
        }
    }

    /// Run one attempt. `Err` means the store itself failed and nothing
    /// about the attempt could be recorded.
    #[tracing::instrument(
        skip_all,
        fields(video_id = %request.video_id, generation = request.generation, attempt = request.attempt),
    )]
    pub async fn run(&self, request: AnalysisRequest) -> Result<JobOutcome, StoreError> {
        let AnalysisRequest {
            video_id,
            generation,
            attempt,
        } = request;
        let lease = self.lease;

        let Some(video) = self.store.find_video(video_id).await? else {
            return self.fail_missing_video(request).await;
        };

        let max_attempts = self.retry.max_attempts;
        let begun = self
            .store
            .transition(
                video_id,
                Box::new(move |a: &mut Analysis| {
                    let now = Utc::now();
                    a.begin_attempt(generation, attempt, now, lease)?;
                    if a.attempts > max_attempts {
                        a.fail(generation, ATTEMPTS_ABANDONED, now)?;
                    }
                    Ok(())
                }),
            )
            .await;
        let begun = match begun {
            Ok(analysis) => analysis,
            Err(err) => return Self::not_started(err),
        };
        if begun.status == AnalysisStatus::Failed {
            tracing::error!(max_attempts, "Analysis failed, abandoned attempts exhausted");
            return Ok(JobOutcome::Failed {
                reason: ATTEMPTS_ABANDONED.to_string(),
            });
        }
        if begun.attempts != attempt {
            tracing::warn!(effective_attempt = begun.attempts, "Took over an abandoned attempt");
        }
        let attempt = begun.attempts;
        let request = AnalysisRequest { attempt, ..request };
        tracing::info!(attempt, "Analysis attempt started");

        let extracted = lease::renewing(
            self.extractor.extract(&video.storage_path),
            self.renew_every,
            || self.renew_lease(request),
        )
        .await;

        match extracted {
            Ok(frames) => {
                let count = frames.len();
                let completed = self
                    .store
                    .transition(
                        video_id,
                        Box::new(move |a: &mut Analysis| a.complete(generation, frames, Utc::now())),
                    )
                    .await;
                match completed {
                    Ok(_) => {
                        tracing::info!(frames = count, "Analysis completed");
                        Ok(JobOutcome::Completed { frames: count })
                    }
                    Err(err) => self.discarded(request, err).await,
                }
            }
            Err(err) if !err.is_retriable() => {
                tracing::error!(error = %err, "Analysis failed permanently");
                self.fail(request, err.to_string()).await
            }
            Err(err) => match self.retry.decide(attempt) {
                RetryDecision::GiveUp => {
                    tracing::error!(error = %err, "Analysis failed, attempts exhausted");
                    self.fail(request, err.to_string()).await
                }
                RetryDecision::RetryAfter(delay) => {
                    let released = self
                        .store
                        .transition(
                            video_id,
                            Box::new(move |a: &mut Analysis| {
                                a.schedule_retry(generation, attempt, Utc::now())
                            }),
                        )
                        .await;
                    match released {
                        Ok(_) => {
                            tracing::warn!(
                                error = %err,
                                retry_in_secs = delay.as_secs(),
                                "Analysis attempt failed, retry scheduled",
                            );
                            Ok(JobOutcome::RetryScheduled {
                                next_attempt: attempt + 1,
                                delay,
                            })
                        }
                        Err(store_err) => self.discarded(request, store_err).await,
                    }
                }
            },
        }
    }

    /// Push the row lease forward while extraction runs. A failed renewal is
    /// only logged: the extraction finishes and its write decides.
    async fn renew_lease(&self, request: AnalysisRequest) {
        let AnalysisRequest {
            video_id,
            generation,
            attempt,
        } = request;
        let lease = self.lease;
        let renewed = self
            .store
            .transition(
                video_id,
                Box::new(move |a: &mut Analysis| {
                    a.renew_lease(generation, attempt, Utc::now(), lease)
                }),
            )
            .await;
        match renewed {
            Ok(_) => tracing::debug!("Analysis lease renewed"),
            Err(err) => tracing::warn!(error = %err, "Could not renew analysis lease"),
        }
    }

    async fn fail(&self, request: AnalysisRequest, reason: String) -> Result<JobOutcome, StoreError> {
        let generation = request.generation;
        let recorded = reason.clone();
        let failed = self
            .store
            .transition(
                request.video_id,
                Box::new(move |a: &mut Analysis| a.fail(generation, recorded, Utc::now())),
            )
            .await;
        match failed {
            Ok(_) => Ok(JobOutcome::Failed { reason }),
            Err(err) => self.discarded(request, err).await,
        }
    }

    /// The video is gone: record a terminal failure without extracting.
    async fn fail_missing_video(&self, request: AnalysisRequest) -> Result<JobOutcome, StoreError> {
        let AnalysisRequest {
            video_id,
            generation,
            attempt,
        } = request;
        let lease = self.lease;
        let result = self
            .store
            .transition(
                video_id,
                Box::new(move |a: &mut Analysis| {
                    let now = Utc::now();
                    a.begin_attempt(generation, attempt, now, lease)?;
                    a.fail(generation, VIDEO_NOT_FOUND, now)
                }),
            )
            .await;
        match result {
            Ok(_) => {
                tracing::error!("Analysis failed: video not found");
                Ok(JobOutcome::Failed {
                    reason: VIDEO_NOT_FOUND.to_string(),
                })
            }
            Err(err) => Self::not_started(err),
        }
    }

    /// Map a rejected `begin_attempt` to the queue action.
    fn not_started(err: StoreError) -> Result<JobOutcome, StoreError> {
        match err {
            StoreError::Transition(TransitionError::Leased { until }) => {
                let delay = (until - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .min(MAX_DEFER);
                tracing::debug!(retry_in_secs = delay.as_secs(), "Analysis held by another attempt");
                Ok(JobOutcome::Deferred { delay })
            }
            StoreError::Transition(TransitionError::Stale { current, .. }) => {
                tracing::info!(current_generation = current, "Request superseded by re-trigger");
                Ok(JobOutcome::Skipped(SkipReason::Superseded { current }))
            }
            StoreError::Transition(TransitionError::Illegal { from, .. }) => {
                tracing::info!(status = %from, "Analysis already finished, dropping request");
                Ok(JobOutcome::Skipped(SkipReason::AlreadyFinished))
            }
            StoreError::AnalysisNotFound(_) => Ok(JobOutcome::Skipped(SkipReason::Missing)),
            other => Err(other),
        }
    }

    /// Map a rejected write after extraction ran; the result is dropped.
    ///
    /// When a re-trigger superseded this attempt, its lease is released so
    /// the newer generation can start right away.
    async fn discarded(
        &self,
        request: AnalysisRequest,
        err: StoreError,
    ) -> Result<JobOutcome, StoreError> {
        match err {
            StoreError::Transition(TransitionError::Stale { current, .. }) => {
                tracing::warn!(
                    current_generation = current,
                    "Re-triggered during extraction, discarding result",
                );
                let generation = request.generation;
                let released = self
                    .store
                    .transition(
                        request.video_id,
                        Box::new(move |a: &mut Analysis| {
                            a.release_superseded(generation, Utc::now())
                        }),
                    )
                    .await;
                if let Err(err) = released {
                    tracing::warn!(error = %err, "Could not release superseded lease");
                }
                Ok(JobOutcome::Skipped(SkipReason::Superseded { current }))
            }
            StoreError::Transition(err) => {
                tracing::warn!(error = %err, "Analysis changed during extraction, discarding result");
                Ok(JobOutcome::Skipped(SkipReason::AlreadyFinished))
            }
            StoreError::AnalysisNotFound(_) => Ok(JobOutcome::Skipped(SkipReason::Missing)),
            other => Err(other),
        }
    }
}
