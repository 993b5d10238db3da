//! Analysis lifecycle: status enum, transition table, and the record type
//! whose methods are the only way to move an analysis between states.
//!
//! ```text
//!             dispatch              extraction ok
//!   PENDING ───────────▶ PROCESSING ──────────────▶ COMPLETED
//!      ▲                  │   ▲  │                      │
//!      │                  │   └──┘ retry / redelivery   │
//!      │                  │ budget exhausted            │
//!      │                  ▼ or non-retriable            │
//!      │                FAILED                          │
//!      └──────── re-trigger (any state) ◀───────────────┘
//! ```
//!
//! Every analysis carries a `generation` that is bumped on each re-trigger.
//! Worker-side transitions name the generation they were started for, and a
//! transition for a superseded generation is rejected as stale. This is how
//! a re-trigger that lands while an attempt is still running wins over that
//! attempt's eventual write.

use std::fmt;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::feedback::Feedback;
use crate::pose::FrameResult;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// AnalysisStatus
// ---------------------------------------------------------------------------

/// Externally observable lifecycle status of an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    /// String representation for database storage.
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }

    /// Parse the database representation.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "pending" => Ok(AnalysisStatus::Pending),
            "processing" => Ok(AnalysisStatus::Processing),
            "completed" => Ok(AnalysisStatus::Completed),
            "failed" => Ok(AnalysisStatus::Failed),
            other => Err(CoreError::Validation(format!(
                "Unknown analysis status '{other}'"
            ))),
        }
    }

    /// Completed and failed analyses only move again on re-trigger.
    pub fn is_terminal(self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Failed)
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

pub mod state_machine {
    use super::AnalysisStatus::{self, *};

    /// Statuses reachable from `from`.
    ///
    /// `Pending` is reachable from everywhere because an explicit re-trigger
    /// is accepted in any state. `Processing → Processing` covers retries and
    /// redelivery after a worker died.
    pub fn valid_transitions(from: AnalysisStatus) -> &'static [AnalysisStatus] {
        match from {
            Pending => &[Processing, Pending],
            Processing => &[Completed, Failed, Processing, Pending],
            Completed => &[Pending],
            Failed => &[Pending],
        }
    }

    pub fn can_transition(from: AnalysisStatus, to: AnalysisStatus) -> bool {
        valid_transitions(from).contains(&to)
    }
}

// ---------------------------------------------------------------------------
// Transition errors
// ---------------------------------------------------------------------------

/// Why a transition was not applied.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("generation {requested} was superseded by generation {current}")]
    Stale { requested: i64, current: i64 },

    #[error("an attempt holds the analysis until {until}")]
    Leased { until: Timestamp },

    #[error("illegal transition {from} -> {to}")]
    Illegal {
        from: AnalysisStatus,
        to: AnalysisStatus,
    },

    #[error("attempt {attempt} no longer holds the analysis")]
    LeaseLost { attempt: i32 },
}

impl From<TransitionError> for CoreError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Illegal { from, to } => CoreError::InvalidTransition { from, to },
            other => CoreError::Conflict(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis record
// ---------------------------------------------------------------------------

/// The persisted analysis for one video.
///
/// `frames` and `feedback` survive a re-trigger so the previous results stay
/// stored until a new completion overwrites them; [`Analysis::snapshot`] only
/// exposes them while the status is `Completed`. Fields are public for the
/// persistence layer; mutate through the transition methods.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub id: DbId,
    pub video_id: DbId,
    pub status: AnalysisStatus,
    pub frames: Option<Vec<FrameResult>>,
    pub feedback: Option<Feedback>,
    pub error_reason: Option<String>,
    /// Bumped on every re-trigger.
    pub generation: i64,
    /// Attempt number of the current generation (0 before the first dispatch).
    pub attempts: i32,
    /// Set while a worker holds the current attempt.
    pub leased_until: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Analysis {
    /// A fresh pending analysis at generation 1.
    pub fn new(id: DbId, video_id: DbId, now: Timestamp) -> Self {
        Self {
            id,
            video_id,
            status: AnalysisStatus::Pending,
            frames: None,
            feedback: None,
            error_reason: None,
            generation: 1,
            attempts: 0,
            leased_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn check_generation(&self, generation: i64) -> Result<(), TransitionError> {
        if generation == self.generation {
            Ok(())
        } else {
            Err(TransitionError::Stale {
                requested: generation,
                current: self.generation,
            })
        }
    }

    fn check_transition(&self, to: AnalysisStatus) -> Result<(), TransitionError> {
        if state_machine::can_transition(self.status, to) {
            Ok(())
        } else {
            Err(TransitionError::Illegal {
                from: self.status,
                to,
            })
        }
    }

    fn require_processing(&self, to: AnalysisStatus) -> Result<(), TransitionError> {
        if self.status == AnalysisStatus::Processing {
            self.check_transition(to)
        } else {
            Err(TransitionError::Illegal {
                from: self.status,
                to,
            })
        }
    }

    /// Explicit re-trigger: back to `Pending` under a new generation.
    ///
    /// Clears the error reason and the attempt counter. Previously stored
    /// frames and feedback remain until the next completion replaces them.
    /// A lease held by an attempt that is still running is kept, so the new
    /// generation cannot start until that attempt ends or its lease lapses.
    pub fn retrigger(&mut self, now: Timestamp) -> Result<(), TransitionError> {
        self.check_transition(AnalysisStatus::Pending)?;
        self.status = AnalysisStatus::Pending;
        self.error_reason = None;
        self.generation += 1;
        self.attempts = 0;
        self.updated_at = now;
        Ok(())
    }

    /// An attempt of a superseded `generation` has ended; drop the lease it
    /// still holds. No effect once the current generation has started its
    /// own attempt.
    pub fn release_superseded(
        &mut self,
        generation: i64,
        now: Timestamp,
    ) -> Result<(), TransitionError> {
        if generation >= self.generation {
            return Err(TransitionError::Illegal {
                from: self.status,
                to: AnalysisStatus::Pending,
            });
        }
        if self.status == AnalysisStatus::Pending && self.leased_until.is_some() {
            self.leased_until = None;
            self.updated_at = now;
        }
        Ok(())
    }

    /// A worker starts `attempt` for `generation` and holds it for `lease`.
    ///
    /// Allowed from `Pending`, and from `Processing` when no live lease
    /// exists (a retry that was re-queued, or a redelivery after the previous
    /// holder died).
    ///
    /// Taking over an expired lease of this generation counts the abandoned
    /// attempt: `attempts` becomes at least one past it, so a video that
    /// keeps killing its worker still runs out of attempts. Read the
    /// effective number back from `attempts`.
    pub fn begin_attempt(
        &mut self,
        generation: i64,
        attempt: i32,
        now: Timestamp,
        lease: TimeDelta,
    ) -> Result<(), TransitionError> {
        self.check_generation(generation)?;
        self.check_transition(AnalysisStatus::Processing)?;
        let mut effective = attempt;
        if let Some(until) = self.leased_until {
            if until > now {
                return Err(TransitionError::Leased { until });
            }
            if self.status == AnalysisStatus::Processing {
                effective = effective.max(self.attempts + 1);
            }
        }
        self.status = AnalysisStatus::Processing;
        self.attempts = effective;
        self.leased_until = Some(now + lease);
        self.updated_at = now;
        Ok(())
    }

    /// Extend the lease of a running attempt.
    ///
    /// The holder is identified by `generation` and `attempt`. A superseded
    /// generation may keep renewing the lease it still holds while the newer
    /// generation waits in `Pending`.
    pub fn renew_lease(
        &mut self,
        generation: i64,
        attempt: i32,
        now: Timestamp,
        lease: TimeDelta,
    ) -> Result<(), TransitionError> {
        let holds = if generation == self.generation {
            self.status == AnalysisStatus::Processing && self.attempts == attempt
        } else {
            generation < self.generation && self.status == AnalysisStatus::Pending
        };
        if !holds || self.leased_until.is_none() {
            return Err(TransitionError::LeaseLost { attempt });
        }
        self.leased_until = Some(now + lease);
        self.updated_at = now;
        Ok(())
    }

    /// Release the lease after a failed attempt that will be retried.
    ///
    /// The status stays `Processing` for observers.
    pub fn schedule_retry(
        &mut self,
        generation: i64,
        attempt: i32,
        now: Timestamp,
    ) -> Result<(), TransitionError> {
        self.check_generation(generation)?;
        self.require_processing(AnalysisStatus::Processing)?;
        self.attempts = attempt;
        self.leased_until = None;
        self.updated_at = now;
        Ok(())
    }

    /// Extraction succeeded: store frames and clear any stale feedback.
    pub fn complete(
        &mut self,
        generation: i64,
        frames: Vec<FrameResult>,
        now: Timestamp,
    ) -> Result<(), TransitionError> {
        self.check_generation(generation)?;
        self.require_processing(AnalysisStatus::Completed)?;
        self.status = AnalysisStatus::Completed;
        self.frames = Some(frames);
        self.feedback = None;
        self.error_reason = None;
        self.leased_until = None;
        self.updated_at = now;
        Ok(())
    }

    /// Extraction failed for good.
    pub fn fail(
        &mut self,
        generation: i64,
        reason: impl Into<String>,
        now: Timestamp,
    ) -> Result<(), TransitionError> {
        self.check_generation(generation)?;
        self.require_processing(AnalysisStatus::Failed)?;
        self.status = AnalysisStatus::Failed;
        self.error_reason = Some(reason.into());
        self.leased_until = None;
        self.updated_at = now;
        Ok(())
    }

    /// Cache generated feedback. Only valid while `Completed`.
    pub fn attach_feedback(
        &mut self,
        generation: i64,
        feedback: Feedback,
        now: Timestamp,
    ) -> Result<(), TransitionError> {
        self.check_generation(generation)?;
        if self.status != AnalysisStatus::Completed {
            return Err(TransitionError::Illegal {
                from: self.status,
                to: AnalysisStatus::Completed,
            });
        }
        self.feedback = Some(feedback);
        self.updated_at = now;
        Ok(())
    }

    /// Frames, visible only once completed.
    pub fn completed_frames(&self) -> Option<&[FrameResult]> {
        match self.status {
            AnalysisStatus::Completed => self.frames.as_deref(),
            _ => None,
        }
    }

    /// Cached feedback, visible only once completed.
    pub fn cached_feedback(&self) -> Option<&Feedback> {
        match self.status {
            AnalysisStatus::Completed => self.feedback.as_ref(),
            _ => None,
        }
    }

    /// Point-in-time view honoring the status invariants.
    pub fn snapshot(&self) -> AnalysisSnapshot {
        AnalysisSnapshot {
            id: self.id,
            video_id: self.video_id,
            status: self.status,
            frames: self.completed_frames().map(<[FrameResult]>::to_vec),
            feedback: self.cached_feedback().cloned(),
            error_reason: match self.status {
                AnalysisStatus::Failed => self.error_reason.clone(),
                _ => None,
            },
            attempts: self.attempts,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// What `getAnalysis` returns: frames and feedback only when completed,
/// the error reason only when failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisSnapshot {
    pub id: DbId,
    pub video_id: DbId,
    pub status: AnalysisStatus,
    pub frames: Option<Vec<FrameResult>>,
    pub feedback: Option<Feedback>,
    pub error_reason: Option<String>,
    pub attempts: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
