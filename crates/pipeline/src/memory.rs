//! In-process implementations of [`AnalysisStore`] and [`JobQueue`].
//!
//! Used by tests and single-process setups. State lives behind a
//! `std::sync::Mutex` that is never held across an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use carlitos_core::analysis::Analysis;
use carlitos_core::types::{DbId, Timestamp};
use tokio::time::Instant;

use crate::queue::{AnalysisRequest, Delivery, JobQueue, QueueError};
use crate::store::{AnalysisStore, StoreError, Transition, VideoRef};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    videos: HashMap<DbId, (VideoRef, bool)>,
    analyses: HashMap<DbId, Analysis>,
}

#[derive(Default)]
pub struct MemoryAnalysisStore {
    state: Mutex<StoreState>,
}

impl MemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an uploaded video.
    pub fn insert_video(&self, video: VideoRef) {
        lock(&self.state).videos.insert(video.id, (video, false));
    }

    /// Mark a video deleted; it stays stored but is no longer found.
    pub fn soft_delete_video(&self, video_id: DbId) {
        if let Some((_, deleted)) = lock(&self.state).videos.get_mut(&video_id) {
            *deleted = true;
        }
    }
}

#[async_trait]
impl AnalysisStore for MemoryAnalysisStore {
    async fn find_video(&self, video_id: DbId) -> Result<Option<VideoRef>, StoreError> {
        Ok(lock(&self.state)
            .videos
            .get(&video_id)
            .filter(|(_, deleted)| !deleted)
            .map(|(video, _)| video.clone()))
    }

    async fn find_analysis(&self, video_id: DbId) -> Result<Option<Analysis>, StoreError> {
        Ok(lock(&self.state).analyses.get(&video_id).cloned())
    }

    async fn reset_for_submission(
        &self,
        video_id: DbId,
        now: Timestamp,
    ) -> Result<Analysis, StoreError> {
        let mut state = lock(&self.state);
        match state.analyses.get_mut(&video_id) {
            Some(existing) => {
                let mut updated = existing.clone();
                updated.retrigger(now)?;
                *existing = updated.clone();
                Ok(updated)
            }
            None => {
                let analysis = Analysis::new(uuid::Uuid::now_v7(), video_id, now);
                state.analyses.insert(video_id, analysis.clone());
                Ok(analysis)
            }
        }
    }

    async fn transition(
        &self,
        video_id: DbId,
        transition: Transition,
    ) -> Result<Analysis, StoreError> {
        let mut state = lock(&self.state);
        let current = state
            .analyses
            .get_mut(&video_id)
            .ok_or(StoreError::AnalysisNotFound(video_id))?;
        let mut updated = current.clone();
        transition(&mut updated)?;
        *current = updated.clone();
        Ok(updated)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

struct Entry {
    id: i64,
    request: AnalysisRequest,
    available_at: Instant,
    claimed_until: Option<Instant>,
    deliveries: i32,
}

impl Entry {
    fn claimable(&self, now: Instant) -> bool {
        self.available_at <= now && self.claimed_until.map_or(true, |until| until <= now)
    }
}

/// Queue with the same visibility rules as the Postgres one: a claim hides
/// the message until acked, rescheduled, or the lease runs out.
#[derive(Default)]
pub struct MemoryJobQueue {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicI64,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests currently stored, claimed or not, in enqueue order.
    pub fn requests(&self) -> Vec<AnalysisRequest> {
        lock(&self.entries).iter().map(|e| e.request).collect()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, request: AnalysisRequest, delay: Duration) -> Result<(), QueueError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        lock(&self.entries).push(Entry {
            id,
            request,
            available_at: Instant::now() + delay,
            claimed_until: None,
            deliveries: 0,
        });
        Ok(())
    }

    async fn claim(&self, lease: Duration) -> Result<Option<Delivery>, QueueError> {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        let next = entries
            .iter_mut()
            .filter(|e| e.claimable(now))
            .min_by_key(|e| (e.available_at, e.id));
        Ok(next.map(|entry| {
            entry.claimed_until = Some(now + lease);
            entry.deliveries += 1;
            Delivery {
                id: entry.id,
                request: entry.request,
                deliveries: entry.deliveries,
            }
        }))
    }

    async fn extend_claim(&self, delivery: &Delivery, lease: Duration) -> Result<(), QueueError> {
        let mut entries = lock(&self.entries);
        let claimed = entries
            .iter_mut()
            .find(|e| e.id == delivery.id && e.claimed_until.is_some());
        if let Some(entry) = claimed {
            entry.claimed_until = Some(Instant::now() + lease);
        }
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        lock(&self.entries).retain(|e| e.id != delivery.id);
        Ok(())
    }

    async fn retry_later(
        &self,
        delivery: &Delivery,
        attempt: i32,
        delay: Duration,
    ) -> Result<(), QueueError> {
        if let Some(entry) = lock(&self.entries).iter_mut().find(|e| e.id == delivery.id) {
            entry.request.attempt = attempt;
            entry.available_at = Instant::now() + delay;
            entry.claimed_until = None;
        }
        Ok(())
    }

    async fn pending_count(&self) -> Result<i64, QueueError> {
        let now = Instant::now();
        let count = lock(&self.entries)
            .iter()
            .filter(|e| e.claimed_until.map_or(true, |until| until <= now))
            .count();
        Ok(count as i64)
    }
}
