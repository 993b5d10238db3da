//! Worker pool: `concurrency` consumers pulling analysis requests off the
//! queue and running them one at a time each.
//!
//! Each consumer claims a message, runs the attempt to its end, then acks
//! or reschedules the message according to the [`JobOutcome`]. The claim is
//! renewed while the attempt runs. A claimed message that is never acked
//! (worker crash) becomes visible again once its claim lease expires, so
//! delivery is at-least-once.

use std::sync::Arc;
use std::time::Duration;

use carlitos_pipeline::job::{AnalysisJobRunner, JobOutcome};
use carlitos_pipeline::lease;
use carlitos_pipeline::queue::{Delivery, JobQueue};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::WorkerConfig;

/// Redelivery delay when the analysis store itself failed.
const STORE_RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    runner: Arc<AnalysisJobRunner>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn JobQueue>, runner: Arc<AnalysisJobRunner>, config: WorkerConfig) -> Self {
        Self {
            queue,
            runner,
            config,
        }
    }

    /// Run every consumer until `cancel` fires. Attempts already running
    /// are finished before this returns.
    pub async fn run(&self, cancel: CancellationToken) {
        match self.queue.pending_count().await {
            Ok(pending) => tracing::info!(
                concurrency = self.config.concurrency,
                pending,
                "Worker pool started",
            ),
            Err(e) => tracing::warn!(error = %e, "Worker pool started, queue depth unknown"),
        }

        let tracker = TaskTracker::new();
        for worker in 0..self.config.concurrency {
            let consumer = Consumer {
                worker,
                queue: Arc::clone(&self.queue),
                runner: Arc::clone(&self.runner),
                poll_interval: self.config.poll_interval,
                claim_lease: self.config.analysis.lease,
            };
            tracker.spawn(consumer.run(cancel.clone()));
        }
        tracker.close();
        tracker.wait().await;

        tracing::info!("Worker pool stopped");
    }
}

struct Consumer {
    worker: usize,
    queue: Arc<dyn JobQueue>,
    runner: Arc<AnalysisJobRunner>,
    poll_interval: Duration,
    claim_lease: Duration,
}

impl Consumer {
    async fn run(self, cancel: CancellationToken) {
        tracing::debug!(worker = self.worker, "Consumer started");

        while !cancel.is_cancelled() {
            match self.queue.claim(self.claim_lease).await {
                Ok(Some(delivery)) => {
                    self.process(delivery).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(worker = self.worker, error = %e, "Queue claim failed");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        tracing::debug!(worker = self.worker, "Consumer stopped");
    }

    async fn process(&self, delivery: Delivery) {
        let request = delivery.request;
        tracing::debug!(
            worker = self.worker,
            video_id = %request.video_id,
            generation = request.generation,
            attempt = request.attempt,
            deliveries = delivery.deliveries,
            "Claimed analysis request",
        );

        let outcome = lease::renewing(
            self.runner.run(request),
            lease::renewal_interval(self.claim_lease),
            || self.extend_claim(&delivery),
        )
        .await;

        let settled = match outcome {
            Ok(JobOutcome::RetryScheduled {
                next_attempt,
                delay,
            }) => self.queue.retry_later(&delivery, next_attempt, delay).await,
            Ok(JobOutcome::Deferred { delay }) => {
                self.queue.retry_later(&delivery, request.attempt, delay).await
            }
            Ok(
                JobOutcome::Completed { .. } | JobOutcome::Failed { .. } | JobOutcome::Skipped(_),
            ) => self.queue.ack(&delivery).await,
            Err(e) => {
                tracing::warn!(
                    video_id = %request.video_id,
                    error = %e,
                    "Analysis store unavailable, redelivering request",
                );
                self.queue
                    .retry_later(&delivery, request.attempt, STORE_RETRY_DELAY)
                    .await
            }
        };

        // The claim lease still bounds how long the message stays hidden.
        if let Err(e) = settled {
            tracing::error!(
                message_id = delivery.id,
                video_id = %request.video_id,
                error = %e,
                "Failed to settle queue message",
            );
        }
    }

    async fn extend_claim(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.extend_claim(delivery, self.claim_lease).await {
            tracing::warn!(message_id = delivery.id, error = %e, "Failed to extend queue claim");
        }
    }
}
