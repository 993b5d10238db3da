#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use carlitos_core::analysis::AnalysisStatus;
use carlitos_core::pose::{Landmark, LANDMARK_COUNT};
use carlitos_core::retry::RetryPolicy;
use carlitos_pipeline::config::AnalysisConfig;
use carlitos_pipeline::decoder::{DecodeError, DecodedFrame, FrameReader, VideoDecoder};
use carlitos_pipeline::detector::{DetectorError, PoseDetector, PoseDetectorProvider};
use carlitos_pipeline::extractor::LandmarkExtractor;
use carlitos_pipeline::feedback::FeedbackService;
use carlitos_pipeline::job::AnalysisJobRunner;
use carlitos_pipeline::knowledge::StaticKnowledgeBase;
use carlitos_pipeline::llm::{LanguageModel, LlmError};
use carlitos_pipeline::memory::{MemoryAnalysisStore, MemoryJobQueue};
use carlitos_pipeline::service::AnalysisService;
use carlitos_pipeline::storage::LocalStorage;
use carlitos_pipeline::store::{AnalysisStore, VideoRef};
use carlitos_worker::config::WorkerConfig;
use carlitos_worker::pool::WorkerPool;
use image::RgbImage;
use tempfile::TempDir;
use uuid::Uuid;

pub const FRAMES: u64 = 3;

/// Emits [`FRAMES`] blank frames for any file.
pub struct BlankDecoder;

struct BlankReader {
    next: u64,
}

#[async_trait]
impl FrameReader for BlankReader {
    async fn next_frame(&mut self) -> Result<Option<DecodedFrame>, DecodeError> {
        if self.next == FRAMES {
            return Ok(None);
        }
        self.next += 1;
        Ok(Some(DecodedFrame {
            index: self.next - 1,
            timestamp: (self.next - 1) as f64 / 25.0,
            image: RgbImage::new(2, 2),
        }))
    }
}

#[async_trait]
impl VideoDecoder for BlankDecoder {
    async fn open(&self, _path: &Path) -> Result<Box<dyn FrameReader>, DecodeError> {
        Ok(Box::new(BlankReader { next: 0 }))
    }
}

/// Detector sessions opened so far, and how many ran at the same time.
#[derive(Default)]
pub struct SessionCounters {
    pub created: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
}

/// Finds a standing pose in every frame, taking `frame_delay` per frame;
/// the first `failures` sessions fail to start.
#[derive(Default)]
pub struct StandingDetector {
    pub failures: AtomicU32,
    pub frame_delay: Duration,
    pub sessions: Arc<SessionCounters>,
}

struct StandingSession {
    frame_delay: Duration,
    counters: Arc<SessionCounters>,
}

impl Drop for StandingSession {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PoseDetector for StandingSession {
    async fn detect(
        &mut self,
        _frame: &DecodedFrame,
    ) -> Result<Option<Vec<Landmark>>, DetectorError> {
        if !self.frame_delay.is_zero() {
            tokio::time::sleep(self.frame_delay).await;
        }
        let landmarks = (0..LANDMARK_COUNT)
            .map(|i| Landmark::new(0.5, i as f64 / LANDMARK_COUNT as f64, 0.0, 0.9))
            .collect();
        Ok(Some(landmarks))
    }
}

#[async_trait]
impl PoseDetectorProvider for StandingDetector {
    async fn create(&self) -> Result<Box<dyn PoseDetector>, DetectorError> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(DetectorError::Unavailable("warming up".into()));
        }
        let counters = &self.sessions;
        counters.created.fetch_add(1, Ordering::SeqCst);
        let active = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_active.fetch_max(active, Ordering::SeqCst);
        Ok(Box::new(StandingSession {
            frame_delay: self.frame_delay,
            counters: Arc::clone(counters),
        }))
    }
}

/// Feedback is not exercised by the worker.
pub struct NoModel;

#[async_trait]
impl LanguageModel for NoModel {
    async fn generate_structured(
        &self,
        _prompt: &str,
        _schema: &serde_json::Value,
    ) -> Result<String, LlmError> {
        Err(LlmError::NotConfigured)
    }
}

pub struct TestWorker {
    pub dir: TempDir,
    pub store: Arc<MemoryAnalysisStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub detector: Arc<StandingDetector>,
    pub service: AnalysisService,
    pub pool: WorkerPool,
}

impl TestWorker {
    pub fn new(concurrency: usize) -> Self {
        Self::build(concurrency, StandingDetector::default(), Duration::from_secs(60))
    }

    /// A pool whose analysis lease and queue claim last `lease`.
    pub fn build(concurrency: usize, detector: StandingDetector, lease: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryAnalysisStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let detector = Arc::new(detector);

        let analysis = AnalysisConfig {
            retry: RetryPolicy::fixed(3, Duration::from_millis(20)),
            lease,
        };
        let extractor = Arc::new(LandmarkExtractor::new(
            Arc::new(LocalStorage::new(dir.path().to_path_buf())),
            Arc::new(BlankDecoder),
            detector.clone(),
        ));
        let runner = Arc::new(AnalysisJobRunner::new(
            store.clone(),
            extractor,
            analysis.retry,
            analysis.lease,
        ));
        let pool = WorkerPool::new(
            queue.clone(),
            runner,
            WorkerConfig {
                concurrency,
                poll_interval: Duration::from_millis(10),
                analysis,
            },
        );
        let feedback = FeedbackService::new(
            store.clone(),
            Arc::new(StaticKnowledgeBase::default()),
            Arc::new(NoModel),
        );
        let service = AnalysisService::new(store.clone(), queue.clone(), feedback);

        Self {
            dir,
            store,
            queue,
            detector,
            service,
            pool,
        }
    }

    /// Write a video file and register it.
    pub fn add_video(&self) -> Uuid {
        let id = Uuid::new_v4();
        let key = format!("{id}.mp4");
        std::fs::write(self.dir.path().join(&key), b"not really a video").unwrap();
        self.store.insert_video(VideoRef {
            id,
            storage_path: key,
            stroke_type: None,
        });
        id
    }

    pub async fn status(&self, video_id: Uuid) -> AnalysisStatus {
        self.store
            .find_analysis(video_id)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    /// Poll until every analysis has reached a terminal status.
    pub async fn wait_until_finished(&self, videos: &[Uuid]) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let mut done = true;
                for id in videos {
                    done &= self.status(*id).await.is_terminal();
                }
                if done {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("analyses did not finish in time");
    }
}
