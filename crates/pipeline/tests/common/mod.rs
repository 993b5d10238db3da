//! Fakes for every pipeline collaborator plus a harness wiring them to the
//! in-memory store and queue.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use carlitos_core::ffmpeg::FfmpegError;
use carlitos_core::pose::{index, Landmark, LANDMARK_COUNT};
use carlitos_core::retry::RetryPolicy;
use carlitos_pipeline::decoder::{DecodeError, DecodedFrame, FrameReader, VideoDecoder};
use carlitos_pipeline::detector::{DetectorError, PoseDetector, PoseDetectorProvider};
use carlitos_pipeline::extractor::LandmarkExtractor;
use carlitos_pipeline::feedback::FeedbackService;
use carlitos_pipeline::job::AnalysisJobRunner;
use carlitos_pipeline::knowledge::StaticKnowledgeBase;
use carlitos_pipeline::llm::{LanguageModel, LlmError};
use carlitos_pipeline::memory::{MemoryAnalysisStore, MemoryJobQueue};
use carlitos_pipeline::queue::{AnalysisRequest, Delivery, JobQueue, QueueError};
use carlitos_pipeline::service::AnalysisService;
use carlitos_pipeline::storage::{StagedVideo, StorageError, VideoStorage};
use carlitos_pipeline::store::VideoRef;
use image::RgbImage;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Landmarks
// ---------------------------------------------------------------------------

/// A full landmark set with the right leg bent at exactly 90 degrees.
///
/// Every other joint collapses onto one point, so only the right knee
/// angle is defined.
pub fn right_knee_pose(knee_visibility: f64) -> Vec<Landmark> {
    let mut landmarks = vec![Landmark::new(0.5, 0.5, 0.0, 1.0); LANDMARK_COUNT];
    landmarks[index::RIGHT_HIP] = Landmark::new(0.5, 0.4, 0.0, 1.0);
    landmarks[index::RIGHT_KNEE] = Landmark::new(0.5, 0.5, 0.0, knee_visibility);
    landmarks[index::RIGHT_ANKLE] = Landmark::new(0.6, 0.5, 0.0, 1.0);
    landmarks
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Stages an empty temporary file per fetch and remembers where.
#[derive(Default)]
pub struct FakeStorage {
    staged: Mutex<Vec<PathBuf>>,
    failures: AtomicU32,
}

impl FakeStorage {
    /// Fail the next `n` fetches with a transport error.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn staged_paths(&self) -> Vec<PathBuf> {
        self.staged.lock().unwrap().clone()
    }
}

#[async_trait]
impl VideoStorage for FakeStorage {
    async fn fetch(&self, key: &str) -> Result<StagedVideo, StorageError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Transport(format!("connection reset fetching {key}")));
        }
        let file = tempfile::NamedTempFile::new()?;
        let path = file.into_temp_path();
        self.staged.lock().unwrap().push(path.to_path_buf());
        Ok(StagedVideo::Temporary(path))
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
pub enum DecoderMode {
    Frames(u64),
    /// The file has no video stream.
    NoVideoStream,
}

pub struct FakeDecoder {
    mode: Mutex<DecoderMode>,
    pub opened: AtomicUsize,
}

impl FakeDecoder {
    pub fn new(mode: DecoderMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            opened: AtomicUsize::new(0),
        }
    }

    pub fn set_mode(&self, mode: DecoderMode) {
        *self.mode.lock().unwrap() = mode;
    }
}

struct FakeFrameReader {
    next: u64,
    total: u64,
}

#[async_trait]
impl FrameReader for FakeFrameReader {
    async fn next_frame(&mut self) -> Result<Option<DecodedFrame>, DecodeError> {
        if self.next >= self.total {
            return Ok(None);
        }
        let index = self.next;
        self.next += 1;
        Ok(Some(DecodedFrame {
            index,
            timestamp: index as f64 / 30.0,
            image: RgbImage::new(4, 4),
        }))
    }
}

#[async_trait]
impl VideoDecoder for FakeDecoder {
    async fn open(&self, path: &Path) -> Result<Box<dyn FrameReader>, DecodeError> {
        assert!(path.exists(), "decoder opened a path that was not staged");
        self.opened.fetch_add(1, Ordering::SeqCst);
        match *self.mode.lock().unwrap() {
            DecoderMode::Frames(total) => Ok(Box::new(FakeFrameReader { next: 0, total })),
            DecoderMode::NoVideoStream => Err(DecodeError::Ffmpeg(FfmpegError::NoVideoStream)),
        }
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

type PoseFn = dyn Fn(u64) -> Option<Vec<Landmark>> + Send + Sync;

/// Detector whose output is a function of the frame index.
pub struct FakeDetectorProvider {
    pose: Arc<PoseFn>,
    init_failures: AtomicU32,
    pub created: AtomicUsize,
}

impl FakeDetectorProvider {
    pub fn new(pose: impl Fn(u64) -> Option<Vec<Landmark>> + Send + Sync + 'static) -> Self {
        Self {
            pose: Arc::new(pose),
            init_failures: AtomicU32::new(0),
            created: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` session creations.
    pub fn fail_init(&self, n: u32) {
        self.init_failures.store(n, Ordering::SeqCst);
    }
}

struct FakeDetector {
    pose: Arc<PoseFn>,
}

#[async_trait]
impl PoseDetector for FakeDetector {
    async fn detect(
        &mut self,
        frame: &DecodedFrame,
    ) -> Result<Option<Vec<Landmark>>, DetectorError> {
        Ok((self.pose)(frame.index))
    }
}

#[async_trait]
impl PoseDetectorProvider for FakeDetectorProvider {
    async fn create(&self) -> Result<Box<dyn PoseDetector>, DetectorError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let remaining = self.init_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.init_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DetectorError::Unavailable("model failed to load".into()));
        }
        Ok(Box::new(FakeDetector {
            pose: Arc::clone(&self.pose),
        }))
    }
}

// ---------------------------------------------------------------------------
// Language model
// ---------------------------------------------------------------------------

pub const FEEDBACK_JSON: &str = r#"{
    "strengths": ["Stable base"],
    "weaknesses": ["Late preparation"],
    "tips": ["Turn the shoulders earlier"],
    "focus_area": "Footwork",
    "recommended_drills": []
}"#;

/// Scripted responses, then [`FEEDBACK_JSON`] once the script runs out.
#[derive(Default)]
pub struct FakeLlm {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl FakeLlm {
    pub fn push(&self, response: Result<String, LlmError>) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LanguageModel for FakeLlm {
    async fn generate_structured(
        &self,
        prompt: &str,
        _schema: &serde_json::Value,
    ) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(FEEDBACK_JSON.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// A queue whose broker cannot be reached.
#[derive(Default)]
pub struct UnavailableQueue {
    pub attempts: AtomicUsize,
}

impl UnavailableQueue {
    fn refuse<T>(&self) -> Result<T, QueueError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(QueueError::Unavailable("connection refused".into()))
    }
}

#[async_trait]
impl JobQueue for UnavailableQueue {
    async fn enqueue(&self, _request: AnalysisRequest, _delay: Duration) -> Result<(), QueueError> {
        self.refuse()
    }

    async fn claim(&self, _lease: Duration) -> Result<Option<Delivery>, QueueError> {
        self.refuse()
    }

    async fn extend_claim(&self, _delivery: &Delivery, _lease: Duration) -> Result<(), QueueError> {
        self.refuse()
    }

    async fn ack(&self, _delivery: &Delivery) -> Result<(), QueueError> {
        self.refuse()
    }

    async fn retry_later(
        &self,
        _delivery: &Delivery,
        _attempt: i32,
        _delay: Duration,
    ) -> Result<(), QueueError> {
        self.refuse()
    }

    async fn pending_count(&self) -> Result<i64, QueueError> {
        self.refuse()
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub const LEASE: Duration = Duration::from_secs(1800);

pub struct Harness {
    pub store: Arc<MemoryAnalysisStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub storage: Arc<FakeStorage>,
    pub decoder: Arc<FakeDecoder>,
    pub detectors: Arc<FakeDetectorProvider>,
    pub llm: Arc<FakeLlm>,
    pub runner: AnalysisJobRunner,
    pub service: AnalysisService,
}

impl Harness {
    /// `frames` decoded frames, every one showing `pose(index)`.
    pub fn new(
        frames: u64,
        pose: impl Fn(u64) -> Option<Vec<Landmark>> + Send + Sync + 'static,
    ) -> Self {
        Self::with_store(Arc::new(MemoryAnalysisStore::new()), frames, pose)
    }

    pub fn with_store(
        store: Arc<MemoryAnalysisStore>,
        frames: u64,
        pose: impl Fn(u64) -> Option<Vec<Landmark>> + Send + Sync + 'static,
    ) -> Self {
        let queue = Arc::new(MemoryJobQueue::new());
        let storage = Arc::new(FakeStorage::default());
        let decoder = Arc::new(FakeDecoder::new(DecoderMode::Frames(frames)));
        let detectors = Arc::new(FakeDetectorProvider::new(pose));
        let llm = Arc::new(FakeLlm::default());

        let extractor = Arc::new(LandmarkExtractor::new(
            storage.clone(),
            decoder.clone(),
            detectors.clone(),
        ));
        let runner = AnalysisJobRunner::new(
            store.clone(),
            extractor,
            RetryPolicy::fixed(3, Duration::from_secs(5)),
            LEASE,
        );
        let feedback = FeedbackService::new(
            store.clone(),
            Arc::new(StaticKnowledgeBase::default()),
            llm.clone(),
        );
        let service = AnalysisService::new(store.clone(), queue.clone(), feedback);

        Self {
            store,
            queue,
            storage,
            decoder,
            detectors,
            llm,
            runner,
            service,
        }
    }

    /// A service over the harness store that schedules through `queue`.
    pub fn service_with_queue(&self, queue: Arc<dyn JobQueue>) -> AnalysisService {
        let feedback = FeedbackService::new(
            self.store.clone(),
            Arc::new(StaticKnowledgeBase::default()),
            self.llm.clone(),
        );
        AnalysisService::new(self.store.clone(), queue, feedback)
    }

    /// Register a stored video and return its id.
    pub fn add_video(&self, stroke_type: Option<&str>) -> Uuid {
        let id = Uuid::new_v4();
        self.store.insert_video(VideoRef {
            id,
            storage_path: format!("videos/{id}.mp4"),
            stroke_type: stroke_type.map(str::to_string),
        });
        id
    }
}
