#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use carlitos_core::analysis::Analysis;
use carlitos_core::pose::FrameResult;
use carlitos_pipeline::feedback::FeedbackService;
use carlitos_pipeline::knowledge::StaticKnowledgeBase;
use carlitos_pipeline::llm::{LanguageModel, LlmError};
use carlitos_pipeline::memory::{MemoryAnalysisStore, MemoryJobQueue};
use carlitos_pipeline::queue::{AnalysisRequest, Delivery, JobQueue, QueueError};
use carlitos_pipeline::service::AnalysisService;
use carlitos_pipeline::store::{AnalysisStore, VideoRef};
use chrono::{TimeDelta, Utc};
use http_body_util::BodyExt;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use uuid::Uuid;

use carlitos_api::routes;
use carlitos_api::state::AppState;

pub const FEEDBACK_JSON: &str = r#"{
    "strengths": ["Balanced stance"],
    "weaknesses": ["Short follow-through"],
    "tips": ["Finish over the shoulder"],
    "focus_area": "Follow-through",
    "recommended_drills": []
}"#;

/// Language model returning queued responses, then [`FEEDBACK_JSON`].
#[derive(Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<usize>,
}

impl ScriptedLlm {
    pub fn push(&self, response: Result<String, LlmError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn generate_structured(
        &self,
        _prompt: &str,
        _schema: &serde_json::Value,
    ) -> Result<String, LlmError> {
        *self.calls.lock().unwrap() += 1;
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(FEEDBACK_JSON.to_string()))
    }
}

/// Queue whose every call fails as if the database pool were exhausted.
pub struct UnreachableQueue;

#[async_trait]
impl JobQueue for UnreachableQueue {
    async fn enqueue(&self, _request: AnalysisRequest, _delay: Duration) -> Result<(), QueueError> {
        Err(QueueError::Unavailable("pool timed out".into()))
    }

    async fn claim(&self, _lease: Duration) -> Result<Option<Delivery>, QueueError> {
        Err(QueueError::Unavailable("pool timed out".into()))
    }

    async fn extend_claim(&self, _delivery: &Delivery, _lease: Duration) -> Result<(), QueueError> {
        Err(QueueError::Unavailable("pool timed out".into()))
    }

    async fn ack(&self, _delivery: &Delivery) -> Result<(), QueueError> {
        Err(QueueError::Unavailable("pool timed out".into()))
    }

    async fn retry_later(
        &self,
        _delivery: &Delivery,
        _attempt: i32,
        _delay: Duration,
    ) -> Result<(), QueueError> {
        Err(QueueError::Unavailable("pool timed out".into()))
    }

    async fn pending_count(&self) -> Result<i64, QueueError> {
        Err(QueueError::Unavailable("pool timed out".into()))
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryAnalysisStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub llm: Arc<ScriptedLlm>,
}

impl TestApp {
    pub fn add_video(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.store.insert_video(VideoRef {
            id,
            storage_path: format!("videos/{id}.mp4"),
            stroke_type: Some("Serve".into()),
        });
        id
    }

    /// Drive the video's current generation to `Completed` with `frames`.
    pub async fn complete(&self, video_id: Uuid, frames: Vec<FrameResult>) {
        let generation = self
            .store
            .find_analysis(video_id)
            .await
            .unwrap()
            .unwrap()
            .generation;
        self.store
            .transition(
                video_id,
                Box::new(move |a: &mut Analysis| {
                    let now = Utc::now();
                    a.begin_attempt(generation, 1, now, TimeDelta::minutes(5))?;
                    a.complete(generation, frames, now)
                }),
            )
            .await
            .unwrap();
    }
}

/// Build the application router with the same middleware stack as
/// `main.rs`, backed by in-memory state.
pub fn build_test_app() -> TestApp {
    let queue = Arc::new(MemoryJobQueue::new());
    assemble(queue.clone(), queue)
}

/// Like [`build_test_app`], but requests are scheduled through `scheduler`.
/// `TestApp::queue` then stays empty.
pub fn build_test_app_with_scheduler(scheduler: Arc<dyn JobQueue>) -> TestApp {
    assemble(scheduler, Arc::new(MemoryJobQueue::new()))
}

fn assemble(scheduler: Arc<dyn JobQueue>, queue: Arc<MemoryJobQueue>) -> TestApp {
    let store = Arc::new(MemoryAnalysisStore::new());
    let llm = Arc::new(ScriptedLlm::default());

    let feedback = FeedbackService::new(
        store.clone(),
        Arc::new(StaticKnowledgeBase::default()),
        llm.clone(),
    );
    let state = AppState {
        service: Arc::new(AnalysisService::new(store.clone(), scheduler, feedback)),
    };

    let cors = CorsLayer::new()
        .allow_origin(["http://localhost:5173".parse().unwrap()])
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    let request_id_header = HeaderName::from_static("x-request-id");

    let router = Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state);

    TestApp {
        router,
        store,
        queue,
        llm,
    }
}

pub async fn get(app: &TestApp, uri: &str) -> Response {
    app.router
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post(app: &TestApp, uri: &str) -> Response {
    app.router
        .clone()
        .oneshot(Request::post(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
