//! Video analysis pipeline: collaborators, the landmark extractor, the
//! analysis job runner, and the service facade used by the API.
//!
//! Every external capability sits behind a trait so the whole pipeline
//! runs against in-memory fakes in tests:
//!
//! | Seam | Production | In-process |
//! |------|------------|------------|
//! | [`storage::VideoStorage`] | S3/MinIO, local disk | local disk |
//! | [`decoder::VideoDecoder`] | ffmpeg | - |
//! | [`detector::PoseDetectorProvider`] | HTTP pose service | - |
//! | [`llm::LanguageModel`] | Gemini | - |
//! | [`knowledge::KnowledgeBase`] | `drills` table | static list |
//! | [`store::AnalysisStore`] | Postgres | [`memory::MemoryAnalysisStore`] |
//! | [`queue::JobQueue`] | Postgres | [`memory::MemoryJobQueue`] |

pub mod config;
pub mod decoder;
pub mod detector;
pub mod extractor;
pub mod feedback;
pub mod job;
pub mod knowledge;
pub mod lease;
pub mod llm;
pub mod memory;
pub mod postgres;
pub mod queue;
pub mod service;
pub mod storage;
pub mod store;
