//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` (or a `&mut PgConnection` when the caller holds a
//! transaction) as the first argument.

pub mod analysis_repo;
pub mod drill_repo;
pub mod queue_repo;
pub mod video_repo;

pub use analysis_repo::AnalysisRepo;
pub use drill_repo::DrillRepo;
pub use queue_repo::QueueRepo;
pub use video_repo::VideoRepo;
