use std::sync::Arc;

use carlitos_pipeline::service::AnalysisService;

/// Shared application state available to handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AnalysisService>,
}
