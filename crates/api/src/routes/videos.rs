use axum::routing::{get, post};
use axum::Router;

use crate::handlers::analysis;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}/analyze", post(analysis::submit_analysis))
        .route("/{id}/analysis", get(analysis::get_analysis))
        .route("/{id}/feedback", post(analysis::get_feedback))
}
