pub mod health;
pub mod videos;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /videos/{id}/analyze        submit or re-trigger (POST)
/// /videos/{id}/analysis       status and frames (GET)
/// /videos/{id}/feedback       cached or generated feedback (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/videos", videos::router())
}
