//! Handlers for a video's analysis and its coaching feedback.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use carlitos_core::analysis::AnalysisSnapshot;
use carlitos_core::types::DbId;
use carlitos_pipeline::feedback::FeedbackResult;
use carlitos_pipeline::service::SubmitOutcome;
use serde::Deserialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Query parameters for the feedback endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct FeedbackQuery {
    /// Regenerate even when feedback is already cached.
    #[serde(default)]
    pub force: bool,
}

/// POST /api/v1/videos/{id}/analyze
///
/// Create or re-trigger the analysis and queue it. Returns 202 without
/// waiting for processing; a queueing failure is reported in the body.
pub async fn submit_analysis(
    State(state): State<AppState>,
    Path(video_id): Path<DbId>,
) -> AppResult<(StatusCode, Json<DataResponse<SubmitOutcome>>)> {
    let outcome = state.service.submit_analysis(video_id).await?;
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: outcome })))
}

/// GET /api/v1/videos/{id}/analysis
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(video_id): Path<DbId>,
) -> AppResult<Json<DataResponse<AnalysisSnapshot>>> {
    let snapshot = state.service.get_analysis(video_id).await?;
    Ok(Json(DataResponse { data: snapshot }))
}

/// POST /api/v1/videos/{id}/feedback?force=true|false
///
/// Returns 409 unless the analysis is completed.
pub async fn get_feedback(
    State(state): State<AppState>,
    Path(video_id): Path<DbId>,
    Query(params): Query<FeedbackQuery>,
) -> AppResult<Json<DataResponse<FeedbackResult>>> {
    let result = state
        .service
        .get_or_generate_feedback(video_id, params.force)
        .await?;
    Ok(Json(DataResponse { data: result }))
}
