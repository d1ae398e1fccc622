use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::approval::{BatchSummary, EvaluateRequest, EvaluationOutcome};
use crate::response::{ok, AppError};
use crate::state::AppState;

const MAX_BATCH_SIZE: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/evaluate", post(evaluate))
        .route("/evaluate/batch", post(evaluate_batch))
        .route(
            "/users/:userId/chapters/:chapterId/attempts",
            get(attempt_history),
        )
        .route("/users/:userId/chapters/:chapterId/latest", get(latest))
        .route("/chapters/:chapterId/stats", get(chapter_stats))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchBody {
    requests: Vec<EvaluateRequest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchItemDto {
    index: usize,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<EvaluationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchResponse {
    results: Vec<BatchItemDto>,
    summary: BatchSummary,
}

async fn evaluate(
    State(state): State<AppState>,
    Json(payload): Json<EvaluateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.engine().evaluate(payload).await?;
    Ok(ok(outcome))
}

async fn evaluate_batch(
    State(state): State<AppState>,
    Json(payload): Json<BatchBody>,
) -> Result<impl IntoResponse, AppError> {
    if payload.requests.len() > MAX_BATCH_SIZE {
        return Err(AppError::validation(format!(
            "a batch may contain at most {MAX_BATCH_SIZE} requests"
        )));
    }

    let items = state.engine().evaluate_batch(payload.requests).await;
    let summary = BatchSummary::from_items(&items);

    let results = items
        .into_iter()
        .map(|item| match item.result {
            Ok(outcome) => BatchItemDto {
                index: item.index,
                success: true,
                data: Some(outcome),
                error: None,
                code: None,
            },
            Err(err) => {
                let app_err = AppError::from(err);
                BatchItemDto {
                    index: item.index,
                    success: false,
                    data: None,
                    error: Some(app_err.public_message()),
                    code: Some(app_err.code()),
                }
            }
        })
        .collect();

    Ok(ok(BatchResponse { results, summary }))
}

async fn attempt_history(
    State(state): State<AppState>,
    Path((user_id, chapter_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let history = state.engine().attempt_history(&user_id, &chapter_id).await?;
    Ok(ok(history))
}

async fn latest(
    State(state): State<AppState>,
    Path((user_id, chapter_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let evaluation = state
        .engine()
        .latest_evaluation(&user_id, &chapter_id)
        .await?
        .ok_or_else(|| {
            AppError::not_found(format!(
                "no evaluation for user {user_id} in chapter {chapter_id}"
            ))
        })?;
    Ok(ok(evaluation))
}

async fn chapter_stats(
    State(state): State<AppState>,
    Path(chapter_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let stats = state.statistics().chapter_stats(&chapter_id).await?;
    Ok(ok(stats))
}
