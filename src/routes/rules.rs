use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::approval::RuleFilter;
use crate::response::{ok, AppError};
use crate::services::{DeleteOutcome, RuleInput, RuleUpdate};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rules", get(list_rules).post(configure_rule))
        .route(
            "/rules/:id",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/rules/:id/activate", post(activate_rule))
        .route("/rules/:id/deactivate", post(deactivate_rule))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListRulesQuery {
    chapter_id: Option<String>,
    is_active: Option<bool>,
    scope: Option<String>,
}

impl ListRulesQuery {
    fn into_filter(self) -> Result<RuleFilter, AppError> {
        let global_only = match self.scope.as_deref().map(str::trim) {
            None | Some("") | Some("all") => false,
            Some("global") => true,
            Some(other) => {
                return Err(AppError::validation(format!(
                    "scope must be \"all\" or \"global\", got \"{other}\""
                )))
            }
        };
        Ok(RuleFilter {
            chapter_id: self.chapter_id,
            is_active: self.is_active,
            global_only,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteResponse {
    id: String,
    outcome: DeleteOutcome,
}

async fn list_rules(
    State(state): State<AppState>,
    Query(query): Query<ListRulesQuery>,
) -> Result<impl IntoResponse, AppError> {
    let rules = state.rule_config().list_rules(query.into_filter()?).await?;
    Ok(ok(rules))
}

async fn configure_rule(
    State(state): State<AppState>,
    Json(payload): Json<RuleInput>,
) -> Result<impl IntoResponse, AppError> {
    let rule = state.rule_config().configure_rule(payload).await?;
    Ok((StatusCode::CREATED, ok(rule)))
}

async fn get_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let rule = state.rule_config().get_rule(&id).await?;
    Ok(ok(rule))
}

async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<RuleUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let rule = state.rule_config().update_rule(&id, payload).await?;
    Ok(ok(rule))
}

async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.rule_config().delete_rule(&id).await?;
    Ok(ok(DeleteResponse { id, outcome }))
}

async fn activate_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let rule = state.rule_config().set_active(&id, true).await?;
    Ok(ok(rule))
}

async fn deactivate_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let rule = state.rule_config().set_active(&id, false).await?;
    Ok(ok(rule))
}
