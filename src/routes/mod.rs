mod evaluation;
mod health;
mod rules;

use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::response::AppError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let approval = evaluation::router().merge(rules::router());

    Router::new()
        .nest("/api/approval", approval)
        .nest("/health", health::router())
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler() -> Response {
    AppError::not_found("route not found").into_response()
}
