use crate::state::AppState;
use axum::{routing::get, Router};

pub mod handlers;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/analytics", get(handlers::summary))
        .route("/analytics/chart", get(handlers::chart))
}
