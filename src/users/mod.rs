use crate::state::AppState;
use axum::{routing::get, Router};

pub mod handlers;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(handlers::list))
        .route("/users/me", get(crate::auth::handlers::me))
        .route(
            "/users/:id",
            get(handlers::get_user)
                .patch(handlers::update_user)
                .delete(handlers::delete_user),
        )
}
