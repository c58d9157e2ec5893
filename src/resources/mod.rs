use axum::{
    extract::{Path, Query, State},
    routing::{get, post, MethodRouter},
    Json, Router,
};
use serde_json::Value;

use crate::auth::jwt::Session;
use crate::state::AppState;

pub mod defs;
pub mod dto;
pub mod handlers;
pub mod repo;

use defs::{ResourceDef, ANNOUNCEMENTS, APPLICATIONS, BOOKINGS, GUIDES, PACKAGES, STORIES};
use dto::{Pagination, SampleQuery};

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/packages", resource_router(&PACKAGES, generic_create(&PACKAGES)))
        .nest("/bookings", resource_router(&BOOKINGS, generic_create(&BOOKINGS)))
        .nest("/guides", resource_router(&GUIDES, generic_create(&GUIDES)))
        .nest("/stories", resource_router(&STORIES, generic_create(&STORIES)))
        // Applying is its own flow; the rest of the surface is generic.
        .nest(
            "/applications",
            resource_router(&APPLICATIONS, post(handlers::apply)),
        )
        .nest(
            "/announcements",
            resource_router(&ANNOUNCEMENTS, generic_create(&ANNOUNCEMENTS)),
        )
        // Legacy alias from the first deployment's frontend.
        .route(
            "/trip",
            get(
                |State(state): State<AppState>, session: Session, Query(pg): Query<Pagination>| async move {
                    handlers::list(&PACKAGES, state, session, pg).await
                },
            ),
        )
}

fn generic_create(def: &'static ResourceDef) -> MethodRouter<AppState> {
    post(
        move |State(state): State<AppState>, session: Session, Json(body): Json<Value>| async move {
            handlers::create(def, state, session, body).await
        },
    )
}

/// One resource's full route table, driven by its `ResourceDef`.
fn resource_router(def: &'static ResourceDef, create: MethodRouter<AppState>) -> Router<AppState> {
    let mut router = Router::new()
        .route(
            "/",
            create.get(
                move |State(state): State<AppState>, session: Session, Query(pg): Query<Pagination>| async move {
                    handlers::list(def, state, session, pg).await
                },
            ),
        )
        .route(
            "/:id",
            get(
                move |State(state): State<AppState>, session: Session, Path(id): Path<String>| async move {
                    handlers::get_one(def, state, session, id).await
                },
            )
            .patch(
                move |State(state): State<AppState>,
                      session: Session,
                      Path(id): Path<String>,
                      Json(body): Json<Value>| async move {
                    handlers::update(def, state, session, id, body).await
                },
            )
            .delete(
                move |State(state): State<AppState>, session: Session, Path(id): Path<String>| async move {
                    handlers::delete(def, state, session, id).await
                },
            ),
        );

    if def.random {
        router = router.route(
            "/random",
            get(
                move |State(state): State<AppState>, Query(q): Query<SampleQuery>| async move {
                    handlers::random(def, state, q).await
                },
            ),
        );
    }

    for lookup in def.lookups {
        router = router.route(
            lookup.path,
            get(
                move |State(state): State<AppState>, session: Session, Path(email): Path<String>| async move {
                    handlers::find_by(def, lookup, state, session, email).await
                },
            ),
        );
    }

    router
}
