use axum::{
    extract::{Path, Query, State},
    Json,
};
use mongodb::bson::oid::ObjectId;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::PublicUser,
        handlers::is_valid_email,
        jwt::{AdminUser, AuthUser, Principal},
        repo::UserPatch,
    },
    error::ApiError,
    resources::dto::{DeleteResponse, Pagination},
    state::AppState,
};

fn parse_user_id(id: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(id).map_err(|_| ApiError::validation("malformed user id"))
}

fn is_self(principal: &Principal, id: &ObjectId) -> bool {
    principal.id == id.to_hex()
}

#[instrument(skip(state, pg))]
pub async fn list(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(pg): Query<Pagination>,
) -> Result<Json<Vec<PublicUser>>, ApiError> {
    let users = state.users.list(pg.limit.clamp(1, 100), pg.offset).await?;
    Ok(Json(users.iter().map(PublicUser::from).collect()))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<PublicUser>, ApiError> {
    let id = parse_user_id(&id)?;
    if !principal.role.is_admin() && !is_self(&principal, &id) {
        return Err(ApiError::Forbidden("not your profile".into()));
    }
    let user = state
        .users
        .find_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    Ok(Json(PublicUser::from(&user)))
}

/// Merge patch over a user. Role and guide-request status are admin-only:
/// setting `role: "guide"` here is how a guide application gets approved.
#[instrument(skip(state, patch))]
pub async fn update_user(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<String>,
    Json(mut patch): Json<UserPatch>,
) -> Result<Json<PublicUser>, ApiError> {
    let id = parse_user_id(&id)?;
    if !principal.role.is_admin() {
        if !is_self(&principal, &id) {
            return Err(ApiError::Forbidden("not your profile".into()));
        }
        if patch.role.is_some() || patch.guide_request_status.is_some() {
            warn!(user_id = %principal.id, "non-admin attempted role change");
            return Err(ApiError::Forbidden("role changes require admin".into()));
        }
    }

    if let Some(email) = patch.email.as_mut() {
        *email = email.trim().to_lowercase();
        if !is_valid_email(email) {
            return Err(ApiError::validation("invalid email"));
        }
    }
    if patch.is_empty() {
        return Err(ApiError::validation("no fields to update"));
    }

    let updated = state
        .users
        .apply_patch(&id, &patch)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    info!(user_id = %id.to_hex(), "user updated");
    Ok(Json(PublicUser::from(&updated)))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let id = parse_user_id(&id)?;
    let deleted_count = state.users.delete(&id).await?;
    info!(user_id = %id.to_hex(), deleted_count, "user deleted");
    Ok(Json(DeleteResponse { deleted_count }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::Role;
    use crate::auth::repo::UserRecord;

    async fn seeded_state() -> (AppState, Principal, Principal) {
        let state = AppState::fake().await;

        let admin = state
            .users
            .insert(UserRecord::new(
                "boss".into(),
                "boss@example.com".into(),
                "hash".into(),
            ))
            .await
            .unwrap();
        let admin_id = admin.id.unwrap();
        let patch = UserPatch {
            role: Some(Role::Admin),
            ..Default::default()
        };
        state.users.apply_patch(&admin_id, &patch).await.unwrap();

        let user = state
            .users
            .insert(UserRecord::new(
                "rahim".into(),
                "rahim@example.com".into(),
                "hash".into(),
            ))
            .await
            .unwrap();

        let admin_principal = Principal {
            id: admin_id.to_hex(),
            role: Role::Admin,
        };
        let user_principal = Principal {
            id: user.id.unwrap().to_hex(),
            role: Role::User,
        };
        (state, admin_principal, user_principal)
    }

    #[tokio::test]
    async fn users_can_read_only_their_own_profile() {
        let (state, admin, user) = seeded_state().await;

        let Json(own) = get_user(
            State(state.clone()),
            AuthUser(user.clone()),
            Path(user.id.clone()),
        )
        .await
        .expect("own profile");
        assert_eq!(own.username, "rahim");

        let err = get_user(
            State(state.clone()),
            AuthUser(user.clone()),
            Path(admin.id.clone()),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ApiError::Forbidden(_)));

        // Admin reads anyone.
        let Json(other) = get_user(State(state), AuthUser(admin), Path(user.id))
            .await
            .expect("admin read");
        assert_eq!(other.username, "rahim");
    }

    #[tokio::test]
    async fn malformed_user_ids_are_rejected_up_front() {
        let (state, admin, _user) = seeded_state().await;
        let err = get_user(State(state), AuthUser(admin), Path("nope".into()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn role_changes_are_admin_only() {
        let (state, admin, user) = seeded_state().await;

        let grab_role = UserPatch {
            role: Some(Role::Admin),
            ..Default::default()
        };
        let err = update_user(
            State(state.clone()),
            AuthUser(user.clone()),
            Path(user.id.clone()),
            Json(grab_role.clone()),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ApiError::Forbidden(_)));

        // Approval path: admin promotes the applicant to guide.
        let approve = UserPatch {
            role: Some(Role::Guide),
            guide_request_status: Some("approved".into()),
            ..Default::default()
        };
        let Json(updated) = update_user(
            State(state),
            AuthUser(admin),
            Path(user.id),
            Json(approve),
        )
        .await
        .expect("admin approves");
        assert_eq!(updated.role, Role::Guide);
        assert_eq!(updated.guide_request_status.as_deref(), Some("approved"));
    }

    #[tokio::test]
    async fn self_profile_update_keeps_other_fields() {
        let (state, _admin, user) = seeded_state().await;

        let patch = UserPatch {
            email: Some("Rahim.New@Example.com".into()),
            ..Default::default()
        };
        let Json(updated) = update_user(
            State(state),
            AuthUser(user.clone()),
            Path(user.id),
            Json(patch),
        )
        .await
        .expect("self update");
        assert_eq!(updated.email, "rahim.new@example.com");
        assert_eq!(updated.username, "rahim");
    }

    #[tokio::test]
    async fn admin_delete_is_idempotent() {
        let (state, admin, user) = seeded_state().await;

        let Json(first) = delete_user(
            State(state.clone()),
            AdminUser(admin.clone()),
            Path(user.id.clone()),
        )
        .await
        .expect("delete");
        assert_eq!(first.deleted_count, 1);

        let Json(second) = delete_user(State(state), AdminUser(admin), Path(user.id))
            .await
            .expect("repeat delete");
        assert_eq!(second.deleted_count, 0);
    }

    #[tokio::test]
    async fn listing_is_paginated() {
        let (state, admin, _user) = seeded_state().await;
        let Json(page) = list(
            State(state),
            AdminUser(admin),
            Query(Pagination { limit: 1, offset: 0 }),
        )
        .await
        .expect("list");
        assert_eq!(page.len(), 1);
    }
}
