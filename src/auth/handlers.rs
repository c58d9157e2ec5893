use axum::{
    extract::{FromRef, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use lazy_static::lazy_static;
use mongodb::bson::{self, oid::ObjectId};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::{
    auth::{
        cookie,
        dto::{
            AuthResponse, ForgotPasswordRequest, LoginRequest, MessageResponse, PublicUser,
            RegisterRequest, ResetPasswordRequest,
        },
        jwt::{AuthUser, JwtKeys},
        password, reset,
        repo::UserRecord,
    },
    error::ApiError,
    state::AppState,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn session_headers(set_cookie: String) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        set_cookie.parse().map_err(ApiError::internal)?,
    );
    Ok(headers)
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(StatusCode, HeaderMap, Json<AuthResponse>), ApiError> {
    payload.username = payload.username.trim().to_string();
    payload.email = payload.email.trim().to_lowercase();

    if payload.username.is_empty() {
        return Err(ApiError::validation("username is required"));
    }
    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::validation("invalid email"));
    }
    if payload.password.len() < 8 {
        warn!("password too short");
        return Err(ApiError::validation("password too short"));
    }

    if state
        .users
        .find_by_username(&payload.username)
        .await?
        .is_some()
    {
        warn!(username = %payload.username, "username already registered");
        return Err(ApiError::Conflict("username already registered".into()));
    }
    if state.users.find_by_email(&payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(ApiError::Conflict("email already registered".into()));
    }

    let hash = password::hash_password(&payload.password).map_err(ApiError::internal)?;
    // The store may still conflict here on a concurrent insert; the unique
    // indexes are the authority.
    let user = state
        .users
        .insert(UserRecord::new(payload.username, payload.email, hash))
        .await?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys
        .sign(&user.id_hex(), user.role)
        .map_err(ApiError::internal)?;
    let headers = session_headers(cookie::session_cookie(&token, keys.ttl_secs()))?;

    info!(user_id = %user.id_hex(), username = %user.username, "user registered");
    Ok((
        StatusCode::CREATED,
        headers,
        Json(AuthResponse {
            token,
            user: PublicUser::from(&user),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<(StatusCode, HeaderMap, Json<AuthResponse>), ApiError> {
    payload.username = payload.username.trim().to_string();

    let user = match state.users.find_by_username(&payload.username).await? {
        Some(user) => user,
        None => {
            // Burn a verification so unknown usernames cost the same.
            password::verify_dummy();
            warn!(username = %payload.username, "login unknown username");
            return Err(ApiError::Unauthenticated("invalid credentials".into()));
        }
    };

    let ok = password::verify_password(&payload.password, &user.password_hash)
        .map_err(ApiError::internal)?;
    if !ok {
        warn!(username = %payload.username, user_id = %user.id_hex(), "login invalid password");
        return Err(ApiError::Unauthenticated("invalid credentials".into()));
    }

    let keys = JwtKeys::from_ref(&state);
    let token = keys
        .sign(&user.id_hex(), user.role)
        .map_err(ApiError::internal)?;
    let headers = session_headers(cookie::session_cookie(&token, keys.ttl_secs()))?;

    info!(user_id = %user.id_hex(), username = %user.username, "user logged in");
    Ok((
        StatusCode::OK,
        headers,
        Json(AuthResponse {
            token,
            user: PublicUser::from(&user),
        }),
    ))
}

/// Tokens are stateless, so logout just expires the session cookie.
#[instrument]
pub async fn logout() -> Result<(HeaderMap, Json<MessageResponse>), ApiError> {
    let headers = session_headers(cookie::clear_session_cookie())?;
    Ok((headers, Json(MessageResponse::new("logged out"))))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(mut payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    payload.email = payload.email.trim().to_lowercase();
    if !is_valid_email(&payload.email) {
        return Err(ApiError::validation("invalid email"));
    }

    let token = reset::generate_token();
    let expires = bson::DateTime::from_chrono(reset::expiry_from(
        chrono::Utc::now(),
        state.config.reset_token_ttl_minutes,
    ));

    let known = state
        .users
        .set_reset_token(&payload.email, &token, expires)
        .await?;
    if !known {
        warn!(email = %payload.email, "password reset for unknown email");
        return Err(ApiError::not_found("no account with that email"));
    }

    // Delivery goes through the external notification channel; the token is
    // never put in the response body.
    debug!(email = %payload.email, reset_token = %token, "reset token issued");
    info!(email = %payload.email, "password reset requested");
    Ok(Json(MessageResponse::new(
        "password reset instructions sent",
    )))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    if payload.new_password.len() < 8 {
        return Err(ApiError::validation("password too short"));
    }

    let hash = password::hash_password(&payload.new_password).map_err(ApiError::internal)?;
    let redeemed = state
        .users
        .redeem_reset_token(&payload.reset_token, &hash, bson::DateTime::now())
        .await?;
    if !redeemed {
        warn!("reset attempted with invalid or expired token");
        return Err(ApiError::validation("invalid or expired reset token"));
    }

    info!("password reset completed");
    Ok(Json(MessageResponse::new("password updated")))
}

#[instrument(skip(state))]
pub async fn me(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<PublicUser>, ApiError> {
    let id = ObjectId::parse_str(&principal.id)
        .map_err(|_| ApiError::Unauthenticated("user not found".into()))?;
    let user = state
        .users
        .find_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::Unauthenticated("user not found".into()))?;
    Ok(Json(PublicUser::from(&user)))
}
