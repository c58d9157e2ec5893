use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::cookie;
use crate::config::JwtConfig;
use crate::error::ApiError;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Guide,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Guide => "guide",
            Role::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// JWT payload: deliberately just identity and role, so tokens never go
/// stale on profile edits. Role changes take effect on the next issue.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // user ID (ObjectId hex)
    pub role: Role,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
}

#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::minutes(cfg.ttl_minutes),
        }
    }

    /// Session-cookie Max-Age, kept in lockstep with token expiry.
    pub fn ttl_secs(&self) -> i64 {
        self.ttl.num_seconds()
    }

    pub fn sign(&self, user_id: &str, role: Role) -> anyhow::Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            iat: now.timestamp() as usize,
            exp: (now + self.ttl).timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, role = role.as_str(), "jwt signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}

impl FromRef<crate::state::AppState> for JwtKeys {
    fn from_ref(state: &crate::state::AppState) -> Self {
        Self::from_config(&state.config.jwt)
    }
}

/// The identity a verified session asserts.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

/// Session state extractor that never rejects; public routes use it and
/// policy checks decide afterwards.
pub enum Session {
    Anonymous,
    Invalid,
    Authenticated(Principal),
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(token) = cookie::token_from_headers(&parts.headers) else {
            return Ok(Session::Anonymous);
        };

        let keys = JwtKeys::from_ref(state);
        match keys.verify(&token) {
            Ok(claims) => Ok(Session::Authenticated(Principal {
                id: claims.sub,
                role: claims.role,
            })),
            Err(_) => {
                warn!("invalid or expired session token");
                Ok(Session::Invalid)
            }
        }
    }
}

impl Session {
    /// 401 without credentials, 403 with bad ones.
    pub fn require(&self) -> Result<Principal, ApiError> {
        match self {
            Session::Anonymous => Err(ApiError::Unauthenticated("missing session token".into())),
            Session::Invalid => Err(ApiError::Forbidden("invalid or expired session".into())),
            Session::Authenticated(principal) => Ok(principal.clone()),
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Session::Authenticated(principal) => Some(principal),
            _ => None,
        }
    }
}

/// Extractor for routes that require any authenticated user.
pub struct AuthUser(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .unwrap_or(Session::Anonymous);
        Ok(AuthUser(session.require()?))
    }
}

/// Extractor for admin-only routes.
pub struct AdminUser(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(principal) = AuthUser::from_request_parts(parts, state).await?;
        if !principal.role.is_admin() {
            return Err(ApiError::Forbidden("admin access required".into()));
        }
        Ok(AdminUser(principal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use axum::http::{header, HeaderValue, Request};

    fn keys() -> JwtKeys {
        JwtKeys::from_config(&AppConfig::for_tests().jwt)
    }

    fn keys_with_ttl(ttl_minutes: i64) -> JwtKeys {
        let mut cfg = AppConfig::for_tests().jwt;
        cfg.ttl_minutes = ttl_minutes;
        JwtKeys::from_config(&cfg)
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let keys = keys();
        let token = keys.sign("64b5f0a1c2d3e4f5a6b7c8d9", Role::Guide).expect("sign");
        let claims = keys.verify(&token).expect("verify");
        assert_eq!(claims.sub, "64b5f0a1c2d3e4f5a6b7c8d9");
        assert_eq!(claims.role, Role::Guide);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
    }

    #[test]
    fn verify_rejects_expired_token() {
        // Expired well past jsonwebtoken's default leeway.
        let token = keys_with_ttl(-5).sign("someid", Role::User).expect("sign");
        assert!(keys().verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_foreign_issuer() {
        let mut cfg = AppConfig::for_tests().jwt;
        cfg.issuer = "someone-else".into();
        let token = JwtKeys::from_config(&cfg)
            .sign("someid", Role::User)
            .expect("sign");
        assert!(keys().verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let mut cfg = AppConfig::for_tests().jwt;
        cfg.secret = "a-different-secret".into();
        let token = JwtKeys::from_config(&cfg)
            .sign("someid", Role::User)
            .expect("sign");
        assert!(keys().verify(&token).is_err());
    }

    #[derive(Clone)]
    struct TestState(JwtConfig);

    impl FromRef<TestState> for JwtKeys {
        fn from_ref(state: &TestState) -> Self {
            JwtKeys::from_config(&state.0)
        }
    }

    fn parts_with(value: Option<(header::HeaderName, String)>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some((name, v)) = value {
            builder = builder.header(name, HeaderValue::from_str(&v).unwrap());
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn session_extractor_distinguishes_missing_and_invalid() {
        let state = TestState(AppConfig::for_tests().jwt);

        let mut parts = parts_with(None);
        let session = Session::from_request_parts(&mut parts, &state).await.unwrap();
        assert!(matches!(&session, Session::Anonymous));
        assert!(matches!(
            session.require(),
            Err(ApiError::Unauthenticated(_))
        ));

        let mut parts = parts_with(Some((
            header::COOKIE,
            format!("{}=not.a.jwt", cookie::SESSION_COOKIE),
        )));
        let session = Session::from_request_parts(&mut parts, &state).await.unwrap();
        assert!(matches!(&session, Session::Invalid));
        assert!(matches!(session.require(), Err(ApiError::Forbidden(_))));
    }

    #[tokio::test]
    async fn auth_user_accepts_cookie_and_bearer_transports() {
        let state = TestState(AppConfig::for_tests().jwt);
        let token = JwtKeys::from_ref(&state)
            .sign("someid", Role::User)
            .expect("sign");

        let mut parts = parts_with(Some((
            header::COOKIE,
            format!("{}={}", cookie::SESSION_COOKIE, token),
        )));
        let AuthUser(principal) = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .expect("cookie transport");
        assert_eq!(principal.id, "someid");

        let mut parts = parts_with(Some((header::AUTHORIZATION, format!("Bearer {token}"))));
        let AuthUser(principal) = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .expect("legacy header transport");
        assert_eq!(principal.id, "someid");
    }

    #[tokio::test]
    async fn admin_extractor_rejects_plain_users() {
        let state = TestState(AppConfig::for_tests().jwt);
        let token = JwtKeys::from_ref(&state)
            .sign("someid", Role::User)
            .expect("sign");

        let mut parts = parts_with(Some((header::AUTHORIZATION, format!("Bearer {token}"))));
        let err = AdminUser::from_request_parts(&mut parts, &state)
            .await
            .err()
            .expect("should reject");
        assert!(matches!(err, ApiError::Forbidden(_)));

        let admin_token = JwtKeys::from_ref(&state)
            .sign("adminid", Role::Admin)
            .expect("sign");
        let mut parts = parts_with(Some((
            header::AUTHORIZATION,
            format!("Bearer {admin_token}"),
        )));
        assert!(AdminUser::from_request_parts(&mut parts, &state).await.is_ok());
    }
}
