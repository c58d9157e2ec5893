use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    Json,
};
use mongodb::bson::{self, oid::ObjectId, Document};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        handlers::is_valid_email,
        jwt::{AuthUser, Principal, Session},
        repo::UserPatch,
    },
    error::ApiError,
    resources::{
        defs::{Access, Key, Lookup, ResourceDef, APPLICATIONS},
        dto::{DeleteResponse, Pagination, SampleQuery},
        repo::{document_to_json, documents_to_json, Repository},
    },
    state::AppState,
};

/// Enforces one operation's access level. Returns the caller's principal
/// when there is one; `OwnerOrAdmin` document checks happen at the call
/// site, where the document is known.
fn authorize(access: Access, session: &Session) -> Result<Option<Principal>, ApiError> {
    match access {
        Access::Public => Ok(session.principal().cloned()),
        Access::Authenticated | Access::OwnerOrAdmin => session.require().map(Some),
        Access::Admin => {
            let principal = session.require()?;
            if !principal.role.is_admin() {
                return Err(ApiError::Forbidden("admin access required".into()));
            }
            Ok(Some(principal))
        }
    }
}

/// The token carries only `{id, role}`; owner checks compare emails, so the
/// caller's email is resolved through the credential store.
async fn principal_email(state: &AppState, principal: &Principal) -> Result<String, ApiError> {
    let id = ObjectId::parse_str(&principal.id)
        .map_err(|_| ApiError::Unauthenticated("user not found".into()))?;
    let user = state
        .users
        .find_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::Unauthenticated("user not found".into()))?;
    Ok(user.email)
}

async fn ensure_owner(
    state: &AppState,
    def: &ResourceDef,
    doc: &Document,
    principal: &Principal,
) -> Result<(), ApiError> {
    if principal.role.is_admin() {
        return Ok(());
    }
    let Some(owner_field) = def.owner_field else {
        return Ok(());
    };
    let email = principal_email(state, principal).await?;
    match doc.get_str(owner_field) {
        Ok(owner) if owner == email => Ok(()),
        _ => {
            warn!(resource = def.name, "owner check failed");
            Err(ApiError::Forbidden(format!(
                "not the owner of this {}",
                def.name
            )))
        }
    }
}

fn json_to_document(value: &Value) -> Result<Document, ApiError> {
    if !value.is_object() {
        return Err(ApiError::validation("expected a JSON object"));
    }
    bson::to_document(value).map_err(|e| ApiError::validation(format!("malformed payload: {e}")))
}

/// Where a created document lives, for the Location header.
fn canonical_ref(def: &ResourceDef, doc: &Document) -> String {
    let id = match def.key {
        Key::Email => doc.get_str("email").unwrap_or_default().to_string(),
        Key::ObjectId => doc
            .get_object_id("_id")
            .map(|oid| oid.to_hex())
            .unwrap_or_default(),
    };
    format!("/{}/{}", def.route, id)
}

fn location_headers(location: &str) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::LOCATION,
        location.parse().map_err(ApiError::internal)?,
    );
    Ok(headers)
}

#[instrument(skip_all, fields(resource = def.name))]
pub async fn list(
    def: &'static ResourceDef,
    state: AppState,
    session: Session,
    pg: Pagination,
) -> Result<Json<Value>, ApiError> {
    authorize(def.policy.list, &session)?;
    let docs = Repository::new(&state.db, def)
        .list(pg.limit.clamp(1, 100), pg.offset)
        .await?;
    Ok(Json(documents_to_json(&docs)))
}

#[instrument(skip_all, fields(resource = def.name))]
pub async fn random(
    def: &'static ResourceDef,
    state: AppState,
    q: SampleQuery,
) -> Result<Json<Value>, ApiError> {
    if !(1..=100).contains(&q.n) {
        return Err(ApiError::validation("sample size must be between 1 and 100"));
    }
    let docs = Repository::new(&state.db, def).random_sample(q.n).await?;
    Ok(Json(documents_to_json(&docs)))
}

#[instrument(skip_all, fields(resource = def.name, id = %id))]
pub async fn get_one(
    def: &'static ResourceDef,
    state: AppState,
    session: Session,
    id: String,
) -> Result<Json<Value>, ApiError> {
    authorize(def.policy.read, &session)?;
    let doc = Repository::new(&state.db, def).get(&id).await?;
    if def.policy.read == Access::OwnerOrAdmin {
        ensure_owner(&state, def, &doc, &session.require()?).await?;
    }
    Ok(Json(document_to_json(&doc)))
}

#[instrument(skip_all, fields(resource = def.name))]
pub async fn create(
    def: &'static ResourceDef,
    state: AppState,
    session: Session,
    body: Value,
) -> Result<(StatusCode, HeaderMap, Json<Value>), ApiError> {
    let principal = authorize(def.policy.create, &session)?;
    let mut doc = json_to_document(&body)?;

    // The owner stamp comes from the session, never from the payload.
    if let (Some(owner_field), Some(principal)) = (def.owner_field, principal.as_ref()) {
        let email = principal_email(&state, principal).await?;
        doc.insert(owner_field, email);
    }

    let stored = Repository::new(&state.db, def).create(doc).await?;
    let location = canonical_ref(def, &stored);
    info!(resource = def.name, %location, "created");
    Ok((
        StatusCode::CREATED,
        location_headers(&location)?,
        Json(document_to_json(&stored)),
    ))
}

#[instrument(skip_all, fields(resource = def.name, id = %id))]
pub async fn update(
    def: &'static ResourceDef,
    state: AppState,
    session: Session,
    id: String,
    body: Value,
) -> Result<Json<Value>, ApiError> {
    authorize(def.policy.update, &session)?;
    let repo = Repository::new(&state.db, def);

    if def.policy.update == Access::OwnerOrAdmin {
        let existing = repo.get(&id).await?;
        ensure_owner(&state, def, &existing, &session.require()?).await?;
    }

    let patch = json_to_document(&body)?;
    let updated = repo.update(&id, patch).await?;
    info!(resource = def.name, id = %id, "updated");
    Ok(Json(document_to_json(&updated)))
}

#[instrument(skip_all, fields(resource = def.name, id = %id))]
pub async fn delete(
    def: &'static ResourceDef,
    state: AppState,
    session: Session,
    id: String,
) -> Result<Json<DeleteResponse>, ApiError> {
    authorize(def.policy.delete, &session)?;
    let repo = Repository::new(&state.db, def);

    if def.policy.delete == Access::OwnerOrAdmin {
        // Deleting an absent id stays a zero-affected success; there is no
        // owner to protect.
        match repo.find_one(&id).await? {
            None => return Ok(Json(DeleteResponse { deleted_count: 0 })),
            Some(existing) => {
                ensure_owner(&state, def, &existing, &session.require()?).await?
            }
        }
    }

    let deleted_count = repo.delete(&id).await?;
    info!(resource = def.name, id = %id, deleted_count, "deleted");
    Ok(Json(DeleteResponse { deleted_count }))
}

#[instrument(skip_all, fields(resource = def.name, field = lookup.field))]
pub async fn find_by(
    def: &'static ResourceDef,
    lookup: &'static Lookup,
    state: AppState,
    session: Session,
    email: String,
) -> Result<Json<Value>, ApiError> {
    if !is_valid_email(&email) {
        return Err(ApiError::validation("malformed email"));
    }

    match lookup.access {
        Access::Public => {}
        Access::Authenticated => {
            session.require()?;
        }
        Access::Admin => {
            authorize(Access::Admin, &session)?;
        }
        // The address itself names the owner: callers may only read their
        // own slice unless they are admins.
        Access::OwnerOrAdmin => {
            let principal = session.require()?;
            if !principal.role.is_admin() && principal_email(&state, &principal).await? != email {
                return Err(ApiError::Forbidden(format!(
                    "not your {} listing",
                    def.name
                )));
            }
        }
    }

    let docs = Repository::new(&state.db, def)
        .find_by_field(lookup.field, &email)
        .await?;
    Ok(Json(documents_to_json(&docs)))
}

/// POST /applications: a user applies to become a guide. Stores the
/// application and marks the account's guide request as pending; approval
/// is the admin role change on `/users/:id`.
#[instrument(skip_all, fields(applicant = %principal.id))]
pub async fn apply(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Json(body): Json<Value>,
) -> Result<(StatusCode, HeaderMap, Json<Value>), ApiError> {
    let email = principal_email(&state, &principal).await?;
    let mut doc = json_to_document(&body)?;
    doc.insert("applicant_email", email);

    let stored = Repository::new(&state.db, &APPLICATIONS).create(doc).await?;

    let id = ObjectId::parse_str(&principal.id)
        .map_err(|_| ApiError::Unauthenticated("user not found".into()))?;
    let patch = UserPatch {
        guide_request_status: Some("pending".into()),
        ..Default::default()
    };
    state.users.apply_patch(&id, &patch).await?;

    let location = canonical_ref(&APPLICATIONS, &stored);
    info!(applicant = %principal.id, %location, "guide application submitted");
    Ok((
        StatusCode::CREATED,
        location_headers(&location)?,
        Json(document_to_json(&stored)),
    ))
}
