use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::{
    bson::{self, doc, oid::ObjectId, Document},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
    Collection, Database,
};
use serde::{Deserialize, Serialize};

use crate::auth::jwt::Role;
use crate::error::ApiError;
use crate::retry::{with_backoff, READ_ATTEMPTS, READ_BASE_DELAY};

pub const USERS_COLLECTION: &str = "users";

/// User document as stored in the `users` collection. Never serialized into
/// HTTP responses directly; see `dto::PublicUser`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guide_request_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_token_expires: Option<bson::DateTime>,
    pub created_at: bson::DateTime,
}

impl UserRecord {
    pub fn new(username: String, email: String, password_hash: String) -> Self {
        Self {
            id: None,
            username,
            email,
            password_hash,
            role: Role::User,
            guide_request_status: None,
            reset_token: None,
            reset_token_expires: None,
            created_at: bson::DateTime::now(),
        }
    }

    pub fn id_hex(&self) -> String {
        self.id.map(|id| id.to_hex()).unwrap_or_default()
    }
}

/// Merge-style patch; only populated fields are written.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct UserPatch {
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub guide_request_status: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.role.is_none()
            && self.guide_request_status.is_none()
    }

    fn to_set_document(&self) -> Document {
        let mut set = Document::new();
        if let Some(username) = &self.username {
            set.insert("username", username.as_str());
        }
        if let Some(email) = &self.email {
            set.insert("email", email.as_str());
        }
        if let Some(role) = &self.role {
            set.insert("role", role.as_str());
        }
        if let Some(status) = &self.guide_request_status {
            set.insert("guide_request_status", status.as_str());
        }
        set
    }
}

/// Credential store behind the auth service and the users admin surface.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: &ObjectId) -> Result<Option<UserRecord>, ApiError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, ApiError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, ApiError>;
    async fn list(&self, limit: i64, offset: u64) -> Result<Vec<UserRecord>, ApiError>;
    async fn insert(&self, user: UserRecord) -> Result<UserRecord, ApiError>;
    async fn apply_patch(
        &self,
        id: &ObjectId,
        patch: &UserPatch,
    ) -> Result<Option<UserRecord>, ApiError>;
    async fn delete(&self, id: &ObjectId) -> Result<u64, ApiError>;
    /// Attaches a reset token to the account registered under `email`;
    /// `false` when no such account exists.
    async fn set_reset_token(
        &self,
        email: &str,
        token: &str,
        expires: bson::DateTime,
    ) -> Result<bool, ApiError>;
    /// Atomically consumes a non-expired reset token: swaps in the new
    /// password hash and clears the token fields. `false` when no user holds
    /// a matching live token, which covers expiry and replay alike.
    async fn redeem_reset_token(
        &self,
        token: &str,
        new_hash: &str,
        now: bson::DateTime,
    ) -> Result<bool, ApiError>;
}

pub struct MongoUserStore {
    coll: Collection<UserRecord>,
}

impl MongoUserStore {
    pub fn new(db: &Database) -> Self {
        Self {
            coll: db.collection::<UserRecord>(USERS_COLLECTION),
        }
    }

    async fn find_one_with_retry(
        &self,
        filter: Document,
    ) -> Result<Option<UserRecord>, ApiError> {
        let coll = self.coll.clone();
        with_backoff(READ_ATTEMPTS, READ_BASE_DELAY, move || {
            let coll = coll.clone();
            let filter = filter.clone();
            async move { coll.find_one(filter, None).await.map_err(ApiError::from) }
        })
        .await
    }
}

#[async_trait]
impl UserStore for MongoUserStore {
    async fn find_by_id(&self, id: &ObjectId) -> Result<Option<UserRecord>, ApiError> {
        self.find_one_with_retry(doc! { "_id": *id }).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, ApiError> {
        self.find_one_with_retry(doc! { "username": username }).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, ApiError> {
        self.find_one_with_retry(doc! { "email": email }).await
    }

    async fn list(&self, limit: i64, offset: u64) -> Result<Vec<UserRecord>, ApiError> {
        let coll = self.coll.clone();
        with_backoff(READ_ATTEMPTS, READ_BASE_DELAY, move || {
            let coll = coll.clone();
            async move {
                let options = FindOptions::builder()
                    .sort(doc! { "created_at": -1 })
                    .skip(offset)
                    .limit(limit)
                    .build();
                let cursor = coll.find(None, options).await.map_err(ApiError::from)?;
                cursor.try_collect().await.map_err(ApiError::from)
            }
        })
        .await
    }

    async fn insert(&self, mut user: UserRecord) -> Result<UserRecord, ApiError> {
        let result = self.coll.insert_one(&user, None).await?;
        user.id = result.inserted_id.as_object_id();
        Ok(user)
    }

    async fn apply_patch(
        &self,
        id: &ObjectId,
        patch: &UserPatch,
    ) -> Result<Option<UserRecord>, ApiError> {
        let set = patch.to_set_document();
        if set.is_empty() {
            return self.find_by_id(id).await;
        }
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let updated = self
            .coll
            .find_one_and_update(doc! { "_id": *id }, doc! { "$set": set }, options)
            .await?;
        Ok(updated)
    }

    async fn delete(&self, id: &ObjectId) -> Result<u64, ApiError> {
        let result = self.coll.delete_one(doc! { "_id": *id }, None).await?;
        Ok(result.deleted_count)
    }

    async fn set_reset_token(
        &self,
        email: &str,
        token: &str,
        expires: bson::DateTime,
    ) -> Result<bool, ApiError> {
        let result = self
            .coll
            .update_one(
                doc! { "email": email },
                doc! { "$set": { "reset_token": token, "reset_token_expires": expires } },
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn redeem_reset_token(
        &self,
        token: &str,
        new_hash: &str,
        now: bson::DateTime,
    ) -> Result<bool, ApiError> {
        let redeemed = self
            .coll
            .find_one_and_update(
                doc! { "reset_token": token, "reset_token_expires": { "$gt": now } },
                doc! {
                    "$set": { "password_hash": new_hash },
                    "$unset": { "reset_token": "", "reset_token_expires": "" },
                },
                None,
            )
            .await?;
        Ok(redeemed.is_some())
    }
}
