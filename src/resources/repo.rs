use futures::stream::TryStreamExt;
use mongodb::{
    bson::{self, doc, Bson, Document},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
    Collection, Database,
};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::resources::defs::ResourceDef;
use crate::retry::{with_backoff, READ_ATTEMPTS, READ_BASE_DELAY};

/// Generic data access over one collection, driven by a `ResourceDef`.
pub struct Repository {
    coll: Collection<Document>,
    def: &'static ResourceDef,
}

impl Repository {
    pub fn new(db: &Database, def: &'static ResourceDef) -> Self {
        Self {
            coll: db.collection::<Document>(def.collection),
            def,
        }
    }

    async fn find_with_retry(
        &self,
        filter: Document,
        options: FindOptions,
    ) -> Result<Vec<Document>, ApiError> {
        let coll = self.coll.clone();
        with_backoff(READ_ATTEMPTS, READ_BASE_DELAY, move || {
            let coll = coll.clone();
            let filter = filter.clone();
            let options = options.clone();
            async move {
                let cursor = coll.find(filter, options).await.map_err(ApiError::from)?;
                cursor.try_collect().await.map_err(ApiError::from)
            }
        })
        .await
    }

    pub async fn list(&self, limit: i64, offset: u64) -> Result<Vec<Document>, ApiError> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .skip(offset)
            .limit(limit)
            .build();
        self.find_with_retry(Document::new(), options).await
    }

    pub async fn find_by_field(&self, field: &str, value: &str) -> Result<Vec<Document>, ApiError> {
        let options = FindOptions::builder().sort(doc! { "created_at": -1 }).build();
        self.find_with_retry(doc! { field: value }, options).await
    }

    /// `$sample` aggregation; may return fewer than `n` documents.
    pub async fn random_sample(&self, n: i64) -> Result<Vec<Document>, ApiError> {
        let coll = self.coll.clone();
        with_backoff(READ_ATTEMPTS, READ_BASE_DELAY, move || {
            let coll = coll.clone();
            async move {
                let cursor = coll
                    .aggregate(vec![doc! { "$sample": { "size": n } }], None)
                    .await
                    .map_err(ApiError::from)?;
                cursor.try_collect().await.map_err(ApiError::from)
            }
        })
        .await
    }

    pub async fn find_one(&self, id: &str) -> Result<Option<Document>, ApiError> {
        let filter = self.def.id_filter(id)?;
        let coll = self.coll.clone();
        with_backoff(READ_ATTEMPTS, READ_BASE_DELAY, move || {
            let coll = coll.clone();
            let filter = filter.clone();
            async move { coll.find_one(filter, None).await.map_err(ApiError::from) }
        })
        .await
    }

    pub async fn get(&self, id: &str) -> Result<Document, ApiError> {
        self.find_one(id).await?.ok_or_else(|| {
            ApiError::not_found(format!("{} not found", self.def.name))
        })
    }

    /// Inserts after sanitizing, defaulting and validating; returns the
    /// stored document including its generated id and `created_at`.
    pub async fn create(&self, mut doc: Document) -> Result<Document, ApiError> {
        self.def.sanitize_create(&mut doc);
        self.def.apply_defaults(&mut doc);
        self.def.validate_create(&doc)?;
        doc.insert("created_at", bson::DateTime::now());

        let result = self.coll.insert_one(&doc, None).await?;
        doc.insert("_id", result.inserted_id);
        Ok(doc)
    }

    /// `$set` merge of the provided fields only; everything else in the
    /// stored document is left untouched.
    pub async fn update(&self, id: &str, mut patch: Document) -> Result<Document, ApiError> {
        let filter = self.def.id_filter(id)?;
        self.def.sanitize_patch(&mut patch);
        if patch.is_empty() {
            return Err(ApiError::validation("no updatable fields in payload"));
        }
        self.def.validate_patch(&patch)?;

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        self.coll
            .find_one_and_update(filter, doc! { "$set": patch }, options)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("{} not found", self.def.name)))
    }

    /// Idempotent: deleting an absent id reports zero affected documents.
    pub async fn delete(&self, id: &str) -> Result<u64, ApiError> {
        let filter = self.def.id_filter(id)?;
        let result = self.coll.delete_one(filter, None).await?;
        Ok(result.deleted_count)
    }

    pub async fn count(&self) -> Result<u64, ApiError> {
        let coll = self.coll.clone();
        with_backoff(READ_ATTEMPTS, READ_BASE_DELAY, move || {
            let coll = coll.clone();
            async move { coll.count_documents(None, None).await.map_err(ApiError::from) }
        })
        .await
    }
}

/// Renders a stored document as plain JSON: `_id` becomes `id` (hex string),
/// BSON dates become RFC 3339 strings.
pub fn document_to_json(doc: &Document) -> Value {
    let mut map = serde_json::Map::with_capacity(doc.len());
    for (key, value) in doc {
        let key = if key == "_id" { "id".to_string() } else { key.clone() };
        map.insert(key, bson_to_json(value));
    }
    Value::Object(map)
}

fn bson_to_json(value: &Bson) -> Value {
    match value {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => Value::String(dt.try_to_rfc3339_string().unwrap_or_default()),
        Bson::String(s) => Value::String(s.clone()),
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(n) => json!(n),
        Bson::Int64(n) => json!(n),
        Bson::Double(n) => json!(n),
        Bson::Null => Value::Null,
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_json).collect()),
        Bson::Document(nested) => {
            let mut map = serde_json::Map::with_capacity(nested.len());
            for (key, value) in nested {
                map.insert(key.clone(), bson_to_json(value));
            }
            Value::Object(map)
        }
        other => other.clone().into_relaxed_extjson(),
    }
}

pub fn documents_to_json(docs: &[Document]) -> Value {
    Value::Array(docs.iter().map(document_to_json).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::oid::ObjectId;

    #[test]
    fn id_surfaces_as_a_hex_string() {
        let oid = ObjectId::new();
        let doc = doc! { "_id": oid, "destination": "Sylhet" };
        let json = document_to_json(&doc);

        assert_eq!(json["id"], Value::String(oid.to_hex()));
        assert!(json.get("_id").is_none());
        assert_eq!(json["destination"], "Sylhet");
    }

    #[test]
    fn dates_surface_as_rfc3339() {
        let doc = doc! { "created_at": bson::DateTime::from_millis(1_700_000_000_000) };
        let json = document_to_json(&doc);
        let rendered = json["created_at"].as_str().unwrap();
        assert!(rendered.starts_with("2023-11-14T"));
    }

    #[test]
    fn scalars_and_nesting_pass_through() {
        let doc = doc! {
            "price": 12500_i32,
            "rating": 4.5,
            "tags": ["beach", "hill"],
            "meta": { "featured": true, "views": 10_i64 },
            "note": Bson::Null,
        };
        let json = document_to_json(&doc);
        assert_eq!(json["price"], 12500);
        assert_eq!(json["rating"], 4.5);
        assert_eq!(json["tags"][1], "hill");
        assert_eq!(json["meta"]["featured"], true);
        assert_eq!(json["meta"]["views"], 10);
        assert_eq!(json["note"], Value::Null);
    }

    #[test]
    fn array_rendering_keeps_order() {
        let docs = vec![doc! { "n": 1 }, doc! { "n": 2 }];
        let json = documents_to_json(&docs);
        assert_eq!(json[0]["n"], 1);
        assert_eq!(json[1]["n"], 2);
    }
}
