use mongodb::bson::{doc, oid::ObjectId, Document};

use crate::auth::handlers::is_valid_email;
use crate::error::ApiError;

/// How a resource's documents are addressed on `/:id` routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// BSON ObjectId, hex on the wire.
    ObjectId,
    /// Natural key: the document's email field.
    Email,
}

/// Access level required for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Authenticated,
    Admin,
    /// The document's owner (matched by email) or an admin.
    OwnerOrAdmin,
}

#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub list: Access,
    pub read: Access,
    pub create: Access,
    pub update: Access,
    pub delete: Access,
}

/// Secondary lookup route, e.g. bookings by guide email.
pub struct Lookup {
    pub path: &'static str,
    pub field: &'static str,
    pub access: Access,
}

pub type ValidateFn = fn(&Document) -> Result<(), ApiError>;

/// Declarative registration of one resource collection. Each resource is a
/// row here, not a hand-written set of handlers.
pub struct ResourceDef {
    pub name: &'static str,
    pub collection: &'static str,
    /// Route prefix under which the resource is mounted.
    pub route: &'static str,
    pub key: Key,
    /// Fields a create payload must carry.
    pub required: &'static [&'static str],
    /// Server-side fallbacks applied to create payloads.
    pub defaults: &'static [(&'static str, &'static str)],
    /// Email field stamped from the caller on create and checked on
    /// owner-gated operations.
    pub owner_field: Option<&'static str>,
    pub validate: Option<ValidateFn>,
    pub policy: Policy,
    pub random: bool,
    pub lookups: &'static [Lookup],
}

impl ResourceDef {
    /// Builds the `/:id` filter; malformed identifiers are rejected here,
    /// before any database call.
    pub fn id_filter(&self, id: &str) -> Result<Document, ApiError> {
        match self.key {
            Key::ObjectId => {
                let oid = ObjectId::parse_str(id).map_err(|_| {
                    ApiError::validation(format!("malformed {} id", self.name))
                })?;
                Ok(doc! { "_id": oid })
            }
            Key::Email => {
                if !is_valid_email(id) {
                    return Err(ApiError::validation(format!(
                        "malformed {} email",
                        self.name
                    )));
                }
                Ok(doc! { "email": id })
            }
        }
    }

    pub fn validate_create(&self, doc: &Document) -> Result<(), ApiError> {
        for field in self.required {
            let missing = match doc.get(*field) {
                None => true,
                Some(value) => value.as_str().map(|s| s.is_empty()).unwrap_or(false),
            };
            if missing {
                return Err(ApiError::validation(format!(
                    "{}: missing required field '{}'",
                    self.name, field
                )));
            }
        }
        if let Some(validate) = self.validate {
            validate(doc)?;
        }
        Ok(())
    }

    pub fn validate_patch(&self, patch: &Document) -> Result<(), ApiError> {
        if let Some(validate) = self.validate {
            validate(patch)?;
        }
        Ok(())
    }

    pub fn apply_defaults(&self, doc: &mut Document) {
        for (field, value) in self.defaults {
            if !doc.contains_key(*field) {
                doc.insert(*field, *value);
            }
        }
    }

    /// Strips fields the client may never set.
    pub fn sanitize_create(&self, doc: &mut Document) {
        doc.remove("_id");
        doc.remove("id");
        doc.remove("created_at");
    }

    /// As `sanitize_create`, plus the natural key and owner stamp, which
    /// are immutable once written.
    pub fn sanitize_patch(&self, patch: &mut Document) {
        self.sanitize_create(patch);
        if self.key == Key::Email {
            patch.remove("email");
        }
        if let Some(owner) = self.owner_field {
            patch.remove(owner);
        }
    }
}

const BOOKING_STATUSES: [&str; 3] = ["pending", "confirmed", "cancelled"];

fn validate_booking(doc: &Document) -> Result<(), ApiError> {
    if let Some(status) = doc.get("status") {
        let ok = status
            .as_str()
            .map(|s| BOOKING_STATUSES.contains(&s))
            .unwrap_or(false);
        if !ok {
            return Err(ApiError::validation(
                "booking status must be pending, confirmed or cancelled",
            ));
        }
    }
    Ok(())
}

pub static PACKAGES: ResourceDef = ResourceDef {
    name: "package",
    route: "packages",
    collection: "packages",
    key: Key::ObjectId,
    required: &["destination", "price"],
    defaults: &[],
    owner_field: None,
    validate: None,
    policy: Policy {
        list: Access::Public,
        read: Access::Public,
        create: Access::Admin,
        update: Access::Admin,
        delete: Access::Admin,
    },
    random: true,
    lookups: &[],
};

pub static BOOKINGS: ResourceDef = ResourceDef {
    name: "booking",
    route: "bookings",
    collection: "bookings",
    key: Key::ObjectId,
    required: &["tour_date"],
    defaults: &[("status", "pending")],
    owner_field: Some("user_email"),
    validate: Some(validate_booking),
    policy: Policy {
        list: Access::Admin,
        read: Access::OwnerOrAdmin,
        create: Access::Authenticated,
        update: Access::OwnerOrAdmin,
        delete: Access::OwnerOrAdmin,
    },
    random: false,
    lookups: &[
        Lookup {
            path: "/user/:email",
            field: "user_email",
            access: Access::OwnerOrAdmin,
        },
        Lookup {
            path: "/guide/:email",
            field: "guide_email",
            access: Access::OwnerOrAdmin,
        },
    ],
};

pub static GUIDES: ResourceDef = ResourceDef {
    name: "tour guide",
    route: "guides",
    collection: "tour_guides",
    key: Key::Email,
    required: &["email", "name"],
    defaults: &[],
    owner_field: None,
    validate: None,
    policy: Policy {
        list: Access::Public,
        read: Access::Public,
        create: Access::Admin,
        update: Access::Admin,
        delete: Access::Admin,
    },
    random: true,
    lookups: &[],
};

pub static STORIES: ResourceDef = ResourceDef {
    name: "story",
    route: "stories",
    collection: "stories",
    key: Key::ObjectId,
    required: &["content"],
    defaults: &[],
    owner_field: Some("author_email"),
    validate: None,
    policy: Policy {
        list: Access::Public,
        read: Access::Public,
        create: Access::Authenticated,
        update: Access::OwnerOrAdmin,
        delete: Access::OwnerOrAdmin,
    },
    random: true,
    lookups: &[Lookup {
        path: "/user/:email",
        field: "author_email",
        access: Access::Public,
    }],
};

pub static APPLICATIONS: ResourceDef = ResourceDef {
    name: "application",
    route: "applications",
    collection: "applications",
    key: Key::ObjectId,
    required: &[],
    defaults: &[("status", "pending")],
    owner_field: Some("applicant_email"),
    validate: None,
    policy: Policy {
        list: Access::Admin,
        read: Access::Admin,
        // Creation goes through the dedicated apply handler.
        create: Access::Authenticated,
        update: Access::Admin,
        delete: Access::Admin,
    },
    random: false,
    lookups: &[],
};

pub static ANNOUNCEMENTS: ResourceDef = ResourceDef {
    name: "announcement",
    route: "announcements",
    collection: "announcements",
    key: Key::ObjectId,
    required: &["title"],
    defaults: &[],
    owner_field: None,
    validate: None,
    policy: Policy {
        list: Access::Public,
        read: Access::Public,
        create: Access::Admin,
        update: Access::Admin,
        delete: Access::Admin,
    },
    random: false,
    lookups: &[],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_keys_reject_malformed_ids_before_any_query() {
        let err = PACKAGES.id_filter("not-a-hex-id").unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let filter = PACKAGES
            .id_filter("64b5f0a1c2d3e4f5a6b7c8d9")
            .expect("well-formed id");
        assert!(filter.get_object_id("_id").is_ok());
    }

    #[test]
    fn email_keys_validate_the_email_shape() {
        let err = GUIDES.id_filter("definitely not an email").unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let filter = GUIDES.id_filter("guide@example.com").expect("email key");
        assert_eq!(filter.get_str("email").unwrap(), "guide@example.com");
    }

    #[test]
    fn create_validation_requires_the_declared_fields() {
        let doc = doc! { "destination": "Sylhet" };
        let err = PACKAGES.validate_create(&doc).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let doc = doc! { "destination": "Sylhet", "price": 12500 };
        PACKAGES.validate_create(&doc).expect("complete payload");

        // Present-but-empty counts as missing.
        let doc = doc! { "destination": "", "price": 12500 };
        assert!(PACKAGES.validate_create(&doc).is_err());
    }

    #[test]
    fn booking_defaults_and_status_validation() {
        let mut doc = doc! { "tour_date": "2025-07-01" };
        BOOKINGS.apply_defaults(&mut doc);
        assert_eq!(doc.get_str("status").unwrap(), "pending");
        BOOKINGS.validate_create(&doc).expect("defaulted booking");

        // A caller-supplied status is kept, but must be a known one.
        let mut doc = doc! { "tour_date": "2025-07-01", "status": "confirmed" };
        BOOKINGS.apply_defaults(&mut doc);
        assert_eq!(doc.get_str("status").unwrap(), "confirmed");

        let bad = doc! { "status": "teleported" };
        assert!(matches!(
            BOOKINGS.validate_patch(&bad),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn sanitize_strips_server_owned_fields() {
        let mut doc = doc! { "_id": "spoofed", "id": "spoofed", "created_at": "spoofed", "destination": "Sylhet" };
        PACKAGES.sanitize_create(&mut doc);
        assert_eq!(doc.keys().count(), 1);

        let mut patch = doc! { "email": "other@example.com", "name": "New Name" };
        GUIDES.sanitize_patch(&mut patch);
        assert!(!patch.contains_key("email"));
        assert!(patch.contains_key("name"));

        let mut patch = doc! { "user_email": "stolen@example.com", "status": "confirmed" };
        BOOKINGS.sanitize_patch(&mut patch);
        assert!(!patch.contains_key("user_email"));
        assert!(patch.contains_key("status"));
    }
}
