//! The document store the engine reads from and writes to.
//!
//! A store offers single-document atomic writes and nothing more: no multi-document
//! transactions and no server-side increment. Everything above this module is written with
//! that limit in mind.

use std::future::Future;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{Record, User};
use crate::time::Timestamp;

mod error;
mod filter;
mod memory;
mod surreal;

pub use error::*;
pub use filter::*;
pub use memory::*;
pub use surreal::*;

pub type Fields = Map<String, Value>;

/// A stored document: its identity, its creation time and its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub created_at: Timestamp,
    pub fields: Fields,
}

impl Document {
    /// Reads a field by name. `id` and `created_at` resolve to the document's identity and
    /// creation time.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            ID => Some(Value::String(self.id.clone())),
            CREATED_AT => Some(Value::String(self.created_at.to_rfc3339())),
            _ => self.fields.get(name).cloned(),
        }
    }

    /// Deserializes the document, identity and creation time included, into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let mut object = self.fields.clone();
        object.insert(ID.to_string(), Value::String(self.id.clone()));
        object.insert(
            CREATED_AT.to_string(),
            Value::String(self.created_at.to_rfc3339()),
        );
        serde_json::from_value(Value::Object(object))
    }
}

/// One page of a `list` call. `total` counts every document matching the conditions,
/// regardless of cursor and limit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    pub documents: Vec<Document>,
    pub total: u64,
}

/// The id a new document is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentId {
    /// Let the store pick a unique id.
    Generate,
    /// Use this id; creation fails with a conflict when it is taken.
    Exact(String),
}

impl DocumentId {
    pub fn resolve(self) -> String {
        match self {
            Self::Generate => uuid::Uuid::new_v4().simple().to_string(),
            Self::Exact(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Any,
    User(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "action", content = "role", rename_all = "lowercase")]
pub enum Permission {
    Read(Role),
    Update(Role),
    Delete(Role),
}

/// Access rules attached to a document at creation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Acl(pub Vec<Permission>);

impl Acl {
    /// Readable by anyone, changeable only by `owner`.
    pub fn owned_by(owner: &Record<User>) -> Self {
        let role = Role::User(owner.to_string());
        Self(vec![
            Permission::Read(Role::Any),
            Permission::Update(role.clone()),
            Permission::Delete(role),
        ])
    }

    pub fn allows(&self, permission: &Permission) -> bool {
        self.0.contains(permission)
    }
}

/// The document store contract.
///
/// Each call is independent: an `update` on one document and a `create` on another are two
/// separate requests and may interleave with other writers between them.
pub trait DocumentStore: Clone + Send + Sync + 'static {
    /// Fails with [code::NOT_FOUND] when the document does not exist.
    fn get(
        &self, collection: &str, id: &str,
    ) -> impl Future<Output = Result<Document, StoreError>> + Send;

    fn list(
        &self, collection: &str, filters: &[Filter], limit: u32,
    ) -> impl Future<Output = Result<Page, StoreError>> + Send;

    /// Fails with [code::CONFLICT] when a document with the same id exists.
    fn create(
        &self, collection: &str, id: DocumentId, fields: Fields, acl: Acl,
    ) -> impl Future<Output = Result<Document, StoreError>> + Send;

    /// Merges `fields` into the document and returns the result.
    fn update(
        &self, collection: &str, id: &str, fields: Fields,
    ) -> impl Future<Output = Result<Document, StoreError>> + Send;

    fn delete(&self, collection: &str, id: &str)
        -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decode_includes_identity() {
        #[derive(Debug, Deserialize)]
        struct Row {
            id: String,
            created_at: Timestamp,
            title: String,
        }

        let created_at = Timestamp::parse("2024-05-01T12:00:00Z").unwrap();
        let mut fields = Fields::new();
        fields.insert("title".into(), json!("lofi beats"));
        let document = Document {
            id: "v1".into(),
            created_at,
            fields,
        };

        let row: Row = document.decode().unwrap();
        assert_eq!(row.id, "v1");
        assert_eq!(row.created_at, created_at);
        assert_eq!(row.title, "lofi beats");
        assert_eq!(document.field("id"), Some(json!("v1")));
        assert_eq!(document.field("missing"), None);
    }

    #[test]
    fn owner_acl() {
        let owner = Record::<User>::new("u1");
        let acl = Acl::owned_by(&owner);
        assert!(acl.allows(&Permission::Read(Role::Any)));
        assert!(acl.allows(&Permission::Delete(Role::User("u1".into()))));
        assert!(!acl.allows(&Permission::Update(Role::Any)));
    }
}
