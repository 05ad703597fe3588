use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::ResultExt as _;

use crate::service::{DecodeSnafu, EngineError, InvalidInputSnafu};
use crate::store::{Document, Fields, Filter, CREATED_AT, ID};

pub use comment::*;
pub use engagement::*;
pub use record::*;
pub use video::*;

mod comment;
mod engagement;
mod record;
mod video;

/// A type stored as documents of one collection.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    fn collection() -> &'static str;

    fn key(&self) -> &str;
}

pub fn decode<T: Entity>(document: &Document) -> Result<T, EngineError> {
    document.decode().context(DecodeSnafu {
        collection: T::collection(),
        id: document.id.clone(),
    })
}

/// Serializes a draft into the fields of a new document. The store assigns `id` and
/// `created_at`, so a draft carrying either is rejected.
pub fn fields_of(collection: &str, draft: &impl Serialize) -> Result<Fields, EngineError> {
    let value = serde_json::to_value(draft).map_err(|error| {
        InvalidInputSnafu {
            reason: format!("cannot encode a `{collection}` draft: {error}"),
        }
        .build()
    })?;

    match value {
        Value::Object(fields) if !fields.contains_key(ID) && !fields.contains_key(CREATED_AT) => {
            Ok(fields)
        }
        _ => InvalidInputSnafu {
            reason: format!("a `{collection}` draft must be an object without id or created_at"),
        }
        .fail(),
    }
}

/// The signed-in person, handed in by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_new::new)]
pub struct User {
    pub id: Record<User>,
    pub name: String,
}

/// Equality filters selecting one viewer's documents about one video.
pub fn pair_filters(user_id: &Record<User>, video_id: &Record<Video>) -> Vec<Filter> {
    vec![
        Filter::equal("user_id", user_id.as_str()),
        Filter::equal("video_id", video_id.as_str()),
    ]
}

/// Counters are written by many clients with plain read-modify-write, so a stored value may be
/// missing, fractional or negative. All of those read back as a non-negative integer.
pub(crate) fn counter<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    let count = match value {
        Some(Value::Number(number)) => number
            .as_u64()
            .or_else(|| number.as_i64().map(|n| n.max(0) as u64))
            .or_else(|| number.as_f64().map(|n| n.max(0.0) as u64))
            .unwrap_or(0),
        _ => 0,
    };
    Ok(count)
}
