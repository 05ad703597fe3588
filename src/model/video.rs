use serde::{Deserialize, Serialize};

use super::{counter, Record, User};
use crate::store::Fields;
use crate::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoKind {
    #[default]
    Long,
    Short,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Video {
    pub id: Record<Video>,
    pub created_at: Timestamp,

    pub title: String,
    pub owner: Record<User>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub kind: VideoKind,

    #[serde(default, deserialize_with = "counter")]
    pub like_count: u64,
    #[serde(default, deserialize_with = "counter")]
    pub view_count: u64,
}

crate::collection!("videos": Video = id);

/// Fields of a video as uploaded; counters start at zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, derive_new::new)]
pub struct NewVideo {
    pub title: String,
    pub owner: Record<User>,
    pub category: String,
    pub kind: VideoKind,
    #[new(value = "0")]
    pub like_count: u64,
    #[new(value = "0")]
    pub view_count: u64,
}

/// The single-field write of a counter.
pub fn counter_fields(field: &str, value: u64) -> Fields {
    let mut fields = Fields::new();
    fields.insert(field.to_string(), value.into());
    fields
}

pub const LIKE_COUNT: &str = "like_count";
pub const VIEW_COUNT: &str = "view_count";
