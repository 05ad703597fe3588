use derive_new::new;
use serde::{Deserialize, Serialize};

use super::{Record, User, Video};
use crate::time::Timestamp;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Comment {
    pub id: Record<Comment>,
    pub created_at: Timestamp,

    pub video_id: Record<Video>,
    pub author_id: Record<User>,
    pub author_name: String,
    pub body: String,
    /// `None` for a top-level comment, otherwise the comment this one replies to.
    #[serde(default)]
    pub parent_id: Option<Record<Comment>>,
}

crate::collection!("comments": Comment = id);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, new)]
pub struct NewComment {
    pub video_id: Record<Video>,
    pub author_id: Record<User>,
    pub author_name: String,
    pub body: String,
    pub parent_id: Option<Record<Comment>>,
}
