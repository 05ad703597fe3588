use derive_new::new;
use serde::{Deserialize, Serialize};

use super::{pair_filters, Record, User, Video};
use crate::store::Filter;
use crate::time::Timestamp;

/// A document linking one viewer to one video.
pub trait Interaction: super::Entity {
    fn user_id(&self) -> &Record<User>;

    fn video_id(&self) -> &Record<Video>;
}

macro_rules! interaction {
    ($(#[$meta:meta])* $name:ident in $collection:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
        pub struct $name {
            pub id: Record<$name>,
            pub created_at: Timestamp,
            pub user_id: Record<User>,
            pub video_id: Record<Video>,
        }

        crate::collection!($collection: $name = id);

        impl Interaction for $name {
            fn user_id(&self) -> &Record<User> {
                &self.user_id
            }

            fn video_id(&self) -> &Record<Video> {
                &self.video_id
            }
        }
    };
}

interaction! {
    /// A viewer likes a video. At most one may exist per pair; the store does not enforce it.
    LikeRecord in "likes"
}

interaction! {
    /// A viewer watched a video. Many may exist per pair, at most one per dedup window.
    ViewRecord in "views"
}

interaction! {
    /// A video in a viewer's watch history.
    HistoryEntry in "history"
}

interaction! {
    /// A video a viewer saved to watch later.
    WatchLaterEntry in "watch_later"
}

impl LikeRecord {
    /// The id every like by `user_id` on `video_id` is created with. A second like for the pair
    /// collides with the first and the store rejects it as a conflict.
    pub fn id_for(user_id: &Record<User>, video_id: &Record<Video>) -> Record<LikeRecord> {
        Record::new(format!("{user_id}:{video_id}"))
    }
}

/// The fields of a new interaction document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, new)]
pub struct NewInteraction {
    pub user_id: Record<User>,
    pub video_id: Record<Video>,
}

impl NewInteraction {
    pub fn filters(&self) -> Vec<Filter> {
        pair_filters(&self.user_id, &self.video_id)
    }
}
