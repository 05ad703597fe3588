//! Shared setup for the engine tests.

use std::sync::Arc;

use chrono::Duration;

use crate::model::{
    counter_fields, Comment, NewComment, NewVideo, Record, User, Video, VideoKind, LIKE_COUNT,
    VIEW_COUNT,
};
use crate::store::{Acl, DocumentId, MemoryStore};
use crate::time::{ManualClock, Timestamp};

pub fn user(id: &str) -> Record<User> {
    Record::new(id)
}

pub fn clocked_store() -> (MemoryStore, ManualClock) {
    let clock = ManualClock::new(Timestamp::parse("2024-05-01T12:00:00Z").unwrap());
    (MemoryStore::with_clock(Arc::new(clock.clone())), clock)
}

pub async fn video(store: &MemoryStore, id: &str, likes: u64) -> Record<Video> {
    video_in(store, id, "music", VideoKind::Long, likes).await
}

pub async fn video_in(
    store: &MemoryStore, id: &str, category: &str, kind: VideoKind, likes: u64,
) -> Record<Video> {
    let draft = NewVideo::new(format!("video {id}"), user("owner"), category.into(), kind);
    let video = Video::create(store, DocumentId::Exact(id.into()), &draft, Acl::default())
        .await
        .unwrap();
    let mut fields = counter_fields(LIKE_COUNT, likes);
    fields.extend(counter_fields(VIEW_COUNT, 0));
    Video::update(store, &video.id, fields).await.unwrap();
    video.id
}

pub async fn like_count(store: &MemoryStore, id: &Record<Video>) -> u64 {
    Video::find(store, id).await.unwrap().like_count
}

pub async fn comment(
    store: &MemoryStore, clock: &ManualClock, video_id: &Record<Video>, id: &str,
    parent: Option<&str>,
) -> Comment {
    clock.advance(Duration::seconds(1));
    let draft = NewComment::new(
        video_id.clone(),
        user("author"),
        "author".into(),
        format!("comment {id}"),
        parent.map(Record::new),
    );
    Comment::create(store, DocumentId::Exact(id.into()), &draft, Acl::default())
        .await
        .unwrap()
}
