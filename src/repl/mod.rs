//! A line-oriented stand-in for the UI: each command drives one session operation and prints
//! the resulting view-model.

use std::fmt::Write as _;

use snafu::ResultExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::{ApplicationError, ReadCommandSnafu};
use crate::model::{Comment, HistoryEntry, LikeRecord, Record, User, Video, WatchLaterEntry};
use crate::service::{
    CommentThread, FeedPaginator, FeedSource, FetchOutcome, KeyValueStore, PreferenceStore,
    ToggleOutcome,
};
use crate::session::{LibraryFeed, Session, VideoFeed};
use crate::store::DocumentStore;

mod parse;

pub use parse::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Feed { category: Option<String> },
    Shorts,
    Channel { owner: Record<User> },
    Related { video_id: Record<Video> },
    /// Scrolled to the end of the current feed.
    More,
    Open { video_id: Record<Video> },
    Like { video_id: Record<Video> },
    Comments { video_id: Record<Video> },
    Comment { video_id: Record<Video>, body: String },
    Reply {
        video_id: Record<Video>,
        parent_id: Record<Comment>,
        body: String,
    },
    SaveForLater { video_id: Record<Video> },
    RemoveFromWatchLater { video_id: Record<Video> },
    History,
    Liked,
    WatchLater,
    Mute { muted: bool },
    Help,
    Exit,
    None,
}

const HELP: &str = "\
feed [category]         long-form videos, newest first
shorts                  short videos
channel <user>          videos of one channel
related <video>         more like a video
more                    next page of the current feed
open <video>            watch a video
like <video>            like or unlike
comments <video>        read the comments
comment <video> <text>  comment on a video
reply <video> <comment> <text>
later <video>           save for later
unsave <video>          remove from watch later
history | liked | watchlater
mute [on|off]
quit";

/// The feed `more` pages through.
enum ActiveFeed<S: DocumentStore> {
    Videos(VideoFeed<S>),
    History(LibraryFeed<S, HistoryEntry>),
    Liked(LibraryFeed<S, LikeRecord>),
    WatchLater(LibraryFeed<S, WatchLaterEntry>),
}

impl<S: DocumentStore> ActiveFeed<S> {
    async fn first_page(&self) -> String {
        match self {
            Self::Videos(feed) => first_page(feed).await,
            Self::History(feed) => first_page(feed).await,
            Self::Liked(feed) => first_page(feed).await,
            Self::WatchLater(feed) => first_page(feed).await,
        }
    }

    async fn next_page(&self) -> String {
        match self {
            Self::Videos(feed) => next_page(feed).await,
            Self::History(feed) => next_page(feed).await,
            Self::Liked(feed) => next_page(feed).await,
            Self::WatchLater(feed) => next_page(feed).await,
        }
    }
}

pub struct Repl<S: DocumentStore, K> {
    session: Session<S>,
    preferences: PreferenceStore<K>,
    feed: Option<ActiveFeed<S>>,
}

impl<S: DocumentStore, K: KeyValueStore> Repl<S, K> {
    pub fn new(session: Session<S>, preferences: PreferenceStore<K>) -> Self {
        Self {
            session,
            preferences,
            feed: None,
        }
    }

    pub fn session(&self) -> &Session<S> {
        &self.session
    }

    /// Runs one action and renders its outcome.
    pub async fn execute(&mut self, action: Action) -> String {
        match action {
            Action::None | Action::Exit => String::new(),
            Action::Help => HELP.to_string(),
            Action::Feed { category } => {
                self.show(ActiveFeed::Videos(self.session.home(category.as_deref())))
                    .await
            }
            Action::Shorts => self.show(ActiveFeed::Videos(self.session.shorts())).await,
            Action::Channel { owner } => {
                self.show(ActiveFeed::Videos(self.session.channel(&owner)))
                    .await
            }
            Action::Related { video_id } => {
                match Video::find(self.session.store(), &video_id).await {
                    Ok(video) => {
                        self.show(ActiveFeed::Videos(self.session.related(&video)))
                            .await
                    }
                    Err(error) => error.to_string(),
                }
            }
            Action::More => match &self.feed {
                Some(feed) => feed.next_page().await,
                None => "nothing to page through, open a feed first".to_string(),
            },
            Action::History => match self.session.history() {
                Ok(feed) => self.show(ActiveFeed::History(feed)).await,
                Err(error) => error.to_string(),
            },
            Action::Liked => match self.session.liked() {
                Ok(feed) => self.show(ActiveFeed::Liked(feed)).await,
                Err(error) => error.to_string(),
            },
            Action::WatchLater => match self.session.watch_later() {
                Ok(feed) => self.show(ActiveFeed::WatchLater(feed)).await,
                Err(error) => error.to_string(),
            },
            Action::Open { video_id } => self.open(&video_id).await,
            Action::Like { video_id } => match self.session.toggle_like(&video_id).await {
                Ok(ToggleOutcome::Committed(view) | ToggleOutcome::Resynced(view)) => {
                    let verb = if view.liked { "liked" } else { "not liked" };
                    format!("{verb}, {} likes", view.count)
                }
                Ok(ToggleOutcome::Ignored) => "still saving your last like".to_string(),
                Ok(ToggleOutcome::Discarded) => String::new(),
                Err(error) => match self.session.like_view(&video_id) {
                    Some(view) => format!("{error} ({} likes)", view.count),
                    None => error.to_string(),
                },
            },
            Action::Comments { video_id } => render_thread(&self.session.comments(&video_id).await),
            Action::Comment { video_id, body } => self.post(&video_id, &body, None).await,
            Action::Reply {
                video_id,
                parent_id,
                body,
            } => self.post(&video_id, &body, Some(parent_id)).await,
            Action::SaveForLater { video_id } => {
                match self.session.save_for_later(&video_id).await {
                    Ok(_) => format!("saved `{video_id}` for later"),
                    Err(error) => error.to_string(),
                }
            }
            Action::RemoveFromWatchLater { video_id } => {
                match self.session.remove_from_watch_later(&video_id).await {
                    Ok(true) => format!("removed `{video_id}` from watch later"),
                    Ok(false) => format!("`{video_id}` was not saved"),
                    Err(error) => error.to_string(),
                }
            }
            Action::Mute { muted } => self.mute(muted).await,
        }
    }

    async fn show(&mut self, feed: ActiveFeed<S>) -> String {
        let rendered = feed.first_page().await;
        self.feed = Some(feed);
        rendered
    }

    async fn open(&mut self, video_id: &Record<Video>) -> String {
        let mut video = match Video::find(self.session.store(), video_id).await {
            Ok(video) => video,
            Err(error) => return error.to_string(),
        };
        self.session.open_video(&mut video).await;

        let mut reply = format!("{} [{}] {} views", video.title, video.id, video.view_count);
        if self.session.viewer().is_some() {
            match self.session.load_like(video_id).await {
                Ok(view) => {
                    let marker = if view.liked { ", liked" } else { "" };
                    let _ = write!(reply, ", {} likes{marker}", view.count);
                }
                Err(error) => {
                    let _ = write!(reply, ", likes unavailable: {error}");
                }
            }
        } else {
            let _ = write!(reply, ", {} likes", video.like_count);
        }
        if self.session.preferences().muted {
            reply.push_str(" (muted)");
        }
        reply
    }

    async fn post(
        &self, video_id: &Record<Video>, body: &str, parent_id: Option<Record<Comment>>,
    ) -> String {
        match self.session.post_comment(video_id, body, parent_id).await {
            Ok(comment) => format!("posted `{}`", comment.id),
            Err(error) => error.to_string(),
        }
    }

    async fn mute(&mut self, muted: bool) -> String {
        let mut preferences = self.session.preferences().clone();
        preferences.muted = muted;

        match self.preferences.save(&preferences).await {
            Ok(()) => {
                self.session.set_preferences(preferences);
                let reply = if muted { "videos start muted" } else { "videos start with sound" };
                reply.to_string()
            }
            Err(error) => {
                tracing::warn!(error = %error, "could not save preferences");
                error.to_string()
            }
        }
    }
}

/// Reads commands from stdin until `quit` or end of input.
pub async fn start<S: DocumentStore, K: KeyValueStore>(
    repl: &mut Repl<S, K>,
) -> Result<(), ApplicationError> {
    tracing::info!("starting REPL");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"clipfeed> ").await.context(ReadCommandSnafu)?;
        stdout.flush().await.context(ReadCommandSnafu)?;

        let Some(line) = lines.next_line().await.context(ReadCommandSnafu)? else {
            break;
        };

        let reply = match parse(&line) {
            Ok(Action::Exit) => break,
            Ok(action) => repl.execute(action).await,
            Err(error) => error.to_string(),
        };

        if !reply.is_empty() {
            stdout
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .context(ReadCommandSnafu)?;
        }
    }

    repl.session().detach();
    Ok(())
}

async fn first_page<F: FeedSource<Item = Video>>(feed: &FeedPaginator<F>) -> String {
    match feed.fetch_first_page(Vec::new()).await {
        Ok(FetchOutcome::Loaded(0)) => "nothing here yet".to_string(),
        Ok(_) => render_videos(&feed.items(), 0, feed.has_more()),
        Err(error) => format!("could not load the feed: {error}"),
    }
}

async fn next_page<F: FeedSource<Item = Video>>(feed: &FeedPaginator<F>) -> String {
    let shown = feed.items().len();
    match feed.on_sentinel_visible().await {
        Ok(FetchOutcome::Loaded(_)) => render_videos(&feed.items(), shown, feed.has_more()),
        Ok(FetchOutcome::Skipped) if !feed.has_more() => "that's everything".to_string(),
        Ok(_) => String::new(),
        Err(error) => format!("could not load more: {error}"),
    }
}

fn render_videos(videos: &[Video], from: usize, has_more: bool) -> String {
    let mut out = String::new();
    for (position, video) in videos.iter().enumerate().skip(from) {
        let _ = writeln!(
            out,
            "{:>3}. {} [{}] {} likes, {} views",
            position + 1,
            video.title,
            video.id,
            video.like_count,
            video.view_count
        );
    }
    out.push_str(if has_more { "  (more)" } else { "  (end)" });
    out
}

fn render_thread(thread: &CommentThread) -> String {
    if let Some(error) = &thread.error {
        return format!("could not load comments: {error}");
    }
    if thread.comments.is_empty() {
        return "no comments yet".to_string();
    }

    let mut out = String::new();
    for node in &thread.comments {
        let comment = &node.comment;
        let _ = writeln!(out, "{} [{}]: {}", comment.author_name, comment.id, comment.body);
        for reply in &node.replies {
            let _ = writeln!(out, "    {} [{}]: {}", reply.author_name, reply.id, reply.body);
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::service::{MemoryKv, Preferences};
    use crate::session::Settings;
    use crate::store::MemoryStore;
    use crate::time::SystemClock;

    fn repl(viewer: Option<User>) -> (Repl<MemoryStore, MemoryKv>, MemoryStore) {
        let store = MemoryStore::new();
        let session = Session::new(
            store.clone(),
            viewer,
            Preferences::default(),
            Settings::new(2, 100),
            Arc::new(SystemClock),
        );
        let repl = Repl::new(session, PreferenceStore::new(MemoryKv::new()));
        (repl, store)
    }

    async fn upload(store: &MemoryStore, id: &str) {
        let draft = crate::model::NewVideo::new(
            format!("video {id}"),
            Record::new("owner"),
            "music".into(),
            crate::model::VideoKind::Long,
        );
        Video::create(store, crate::store::DocumentId::Exact(id.into()), &draft, Default::default())
            .await
            .unwrap();
    }

    fn viewer() -> Option<User> {
        Some(User::new(Record::new("u1"), "Mio".into()))
    }

    #[tokio::test]
    async fn feed_then_more() {
        let (mut repl, store) = repl(viewer());
        for id in ["a", "b", "c"] {
            upload(&store, id).await;
        }

        let first = repl.execute(Action::Feed { category: None }).await;
        assert!(first.contains("[c]") && first.contains("[b]") && first.ends_with("(more)"));

        let more = repl.execute(Action::More).await;
        assert!(more.contains("3. video a [a]") && more.ends_with("(end)"));

        assert_eq!(repl.execute(Action::More).await, "that's everything");
    }

    #[tokio::test]
    async fn like_and_open() {
        let (mut repl, store) = repl(viewer());
        upload(&store, "a").await;
        let video_id = Record::new("a");

        let liked = repl.execute(Action::Like { video_id: video_id.clone() }).await;
        assert_eq!(liked, "liked, 1 likes");
        let opened = repl.execute(Action::Open { video_id }).await;
        assert!(opened.starts_with("video a [a] 1 views, 1 likes, liked"));
        assert!(opened.ends_with("(muted)"));
    }

    #[tokio::test]
    async fn anonymous_viewers_cannot_like() {
        let (mut repl, store) = repl(None);
        upload(&store, "a").await;

        let reply = repl.execute(Action::Like { video_id: Record::new("a") }).await;
        assert_eq!(reply, "this action needs a signed-in viewer");
        assert_eq!(repl.execute(Action::History).await, reply);
    }

    #[tokio::test]
    async fn comment_thread() {
        let (mut repl, store) = repl(viewer());
        upload(&store, "a").await;
        let video_id = Record::<Video>::new("a");

        let posted = repl
            .execute(Action::Comment {
                video_id: video_id.clone(),
                body: "first".into(),
            })
            .await;
        let comment_id = posted
            .trim_start_matches("posted `")
            .trim_end_matches('`')
            .to_string();
        repl.execute(Action::Reply {
            video_id: video_id.clone(),
            parent_id: Record::new(comment_id),
            body: "second".into(),
        })
        .await;

        let thread = repl.execute(Action::Comments { video_id }).await;
        let lines: Vec<_> = thread.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Mio [") && lines[0].ends_with("]: first"));
        assert!(lines[1].starts_with("    Mio [") && lines[1].ends_with("]: second"));
    }

    #[tokio::test]
    async fn mute_is_saved() {
        let (mut repl, _store) = repl(viewer());

        assert_eq!(repl.execute(Action::Mute { muted: false }).await, "videos start with sound");
        assert!(!repl.session().preferences().muted);
        assert!(!repl.preferences.load().await.unwrap().muted);
    }
}
