use std::sync::Arc;

use derive_new::new;
use snafu::OptionExt as _;
use tracing::instrument;

use crate::model::{
    Comment, HistoryEntry, LikeRecord, Record, User, Video, VideoKind, WatchLaterEntry,
};
use crate::service::{
    CollectionFeed, CommentService, CommentThread, EngineError, FeedPaginator, JoinFeed, Library,
    LikeReconciler, LikeStatus, LikeView, Liveness, Preferences, ToggleOutcome,
    UnauthenticatedSnafu, ViewDedupLogger,
};
use crate::store::{DocumentStore, Filter, ID};
use crate::time::Clock;

pub type VideoFeed<S> = FeedPaginator<CollectionFeed<S, Video>>;
pub type LibraryFeed<S, J> = FeedPaginator<JoinFeed<S, J>>;

/// Sizes of the reads a session makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct Settings {
    pub page_size: u32,
    pub comment_limit: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(12, 100)
    }
}

/// Everything one signed-in (or anonymous) viewer does, on top of one store.
///
/// Each session owns its reconciler, logger and feeds; nothing is shared with other sessions
/// except the store. After [Session::detach] results that resolve late are discarded.
#[derive(Debug)]
pub struct Session<S> {
    store: S,
    viewer: Option<User>,
    preferences: Preferences,
    settings: Settings,
    liveness: Liveness,
    likes: LikeReconciler<S>,
    views: ViewDedupLogger<S>,
    comments: CommentService<S>,
    library: Library<S>,
}

impl<S: DocumentStore> Session<S> {
    pub fn new(
        store: S, viewer: Option<User>, preferences: Preferences, settings: Settings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let liveness = Liveness::new();

        Self {
            likes: LikeReconciler::new(store.clone(), liveness.clone()),
            views: ViewDedupLogger::new(store.clone(), preferences.view_dedup_window, clock),
            comments: CommentService::new(store.clone(), settings.comment_limit),
            library: Library::new(store.clone()),
            store,
            viewer,
            preferences,
            settings,
            liveness,
        }
    }

    pub fn viewer(&self) -> Option<&User> {
        self.viewer.as_ref()
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// Takes effect for what the session does next. The dedup window stays the one the session
    /// was created with.
    pub fn set_preferences(&mut self, preferences: Preferences) {
        self.preferences = preferences;
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn viewer_id(&self) -> Option<&Record<User>> {
        self.viewer.as_ref().map(|viewer| &viewer.id)
    }

    fn require_viewer(&self) -> Result<&Record<User>, EngineError> {
        self.viewer_id().context(UnauthenticatedSnafu)
    }

    pub async fn toggle_like(
        &self, video_id: &Record<Video>,
    ) -> Result<ToggleOutcome, EngineError> {
        self.likes.toggle(self.viewer_id(), video_id).await
    }

    pub async fn load_like_status(
        &self, video_id: &Record<Video>,
    ) -> Result<LikeStatus, EngineError> {
        self.likes.load_status(self.require_viewer()?, video_id).await
    }

    /// Loads like status and count on mount.
    pub async fn load_like(&self, video_id: &Record<Video>) -> Result<LikeView, EngineError> {
        self.likes.load(self.require_viewer()?, video_id).await
    }

    pub fn like_view(&self, video_id: &Record<Video>) -> Option<LikeView> {
        self.likes.view(self.viewer_id()?, video_id)
    }

    /// Logs a view for the viewer. Anonymous views are not logged.
    pub async fn log_view(&self, video_id: &Record<Video>, known_count: u64) -> Option<u64> {
        let Some(viewer) = self.viewer_id() else {
            tracing::debug!(video_id = %video_id, "anonymous view, not logged");
            return None;
        };
        self.views.log_view(viewer, video_id, known_count).await
    }

    /// The watch page opened: logs the view into the cached video and records history. Nothing
    /// is applied once the session is detached.
    #[instrument(skip_all, fields(video_id = %video.id))]
    pub async fn open_video(&self, video: &mut Video) -> Option<u64> {
        let logged = self.log_view(&video.id, video.view_count).await;
        if !self.liveness.is_alive() {
            tracing::debug!("session detached, dropping the view");
            return None;
        }
        if let Some(count) = logged {
            video.view_count = count;
        }

        if let Some(viewer) = self.viewer_id() {
            if let Err(error) = self.library.record_history(Some(viewer), &video.id).await {
                tracing::warn!(error = %error, "could not record history");
            }
        }

        logged
    }

    pub async fn comments(&self, video_id: &Record<Video>) -> CommentThread {
        self.comments.load(video_id).await
    }

    pub async fn post_comment(
        &self, video_id: &Record<Video>, body: &str, parent_id: Option<Record<Comment>>,
    ) -> Result<Comment, EngineError> {
        self.comments.post(self.viewer.as_ref(), video_id, body, parent_id).await
    }

    pub async fn save_for_later(
        &self, video_id: &Record<Video>,
    ) -> Result<WatchLaterEntry, EngineError> {
        self.library.save_for_later(self.viewer_id(), video_id).await
    }

    pub async fn remove_from_watch_later(
        &self, video_id: &Record<Video>,
    ) -> Result<bool, EngineError> {
        self.library.remove_from_watch_later(self.viewer_id(), video_id).await
    }

    pub async fn record_history(
        &self, video_id: &Record<Video>,
    ) -> Result<HistoryEntry, EngineError> {
        self.library.record_history(self.viewer_id(), video_id).await
    }

    /// Long-form videos, optionally of one category.
    pub fn home(&self, category: Option<&str>) -> VideoFeed<S> {
        let mut filters = vec![Filter::equal("kind", "long")];
        filters.extend(category.map(|category| Filter::equal("category", category)));
        self.videos(filters)
    }

    pub fn shorts(&self) -> VideoFeed<S> {
        self.videos(vec![Filter::equal("kind", "short")])
    }

    pub fn channel(&self, owner: &Record<User>) -> VideoFeed<S> {
        self.videos(vec![Filter::equal("owner", owner.as_str())])
    }

    /// Videos of the same category and kind, without the video itself.
    pub fn related(&self, video: &Video) -> VideoFeed<S> {
        let kind = match video.kind {
            VideoKind::Long => "long",
            VideoKind::Short => "short",
        };
        self.videos(vec![
            Filter::equal("category", video.category.as_str()),
            Filter::equal("kind", kind),
            Filter::not_equal(ID, video.id.as_str()),
        ])
    }

    pub fn history(&self) -> Result<LibraryFeed<S, HistoryEntry>, EngineError> {
        self.library_feed()
    }

    pub fn liked(&self) -> Result<LibraryFeed<S, LikeRecord>, EngineError> {
        self.library_feed()
    }

    pub fn watch_later(&self) -> Result<LibraryFeed<S, WatchLaterEntry>, EngineError> {
        self.library_feed()
    }

    /// Tears the session down. Anything still in flight resolves into nothing.
    pub fn detach(&self) {
        self.liveness.detach();
    }

    fn videos(&self, filters: Vec<Filter>) -> VideoFeed<S> {
        FeedPaginator::new(
            CollectionFeed::new(self.store.clone()),
            self.settings.page_size,
            filters,
            self.liveness.clone(),
        )
    }

    fn library_feed<J: crate::model::Interaction + 'static>(
        &self,
    ) -> Result<LibraryFeed<S, J>, EngineError> {
        let viewer = self.require_viewer()?;
        Ok(FeedPaginator::new(
            JoinFeed::new(self.store.clone()),
            self.settings.page_size,
            vec![Filter::equal("user_id", viewer.as_str())],
            self.liveness.clone(),
        ))
    }
}
