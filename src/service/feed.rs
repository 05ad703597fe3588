use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard, PoisonError};

use itertools::Itertools;
use tracing::instrument;

use super::{EngineError, Liveness};
use crate::model::{decode, Entity, Interaction, Video};
use crate::store::{DocumentStore, Filter, ID};

/// One page as read from a [FeedSource].
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePage<T> {
    pub items: Vec<T>,
    /// Id of the last document read, the cursor of the next page.
    pub cursor: Option<String>,
    /// Documents read from the paginated collection. Can exceed `items.len()` when a source
    /// drops some of them.
    pub fetched: usize,
}

/// Where a paginator reads its pages from.
pub trait FeedSource: Send + Sync {
    type Item: Clone + Send + Sync;

    /// Reads up to `limit` documents newest first, strictly after `cursor` when given.
    fn page(
        &self, filters: &[Filter], cursor: Option<&str>, limit: u32,
    ) -> impl Future<Output = Result<SourcePage<Self::Item>, EngineError>> + Send;
}

/// Pages through one collection.
#[derive(Debug, Clone)]
pub struct CollectionFeed<S, T> {
    store: S,
    _marker: PhantomData<fn() -> T>,
}

impl<S, T> CollectionFeed<S, T> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }
}

impl<S: DocumentStore, T: Entity + Clone + 'static> FeedSource for CollectionFeed<S, T> {
    type Item = T;

    async fn page(
        &self, filters: &[Filter], cursor: Option<&str>, limit: u32,
    ) -> Result<SourcePage<T>, EngineError> {
        let filters = positioned(filters, cursor);
        let page = self.store.list(T::collection(), &filters, limit).await?;
        let items = page.documents.iter().map(decode).collect::<Result<Vec<T>, _>>()?;

        Ok(SourcePage {
            cursor: page.documents.last().map(|document| document.id.clone()),
            fetched: items.len(),
            items,
        })
    }
}

/// Pages through a collection of entries that point at videos (history, likes, watch later)
/// and yields the videos in entry order.
///
/// Videos are resolved with one id-in-list query per page. Entries whose video no longer
/// exists are dropped; the cursor still moves past them.
#[derive(Debug, Clone)]
pub struct JoinFeed<S, J> {
    store: S,
    _marker: PhantomData<fn() -> J>,
}

impl<S, J> JoinFeed<S, J> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }
}

impl<S: DocumentStore, J: Interaction + 'static> FeedSource for JoinFeed<S, J> {
    type Item = Video;

    async fn page(
        &self, filters: &[Filter], cursor: Option<&str>, limit: u32,
    ) -> Result<SourcePage<Video>, EngineError> {
        let page = self
            .store
            .list(J::collection(), &positioned(filters, cursor), limit)
            .await?;
        let entries = page.documents.iter().map(decode::<J>).collect::<Result<Vec<_>, _>>()?;
        let cursor = entries.last().map(|entry| entry.key().to_string());
        let fetched = entries.len();
        if entries.is_empty() {
            return Ok(SourcePage {
                items: Vec::new(),
                cursor,
                fetched,
            });
        }

        let ids = entries
            .iter()
            .map(|entry| entry.video_id().as_str())
            .unique()
            .collect_vec();
        let resolve = [Filter::equal_any(ID, ids.iter().copied())];
        let (videos, _) = Video::list(&self.store, &resolve, ids.len() as u32).await?;

        let by_id: HashMap<_, _> = videos
            .into_iter()
            .map(|video| (video.id.clone(), video))
            .collect();
        let items = entries
            .iter()
            .filter_map(|entry| by_id.get(entry.video_id()).cloned())
            .collect_vec();

        if items.len() < fetched {
            tracing::debug!(
                collection = J::collection(),
                dropped = fetched - items.len(),
                "entries point at videos that no longer exist"
            );
        }

        Ok(SourcePage {
            items,
            cursor,
            fetched,
        })
    }
}

fn positioned(filters: &[Filter], cursor: Option<&str>) -> Vec<Filter> {
    let mut filters = filters.to_vec();
    filters.push(Filter::newest_first());
    if let Some(cursor) = cursor {
        filters.push(Filter::cursor_after(cursor));
    }
    filters
}

/// What a fetch did to the paginator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A page was applied; the number of items it added.
    Loaded(usize),
    /// Nothing to do, or a fetch was already outstanding.
    Skipped,
    /// The result arrived after the paginator was detached or restarted and was dropped.
    Discarded,
}

#[derive(Debug, Clone)]
pub struct FeedState<T> {
    pub items: Vec<T>,
    pub cursor: Option<String>,
    pub has_more: bool,
    pub loading: bool,
    pub loading_more: bool,
    /// The last read failure, cleared by the next successful page.
    pub error: Option<String>,
    filters: Vec<Filter>,
    generation: u64,
}

impl<T> Default for FeedState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            cursor: None,
            has_more: false,
            loading: false,
            loading_more: false,
            error: None,
            filters: Vec::new(),
            generation: 0,
        }
    }
}

/// Cursor pagination over a [FeedSource], newest first, with a re-entrancy guard for the
/// "load more" trigger.
///
/// The state lock is only taken between awaits. A fetch that finds `loading` or
/// `loading_more` set is skipped, not queued.
pub struct FeedPaginator<F: FeedSource> {
    source: F,
    page_size: u32,
    base_filters: Vec<Filter>,
    state: Mutex<FeedState<F::Item>>,
    liveness: Liveness,
}

impl<F: FeedSource> FeedPaginator<F> {
    pub fn new(source: F, page_size: u32, base_filters: Vec<Filter>, liveness: Liveness) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            base_filters,
            state: Mutex::new(FeedState::default()),
            liveness,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn state(&self) -> FeedState<F::Item> {
        self.lock().clone()
    }

    pub fn items(&self) -> Vec<F::Item> {
        self.lock().items.clone()
    }

    pub fn has_more(&self) -> bool {
        self.lock().has_more
    }

    /// Loads the first page with `filters` on top of the feed's own, replacing whatever was
    /// loaded. A fetch still outstanding from before is discarded when it resolves.
    #[instrument(skip_all, fields(page_size = self.page_size))]
    pub async fn fetch_first_page(
        &self, filters: Vec<Filter>,
    ) -> Result<FetchOutcome, EngineError> {
        let (generation, filters) = {
            let mut state = self.lock();
            state.generation += 1;
            state.loading = true;
            state.loading_more = false;
            state.filters = self.base_filters.iter().cloned().chain(filters).collect();
            (state.generation, state.filters.clone())
        };

        let result = self.source.page(&filters, None, self.page_size).await;

        let mut state = self.lock();
        if !self.liveness.is_alive() || state.generation != generation {
            tracing::debug!("first page arrived late, discarding");
            return Ok(FetchOutcome::Discarded);
        }
        state.loading = false;

        match result {
            Ok(page) => {
                let loaded = page.items.len();
                state.has_more = page.fetched == self.page_size as usize;
                state.cursor = page.cursor;
                state.items = page.items;
                state.error = None;
                tracing::debug!(loaded, has_more = state.has_more, "first page loaded");
                Ok(FetchOutcome::Loaded(loaded))
            }
            Err(error) => {
                tracing::warn!(error = %error, "could not load the first page");
                state.items.clear();
                state.cursor = None;
                state.has_more = false;
                state.error = Some(error.to_string());
                Err(error)
            }
        }
    }

    /// Appends the page after the cursor. Skipped when there is nothing more or a fetch is
    /// outstanding.
    #[instrument(skip_all, fields(page_size = self.page_size))]
    pub async fn fetch_next_page(&self) -> Result<FetchOutcome, EngineError> {
        let (generation, filters, cursor) = {
            let mut state = self.lock();
            if !state.has_more || state.loading || state.loading_more {
                return Ok(FetchOutcome::Skipped);
            }
            state.loading_more = true;
            (state.generation, state.filters.clone(), state.cursor.clone())
        };

        let result = self
            .source
            .page(&filters, cursor.as_deref(), self.page_size)
            .await;

        let mut state = self.lock();
        if !self.liveness.is_alive() || state.generation != generation {
            tracing::debug!("next page arrived late, discarding");
            return Ok(FetchOutcome::Discarded);
        }
        state.loading_more = false;

        match result {
            Ok(page) => {
                let loaded = page.items.len();
                state.has_more = page.fetched == self.page_size as usize;
                if page.cursor.is_some() {
                    state.cursor = page.cursor;
                }
                state.items.extend(page.items);
                state.error = None;
                tracing::debug!(loaded, has_more = state.has_more, "next page loaded");
                Ok(FetchOutcome::Loaded(loaded))
            }
            Err(error) => {
                tracing::warn!(error = %error, "could not load the next page");
                state.error = Some(error.to_string());
                Err(error)
            }
        }
    }

    /// The end of the rendered list scrolled into view.
    pub async fn on_sentinel_visible(&self) -> Result<FetchOutcome, EngineError> {
        self.fetch_next_page().await
    }

    fn lock(&self) -> MutexGuard<'_, FeedState<F::Item>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HistoryEntry, NewInteraction, Record, User, VideoKind};
    use crate::service::fixtures::{user, video, video_in};
    use crate::service::EngineErrorKind;
    use crate::store::{code, Acl, DocumentId, MemoryStore, Operation};

    type VideoFeed = FeedPaginator<CollectionFeed<MemoryStore, Video>>;

    async fn seed(store: &MemoryStore, count: usize) -> Vec<Record<Video>> {
        let mut ids = Vec::new();
        for n in 0..count {
            ids.push(video(store, &format!("v{n:02}"), 0).await);
        }
        ids
    }

    fn videos(store: &MemoryStore, page_size: u32) -> VideoFeed {
        let source = CollectionFeed::new(store.clone());
        FeedPaginator::new(source, page_size, Vec::new(), Liveness::new())
    }

    fn ids(items: &[Video]) -> Vec<&str> {
        items.iter().map(|video| video.id.as_str()).collect()
    }

    async fn watched(store: &MemoryStore, viewer: &Record<User>, video_id: &Record<Video>) {
        let draft = NewInteraction::new(viewer.clone(), video_id.clone());
        HistoryEntry::create(store, DocumentId::Generate, &draft, Acl::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn pages_through_everything_newest_first() {
        let store = MemoryStore::new();
        let mut expected = seed(&store, 30).await;
        expected.reverse();
        let feed = videos(&store, 12);

        assert_eq!(feed.fetch_first_page(Vec::new()).await.unwrap(), FetchOutcome::Loaded(12));
        assert!(feed.has_more());
        assert_eq!(feed.fetch_next_page().await.unwrap(), FetchOutcome::Loaded(12));
        assert_eq!(feed.fetch_next_page().await.unwrap(), FetchOutcome::Loaded(6));
        assert!(!feed.has_more());
        assert_eq!(feed.fetch_next_page().await.unwrap(), FetchOutcome::Skipped);

        let items = feed.items();
        let expected = expected.iter().map(Record::as_str).collect_vec();
        assert_eq!(ids(&items), expected);
    }

    #[tokio::test]
    async fn full_last_page_needs_one_more_fetch() {
        let store = MemoryStore::new();
        seed(&store, 24).await;
        let feed = videos(&store, 12);

        feed.fetch_first_page(Vec::new()).await.unwrap();
        feed.fetch_next_page().await.unwrap();
        assert!(feed.has_more());

        assert_eq!(feed.fetch_next_page().await.unwrap(), FetchOutcome::Loaded(0));
        assert!(!feed.has_more());
        assert_eq!(feed.items().len(), 24);
    }

    #[tokio::test]
    async fn empty_collection_has_nothing_more() {
        let store = MemoryStore::new();
        let feed = videos(&store, 12);

        assert_eq!(feed.fetch_first_page(Vec::new()).await.unwrap(), FetchOutcome::Loaded(0));
        assert!(!feed.has_more());
        assert_eq!(feed.state().cursor, None);
    }

    #[tokio::test]
    async fn filters_narrow_the_feed() {
        let store = MemoryStore::new();
        video_in(&store, "a", "music", VideoKind::Long, 0).await;
        video_in(&store, "b", "news", VideoKind::Long, 0).await;
        video_in(&store, "c", "music", VideoKind::Short, 0).await;
        let shorts = FeedPaginator::new(
            CollectionFeed::<_, Video>::new(store.clone()),
            12,
            vec![Filter::equal("kind", "short")],
            Liveness::new(),
        );

        shorts.fetch_first_page(Vec::new()).await.unwrap();
        assert_eq!(ids(&shorts.items()), ["c"]);

        let music = videos(&store, 12);
        music
            .fetch_first_page(vec![Filter::equal("category", "music")])
            .await
            .unwrap();
        assert_eq!(ids(&music.items()), ["c", "a"]);
    }

    #[tokio::test]
    async fn sentinel_signals_while_loading_are_absorbed() {
        let store = MemoryStore::new();
        seed(&store, 30).await;
        let feed = videos(&store, 12);
        feed.fetch_first_page(Vec::new()).await.unwrap();
        let lists = store.calls(Operation::List);

        let (first, second, third) = tokio::join!(
            feed.on_sentinel_visible(),
            feed.on_sentinel_visible(),
            feed.on_sentinel_visible(),
        );

        assert_eq!(first.unwrap(), FetchOutcome::Loaded(12));
        assert_eq!(second.unwrap(), FetchOutcome::Skipped);
        assert_eq!(third.unwrap(), FetchOutcome::Skipped);
        assert_eq!(store.calls(Operation::List), lists + 1);
        assert_eq!(feed.items().len(), 24);
    }

    #[tokio::test]
    async fn inserts_during_pagination_do_not_shift_pages() {
        let store = MemoryStore::new();
        seed(&store, 20).await;
        let feed = videos(&store, 10);
        feed.fetch_first_page(Vec::new()).await.unwrap();

        video(&store, "fresh", 0).await;
        feed.fetch_next_page().await.unwrap();

        let items = feed.items();
        assert_eq!(items.len(), 20);
        assert!(items.iter().map(|video| &video.id).all_unique());
        assert!(!ids(&items).contains(&"fresh"));
    }

    #[tokio::test]
    async fn restarting_discards_the_older_fetch() {
        let store = MemoryStore::new();
        video_in(&store, "a", "music", VideoKind::Long, 0).await;
        video_in(&store, "b", "news", VideoKind::Long, 0).await;
        let feed = videos(&store, 12);

        let (music, news) = tokio::join!(
            feed.fetch_first_page(vec![Filter::equal("category", "music")]),
            feed.fetch_first_page(vec![Filter::equal("category", "news")]),
        );

        assert_eq!(music.unwrap(), FetchOutcome::Discarded);
        assert_eq!(news.unwrap(), FetchOutcome::Loaded(1));
        assert_eq!(ids(&feed.items()), ["b"]);
        assert!(!feed.state().loading);
    }

    #[tokio::test]
    async fn detached_feed_drops_results() {
        let store = MemoryStore::new();
        seed(&store, 3).await;
        let liveness = Liveness::new();
        let feed = FeedPaginator::new(
            CollectionFeed::<_, Video>::new(store.clone()),
            12,
            Vec::new(),
            liveness.clone(),
        );

        let (outcome, ()) = tokio::join!(feed.fetch_first_page(Vec::new()), async {
            liveness.detach()
        });

        assert_eq!(outcome.unwrap(), FetchOutcome::Discarded);
        assert!(feed.items().is_empty());
    }

    #[tokio::test]
    async fn read_failures_become_an_error_state() {
        let store = MemoryStore::new();
        seed(&store, 30).await;
        let feed = videos(&store, 12);

        store.fail_next(Operation::List, code::GATEWAY_TIMEOUT, "slow");
        let error = feed.fetch_first_page(Vec::new()).await.unwrap_err();
        assert_eq!(error.kind(), EngineErrorKind::Transient);
        let state = feed.state();
        assert!(state.items.is_empty());
        assert!(state.error.is_some());
        assert!(!state.loading);

        feed.fetch_first_page(Vec::new()).await.unwrap();
        store.fail_next(Operation::List, code::UNAVAILABLE, "down");
        feed.fetch_next_page().await.unwrap_err();
        let state = feed.state();
        assert_eq!(state.items.len(), 12);
        assert!(state.has_more);
        assert!(!state.loading_more);

        assert_eq!(feed.fetch_next_page().await.unwrap(), FetchOutcome::Loaded(12));
        assert_eq!(feed.state().error, None);
    }

    #[tokio::test]
    async fn join_feed_keeps_entry_order_and_drops_missing_videos() {
        let store = MemoryStore::new();
        let viewer = user("u1");
        let a = video(&store, "a", 0).await;
        let b = video(&store, "b", 0).await;
        let c = video(&store, "c", 0).await;
        // newest entry first: A, B, C
        watched(&store, &viewer, &c).await;
        watched(&store, &viewer, &b).await;
        watched(&store, &viewer, &a).await;
        Video::delete(&store, &b).await.unwrap();

        let history = FeedPaginator::new(
            JoinFeed::<_, HistoryEntry>::new(store.clone()),
            12,
            vec![Filter::equal("user_id", viewer.as_str())],
            Liveness::new(),
        );

        assert_eq!(history.fetch_first_page(Vec::new()).await.unwrap(), FetchOutcome::Loaded(2));
        assert_eq!(ids(&history.items()), ["a", "c"]);
        assert!(!history.has_more());
    }

    #[tokio::test]
    async fn join_feed_advances_past_pages_of_deleted_videos() {
        let store = MemoryStore::new();
        let viewer = user("u1");
        let kept = video(&store, "kept", 0).await;
        watched(&store, &viewer, &kept).await;
        for n in 0..2 {
            let gone = video(&store, &format!("gone{n}"), 0).await;
            watched(&store, &viewer, &gone).await;
            Video::delete(&store, &gone).await.unwrap();
        }

        let history = FeedPaginator::new(
            JoinFeed::<_, HistoryEntry>::new(store.clone()),
            2,
            vec![Filter::equal("user_id", viewer.as_str())],
            Liveness::new(),
        );

        assert_eq!(history.fetch_first_page(Vec::new()).await.unwrap(), FetchOutcome::Loaded(0));
        assert!(history.has_more());
        assert_eq!(history.fetch_next_page().await.unwrap(), FetchOutcome::Loaded(1));
        assert!(!history.has_more());
        assert_eq!(ids(&history.items()), ["kept"]);
    }
}
