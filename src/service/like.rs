use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use snafu::OptionExt as _;
use tracing::instrument;

use super::{EngineError, Liveness, UnauthenticatedSnafu};
use crate::model::{
    counter_fields, pair_filters, LikeRecord, NewInteraction, Record, User, Video, LIKE_COUNT,
};
use crate::store::{Acl, DocumentId, DocumentStore};

type PairKey = (Record<User>, Record<Video>);

/// Where a like is in its round trip to the store.
///
/// `Idle` and `Reconciled` are settled, `Optimistic` and `Syncing` have a toggle in flight and
/// `Error` means the last toggle failed and could not even be resynced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Loaded, or the last toggle committed.
    #[default]
    Idle,
    /// Flipped locally, nothing confirmed yet.
    Optimistic,
    /// The like record is written, the counter is not.
    Syncing,
    /// Overwritten with store truth after a failed toggle.
    Reconciled,
    Error,
}

impl Phase {
    pub fn in_flight(self) -> bool {
        matches!(self, Self::Optimistic | Self::Syncing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikeStatus {
    pub liked: bool,
    pub like_record_id: Option<Record<LikeRecord>>,
}

/// What the viewer sees for one video. Once settled, `liked == like_record_id.is_some()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikeView {
    pub liked: bool,
    pub like_record_id: Option<Record<LikeRecord>>,
    pub count: u64,
    pub phase: Phase,
}

impl LikeView {
    fn new(status: LikeStatus, count: u64) -> Self {
        Self {
            liked: status.liked,
            like_record_id: status.like_record_id,
            count,
            phase: Phase::Idle,
        }
    }

    /// Holds the slot of a pair nothing is known about while its state is fetched.
    fn placeholder() -> Self {
        Self {
            liked: false,
            like_record_id: None,
            count: 0,
            phase: Phase::Syncing,
        }
    }

    fn flipped(&self) -> Self {
        let count = if self.liked {
            self.count.saturating_sub(1)
        } else {
            self.count.saturating_add(1)
        };

        Self {
            liked: !self.liked,
            like_record_id: self.like_record_id.clone(),
            count,
            phase: Phase::Optimistic,
        }
    }

    fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// Both writes went through.
    Committed(LikeView),
    /// The like already existed. Local state now mirrors the store.
    Resynced(LikeView),
    /// Another toggle for the video is still in flight.
    Ignored,
    /// The reconciler was detached before the toggle settled.
    Discarded,
}

/// Keeps one viewer's likes and the videos' like counters in step.
///
/// The like record and the counter live in different documents and the store cannot write
/// both atomically. A toggle writes the record, then reads the counter and writes it back
/// adjusted. Whatever goes wrong in between is corrected by re-reading both from the store.
#[derive(Debug, Clone)]
pub struct LikeReconciler<S> {
    store: S,
    states: Arc<DashMap<PairKey, LikeView>>,
    liveness: Liveness,
}

impl<S: DocumentStore> LikeReconciler<S> {
    pub fn new(store: S, liveness: Liveness) -> Self {
        Self {
            store,
            states: Arc::new(DashMap::new()),
            liveness,
        }
    }

    /// The local state of a pair, if it was loaded or toggled.
    pub fn view(&self, user_id: &Record<User>, video_id: &Record<Video>) -> Option<LikeView> {
        let key = (user_id.clone(), video_id.clone());
        self.states.get(&key).map(|view| view.clone())
    }

    #[instrument(skip(self))]
    pub async fn load_status(
        &self, user_id: &Record<User>, video_id: &Record<Video>,
    ) -> Result<LikeStatus, EngineError> {
        let record = LikeRecord::first(&self.store, &pair_filters(user_id, video_id)).await?;

        Ok(LikeStatus {
            liked: record.is_some(),
            like_record_id: record.map(|record| record.id),
        })
    }

    /// Reads the pair's like status and the video's counter, and seeds local state with them
    /// unless a toggle is in flight.
    #[instrument(skip(self))]
    pub async fn load(
        &self, user_id: &Record<User>, video_id: &Record<Video>,
    ) -> Result<LikeView, EngineError> {
        let view = self.fetch(user_id, video_id).await?;

        if self.liveness.is_alive() {
            match self.states.entry((user_id.clone(), video_id.clone())) {
                Entry::Occupied(entry) if entry.get().phase.in_flight() => {}
                Entry::Occupied(mut entry) => {
                    entry.insert(view.clone());
                }
                Entry::Vacant(entry) => {
                    entry.insert(view.clone());
                }
            }
        }

        Ok(view)
    }

    /// Likes the video if the viewer has not, unlikes it otherwise.
    ///
    /// The local state flips before any store call. A conflict while creating the like record
    /// means the like was already there: state is resynced and the outcome is
    /// [ToggleOutcome::Resynced]. Any other failure is resynced too and then returned. When
    /// the resync fails as well, the pre-toggle state is restored in [Phase::Error].
    #[instrument(skip(self))]
    pub async fn toggle(
        &self, viewer: Option<&Record<User>>, video_id: &Record<Video>,
    ) -> Result<ToggleOutcome, EngineError> {
        let user_id = viewer.context(UnauthenticatedSnafu)?;
        let Some(mut pending) = self.claim((user_id.clone(), video_id.clone())) else {
            tracing::debug!(video_id = %video_id, "a toggle is already in flight");
            return Ok(ToggleOutcome::Ignored);
        };

        let current = match pending.snapshot.clone() {
            Some(view) => view,
            None => {
                let view = self.fetch(user_id, video_id).await?;
                pending.snapshot = Some(view.clone());
                view
            }
        };

        pending.set(current.flipped());
        let result = self.commit(&pending, user_id, video_id, &current).await;
        if !self.liveness.is_alive() {
            return Ok(ToggleOutcome::Discarded);
        }

        let error = match result {
            Ok(view) => {
                tracing::info!(video_id = %video_id, liked = view.liked, count = view.count, "like toggled");
                pending.settle(view.clone());
                return Ok(ToggleOutcome::Committed(view));
            }
            Err(error) => error,
        };

        if error.is_conflict() {
            tracing::info!(video_id = %video_id, "like already recorded, resyncing");
        } else {
            tracing::warn!(video_id = %video_id, error = %error, "toggle failed, resyncing");
        }

        match self.fetch(user_id, video_id).await {
            Ok(_) if !self.liveness.is_alive() => Ok(ToggleOutcome::Discarded),
            Ok(view) => {
                let view = view.with_phase(Phase::Reconciled);
                pending.settle(view.clone());
                if error.is_conflict() {
                    Ok(ToggleOutcome::Resynced(view))
                } else {
                    Err(error)
                }
            }
            Err(resync_error) => {
                tracing::error!(video_id = %video_id, error = %resync_error, "resync failed, rolling back");
                pending.settle(current.with_phase(Phase::Error));
                Err(error)
            }
        }
    }

    fn claim(&self, key: PairKey) -> Option<Pending<'_>> {
        let snapshot = match self.states.entry(key.clone()) {
            Entry::Occupied(entry) if entry.get().phase.in_flight() => return None,
            Entry::Occupied(mut entry) => {
                let snapshot = entry.get().clone();
                entry.get_mut().phase = Phase::Optimistic;
                Some(snapshot)
            }
            Entry::Vacant(entry) => {
                entry.insert(LikeView::placeholder());
                None
            }
        };

        Some(Pending {
            states: &self.states,
            key,
            snapshot,
            armed: true,
        })
    }

    async fn commit(
        &self, pending: &Pending<'_>, user_id: &Record<User>, video_id: &Record<Video>,
        current: &LikeView,
    ) -> Result<LikeView, EngineError> {
        let like_record_id = if current.liked {
            let id = current
                .like_record_id
                .clone()
                .unwrap_or_else(|| LikeRecord::id_for(user_id, video_id));
            LikeRecord::delete(&self.store, &id).await?;
            None
        } else {
            let id = DocumentId::Exact(LikeRecord::id_for(user_id, video_id).to_string());
            let draft = NewInteraction::new(user_id.clone(), video_id.clone());
            let record =
                LikeRecord::create(&self.store, id, &draft, Acl::owned_by(user_id)).await?;
            Some(record.id)
        };

        pending.set(LikeView {
            liked: like_record_id.is_some(),
            like_record_id: like_record_id.clone(),
            count: pending.current().map_or(0, |view| view.count),
            phase: Phase::Syncing,
        });

        let video = Video::find(&self.store, video_id).await?;
        let count = if current.liked {
            video.like_count.saturating_sub(1)
        } else {
            video.like_count.saturating_add(1)
        };
        Video::update(&self.store, video_id, counter_fields(LIKE_COUNT, count)).await?;

        Ok(LikeView {
            liked: like_record_id.is_some(),
            like_record_id,
            count,
            phase: Phase::Idle,
        })
    }

    async fn fetch(
        &self, user_id: &Record<User>, video_id: &Record<Video>,
    ) -> Result<LikeView, EngineError> {
        let status = self.load_status(user_id, video_id).await?;
        let video = Video::find(&self.store, video_id).await?;
        Ok(LikeView::new(status, video.like_count))
    }
}

/// The claim a toggle holds on its pair. Dropping it unsettled, because the toggle failed
/// early or its future was dropped, puts the pre-toggle state back.
struct Pending<'a> {
    states: &'a DashMap<PairKey, LikeView>,
    key: PairKey,
    snapshot: Option<LikeView>,
    armed: bool,
}

impl Pending<'_> {
    fn current(&self) -> Option<LikeView> {
        self.states.get(&self.key).map(|view| view.clone())
    }

    fn set(&self, view: LikeView) {
        self.states.insert(self.key.clone(), view);
    }

    fn settle(mut self, view: LikeView) {
        self.armed = false;
        self.set(view);
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        match self.snapshot.take() {
            Some(view) => {
                self.states.insert(self.key.clone(), view);
            }
            None => {
                self.states.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::fixtures::{like_count, user, video};
    use crate::service::EngineErrorKind;
    use crate::store::{code, MemoryStore, Operation};

    fn reconciler(store: &MemoryStore) -> LikeReconciler<MemoryStore> {
        LikeReconciler::new(store.clone(), Liveness::new())
    }

    fn assert_settled(view: &LikeView) {
        assert!(!view.phase.in_flight());
        assert_eq!(view.liked, view.like_record_id.is_some());
    }

    #[tokio::test]
    async fn like_then_unlike_round_trips_the_counter() {
        let store = MemoryStore::new();
        let video_id = video(&store, "x", 10).await;
        let viewer = user("u1");
        let likes = reconciler(&store);

        let loaded = likes.load(&viewer, &video_id).await.unwrap();
        assert!(!loaded.liked);
        assert_eq!(loaded.count, 10);

        let ToggleOutcome::Committed(liked) = likes.toggle(Some(&viewer), &video_id).await.unwrap()
        else {
            panic!("like was not committed");
        };
        assert!(liked.liked);
        assert_eq!(liked.count, 11);
        assert_eq!(liked.phase, Phase::Idle);
        assert_settled(&liked);
        assert_eq!(like_count(&store, &video_id).await, 11);
        assert_eq!(store.len("likes"), 1);

        let ToggleOutcome::Committed(unliked) =
            likes.toggle(Some(&viewer), &video_id).await.unwrap()
        else {
            panic!("unlike was not committed");
        };
        assert!(!unliked.liked);
        assert_eq!(unliked.count, 10);
        assert_eq!(unliked.phase, Phase::Idle);
        assert_settled(&unliked);
        assert_eq!(like_count(&store, &video_id).await, 10);
        assert!(store.is_empty("likes"));
        assert_eq!(likes.view(&viewer, &video_id), Some(unliked));
    }

    #[tokio::test]
    async fn toggle_without_prior_load_fetches_first() {
        let store = MemoryStore::new();
        let video_id = video(&store, "x", 3).await;
        let likes = reconciler(&store);

        let outcome = likes.toggle(Some(&user("u1")), &video_id).await.unwrap();
        assert!(matches!(outcome, ToggleOutcome::Committed(ref view) if view.count == 4));
    }

    #[tokio::test]
    async fn anonymous_toggle_is_rejected() {
        let store = MemoryStore::new();
        let video_id = video(&store, "x", 10).await;
        let likes = reconciler(&store);
        let reads = store.calls(Operation::List);

        let error = likes.toggle(None, &video_id).await.unwrap_err();
        assert_eq!(error.kind(), EngineErrorKind::Unauthenticated);
        assert_eq!(store.calls(Operation::List), reads);
        assert_eq!(store.calls(Operation::Create), 1);
    }

    #[tokio::test]
    async fn double_toggle_issues_one_create() {
        let store = MemoryStore::new();
        let video_id = video(&store, "x", 10).await;
        let viewer = user("u1");
        let likes = reconciler(&store);
        likes.load(&viewer, &video_id).await.unwrap();
        let creates = store.calls(Operation::Create);

        let (first, second) = tokio::join!(
            likes.toggle(Some(&viewer), &video_id),
            likes.toggle(Some(&viewer), &video_id),
        );

        assert!(matches!(first.unwrap(), ToggleOutcome::Committed(_)));
        assert_eq!(second.unwrap(), ToggleOutcome::Ignored);
        assert_eq!(store.calls(Operation::Create), creates + 1);
        assert_eq!(like_count(&store, &video_id).await, 11);
    }

    #[tokio::test]
    async fn optimistic_state_is_visible_while_in_flight() {
        let store = MemoryStore::new();
        let video_id = video(&store, "x", 10).await;
        let viewer = user("u1");
        let likes = reconciler(&store);
        likes.load(&viewer, &video_id).await.unwrap();

        let (outcome, during) = tokio::join!(likes.toggle(Some(&viewer), &video_id), async {
            likes.view(&viewer, &video_id)
        });

        let during = during.unwrap();
        assert!(during.liked);
        assert_eq!(during.count, 11);
        assert_eq!(during.phase, Phase::Optimistic);
        assert!(matches!(outcome.unwrap(), ToggleOutcome::Committed(_)));
    }

    #[tokio::test]
    async fn conflict_resyncs_silently() {
        let store = MemoryStore::new();
        let video_id = video(&store, "x", 10).await;
        let viewer = user("u1");
        let likes = reconciler(&store);
        likes.load(&viewer, &video_id).await.unwrap();

        // the same viewer liked from another device meanwhile
        let other_device = reconciler(&store);
        other_device.toggle(Some(&viewer), &video_id).await.unwrap();

        let outcome = likes.toggle(Some(&viewer), &video_id).await.unwrap();
        let ToggleOutcome::Resynced(view) = outcome else {
            panic!("expected a silent resync, got {outcome:?}");
        };
        assert!(view.liked);
        assert_eq!(view.count, 11);
        assert_eq!(view.phase, Phase::Reconciled);
        assert_settled(&view);
        assert_eq!(like_count(&store, &video_id).await, 11);
        assert_eq!(store.len("likes"), 1);
    }

    #[tokio::test]
    async fn other_failures_surface_and_resync() {
        let store = MemoryStore::new();
        let video_id = video(&store, "x", 10).await;
        let viewer = user("u1");
        let likes = reconciler(&store);
        likes.load(&viewer, &video_id).await.unwrap();

        store.fail_next(Operation::Update, code::UNAVAILABLE, "counter write dropped");
        let error = likes.toggle(Some(&viewer), &video_id).await.unwrap_err();
        assert_eq!(error.kind(), EngineErrorKind::Transient);

        // the record landed, the counter did not; local state follows the store
        let view = likes.view(&viewer, &video_id).unwrap();
        assert_eq!(view.phase, Phase::Reconciled);
        assert!(view.liked);
        assert_eq!(view.count, 10);
        assert_settled(&view);
    }

    #[tokio::test]
    async fn unlike_of_a_like_removed_elsewhere_surfaces_not_found() {
        let store = MemoryStore::new();
        let video_id = video(&store, "x", 0).await;
        let viewer = user("u1");
        let phone = reconciler(&store);
        let laptop = reconciler(&store);

        phone.toggle(Some(&viewer), &video_id).await.unwrap();
        let loaded = laptop.load(&viewer, &video_id).await.unwrap();
        assert!(loaded.liked);
        assert_eq!(loaded.count, 1);

        phone.toggle(Some(&viewer), &video_id).await.unwrap();
        let error = laptop.toggle(Some(&viewer), &video_id).await.unwrap_err();
        assert_eq!(error.kind(), EngineErrorKind::NotFound);

        let view = laptop.view(&viewer, &video_id).unwrap();
        assert_eq!(view.phase, Phase::Reconciled);
        assert!(!view.liked);
        assert_eq!(view.count, 0);
        assert_settled(&view);
        assert_eq!(like_count(&store, &video_id).await, 0);
    }

    #[tokio::test]
    async fn failed_resync_rolls_back() {
        let store = MemoryStore::new();
        let video_id = video(&store, "x", 10).await;
        let viewer = user("u1");
        let likes = reconciler(&store);
        let loaded = likes.load(&viewer, &video_id).await.unwrap();

        store.fail_next(Operation::Create, code::INTERNAL, "boom");
        store.fail_next(Operation::List, code::NO_RESPONSE, "offline");
        let error = likes.toggle(Some(&viewer), &video_id).await.unwrap_err();
        assert_eq!(error.kind(), EngineErrorKind::Unknown);

        let view = likes.view(&viewer, &video_id).unwrap();
        assert_eq!(view, loaded.with_phase(Phase::Error));

        // an errored like accepts the next toggle
        let outcome = likes.toggle(Some(&viewer), &video_id).await.unwrap();
        assert!(matches!(outcome, ToggleOutcome::Committed(ref view) if view.count == 11));
    }

    #[tokio::test]
    async fn unlike_floors_the_counter_at_zero() {
        let store = MemoryStore::new();
        let video_id = video(&store, "x", 0).await;
        let viewer = user("u1");
        let likes = reconciler(&store);
        let draft = NewInteraction::new(viewer.clone(), video_id.clone());
        let id = DocumentId::Exact(LikeRecord::id_for(&viewer, &video_id).to_string());
        LikeRecord::create(&store, id, &draft, Acl::default()).await.unwrap();

        let loaded = likes.load(&viewer, &video_id).await.unwrap();
        assert!(loaded.liked);
        assert_eq!(loaded.count, 0);

        let outcome = likes.toggle(Some(&viewer), &video_id).await.unwrap();
        let ToggleOutcome::Committed(view) = outcome else {
            panic!("unlike was not committed");
        };
        assert!(!view.liked);
        assert_eq!(view.count, 0);
        assert_eq!(like_count(&store, &video_id).await, 0);
    }

    #[tokio::test]
    async fn detached_toggle_is_discarded() {
        let store = MemoryStore::new();
        let video_id = video(&store, "x", 10).await;
        let viewer = user("u1");
        let liveness = Liveness::new();
        let likes = LikeReconciler::new(store.clone(), liveness.clone());
        let loaded = likes.load(&viewer, &video_id).await.unwrap();

        let (outcome, ()) = tokio::join!(likes.toggle(Some(&viewer), &video_id), async {
            liveness.detach()
        });

        assert_eq!(outcome.unwrap(), ToggleOutcome::Discarded);
        assert_eq!(likes.view(&viewer, &video_id), Some(loaded));
    }

    #[tokio::test]
    async fn dropped_toggle_releases_the_pair() {
        let store = MemoryStore::new();
        let video_id = video(&store, "x", 10).await;
        let viewer = user("u1");
        let likes = reconciler(&store);
        let loaded = likes.load(&viewer, &video_id).await.unwrap();

        {
            let toggle = likes.toggle(Some(&viewer), &video_id);
            tokio::pin!(toggle);
            assert!(futures::poll!(toggle.as_mut()).is_pending());
        }

        assert_eq!(likes.view(&viewer, &video_id), Some(loaded));
        let outcome = likes.toggle(Some(&viewer), &video_id).await.unwrap();
        assert!(matches!(outcome, ToggleOutcome::Committed(_)));
    }
}
