use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use super::{EngineError, InFlight};
use crate::model::{
    counter_fields, pair_filters, Entity as _, NewInteraction, Record, User, Video, ViewRecord,
    VIEW_COUNT,
};
use crate::store::{Acl, DocumentId, DocumentStore, Filter};
use crate::time::{Clock, Timestamp};

/// Records views, at most one per viewer and video within a trailing window.
///
/// The check for a recent view and the write of a new one are separate store calls, so two
/// independent loggers can both pass the check. The view counter tolerates that overcount.
/// Within one logger a second call for a pair that is still being logged returns `None`.
#[derive(Debug, Clone)]
pub struct ViewDedupLogger<S> {
    store: S,
    window: Duration,
    clock: Arc<dyn Clock>,
    flights: InFlight<(Record<User>, Record<Video>)>,
}

impl<S: DocumentStore> ViewDedupLogger<S> {
    pub fn new(store: S, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            window,
            clock,
            flights: InFlight::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Logs a view of `video_id` and returns the new view count, or `None` when the view was
    /// already logged within the window or logging failed.
    ///
    /// The new count is `known_count + 1`; callers keep it so the next increment in the same
    /// session builds on it. Failures are logged and never retried.
    #[instrument(skip(self))]
    pub async fn log_view(
        &self, user_id: &Record<User>, video_id: &Record<Video>, known_count: u64,
    ) -> Option<u64> {
        let Some(_flight) = self.flights.try_claim((user_id.clone(), video_id.clone())) else {
            tracing::debug!(video_id = %video_id, "view is already being logged");
            return None;
        };

        match self.record(user_id, video_id, known_count).await {
            Ok(count) => count,
            Err(error) => {
                tracing::warn!(video_id = %video_id, error = %error, "could not log view");
                None
            }
        }
    }

    async fn record(
        &self, user_id: &Record<User>, video_id: &Record<Video>, known_count: u64,
    ) -> Result<Option<u64>, EngineError> {
        if let Some(last) = self.last_view(user_id, video_id).await? {
            if last.is_within(self.window, self.clock.now()) {
                tracing::debug!(video_id = %video_id, last_view = %last, "viewed recently, skipping");
                return Ok(None);
            }
        }

        let draft = NewInteraction::new(user_id.clone(), video_id.clone());
        ViewRecord::create(&self.store, DocumentId::Generate, &draft, Acl::owned_by(user_id))
            .await?;

        let count = known_count.saturating_add(1);
        Video::update(&self.store, video_id, counter_fields(VIEW_COUNT, count)).await?;

        tracing::info!(video_id = %video_id, view_count = count, "view logged");
        Ok(Some(count))
    }

    async fn last_view(
        &self, user_id: &Record<User>, video_id: &Record<Video>,
    ) -> Result<Option<Timestamp>, EngineError> {
        let mut filters = pair_filters(user_id, video_id);
        filters.push(Filter::newest_first());
        filters.push(Filter::select(Vec::<String>::new()));

        let page = self
            .store
            .list(ViewRecord::collection(), &filters, 1)
            .await?;
        Ok(page.documents.first().map(|document| document.created_at))
    }
}
