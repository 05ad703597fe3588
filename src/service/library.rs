use snafu::OptionExt as _;
use tracing::instrument;

use super::{EngineError, UnauthenticatedSnafu};
use crate::model::{HistoryEntry, NewInteraction, Record, User, Video, WatchLaterEntry};
use crate::store::{Acl, DocumentId, DocumentStore};

/// Earlier history entries for one video removed per visit. More than one only exists after
/// concurrent visits from several devices.
const HISTORY_SWEEP: u32 = 20;

/// The viewer's watch-later list and watch history, the writers behind the library feeds.
#[derive(Debug, Clone)]
pub struct Library<S> {
    store: S,
}

impl<S: DocumentStore> Library<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Saves a video to watch later. Saving it again returns the existing entry.
    #[instrument(skip(self))]
    pub async fn save_for_later(
        &self, viewer: Option<&Record<User>>, video_id: &Record<Video>,
    ) -> Result<WatchLaterEntry, EngineError> {
        let user_id = viewer.context(UnauthenticatedSnafu)?;
        let draft = NewInteraction::new(user_id.clone(), video_id.clone());

        if let Some(entry) = WatchLaterEntry::first(&self.store, &draft.filters()).await? {
            tracing::debug!(video_id = %video_id, "already saved for later");
            return Ok(entry);
        }

        let acl = Acl::owned_by(user_id);
        let entry = WatchLaterEntry::create(&self.store, DocumentId::Generate, &draft, acl).await?;
        tracing::info!(video_id = %video_id, "saved for later");
        Ok(entry)
    }

    /// Removes a video from watch later. Returns whether there was anything to remove.
    #[instrument(skip(self))]
    pub async fn remove_from_watch_later(
        &self, viewer: Option<&Record<User>>, video_id: &Record<Video>,
    ) -> Result<bool, EngineError> {
        let user_id = viewer.context(UnauthenticatedSnafu)?;
        let draft = NewInteraction::new(user_id.clone(), video_id.clone());

        let Some(entry) = WatchLaterEntry::first(&self.store, &draft.filters()).await? else {
            return Ok(false);
        };

        match WatchLaterEntry::delete(&self.store, &entry.id).await {
            Ok(()) => Ok(true),
            // removed elsewhere in the meantime
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Puts a video at the top of the viewer's history, dropping its earlier entries.
    #[instrument(skip(self))]
    pub async fn record_history(
        &self, viewer: Option<&Record<User>>, video_id: &Record<Video>,
    ) -> Result<HistoryEntry, EngineError> {
        let user_id = viewer.context(UnauthenticatedSnafu)?;
        let draft = NewInteraction::new(user_id.clone(), video_id.clone());

        let (earlier, _) = HistoryEntry::list(&self.store, &draft.filters(), HISTORY_SWEEP).await?;
        for entry in earlier {
            match HistoryEntry::delete(&self.store, &entry.id).await {
                Ok(()) => {}
                Err(error) if error.is_not_found() => {}
                Err(error) => return Err(error),
            }
        }

        let entry =
            HistoryEntry::create(&self.store, DocumentId::Generate, &draft, Acl::owned_by(user_id))
                .await?;
        tracing::debug!(video_id = %video_id, "history recorded");
        Ok(entry)
    }
}
