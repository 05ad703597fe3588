use snafu::{IntoError as _, Location, Snafu};

use crate::store::{StoreError, StoreErrorKind};
use crate::Located;

/// Why an engine operation failed, in the terms the UI layer acts on.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum EngineError {
    /// No viewer is signed in
    #[snafu(display("this action needs a signed-in viewer"))]
    Unauthenticated {
        #[snafu(implicit)]
        location: Location,
    },

    /// The document already exists
    #[snafu(display("already exists: {source}"))]
    Conflict {
        source: StoreError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("not found: {source}"))]
    NotFound {
        source: StoreError,
        #[snafu(implicit)]
        location: Location,
    },

    /// Network trouble, worth trying again later
    #[snafu(display("the store is unreachable right now: {source}"))]
    Transient {
        source: StoreError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("unexpected store failure: {source}"))]
    Unknown {
        source: StoreError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("invalid input: {reason}"))]
    InvalidInput {
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },

    /// A stored document does not have the shape of its collection
    #[snafu(display("document `{id}` in `{collection}` is malformed: {source}"))]
    Decode {
        collection: &'static str,
        id: String,
        #[snafu(source(from(serde_json::Error, std::sync::Arc::new)))]
        source: std::sync::Arc<serde_json::Error>,
        #[snafu(implicit)]
        location: Location,
    },
}

/// The variant of an [EngineError] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorKind {
    Unauthenticated,
    Conflict,
    NotFound,
    Transient,
    Unknown,
    InvalidInput,
}

impl EngineError {
    pub fn kind(&self) -> EngineErrorKind {
        match self {
            Self::Unauthenticated { .. } => EngineErrorKind::Unauthenticated,
            Self::Conflict { .. } => EngineErrorKind::Conflict,
            Self::NotFound { .. } => EngineErrorKind::NotFound,
            Self::Transient { .. } => EngineErrorKind::Transient,
            Self::Unknown { .. } => EngineErrorKind::Unknown,
            Self::InvalidInput { .. } | Self::Decode { .. } => EngineErrorKind::InvalidInput,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == EngineErrorKind::Conflict
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == EngineErrorKind::NotFound
    }
}

impl From<StoreError> for EngineError {
    #[track_caller]
    fn from(source: StoreError) -> Self {
        match source.kind() {
            StoreErrorKind::Conflict => ConflictSnafu.into_error(source),
            StoreErrorKind::NotFound => NotFoundSnafu.into_error(source),
            StoreErrorKind::Transient => TransientSnafu.into_error(source),
            // a rejected credential is a store misconfiguration, not a missing viewer
            StoreErrorKind::Unauthorized | StoreErrorKind::Unknown => {
                UnknownSnafu.into_error(source)
            }
        }
    }
}

impl Located for EngineError {
    fn location(&self) -> Location {
        match self {
            Self::Unauthenticated { location }
            | Self::Conflict { location, .. }
            | Self::NotFound { location, .. }
            | Self::Transient { location, .. }
            | Self::Unknown { location, .. }
            | Self::InvalidInput { location, .. }
            | Self::Decode { location, .. } => *location,
        }
    }
}
