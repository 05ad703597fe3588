use snafu::{Location, Snafu};

use crate::Located;

/// Status codes carried by [StoreError]. They follow HTTP so a remote store can pass its
/// response status straight through.
pub mod code {
    /// The request never got a response.
    pub const NO_RESPONSE: u16 = 0;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const NOT_FOUND: u16 = 404;
    pub const TIMEOUT: u16 = 408;
    pub const CONFLICT: u16 = 409;
    pub const TOO_MANY_REQUESTS: u16 = 429;
    pub const INTERNAL: u16 = 500;
    pub const BAD_GATEWAY: u16 = 502;
    pub const UNAVAILABLE: u16 = 503;
    pub const GATEWAY_TIMEOUT: u16 = 504;
}

/// Coarse classification of a [StoreError] code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    Conflict,
    NotFound,
    Unauthorized,
    Transient,
    Unknown,
}

#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub), display("store request failed with code {code}: {message}"))]
pub struct StoreError {
    pub code: u16,
    pub message: String,
    #[snafu(implicit)]
    location: Location,
}

impl StoreError {
    #[track_caller]
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        StoreSnafu {
            code,
            message: message.into(),
        }
        .build()
    }

    pub fn kind(&self) -> StoreErrorKind {
        match self.code {
            code::CONFLICT => StoreErrorKind::Conflict,
            code::NOT_FOUND => StoreErrorKind::NotFound,
            code::UNAUTHORIZED => StoreErrorKind::Unauthorized,
            code::NO_RESPONSE
            | code::TIMEOUT
            | code::TOO_MANY_REQUESTS
            | code::BAD_GATEWAY
            | code::UNAVAILABLE
            | code::GATEWAY_TIMEOUT => StoreErrorKind::Transient,
            _ => StoreErrorKind::Unknown,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == StoreErrorKind::Conflict
    }
}

impl Located for StoreError {
    fn location(&self) -> Location {
        self.location
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_codes() {
        assert_eq!(StoreError::new(409, "exists").kind(), StoreErrorKind::Conflict);
        assert_eq!(StoreError::new(404, "gone").kind(), StoreErrorKind::NotFound);
        assert_eq!(StoreError::new(0, "offline").kind(), StoreErrorKind::Transient);
        assert_eq!(StoreError::new(503, "busy").kind(), StoreErrorKind::Transient);
        assert_eq!(StoreError::new(500, "boom").kind(), StoreErrorKind::Unknown);
        assert_eq!(StoreError::new(418, "teapot").kind(), StoreErrorKind::Unknown);
    }

    #[test]
    fn display_carries_code_and_message() {
        let error = StoreError::new(code::CONFLICT, "document already exists");
        assert_eq!(
            error.to_string(),
            "store request failed with code 409: document already exists"
        );
    }
}
