//! The engine: like reconciliation, view logging, feed pagination and comment threads.

mod comments;
mod error;
mod feed;
mod guard;
mod library;
mod like;
mod liveness;
mod preferences;
mod view;

#[cfg(test)]
pub(crate) mod fixtures;

pub use comments::*;
pub use error::*;
pub use feed::*;
pub use guard::*;
pub use library::*;
pub use like::*;
pub use liveness::*;
pub use preferences::*;
pub use view::*;
