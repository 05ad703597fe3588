pub mod config;
pub mod error;
pub mod logger;
pub mod model;
pub mod repl;
pub mod service;
pub mod session;
pub mod store;
pub mod time;

mod macros;

pub trait Located {
    fn location(&self) -> snafu::Location;
}
