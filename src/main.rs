use std::sync::Arc;

use clipfeed::config::Config;
use clipfeed::error::{ApplicationError, ConnectStoreSnafu, LoadPreferencesSnafu};
use clipfeed::logger;
use clipfeed::repl::{self, Repl};
use clipfeed::service::{FileKv, KeyValueStore, MemoryKv, PreferenceStore};
use clipfeed::session::Session;
use clipfeed::store::SurrealStore;
use clipfeed::time::SystemClock;
use dotenvy::dotenv;
use snafu::ResultExt;

#[tokio::main]
async fn main() -> Result<(), ApplicationError> {
    dotenv().ok();

    let config = Config::from_env()?;

    let _guard = logger::init(&config)?;

    let store = SurrealStore::connect(&config.store_url)
        .await
        .context(ConnectStoreSnafu)?;

    match config.preferences_path.clone() {
        Some(path) => run(config, store, FileKv::new(path)).await,
        None => run(config, store, MemoryKv::new()).await,
    }
}

async fn run<K: KeyValueStore>(
    config: Config, store: SurrealStore, kv: K,
) -> Result<(), ApplicationError> {
    let preferences = PreferenceStore::with_defaults(kv, config.default_preferences());
    let loaded = preferences
        .load()
        .await
        .context(LoadPreferencesSnafu)?;

    let viewer = config.viewer();
    match &viewer {
        Some(viewer) => tracing::info!(viewer = %viewer.id, "signed in"),
        None => tracing::info!("browsing anonymously"),
    }

    let session = Session::new(
        store,
        viewer,
        loaded,
        config.settings(),
        Arc::new(SystemClock),
    );

    repl::start(&mut Repl::new(session, preferences)).await
}
