use snafu::{Location, Snafu};

use crate::service::PreferenceError;
use crate::store::ConnectionError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ApplicationError {
    /// could not parse the configuration from the environment
    ConfigLoad {
        source: envy::Error,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not connect to the document store
    ConnectStore {
        source: ConnectionError,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not initialize the logger
    InitializeLogger {
        source: tracing::subscriber::SetGlobalDefaultError,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not load the viewer's preferences
    LoadPreferences {
        source: PreferenceError,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not read a command from standard input
    ReadCommand {
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },
}
