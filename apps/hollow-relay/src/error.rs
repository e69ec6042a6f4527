use std::io;
use thiserror::Error;

/// Startup failure for a listener. Always reported before any worker thread
/// is running.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare {endpoint}: {source}")]
    Prepare {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn {thread} thread: {source}")]
    Spawn {
        thread: &'static str,
        #[source]
        source: io::Error,
    },
}

impl BindError {
    pub(crate) fn bind(endpoint: impl ToString, source: io::Error) -> Self {
        BindError::Bind {
            endpoint: endpoint.to_string(),
            source,
        }
    }

    pub(crate) fn prepare(endpoint: impl ToString, source: io::Error) -> Self {
        BindError::Prepare {
            endpoint: endpoint.to_string(),
            source,
        }
    }
}
