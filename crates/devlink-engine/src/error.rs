use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the engine facade and its supervisor.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine already started")]
    AlreadyStarted,

    #[error("{thread} thread did not stop within {grace:?}")]
    ShutdownTimeout {
        thread: &'static str,
        grace: Duration,
    },

    #[error("send queue is closed")]
    QueueClosed,

    #[error("failed to spawn {thread} thread")]
    Spawn {
        thread: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Frame(#[from] devlink_frame::FrameError),

    #[error(transparent)]
    Transport(#[from] devlink_transport::TransportError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
