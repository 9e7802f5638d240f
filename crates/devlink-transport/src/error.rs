/// Errors that can occur on a device link transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the named port.
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        source: serialport::Error,
    },

    /// A transient I/O error; the link may still recover.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The physical link is permanently gone (device unplugged, port
    /// invalidated by the OS).
    #[error("link lost: {0}")]
    PortGone(String),

    /// The transport has been shut down; subsequent operations fail with
    /// this variant rather than a transient error.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// True when the link is permanently unusable and the engine must tear
    /// itself down rather than retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PortGone(_) | Self::Shutdown)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
