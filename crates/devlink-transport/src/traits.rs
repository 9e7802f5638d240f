use crate::error::Result;

/// How a transport delivers inbound bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// The transport is half-duplex: consult [`LinkReader::available`]
    /// before reading, and pause reads while the link transmits.
    Polling,
    /// The transport supports concurrent read/write: always attempt the
    /// blocking read, never suspend for a write burst.
    Blocking,
}

/// A physical point-to-point link, split into its three working halves.
///
/// `Route` is transport-specific routing data attached to each outbound
/// frame (fixed per transport rather than a generic threaded through every
/// engine signature). Serial links carry none; a radio bridge might carry a
/// hop address.
pub trait LinkPort: Send + 'static {
    /// Per-send routing data.
    type Route: Send + 'static;
    /// The inbound half, owned by the read loop.
    type Reader: LinkReader + Send + 'static;
    /// The outbound half, owned by the write loop.
    type Writer: LinkWriter<Route = Self::Route> + Send + 'static;
    /// Cheap shared handle used to shut the link down from any thread.
    type Control: LinkControl + Clone + Send + Sync + 'static;

    /// Consume the port and produce its reader, writer, and control handle.
    fn split(self) -> Result<(Self::Reader, Self::Writer, Self::Control)>;
}

/// The inbound half of a link.
pub trait LinkReader {
    /// Re-arm the transport for reading. Called once before the first read
    /// and again after every suspend/resume cycle.
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// Whether inbound bytes are waiting. Only meaningful for
    /// [`ReadMode::Polling`] transports.
    fn available(&mut self) -> Result<bool>;

    /// Read up to `buf.len()` bytes. Returns 0 when nothing arrived within
    /// the transport's own timeout.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// The delivery mode of this transport.
    fn mode(&self) -> ReadMode;
}

/// The outbound half of a link.
pub trait LinkWriter {
    /// Per-send routing data, matching [`LinkPort::Route`].
    type Route;

    /// Transmit one encoded frame.
    fn write(&mut self, route: &Self::Route, frame: &[u8]) -> Result<()>;
}

/// Shared shutdown handle for a link.
///
/// `shutdown` must be idempotent and safe to call while a read or write is
/// in flight on another thread; operations after shutdown fail with
/// [`crate::TransportError::Shutdown`].
pub trait LinkControl {
    fn shutdown(&self);
}
