//! Threaded protocol engine for point-to-point device links.
//!
//! A [`DeviceLink`] runs three OS threads over one transport:
//!
//! * a read loop that decodes fixed-size frames and dispatches them to
//!   [`Subscription`]s,
//! * a write loop that drains the send queue in half-duplex bursts,
//! * a fault supervisor that tears everything down on the first transport
//!   fault and invokes the application's fault callback at most once.
//!
//! ```no_run
//! use devlink_engine::{CommandSet, DeviceLink, LinkConfig};
//! use devlink_transport::SerialLink;
//!
//! # fn main() -> devlink_engine::Result<()> {
//! let port = SerialLink::open("/dev/ttyACM0", 115_200)?;
//! let mut engine = DeviceLink::new(
//!     port,
//!     None,
//!     CommandSet::new(),
//!     |origin| eprintln!("link faulted: {origin:?}"),
//!     LinkConfig::default(),
//! )?;
//! engine.start()?;
//! engine.enqueue_send(0x10, 100, 1, vec![0x01], ())?;
//! engine.close()
//! # }
//! ```

pub mod engine;
pub mod error;
mod gate;
pub mod message;
pub mod registry;
mod reader;
pub mod supervisor;
mod writer;

pub use engine::{DeviceLink, LinkConfig};
pub use error::{EngineError, Result};
pub use message::{
    CommandDescriptor, CommandSet, DeviceContext, DeviceResolver, ParsedMessage, SendDescriptor,
};
pub use registry::{Subscription, SubscriptionRegistry};
pub use supervisor::FaultOrigin;
