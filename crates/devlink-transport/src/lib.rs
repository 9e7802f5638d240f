//! Transport adapter layer for devlink.
//!
//! Defines the contract a physical link must satisfy ([`LinkPort`] and its
//! reader/writer/control halves) and provides a `serialport`-backed
//! implementation for USB/tty links.
//!
//! This is the lowest layer of devlink. The protocol engine builds on top of
//! these traits and never touches a port directly.

pub mod error;
pub mod serial;
pub mod traits;

pub use error::{Result, TransportError};
pub use serial::{list_ports, PortInfo, SerialLink};
pub use traits::{LinkControl, LinkPort, LinkReader, LinkWriter, ReadMode};
