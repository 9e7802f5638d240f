//! Fixed-size frame codec for the devlink wire protocol.
//!
//! Every frame occupies exactly [`FRAME_SIZE`] bytes on the wire:
//! - A 2-byte sentinel (0x25 0x25) for resynchronization
//! - A 1-byte payload length
//! - A 2-byte little-endian checksum
//! - A 1-byte message ID, 2-byte little-endian target, 1-byte command ID
//! - The payload, zero-padded to the fixed size
//!
//! Pure functions only: no I/O, no state.

pub mod codec;
pub mod error;

pub use codec::{
    checksum, decode_frame, encode_frame, Frame, CHECKSUM_SALT, FRAME_SIZE, HEADER_SIZE,
    MAX_PAYLOAD, SENTINEL,
};
pub use error::{FrameError, Result};
