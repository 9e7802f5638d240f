use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Total wire size of every frame, padding included.
pub const FRAME_SIZE: usize = 32;

/// Frame header: sentinel (2) + length (1) + checksum (2) + message id (1)
/// + target (2) + command id (1) = 9 bytes.
pub const HEADER_SIZE: usize = 9;

/// Sentinel bytes marking the start of a frame.
pub const SENTINEL: [u8; 2] = [0x25, 0x25];

/// Maximum payload that fits in a fixed-size frame.
pub const MAX_PAYLOAD: usize = FRAME_SIZE - HEADER_SIZE;

/// Salt constant folded into every checksum.
pub const CHECKSUM_SALT: u16 = 0xBEAF;

/// A decoded wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Correlates replies with the command that solicited them.
    pub message_id: u8,
    /// Wire address of the device endpoint.
    pub target: u16,
    /// Protocol command identifier.
    pub command_id: u8,
    /// Payload, at most [`MAX_PAYLOAD`] bytes.
    pub payload: Bytes,
    /// Checksum carried on the wire (recomputed on encode).
    pub crc: u16,
}

impl Frame {
    /// Create a frame with its checksum computed from the fields.
    pub fn new(command_id: u8, target: u16, message_id: u8, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let crc = checksum(message_id, target, command_id, &payload);
        Self {
            message_id,
            target,
            command_id,
            payload,
            crc,
        }
    }

    /// Whether the carried checksum matches the frame contents.
    pub fn checksum_valid(&self) -> bool {
        self.crc == checksum(self.message_id, self.target, self.command_id, &self.payload)
    }
}

/// Compute the 16-bit frame checksum.
///
/// Peer firmware expects this exact formula bit-for-bit. The one-byte
/// header fields fold in *sign-extended* (0xFF contributes -1, not 255)
/// and payload bytes fold via their signed absolute value (0xFF
/// contributes 1). The 16-bit target folds unsigned; its signedness
/// cancels mod 2^16.
pub fn checksum(message_id: u8, target: u16, command_id: u8, payload: &[u8]) -> u16 {
    let mut sum = CHECKSUM_SALT
        .wrapping_add_signed(i16::from(message_id as i8))
        .wrapping_add(target)
        .wrapping_add_signed(i16::from(command_id as i8));
    for &byte in payload {
        sum = sum.wrapping_add(u16::from((byte as i8).unsigned_abs()));
    }
    sum
}

/// Encode a frame into the wire format.
///
/// Always appends exactly [`FRAME_SIZE`] bytes (zero-padded). The checksum is
/// recomputed from the frame fields; the `crc` field is not trusted.
///
/// Wire format:
/// ```text
/// ┌────────────┬────────┬──────────┬─────────┬──────────┬─────────┬─────────────────┐
/// │ Sentinel   │ Length │ Checksum │ Msg ID  │ Target   │ Cmd ID  │ Payload + pad   │
/// │ 0x25 0x25  │ (1B)   │ (2B LE)  │ (1B)    │ (2B LE)  │ (1B)    │ (23B)           │
/// └────────────┴────────┴──────────┴─────────┴──────────┴─────────┴─────────────────┘
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    if frame.payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: frame.payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    let crc = checksum(
        frame.message_id,
        frame.target,
        frame.command_id,
        &frame.payload,
    );
    dst.reserve(FRAME_SIZE);
    dst.put_slice(&SENTINEL);
    dst.put_u8(frame.payload.len() as u8);
    dst.put_u16_le(crc);
    dst.put_u8(frame.message_id);
    dst.put_u16_le(frame.target);
    dst.put_u8(frame.command_id);
    dst.put_slice(&frame.payload);
    dst.put_bytes(0, MAX_PAYLOAD - frame.payload.len());
    Ok(())
}

/// Decode a frame from a raw read window.
///
/// The declared payload length is bounds-checked against the bytes actually
/// present; a length overrunning the window is `FrameTooShort`, never an
/// out-of-bounds read. A checksum mismatch yields `ChecksumInvalid` rather
/// than a partially-trusted frame.
pub fn decode_frame(window: &[u8]) -> Result<Frame> {
    if window.len() < SENTINEL.len() {
        return Err(FrameError::FrameTooShort {
            have: window.len(),
            need: HEADER_SIZE,
        });
    }
    if window[..2] != SENTINEL {
        return Err(FrameError::BadSentinel);
    }
    if window.len() < HEADER_SIZE {
        return Err(FrameError::FrameTooShort {
            have: window.len(),
            need: HEADER_SIZE,
        });
    }

    let payload_len = window[2] as usize;
    let crc = u16::from_le_bytes([window[3], window[4]]);
    let message_id = window[5];
    let target = u16::from_le_bytes([window[6], window[7]]);
    let command_id = window[8];

    if HEADER_SIZE + payload_len > window.len() {
        return Err(FrameError::FrameTooShort {
            have: window.len(),
            need: HEADER_SIZE + payload_len,
        });
    }
    let payload = Bytes::copy_from_slice(&window[HEADER_SIZE..HEADER_SIZE + payload_len]);

    let expected = checksum(message_id, target, command_id, &payload);
    if crc != expected {
        return Err(FrameError::ChecksumInvalid {
            expected,
            actual: crc,
        });
    }

    Ok(Frame {
        message_id,
        target,
        command_id,
        payload,
        crc,
    })
}
