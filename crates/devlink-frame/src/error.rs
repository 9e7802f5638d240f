/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The window does not start with the frame sentinel. Line noise or a
    /// mid-frame read; callers drop the window and resynchronize.
    #[error("invalid frame sentinel (expected 0x25 0x25)")]
    BadSentinel,

    /// The window is shorter than the header, or the declared payload length
    /// exceeds the bytes actually present.
    #[error("frame too short ({have} bytes, need {need})")]
    FrameTooShort { have: usize, need: usize },

    /// The recomputed checksum does not match the one on the wire.
    #[error("checksum mismatch (expected {expected:#06x}, got {actual:#06x})")]
    ChecksumInvalid { expected: u16, actual: u16 },

    /// The payload does not fit in a fixed-size frame.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
