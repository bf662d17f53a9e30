//! Decoder errors.

/// Errors thrown by the decoder.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecoderError {
    /// The packet violates RFC 6716: malformed TOC, inconsistent frame
    /// lengths, or a decoder invariant was violated mid-packet.
    InvalidPacket,
    /// The output buffer is too small for the samples the packet carries.
    BufferTooSmall,
    /// The decoder was created with an unsupported sampling rate or
    /// channel count.
    InvalidConfiguration(&'static str),
    /// The packet uses a reserved configuration the decoder does not handle.
    UnsupportedMode,
    /// An internal decoder error.
    InternalError(&'static str),
}

impl std::fmt::Display for DecoderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecoderError::InvalidPacket => {
                write!(f, "invalid packet")
            }
            DecoderError::BufferTooSmall => {
                write!(f, "output buffer is too small")
            }
            DecoderError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            DecoderError::UnsupportedMode => {
                write!(f, "unsupported mode")
            }
            DecoderError::InternalError(message) => {
                write!(f, "{}", message)
            }
        }
    }
}

impl std::error::Error for DecoderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
