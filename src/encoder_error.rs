//! Encoder errors.

/// Errors thrown by the encoder.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EncoderError {
    /// The output buffer is too small.
    BufferTooSmall,
    /// The encoder was created with an unsupported sampling rate or
    /// channel count, or a control call carried an invalid value.
    InvalidConfiguration(&'static str),
    /// The requested combination of mode, bandwidth and frame size cannot
    /// be produced by this encoder.
    UnsupportedMode,
    /// An internal encoder error.
    InternalError(&'static str),
}

impl std::fmt::Display for EncoderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncoderError::BufferTooSmall => {
                write!(f, "output buffer is too small")
            }
            EncoderError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            EncoderError::UnsupportedMode => {
                write!(f, "unsupported mode")
            }
            EncoderError::InternalError(message) => {
                write!(f, "{}", message)
            }
        }
    }
}

impl std::error::Error for EncoderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
