//! A thin facade over the range coder for code paths that run on both the
//! encoder and the decoder.
//!
//! The allocation and the band splitting make entropy coded decisions whose
//! control flow is shared between the two sides. Instead of duplicating
//! those functions, they run once over this enum: the encoder variant
//! writes the value it is handed and returns it, the decoder variant
//! ignores the input and returns what it reads.

use crate::encoder_error::EncoderError;
use crate::range_coder::{RangeDecoder, RangeEncoder, Tell};

pub(crate) enum EntropyCoder<'a, 'b, 'c> {
    Encoder(&'a mut RangeEncoder<'b>),
    Decoder(&'c mut RangeDecoder<'b>),
}

impl<'a, 'b, 'c> EntropyCoder<'a, 'b, 'c> {
    pub(crate) fn is_encoder(&self) -> bool {
        matches!(self, EntropyCoder::Encoder(_))
    }

    pub(crate) fn tell(&self) -> u32 {
        match self {
            EntropyCoder::Encoder(enc) => enc.tell(),
            EntropyCoder::Decoder(dec) => dec.tell(),
        }
    }

    pub(crate) fn tell_frac(&self) -> u32 {
        match self {
            EntropyCoder::Encoder(enc) => enc.tell_frac(),
            EntropyCoder::Decoder(dec) => dec.tell_frac(),
        }
    }

    /// Transports one binary decision with probability `1 / (1 << logp)`.
    pub(crate) fn bit_logp(&mut self, value: bool, logp: u32) -> Result<bool, EncoderError> {
        match self {
            EntropyCoder::Encoder(enc) => {
                enc.encode_bit_logp(u32::from(value), logp)?;
                Ok(value)
            }
            EntropyCoder::Decoder(dec) => Ok(dec.decode_bit_logp(logp)),
        }
    }

    /// Transports one uniform symbol in `[0, ft)`.
    pub(crate) fn uint(&mut self, value: u32, ft: u32) -> Result<u32, EncoderError> {
        match self {
            EntropyCoder::Encoder(enc) => {
                enc.encode_uint(value, ft)?;
                Ok(value)
            }
            EntropyCoder::Decoder(dec) => Ok(dec.decode_uint(ft)),
        }
    }

    /// Transports `n` raw bits.
    pub(crate) fn bits(&mut self, value: u32, n: u32) -> Result<u32, EncoderError> {
        match self {
            EntropyCoder::Encoder(enc) => {
                enc.encode_bits(value, n)?;
                Ok(value)
            }
            EntropyCoder::Decoder(dec) => Ok(dec.decode_bits(n)),
        }
    }
}
