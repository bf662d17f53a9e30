//! Implements the Opus encoder.
//!
//! The encoder drives the transform codec layer: every packet it produces
//! is a CELT mode packet at the configured bandwidth and frame size. The
//! decoder side of this crate and any conforming Opus decoder can decode
//! its output; Silk and Hybrid mode packets are not produced.

use crate::celt::{CeltEncoder, BANDWIDTH_END_BANDS};
use crate::packet::MAX_FRAME_BYTES;
use crate::{Bandwidth, Channels, EncoderError, SamplingRate};

/// The intended application of the encoded stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Application {
    /// Favor speech intelligibility.
    Voip,
    /// Favor faithfulness to the original music signal.
    Audio,
    /// Minimize coding delay.
    LowDelay,
}

/// The signal type hint for the encoder.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Signal {
    /// No hint.
    Auto,
    /// The input is likely speech.
    Voice,
    /// The input is likely music.
    Music,
}

/// Configures the encoder on creation.
#[derive(Clone, Debug)]
pub struct EncoderConfiguration {
    /// Sample rate of the input (Hz). Default: 48000 Hz.
    pub sampling_rate: SamplingRate,
    /// Number of input channels. Default: Stereo.
    pub channels: Channels,
    /// The application profile. Default: Audio.
    pub application: Application,
}

impl Default for EncoderConfiguration {
    fn default() -> Self {
        Self {
            sampling_rate: SamplingRate::Hz48000,
            channels: Channels::Stereo,
            application: Application::Audio,
        }
    }
}

/// Opus encoder.
pub struct Encoder {
    celt_enc: CeltEncoder,
    sampling_rate: SamplingRate,
    channels: Channels,
    application: Application,

    bitrate: u32,
    vbr: bool,
    complexity: u32,
    bandwidth: Bandwidth,
    signal: Signal,

    final_range: u32,
}

impl Encoder {
    /// Creates a new `Encoder` with the given configuration.
    pub fn new(configuration: &EncoderConfiguration) -> Result<Self, EncoderError> {
        let mut celt_enc =
            CeltEncoder::new(configuration.sampling_rate, configuration.channels)?;
        celt_enc.set_bitrate(64000);

        Ok(Self {
            celt_enc,
            sampling_rate: configuration.sampling_rate,
            channels: configuration.channels,
            application: configuration.application,
            bitrate: 64000,
            vbr: false,
            complexity: 5,
            bandwidth: Bandwidth::Auto,
            signal: Signal::Auto,
            final_range: 0,
        })
    }

    /// Resets the encoder to a freshly initialized state.
    pub fn reset(&mut self) {
        self.celt_enc.reset();
        self.final_range = 0;
    }

    /// Returns the sampling rate the encoder was initialized with.
    pub fn sampling_rate(&self) -> SamplingRate {
        self.sampling_rate
    }

    /// Returns the channels the encoder was initialized with.
    pub fn channels(&self) -> Channels {
        self.channels
    }

    /// Sets the target bitrate in bits per second.
    pub fn set_bitrate(&mut self, bitrate: u32) -> Result<(), EncoderError> {
        if !(500..=512_000).contains(&bitrate) {
            return Err(EncoderError::InvalidConfiguration(
                "bitrate out of range",
            ));
        }
        self.bitrate = bitrate;
        self.celt_enc.set_bitrate(bitrate);
        Ok(())
    }

    /// The current target bitrate.
    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    /// Enables or disables variable bitrate operation.
    pub fn set_vbr(&mut self, vbr: bool) {
        self.vbr = vbr;
        self.celt_enc.set_vbr(vbr);
    }

    /// Sets the computational complexity, 0 to 10.
    pub fn set_complexity(&mut self, complexity: u32) -> Result<(), EncoderError> {
        if complexity > 10 {
            return Err(EncoderError::InvalidConfiguration(
                "complexity must be 0..=10",
            ));
        }
        self.complexity = complexity;
        self.celt_enc.set_complexity(complexity);
        Ok(())
    }

    /// Restricts the coded audio bandwidth.
    pub fn set_bandwidth(&mut self, bandwidth: Bandwidth) {
        self.bandwidth = bandwidth;
    }

    /// Hints the signal type to the rate control.
    pub fn set_signal(&mut self, signal: Signal) {
        self.signal = signal;
    }

    /// Switches the application profile.
    pub fn set_application(&mut self, application: Application) {
        self.application = application;
    }

    /// Returns the final state of the entropy coder of the last packet.
    pub fn final_range(&self) -> u32 {
        self.final_range
    }

    /// The coded bandwidth after resolving `Auto` against the input rate
    /// and application.
    fn effective_bandwidth(&self) -> Bandwidth {
        let requested = match self.bandwidth {
            Bandwidth::Auto => match self.sampling_rate {
                SamplingRate::Hz8000 => Bandwidth::Narrowband,
                SamplingRate::Hz12000 | SamplingRate::Hz16000 => Bandwidth::Wideband,
                SamplingRate::Hz24000 => Bandwidth::Superwideband,
                SamplingRate::Hz48000 => Bandwidth::Fullband,
            },
            bandwidth => bandwidth,
        };
        // The transform layer has no mediumband configuration.
        if requested == Bandwidth::Mediumband {
            Bandwidth::Wideband
        } else {
            requested
        }
    }

    /// Encodes one frame of 16 bit samples.
    ///
    /// See [`Encoder::encode_float`] for the conventions.
    pub fn encode(&mut self, samples: &[i16], output: &mut [u8]) -> Result<usize, EncoderError> {
        let float: Vec<f32> = samples.iter().map(|&s| f32::from(s) / 32768.0).collect();
        self.encode_float(&float, output)
    }

    /// Encodes one frame of float samples into an Opus packet.
    ///
    /// Returns the number of bytes written to `output`.
    ///
    /// # Arguments
    /// * `samples` - Interleaved input of exactly one frame: 2.5, 5, 10 or
    ///               20 ms per channel at the configured sampling rate.
    /// * `output`  - Receives the packet. With CBR the packet size follows
    ///               from the bitrate; the buffer must be large enough.
    pub fn encode_float(
        &mut self,
        samples: &[f32],
        output: &mut [u8],
    ) -> Result<usize, EncoderError> {
        let channels = self.channels as usize;
        if samples.len() % channels != 0 {
            return Err(EncoderError::InvalidConfiguration(
                "partial sample frame",
            ));
        }
        let frame_api = samples.len() / channels;
        let upsample = SamplingRate::Hz48000 as usize / self.sampling_rate as usize;
        let frame_48 = frame_api * upsample;
        let lm = match frame_48 {
            120 => 0_usize,
            240 => 1,
            480 => 2,
            960 => 3,
            // Longer frames exist only in the linear prediction modes.
            _ => return Err(EncoderError::UnsupportedMode),
        };

        // Packet budget, including the TOC byte.
        let total_bytes = (self.bitrate as u64 * frame_48 as u64 / (48_000 * 8)) as usize;
        let total_bytes = total_bytes.clamp(3, MAX_FRAME_BYTES);
        if output.len() < total_bytes {
            return Err(EncoderError::BufferTooSmall);
        }

        let bandwidth = self.effective_bandwidth();
        self.celt_enc.set_end_band(bandwidth_end_band(bandwidth));

        let payload = &mut output[1..total_bytes];
        let written = self.celt_enc.encode(samples, frame_48, payload)?;
        self.final_range = self.celt_enc.final_range();
        log::trace!(
            "packet: bandwidth {:?}, {} samples, {} bytes",
            bandwidth,
            frame_48,
            1 + written
        );

        output[0] = toc_byte(bandwidth, lm, self.channels == Channels::Stereo);
        Ok(1 + written)
    }

    /// The number of samples per channel the encoder expects for the given
    /// frame duration.
    pub fn frame_samples(&self, duration_ms_x4: usize) -> usize {
        // duration in quarter milliseconds: 10 -> 2.5 ms.
        self.sampling_rate as usize * duration_ms_x4 / 4000
    }
}

/// Builds the table of contents byte of a transform mode packet.
fn toc_byte(bandwidth: Bandwidth, lm: usize, stereo: bool) -> u8 {
    let config = match bandwidth {
        Bandwidth::Narrowband => 16 + lm,
        Bandwidth::Wideband => 20 + lm,
        Bandwidth::Superwideband => 24 + lm,
        _ => 28 + lm,
    } as u8;
    (config << 3) | (u8::from(stereo) << 2)
}

fn bandwidth_end_band(bandwidth: Bandwidth) -> usize {
    match bandwidth {
        Bandwidth::Narrowband => BANDWIDTH_END_BANDS[0],
        Bandwidth::Mediumband => BANDWIDTH_END_BANDS[1],
        Bandwidth::Wideband => BANDWIDTH_END_BANDS[2],
        Bandwidth::Superwideband => BANDWIDTH_END_BANDS[3],
        _ => BANDWIDTH_END_BANDS[4],
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use nanorand::RNG;

    use super::*;
    use crate::decoder::{Decoder, DecoderConfiguration};
    use crate::packet::{query_packet_codec_mode, query_packet_sample_count};
    use crate::CodecMode;

    fn encoder(channels: Channels) -> Encoder {
        Encoder::new(&EncoderConfiguration {
            sampling_rate: SamplingRate::Hz48000,
            channels,
            application: Application::Audio,
        })
        .unwrap()
    }

    fn decoder(channels: Channels) -> Decoder {
        Decoder::new(&DecoderConfiguration {
            sampling_rate: SamplingRate::Hz48000,
            channels,
            gain: 0,
        })
        .unwrap()
    }

    fn sine(frequency: f32, length: usize, channels: usize) -> Vec<f32> {
        (0..length * channels)
            .map(|i| {
                let n = i / channels;
                0.5 * (2.0 * std::f32::consts::PI * frequency * n as f32 / 48000.0).sin()
            })
            .collect()
    }

    fn correlation(a: &[f32], b: &[f32]) -> f64 {
        let n = a.len().min(b.len());
        let mut xy = 0.0_f64;
        let mut xx = 1e-12_f64;
        let mut yy = 1e-12_f64;
        (0..n).for_each(|i| {
            xy += f64::from(a[i]) * f64::from(b[i]);
            xx += f64::from(a[i]) * f64::from(a[i]);
            yy += f64::from(b[i]) * f64::from(b[i]);
        });
        xy / (xx * yy).sqrt()
    }

    #[test]
    fn test_cbr_packet_is_exactly_the_target_size() {
        // 64 kbit/s at 20 ms is 160 bytes including the TOC byte.
        let mut enc = encoder(Channels::Mono);
        enc.set_bitrate(64000).unwrap();

        let input = sine(440.0, 960, 1);
        let mut packet = [0_u8; 1500];
        let len = enc.encode_float(&input, &mut packet).unwrap();
        assert_eq!(len, 160);
        assert_eq!(query_packet_codec_mode(&packet[..len]), CodecMode::Celt);
        assert_eq!(
            query_packet_sample_count(&packet[..len], SamplingRate::Hz48000).unwrap(),
            960
        );
    }

    #[test]
    fn test_sine_end_to_end() {
        let mut enc = encoder(Channels::Mono);
        enc.set_bitrate(64000).unwrap();
        let mut dec = decoder(Channels::Mono);

        let frames = 25;
        let input = sine(440.0, 960 * frames, 1);
        let mut decoded = Vec::new();

        (0..frames).for_each(|f| {
            let mut packet = [0_u8; 1500];
            let len = enc
                .encode_float(&input[f * 960..(f + 1) * 960], &mut packet)
                .unwrap();
            let mut pcm = vec![0.0_f32; 960];
            let samples = dec
                .decode_float(Some(&packet[..len]), &mut pcm, 960, false)
                .unwrap();
            assert_eq!(samples, 960);
            assert_eq!(dec.final_range(), enc.final_range());
            decoded.extend_from_slice(&pcm);
        });

        // Skip the startup transient, compensate the overlap delay.
        let delay = 120;
        let skip = 2 * 960;
        let r = correlation(
            &input[skip..input.len() - delay],
            &decoded[skip + delay..],
        );
        assert!(r > 0.99, "correlation = {}", r);
    }

    #[test]
    fn test_stereo_end_to_end() {
        let mut enc = encoder(Channels::Stereo);
        enc.set_bitrate(104_000).unwrap();
        let mut dec = decoder(Channels::Stereo);

        let frames = 12;
        let input = sine(880.0, 960 * frames, 2);
        let mut decoded = Vec::new();

        (0..frames).for_each(|f| {
            let mut packet = [0_u8; 1500];
            let len = enc
                .encode_float(&input[f * 1920..(f + 1) * 1920], &mut packet)
                .unwrap();
            let mut pcm = vec![0.0_f32; 1920];
            dec.decode_float(Some(&packet[..len]), &mut pcm, 960, false)
                .unwrap();
            decoded.extend_from_slice(&pcm);
        });

        let delay = 2 * 120;
        let skip = 2 * 1920;
        let r = correlation(
            &input[skip..input.len() - delay],
            &decoded[skip + delay..],
        );
        assert!(r > 0.98, "correlation = {}", r);
    }

    #[test]
    fn test_vbr_packets_are_smaller_for_silence() {
        let mut enc = encoder(Channels::Mono);
        enc.set_bitrate(64000).unwrap();
        enc.set_vbr(true);

        let silence = vec![0.0_f32; 960];
        let mut packet = [0_u8; 1500];
        let len = enc.encode_float(&silence, &mut packet).unwrap();
        assert!(len < 20, "silence took {} bytes", len);
    }

    #[test]
    fn test_random_audio_round_trip_rms() {
        let mut rnd = nanorand::WyRand::new_seed(22222);
        let mut enc = encoder(Channels::Mono);
        enc.set_bitrate(64000).unwrap();
        let mut dec = decoder(Channels::Mono);

        // Two sequential encode/decode round trips of a band limited
        // random signal must stay finite and bounded in level.
        (0..2).for_each(|_| {
            let mut state = 0.0_f32;
            let input: Vec<f32> = (0..960)
                .map(|_| {
                    let noise = rnd.generate_range::<u32>(0, 65536) as f32 / 65536.0 - 0.5;
                    state = 0.9 * state + 0.1 * noise;
                    state * 4.0
                })
                .collect();

            let mut packet = [0_u8; 1500];
            let len = enc.encode_float(&input, &mut packet).unwrap();
            let mut pcm = vec![0.0_f32; 960];
            dec.decode_float(Some(&packet[..len]), &mut pcm, 960, false)
                .unwrap();

            let rms: f32 = (pcm.iter().map(|v| v * v).sum::<f32>() / 960.0).sqrt();
            assert!(rms.is_finite());
            assert!(rms < 1.0);
        });
    }

    #[test]
    fn test_all_frame_sizes_and_bandwidths() {
        for &frame in [120_usize, 240, 480, 960].iter() {
            for &bandwidth in [
                Bandwidth::Narrowband,
                Bandwidth::Wideband,
                Bandwidth::Superwideband,
                Bandwidth::Fullband,
            ]
            .iter()
            {
                let mut enc = encoder(Channels::Mono);
                enc.set_bitrate(96000).unwrap();
                enc.set_bandwidth(bandwidth);
                let mut dec = decoder(Channels::Mono);

                let input = sine(330.0, frame, 1);
                let mut packet = [0_u8; 1500];
                let len = enc.encode_float(&input, &mut packet).unwrap();
                let mut pcm = vec![0.0_f32; frame];
                let samples = dec
                    .decode_float(Some(&packet[..len]), &mut pcm, frame, false)
                    .unwrap();
                assert_eq!(samples as usize, frame);
                pcm.iter().for_each(|v| assert!(v.is_finite()));
            }
        }
    }

    #[test]
    fn test_sixty_ms_frames_are_rejected() {
        let mut enc = encoder(Channels::Mono);
        let input = sine(440.0, 2880, 1);
        let mut packet = [0_u8; 1500];
        assert_eq!(
            enc.encode_float(&input, &mut packet),
            Err(EncoderError::UnsupportedMode)
        );
    }

    #[test]
    fn test_sample_conversion_entry_point() {
        let mut enc = encoder(Channels::Mono);
        enc.set_bitrate(64000).unwrap();
        let input: Vec<i16> = (0..960).map(|i| ((i * 37) % 8192) as i16).collect();
        let mut packet = [0_u8; 1500];
        let len = enc.encode(&input, &mut packet).unwrap();
        assert!(len > 1);
    }
}
