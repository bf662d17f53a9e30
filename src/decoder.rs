//! Implements the Opus decoder.

use log::{debug, trace};

use crate::celt::{CeltDecoder, BANDWIDTH_END_BANDS, SHORT_BLOCKSIZE, WINDOW};
use crate::packet::{parse_packet, Toc, MAX_FRAMES_PER_PACKET};
use crate::range_coder::{RangeDecoder, Tell};
use crate::silk::SilkDecoder;
use crate::{Bandwidth, Channels, CodecMode, DecoderError, Sample, SamplingRate};

/// The largest frame at 48 kHz.
const MAX_FRAME_SIZE_48: usize = 2880;

/// Configures the decoder on creation.
///
/// Internally Opus stores data at 48000 Hz, so that should be the default
/// value for the sampling rate. However, the decoder can efficiently decode
/// to buffers at 8, 12, 16, and 24 kHz so if for some reason the caller cannot
/// use data at the full sample rate, or knows the compressed data doesn't
/// use the full frequency range, it can request decoding at a reduced
/// rate. Likewise, the decoder is capable of filling in either mono or
/// interleaved stereo pcm buffers, at the caller's request.
#[derive(Clone, Debug)]
pub struct DecoderConfiguration {
    /// Sample rate to decode at (Hz). Default: 48000 Hz.
    pub sampling_rate: SamplingRate,
    /// Number of channels to decode. Default: Stereo.
    pub channels: Channels,
    /// Scales the decoded output by a factor specified in Q8 dB units. Default: 0.
    pub gain: i16,
}

impl Default for DecoderConfiguration {
    fn default() -> Self {
        Self {
            sampling_rate: SamplingRate::Hz48000,
            channels: Channels::Stereo,
            gain: 0,
        }
    }
}

/// Opus decoder.
///
/// Opus is a stateful codec with overlapping blocks and as a result Opus
/// packets are not coded independently of each other. Packets must be
/// passed into the decoder serially and in the correct order for a correct
/// decode. Lost packets can be replaced with loss concealment by calling
/// the decoder with `None` for the missing packet.
pub struct Decoder {
    celt_dec: CeltDecoder,
    silk_dec: SilkDecoder,
    channels: Channels,
    sampling_rate: SamplingRate,
    decode_gain: i16,

    stream_channels: Channels,
    bandwidth: Bandwidth,
    mode: Option<CodecMode>,
    prev_mode: Option<CodecMode>,
    frame_size: usize,
    prev_redundancy: bool,
    last_packet_duration: Option<u32>,

    final_range: u32,
}

impl Decoder {
    /// Creates a new `Decoder` with the given configuration.
    pub fn new(configuration: &DecoderConfiguration) -> Result<Self, DecoderError> {
        let celt_dec =
            CeltDecoder::new(configuration.sampling_rate, configuration.channels)?;
        let silk_dec =
            SilkDecoder::new(configuration.sampling_rate, configuration.channels)?;

        Ok(Self {
            celt_dec,
            silk_dec,
            sampling_rate: configuration.sampling_rate,
            channels: configuration.channels,
            decode_gain: configuration.gain,
            stream_channels: configuration.channels,
            bandwidth: Bandwidth::Auto,
            mode: None,
            prev_mode: None,
            frame_size: configuration.sampling_rate as usize / 400,
            prev_redundancy: false,
            last_packet_duration: None,
            final_range: 0,
        })
    }

    /// Resets the decoder to be equivalent to a freshly initialized decoder.
    ///
    /// This should be called when switching streams in order to prevent
    /// the back to back decoding from giving different results from
    /// one at a time decoding.
    pub fn reset(&mut self) -> Result<(), DecoderError> {
        self.silk_dec.reset();
        self.celt_dec.reset();

        self.stream_channels = self.channels;
        self.bandwidth = Bandwidth::Auto;
        self.mode = None;
        self.prev_mode = None;
        self.frame_size = self.sampling_rate as usize / 400;
        self.prev_redundancy = false;
        self.last_packet_duration = None;

        Ok(())
    }

    /// Returns the sampling rate the decoder was initialized with.
    pub fn sampling_rate(&self) -> SamplingRate {
        self.sampling_rate
    }

    /// Returns the channels the decoder was initialized with.
    pub fn channels(&self) -> Channels {
        self.channels
    }

    /// Returns the amount to scale PCM signal by in Q8 dB units.
    pub fn gain(&self) -> i16 {
        self.decode_gain
    }

    /// Returns the decoder's last bandpass.
    pub fn bandwidth(&self) -> Bandwidth {
        self.bandwidth
    }

    /// Returns the pitch of the last decoded frame, measured in samples at 48 kHz.
    pub fn pitch(&self) -> Option<u32> {
        match self.prev_mode {
            Some(CodecMode::Celt) => Some(self.celt_dec.pitch()),
            Some(CodecMode::Silk) | Some(CodecMode::Hybrid) => Some(self.silk_dec.pitch()),
            None => None,
        }
    }

    /// Returns the duration (in samples at the output rate) of the last
    /// packet successfully decoded or concealed.
    pub fn last_packet_duration(&self) -> Option<u32> {
        self.last_packet_duration
    }

    /// Returns the final state of the codec's entropy coder.
    ///
    /// This is used for testing purposes, the encoder and decoder state
    /// should be identical after coding a payload (assuming no data
    /// corruption or software bugs).
    pub fn final_range(&self) -> u32 {
        self.final_range
    }

    fn downsample(&self) -> usize {
        SamplingRate::Hz48000 as usize / self.sampling_rate as usize
    }

    /// Decode an Opus packet with a generic sample output.
    ///
    /// Returns the number of decoded samples per channel.
    ///
    /// # Arguments
    /// * `packet`     - Input payload. Use `None` to indicate packet loss.
    /// * `samples`    - Output signal encoded as PCM samples (interleaved if 2 channels).
    ///                  Length must be at least `frame_size` * `channels`.
    /// * `frame_size` - Number of samples per channel of available space in the PCM.
    ///                  In the case of PLC (packet == `None`) or FEC (`decode_fec` = `true`),
    ///                  `frame_size` needs to be exactly the duration of audio that is
    ///                  missing, otherwise the decoder will not be in the optimal state to
    ///                  decode the next incoming packet.
    /// * `decode_fec` - Request that any in-band forward error correction data be decoded.
    ///                  If no such data is available, the frame is decoded as if it were lost.
    pub fn decode<S: Sample>(
        &mut self,
        packet: Option<&[u8]>,
        samples: &mut [S],
        frame_size: usize,
        decode_fec: bool,
    ) -> Result<u32, DecoderError> {
        let channels = self.channels as usize;
        let mut pcm = vec![0.0_f32; frame_size * channels];
        let decoded = self.decode_float(packet, &mut pcm, frame_size, decode_fec)?;
        pcm.iter()
            .take(decoded as usize * channels)
            .zip(samples.iter_mut())
            .for_each(|(&value, out)| {
                *out = S::from_f32(value);
            });
        Ok(decoded)
    }

    /// Decode an Opus packet with floating point output.
    ///
    /// See [`Decoder::decode`] for the argument conventions.
    pub fn decode_float(
        &mut self,
        packet: Option<&[u8]>,
        samples: &mut [f32],
        frame_size: usize,
        decode_fec: bool,
    ) -> Result<u32, DecoderError> {
        let packet = match packet {
            Some(packet) if !packet.is_empty() => packet,
            // Packet loss: conceal with the state of the previous mode.
            _ => return self.conceal(samples, frame_size),
        };

        // FEC decoding of the previous frame is not carried by this
        // implementation's bitstreams; treat it as loss concealment.
        if decode_fec {
            return self.conceal(samples, frame_size);
        }

        let toc = Toc::parse(packet[0]);
        let mut frame_offsets = [0_usize; MAX_FRAMES_PER_PACKET];
        let mut frame_sizes = [0_usize; MAX_FRAMES_PER_PACKET];
        let count = parse_packet(
            packet,
            false,
            Some(&mut frame_offsets),
            &mut frame_sizes,
            None,
            None,
        )?;

        let samples_per_frame = toc.frame_size / self.downsample();
        if samples_per_frame * count > frame_size {
            return Err(DecoderError::BufferTooSmall);
        }

        self.stream_channels = if toc.stereo {
            Channels::Stereo
        } else {
            Channels::Mono
        };
        self.bandwidth = toc.bandwidth;
        self.mode = Some(toc.mode);
        self.frame_size = toc.frame_size;

        let channels = self.channels as usize;
        let mut written = 0;
        for i in 0..count {
            let data = &packet[frame_offsets[i]..frame_offsets[i] + frame_sizes[i]];
            let out = &mut samples[written * channels..(written + samples_per_frame) * channels];
            self.decode_frame(&toc, data, out)?;
            written += samples_per_frame;
        }

        self.apply_gain(&mut samples[..written * channels]);
        self.last_packet_duration = Some(written as u32);
        Ok(written as u32)
    }

    /// Produces one concealed frame using the previous mode's state.
    fn conceal(&mut self, samples: &mut [f32], frame_size: usize) -> Result<u32, DecoderError> {
        let channels = self.channels as usize;
        let frame_48 = usize::min(frame_size * self.downsample(), MAX_FRAME_SIZE_48);
        samples[..frame_size * channels]
            .iter_mut()
            .for_each(|s| *s = 0.0);

        let written = match self.prev_mode {
            Some(CodecMode::Celt) => {
                // Extrapolate in 20 ms chunks at most.
                let mut total = 0;
                let mut remaining = frame_48;
                while remaining > 0 {
                    let chunk = usize::min(remaining, 960);
                    let produced = self.celt_dec.decode_lost(
                        chunk,
                        &mut samples[total * channels..],
                    );
                    total += produced;
                    remaining -= chunk;
                }
                total
            }
            Some(CodecMode::Silk) | Some(CodecMode::Hybrid) => {
                let bandwidth = match self.bandwidth {
                    Bandwidth::Auto => Bandwidth::Wideband,
                    bandwidth => bandwidth,
                };
                let chunk = 20 * self.sampling_rate as usize / 1000;
                let mut silk_out = vec![0_i16; frame_size * channels];
                let mut total = 0;
                let mut dummy = RangeDecoder::new(&[]);
                while total + chunk <= frame_size {
                    let produced = self.silk_dec.decode(
                        &mut dummy,
                        true,
                        true,
                        bandwidth,
                        self.stream_channels as usize,
                        20,
                        1,
                        &mut silk_out[total * channels..],
                    )?;
                    if produced == 0 {
                        break;
                    }
                    total += produced;
                }
                samples
                    .iter_mut()
                    .take(total * channels)
                    .zip(silk_out.iter())
                    .for_each(|(out, &value)| {
                        *out = f32::from(value) / 32768.0;
                    });
                total
            }
            None => frame_size,
        };

        self.last_packet_duration = Some(written as u32);
        Ok(written as u32)
    }

    /// Decodes a single frame of a packet.
    fn decode_frame(
        &mut self,
        toc: &Toc,
        data: &[u8],
        output: &mut [f32],
    ) -> Result<(), DecoderError> {
        let mode = toc.mode;
        let audiosize = toc.frame_size;
        let channels = self.channels as usize;
        let out_samples = audiosize / self.downsample();
        let stream_channels = self.stream_channels as usize;

        trace!(
            "frame: mode {:?}, bandwidth {:?}, {} samples, {} bytes",
            mode,
            toc.bandwidth,
            audiosize,
            data.len()
        );

        // Mode transition state handling.
        if let Some(prev_mode) = self.prev_mode {
            if mode != prev_mode {
                debug!("codec mode transition {:?} -> {:?}", prev_mode, mode);
                if prev_mode == CodecMode::Celt && mode != CodecMode::Celt {
                    // Fresh LPC state when the transform codec hands over.
                    self.silk_dec.reset();
                }
                if mode == CodecMode::Celt && !self.prev_redundancy {
                    self.celt_dec.reset();
                }
                if prev_mode == CodecMode::Hybrid && mode == CodecMode::Silk {
                    // The high band stops; flush the transform overlap so a
                    // later Hybrid entry starts clean.
                    self.celt_dec.flush_overlap();
                }
            }
        }

        let mut dec = RangeDecoder::new(data);
        let mut silk_pcm = vec![0_i16; out_samples * channels];

        // SILK layer, reading from the front of the stream. Its output is
        // already laid out for the configured channel count.
        if mode != CodecMode::Celt {
            let frame_ms = match audiosize {
                480 => 10,
                _ => 20,
            };
            let silk_frames = usize::max(1, audiosize / 960);
            let bandwidth = match mode {
                // The high band belongs to CELT in Hybrid mode.
                CodecMode::Hybrid => Bandwidth::Wideband,
                _ => toc.bandwidth,
            };
            let mut total = 0;
            for frame in 0..silk_frames {
                total += self.silk_dec.decode(
                    &mut dec,
                    frame == 0,
                    false,
                    bandwidth,
                    stream_channels,
                    frame_ms,
                    silk_frames,
                    &mut silk_pcm[total * channels..],
                )?;
            }
            debug_assert_eq!(total, out_samples);
        }

        // Redundancy signaling on mode transitions.
        let mut redundancy = false;
        let mut celt_to_silk = false;
        let mut redundancy_bytes = 0_usize;
        if mode != CodecMode::Celt
            && dec.tell() + 17 + 20 * u32::from(mode == CodecMode::Hybrid)
                <= 8 * data.len() as u32
        {
            redundancy = if mode == CodecMode::Hybrid {
                dec.decode_bit_logp(12)
            } else {
                true
            };
            if redundancy {
                celt_to_silk = dec.decode_bit_logp(1);
                redundancy_bytes = if mode == CodecMode::Hybrid {
                    dec.decode_uint(256) as usize + 2
                } else {
                    data.len() - ((dec.tell() as usize + 7) >> 3)
                };
                if redundancy_bytes > data.len() {
                    redundancy = false;
                    redundancy_bytes = 0;
                } else {
                    dec.shrink_storage(redundancy_bytes);
                }
            }
        }
        let redundancy_data = &data[data.len() - redundancy_bytes..];

        let celt_end_band = bandwidth_end_band(toc.bandwidth);
        self.celt_dec.set_stream_channels(stream_channels);
        self.celt_dec.set_end_band(celt_end_band);

        let mut redundant_audio = vec![0.0_f32; SHORT_BLOCKSIZE / self.downsample() * 2 * channels];

        // A redundant frame before the main CELT frame covers a transition
        // from CELT into SILK.
        if redundancy && celt_to_silk {
            self.decode_redundant_frame(redundancy_data, &mut redundant_audio)?;
        }

        if mode != CodecMode::Silk {
            self.celt_dec.set_start_band(match mode {
                CodecMode::Hybrid => 17,
                _ => 0,
            });
            let mut celt_pcm = vec![0.0_f32; out_samples * channels];
            let celt_frame_48 = usize::min(audiosize, 960);
            self.celt_dec
                .decode(&mut dec, celt_frame_48, &mut celt_pcm)?;
            output[..out_samples * channels].copy_from_slice(&celt_pcm[..out_samples * channels]);
        } else {
            output[..out_samples * channels]
                .iter_mut()
                .for_each(|v| *v = 0.0);
        }

        // Mix in the SILK output.
        if mode != CodecMode::Celt {
            (0..out_samples * channels).for_each(|i| {
                output[i] += f32::from(silk_pcm[i]) / 32768.0;
            });
        }

        self.final_range = dec.range();

        // A redundant frame after the main data covers a transition from
        // SILK into CELT.
        if redundancy && !celt_to_silk {
            self.celt_dec.reset();
            self.decode_redundant_frame(redundancy_data, &mut redundant_audio)?;
            self.cross_fade_in(output, &redundant_audio, out_samples);
        } else if redundancy && celt_to_silk {
            self.cross_fade_out(output, &redundant_audio);
        }

        self.prev_mode = Some(mode);
        self.prev_redundancy = redundancy && !celt_to_silk;
        Ok(())
    }

    /// Decodes the 5 ms redundant CELT frame with its own entropy coder.
    fn decode_redundant_frame(
        &mut self,
        data: &[u8],
        output: &mut [f32],
    ) -> Result<(), DecoderError> {
        if data.is_empty() {
            return Ok(());
        }
        self.celt_dec.set_start_band(0);
        let mut dec = RangeDecoder::new(data);
        self.celt_dec.decode(&mut dec, 2 * SHORT_BLOCKSIZE, output)?;
        self.final_range ^= dec.range();
        Ok(())
    }

    /// Fades from the redundant audio into the main signal at the frame
    /// start.
    fn cross_fade_in(&self, output: &mut [f32], redundant: &[f32], out_samples: usize) {
        let channels = self.channels as usize;
        let fade = SHORT_BLOCKSIZE / self.downsample();
        let offset = out_samples.saturating_sub(2 * fade);
        (0..fade).for_each(|i| {
            let w = WINDOW[i * self.downsample()];
            let g = w * w;
            (0..channels).for_each(|c| {
                let idx = (offset + i) * channels + c;
                if idx < output.len() && i * channels + c < redundant.len() {
                    output[idx] = g * output[idx] + (1.0 - g) * redundant[i * channels + c];
                }
            });
        });
    }

    /// Fades the frame tail out into the redundant audio.
    fn cross_fade_out(&self, output: &mut [f32], redundant: &[f32]) {
        let channels = self.channels as usize;
        let fade = SHORT_BLOCKSIZE / self.downsample();
        let total = output.len() / channels;
        let offset = total.saturating_sub(fade);
        (0..fade).for_each(|i| {
            let w = WINDOW[i * self.downsample()];
            let g = w * w;
            (0..channels).for_each(|c| {
                let idx = (offset + i) * channels + c;
                let r_idx = (fade + i) * channels + c;
                if idx < output.len() && r_idx < redundant.len() {
                    output[idx] = (1.0 - g) * output[idx] + g * redundant[r_idx];
                }
            });
        });
    }

    fn apply_gain(&self, samples: &mut [f32]) {
        if self.decode_gain == 0 {
            return;
        }
        let gain = 10.0_f32.powf(f32::from(self.decode_gain) / (20.0 * 256.0));
        samples.iter_mut().for_each(|s| *s *= gain);
    }
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

    use super::*;
    use nanorand::RNG;

    fn decoder(rate: SamplingRate, channels: Channels) -> Decoder {
        Decoder::new(&DecoderConfiguration {
            sampling_rate: rate,
            channels,
            gain: 0,
        })
        .unwrap()
    }

    /// A packet made of random bytes must decode (or conceal) without
    /// panicking in every mode the TOC can express.
    #[test]
    fn test_random_packets_all_configs() {
        let mut rnd = nanorand::WyRand::new_seed(19);
        let mut dec = decoder(SamplingRate::Hz48000, Channels::Stereo);

        (0_u8..32).for_each(|config| {
            (0_u8..2).for_each(|stereo| {
                let toc = (config << 3) | (stereo << 2);
                let len = rnd.generate_range::<usize>(2, 200);
                let mut packet = vec![0_u8; len];
                packet[0] = toc;
                packet[1..]
                    .iter_mut()
                    .for_each(|b| *b = rnd.generate_range::<u32>(0, 256) as u8);

                let mut pcm = vec![0.0_f32; 2 * MAX_FRAME_SIZE_48];
                let result = dec.decode_float(Some(&packet), &mut pcm, MAX_FRAME_SIZE_48, false);
                if let Ok(samples) = result {
                    assert!(samples as usize <= MAX_FRAME_SIZE_48);
                    pcm.iter().for_each(|v| assert!(v.is_finite()));
                }
            });
        });
    }

    #[test]
    fn test_concealment_without_history() {
        let mut dec = decoder(SamplingRate::Hz48000, Channels::Mono);
        let mut pcm = vec![0.0_f32; 960];
        let samples = dec.decode_float(None, &mut pcm, 960, false).unwrap();
        assert_eq!(samples, 960);
        pcm.iter().for_each(|&v| assert_eq!(v, 0.0));
    }

    #[test]
    fn test_too_small_output_buffer() {
        let mut dec = decoder(SamplingRate::Hz48000, Channels::Mono);
        // Config 30 = fullband CELT 10 ms = 480 samples.
        let packet = [0xF0_u8, 0, 0, 0];
        let mut pcm = vec![0.0_f32; 120];
        assert_eq!(
            dec.decode_float(Some(&packet), &mut pcm, 120, false),
            Err(DecoderError::BufferTooSmall)
        );
    }

    #[test]
    fn test_state_ownership_two_instances_agree() {
        let mut rnd = nanorand::WyRand::new_seed(20);
        let mut a = decoder(SamplingRate::Hz48000, Channels::Mono);
        let mut b = decoder(SamplingRate::Hz48000, Channels::Mono);

        (0..8).for_each(|_| {
            let len = rnd.generate_range::<usize>(10, 100);
            let mut packet = vec![0_u8; len];
            // Fullband CELT 20 ms.
            packet[0] = 0xF8;
            packet[1..]
                .iter_mut()
                .for_each(|v| *v = rnd.generate_range::<u32>(0, 256) as u8);

            let mut pcm_a = vec![0.0_f32; 960];
            let mut pcm_b = vec![0.0_f32; 960];
            let r_a = a.decode_float(Some(&packet), &mut pcm_a, 960, false).unwrap();
            let r_b = b.decode_float(Some(&packet), &mut pcm_b, 960, false).unwrap();
            assert_eq!(r_a, r_b);
            assert_eq!(pcm_a, pcm_b);
            assert_eq!(a.final_range(), b.final_range());
        });
    }

    #[test]
    fn test_output_rates() {
        let mut rnd = nanorand::WyRand::new_seed(21);
        for &rate in [
            SamplingRate::Hz8000,
            SamplingRate::Hz12000,
            SamplingRate::Hz16000,
            SamplingRate::Hz24000,
        ]
        .iter()
        {
            let mut dec = decoder(rate, Channels::Mono);
            let mut packet = vec![0_u8; 50];
            packet[0] = 0xF8; // fullband CELT 20 ms
            packet[1..]
                .iter_mut()
                .for_each(|v| *v = rnd.generate_range::<u32>(0, 256) as u8);

            let expected = rate as usize / 50;
            let mut pcm = vec![0.0_f32; expected];
            let samples = dec.decode_float(Some(&packet), &mut pcm, expected, false).unwrap();
            assert_eq!(samples as usize, expected);
        }
    }
}
