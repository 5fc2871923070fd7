//! Frame encoder
//!
//! Turns captured PCM into audio frames (compressing when it pays off) and
//! frames into wire bytes.

use bytes::Bytes;

use crate::codec::compress::deflate_if_smaller;
use crate::constants::{MAX_BUFFER_FRAMES, MAX_PAYLOAD_LEN};
use crate::error::CodecError;
use crate::protocol::{pcm_to_bytes, AudioFrame, Frame};

/// Frame encoder with optional deflate stage
pub struct FrameEncoder {
    /// Deflate level, `None` sends raw PCM
    compression_level: Option<u32>,
    frames_encoded: u64,
    bytes_produced: u64,
    raw_audio_bytes: u64,
    compressed_frames: u64,
    compression_skipped: u64,
}

impl FrameEncoder {
    pub fn new(compression_level: Option<u32>) -> Self {
        Self {
            compression_level: compression_level.map(|level| level.clamp(1, 9)),
            frames_encoded: 0,
            bytes_produced: 0,
            raw_audio_bytes: 0,
            compressed_frames: 0,
            compression_skipped: 0,
        }
    }

    pub fn compression_level(&self) -> Option<u32> {
        self.compression_level
    }

    /// Wrap one capture buffer as an audio frame
    pub fn encode_audio(
        &mut self,
        sender_id: u32,
        samples: &[i16],
    ) -> Result<AudioFrame, CodecError> {
        if samples.len() > MAX_BUFFER_FRAMES as usize {
            return Err(CodecError::Malformed(format!(
                "{} samples exceeds the {} frame buffer limit",
                samples.len(),
                MAX_BUFFER_FRAMES
            )));
        }

        let raw = pcm_to_bytes(samples);
        self.raw_audio_bytes += raw.len() as u64;

        let Some(level) = self.compression_level else {
            return Ok(AudioFrame::from_pcm(sender_id, samples));
        };

        match deflate_if_smaller(&raw, level)? {
            Some(compressed) => {
                self.compressed_frames += 1;
                Ok(AudioFrame {
                    sender_id,
                    sample_count: samples.len() as u32,
                    compressed: true,
                    payload: Bytes::from(compressed),
                })
            }
            None => {
                self.compression_skipped += 1;
                Ok(AudioFrame {
                    sender_id,
                    sample_count: samples.len() as u32,
                    compressed: false,
                    payload: raw,
                })
            }
        }
    }

    /// Serialize a frame into its wire form
    pub fn encode(&mut self, frame: Frame) -> Result<Bytes, CodecError> {
        let raw = frame.into_raw()?;
        if raw.payload.len() > MAX_PAYLOAD_LEN {
            return Err(CodecError::FrameTooLarge {
                declared: raw.payload.len(),
                limit: MAX_PAYLOAD_LEN,
            });
        }

        let bytes = raw.to_bytes();
        self.frames_encoded += 1;
        self.bytes_produced += bytes.len() as u64;
        Ok(bytes)
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            compressed_frames: self.compressed_frames,
            compression_skipped: self.compression_skipped,
            compression_ratio: if self.raw_audio_bytes > 0 {
                self.bytes_produced as f32 / self.raw_audio_bytes as f32
            } else {
                1.0
            },
        }
    }

    pub fn reset_stats(&mut self) {
        self.frames_encoded = 0;
        self.bytes_produced = 0;
        self.raw_audio_bytes = 0;
        self.compressed_frames = 0;
        self.compression_skipped = 0;
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub compressed_frames: u64,
    pub compression_skipped: u64,
    /// Wire bytes over raw PCM bytes
    pub compression_ratio: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize, amplitude: f32) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let t = i as f32 / 44_100.0;
                let phase = t * 440.0 * 2.0 * std::f32::consts::PI;
                (phase.sin() * amplitude * i16::MAX as f32) as i16
            })
            .collect()
    }

    #[test]
    fn test_uncompressed_frame() {
        let mut encoder = FrameEncoder::new(None);
        let frame = encoder.encode_audio(4, &sine(1024, 0.5)).unwrap();
        assert!(!frame.compressed);
        assert_eq!(frame.sample_count, 1024);
        assert_eq!(frame.payload.len(), 2048);
    }

    #[test]
    fn test_silence_compresses() {
        let mut encoder = FrameEncoder::new(Some(1));
        let frame = encoder.encode_audio(4, &[0; 1024]).unwrap();
        assert!(frame.compressed);
        assert!(frame.payload.len() < 2048);
        assert_eq!(encoder.stats().compressed_frames, 1);
    }

    #[test]
    fn test_empty_buffer_not_compressed() {
        let mut encoder = FrameEncoder::new(Some(9));
        let frame = encoder.encode_audio(1, &[]).unwrap();
        assert!(!frame.compressed);
        assert_eq!(encoder.stats().compression_skipped, 1);
    }

    #[test]
    fn test_oversized_buffer_rejected() {
        let mut encoder = FrameEncoder::new(None);
        let samples = vec![0i16; MAX_BUFFER_FRAMES as usize + 1];
        assert!(encoder.encode_audio(1, &samples).is_err());
    }

    #[test]
    fn test_stats_count_wire_bytes() {
        let mut encoder = FrameEncoder::new(None);
        let frame = encoder.encode_audio(1, &sine(256, 0.3)).unwrap();
        let bytes = encoder.encode(Frame::Audio(frame)).unwrap();
        let stats = encoder.stats();
        assert_eq!(stats.frames_encoded, 1);
        assert_eq!(stats.bytes_produced, bytes.len() as u64);
        assert_eq!(bytes.len(), 6 + 8 + 512);
    }
}
