//! Frame decoder
//!
//! Accumulates bytes from a blocking stream and yields complete frames.
//! Partial input survives read timeouts, so callers can poll a shutdown flag
//! between reads without desynchronizing the stream.

use std::io::{self, Read};

use bytes::{Buf, BytesMut};

use crate::codec::compress::inflate;
use crate::constants::{BYTES_PER_SAMPLE, MAX_BUFFER_FRAMES, MAX_PAYLOAD_LEN};
use crate::error::CodecError;
use crate::protocol::{bytes_to_pcm, check_flags, AudioFrame, FrameType, RawFrame, HEADER_LEN};

const READ_CHUNK: usize = 8 * 1024;

/// Result of one read attempt
#[derive(Debug)]
pub enum ReadOutcome {
    Frame(RawFrame),
    /// Read timed out before a frame completed
    Idle,
    /// Peer closed the stream on a frame boundary
    Closed,
}

/// Stream frame decoder
pub struct FrameDecoder {
    buf: BytesMut,
    max_payload: usize,
    frames_decoded: u64,
    bytes_consumed: u64,
    frames_inflated: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_LEN)
    }
}

impl FrameDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_CHUNK),
            max_payload,
            frames_decoded: 0,
            bytes_consumed: 0,
            frames_inflated: 0,
        }
    }

    /// Bytes held that do not yet form a frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop one complete frame from the internal buffer.
    ///
    /// The header is validated as soon as it is available, so an oversized
    /// length is rejected before any payload is buffered.
    pub fn decode_buffered(&mut self) -> Result<Option<RawFrame>, CodecError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let frame_type = FrameType::try_from(self.buf[0])?;
        let flags = check_flags(self.buf[1])?;
        let declared =
            u32::from_be_bytes([self.buf[2], self.buf[3], self.buf[4], self.buf[5]]) as usize;
        if declared > self.max_payload {
            return Err(CodecError::FrameTooLarge {
                declared,
                limit: self.max_payload,
            });
        }

        if self.buf.len() < HEADER_LEN + declared {
            self.buf.reserve(HEADER_LEN + declared - self.buf.len());
            return Ok(None);
        }

        self.buf.advance(HEADER_LEN);
        let payload = self.buf.split_to(declared).freeze();
        self.frames_decoded += 1;
        self.bytes_consumed += (HEADER_LEN + declared) as u64;

        Ok(Some(RawFrame {
            frame_type,
            flags,
            payload,
        }))
    }

    /// Read from `reader` until a frame completes, the read times out or
    /// the stream ends.
    pub fn read_frame<R: Read>(&mut self, reader: &mut R) -> Result<ReadOutcome, CodecError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.decode_buffered()? {
                return Ok(ReadOutcome::Frame(frame));
            }

            match reader.read(&mut chunk) {
                Ok(0) if self.buf.is_empty() => return Ok(ReadOutcome::Closed),
                Ok(0) => return Err(CodecError::TruncatedFrame),
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    return Ok(ReadOutcome::Idle);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CodecError::Io(e)),
            }
        }
    }

    /// Recover PCM samples from an audio frame, inflating if needed
    pub fn decode_audio(&mut self, frame: &AudioFrame) -> Result<Vec<i16>, CodecError> {
        if frame.sample_count > MAX_BUFFER_FRAMES {
            return Err(CodecError::Malformed(format!(
                "sample count {} exceeds {}",
                frame.sample_count, MAX_BUFFER_FRAMES
            )));
        }
        let expected = frame.sample_count as usize * BYTES_PER_SAMPLE;

        let samples = if frame.compressed {
            self.frames_inflated += 1;
            bytes_to_pcm(&inflate(&frame.payload, expected)?)?
        } else {
            bytes_to_pcm(&frame.payload)?
        };

        if samples.len() != frame.sample_count as usize {
            return Err(CodecError::Malformed(format!(
                "frame declares {} samples but carries {}",
                frame.sample_count,
                samples.len()
            )));
        }
        Ok(samples)
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            bytes_consumed: self.bytes_consumed,
            frames_inflated: self.frames_inflated,
        }
    }

    pub fn reset_stats(&mut self) {
        self.frames_decoded = 0;
        self.bytes_consumed = 0;
        self.frames_inflated = 0;
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub bytes_consumed: u64,
    pub frames_inflated: u64,
}
