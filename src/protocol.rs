//! Wire protocol types
//!
//! Every frame on the TCP stream is
//!
//! ```text
//! ┌─────────┬─────────┬──────────────────┬─────────────────────┐
//! │ type u8 │ flags u8│ length u32 (BE)  │ payload             │
//! └─────────┴─────────┴──────────────────┴─────────────────────┘
//! ```
//!
//! Audio payloads start with `[sender_id u32 BE][sample_count u32 BE]`
//! followed by little-endian i16 PCM, deflated when `FLAG_COMPRESSED` is set.
//! Control payloads are bincode-encoded `ControlMessage`s; an empty control
//! payload is a keepalive.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::constants::AUDIO_HEADER_LEN;
use crate::error::CodecError;
use crate::profile::ProfileKind;

/// Envelope header length: type + flags + length
pub const HEADER_LEN: usize = 6;

/// Flag bit 0: payload body is deflated
pub const FLAG_COMPRESSED: u8 = 0x01;

const KNOWN_FLAGS: u8 = FLAG_COMPRESSED;

/// Frame type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Audio = 0,
    Control = 1,
}

impl TryFrom<u8> for FrameType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameType::Audio),
            1 => Ok(FrameType::Control),
            other => Err(CodecError::UnknownFrameType(other)),
        }
    }
}

/// Validate a flags byte
pub fn check_flags(flags: u8) -> Result<u8, CodecError> {
    if flags & !KNOWN_FLAGS != 0 {
        Err(CodecError::UnknownFlags(flags))
    } else {
        Ok(flags)
    }
}

/// Envelope with an uninterpreted payload.
///
/// The server relays these without looking inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub frame_type: FrameType,
    pub flags: u8,
    pub payload: Bytes,
}

impl RawFrame {
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u8(self.frame_type as u8);
        buf.put_u8(self.flags);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf.freeze()
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }
}

/// One capture interval of audio from one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Originating connection, assigned by the server
    pub sender_id: u32,
    /// Samples represented, independent of payload size
    pub sample_count: u32,
    /// Payload must be inflated before playback
    pub compressed: bool,
    /// Raw LE i16 PCM or its deflated form
    pub payload: Bytes,
}

impl AudioFrame {
    /// Wrap raw PCM samples without compression
    pub fn from_pcm(sender_id: u32, samples: &[i16]) -> Self {
        Self {
            sender_id,
            sample_count: samples.len() as u32,
            compressed: false,
            payload: pcm_to_bytes(samples),
        }
    }

    pub fn duration_ms(&self, sample_rate: u32) -> f32 {
        self.sample_count as f32 * 1000.0 / sample_rate as f32
    }
}

/// Session metadata exchanged alongside audio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Server to a newly accepted peer: its identity and the server profile
    Welcome { sender_id: u32, profile: ProfileKind },
    PeerJoined { sender_id: u32 },
    PeerLeft { sender_id: u32 },
    ProfileAnnounce { sender_id: u32, profile: ProfileKind },
    /// Graceful-disconnect notice
    Goodbye { sender_id: u32 },
    /// Encoded as an empty payload
    Keepalive,
}

impl ControlMessage {
    /// Wire bytes of this message as a control frame
    pub fn to_bytes(&self) -> Result<Bytes, CodecError> {
        Ok(Frame::Control(self.clone()).into_raw()?.to_bytes())
    }
}

/// Typed frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Audio(AudioFrame),
    Control(ControlMessage),
}

impl Frame {
    pub fn into_raw(self) -> Result<RawFrame, CodecError> {
        match self {
            Frame::Audio(audio) => {
                let mut payload = BytesMut::with_capacity(AUDIO_HEADER_LEN + audio.payload.len());
                payload.put_u32(audio.sender_id);
                payload.put_u32(audio.sample_count);
                payload.put_slice(&audio.payload);
                Ok(RawFrame {
                    frame_type: FrameType::Audio,
                    flags: if audio.compressed { FLAG_COMPRESSED } else { 0 },
                    payload: payload.freeze(),
                })
            }
            Frame::Control(ControlMessage::Keepalive) => Ok(RawFrame {
                frame_type: FrameType::Control,
                flags: 0,
                payload: Bytes::new(),
            }),
            Frame::Control(message) => {
                let payload = bincode::serialize(&message)
                    .map_err(|e| CodecError::Malformed(e.to_string()))?;
                Ok(RawFrame {
                    frame_type: FrameType::Control,
                    flags: 0,
                    payload: Bytes::from(payload),
                })
            }
        }
    }

    pub fn from_raw(raw: RawFrame) -> Result<Frame, CodecError> {
        match raw.frame_type {
            FrameType::Audio => {
                let compressed = raw.is_compressed();
                let mut payload = raw.payload;
                if payload.len() < AUDIO_HEADER_LEN {
                    return Err(CodecError::Malformed(format!(
                        "audio payload of {} bytes is shorter than its header",
                        payload.len()
                    )));
                }
                let sender_id = payload.get_u32();
                let sample_count = payload.get_u32();
                Ok(Frame::Audio(AudioFrame {
                    sender_id,
                    sample_count,
                    compressed,
                    payload,
                }))
            }
            FrameType::Control => {
                if raw.is_compressed() {
                    return Err(CodecError::Malformed("compressed control frame".into()));
                }
                if raw.payload.is_empty() {
                    return Ok(Frame::Control(ControlMessage::Keepalive));
                }
                bincode::deserialize(&raw.payload)
                    .map(Frame::Control)
                    .map_err(|e| CodecError::Malformed(e.to_string()))
            }
        }
    }
}

/// Little-endian byte image of PCM samples
pub fn pcm_to_bytes(samples: &[i16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for sample in samples {
        buf.put_i16_le(*sample);
    }
    buf.freeze()
}

/// Inverse of [`pcm_to_bytes`]
pub fn bytes_to_pcm(bytes: &[u8]) -> Result<Vec<i16>, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::Malformed(format!("odd PCM length {}", bytes.len())));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_layout() {
        let raw = Frame::Audio(AudioFrame::from_pcm(7, &[1, -1])).into_raw().unwrap();
        let bytes = raw.to_bytes();

        assert_eq!(bytes[0], 0); // audio
        assert_eq!(bytes[1], 0); // uncompressed
        assert_eq!(&bytes[2..6], &12u32.to_be_bytes());
        assert_eq!(&bytes[6..10], &7u32.to_be_bytes());
        assert_eq!(&bytes[10..14], &2u32.to_be_bytes());
        assert_eq!(&bytes[14..], &[0x01, 0x00, 0xff, 0xff]);
    }

    #[test]
    fn test_keepalive_is_empty() {
        let raw = Frame::Control(ControlMessage::Keepalive).into_raw().unwrap();
        assert!(raw.payload.is_empty());
        assert_eq!(raw.to_bytes().as_ref(), &[1, 0, 0, 0, 0, 0]);
        assert_eq!(Frame::from_raw(raw).unwrap(), Frame::Control(ControlMessage::Keepalive));
    }

    #[test]
    fn test_control_roundtrip() {
        let message = ControlMessage::Welcome {
            sender_id: 3,
            profile: ProfileKind::Quality,
        };
        let raw = Frame::Control(message.clone()).into_raw().unwrap();
        assert_eq!(Frame::from_raw(raw).unwrap(), Frame::Control(message));
    }

    #[test]
    fn test_short_audio_payload_rejected() {
        let raw = RawFrame {
            frame_type: FrameType::Audio,
            flags: 0,
            payload: Bytes::from_static(&[0, 0, 0]),
        };
        assert!(matches!(Frame::from_raw(raw), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_unknown_tags() {
        assert!(matches!(FrameType::try_from(9), Err(CodecError::UnknownFrameType(9))));
        assert!(check_flags(0x01).is_ok());
        assert!(matches!(check_flags(0x80), Err(CodecError::UnknownFlags(0x80))));
    }

    #[test]
    fn test_pcm_bytes() {
        let samples = [i16::MIN, -1, 0, 1, i16::MAX];
        let bytes = pcm_to_bytes(&samples);
        assert_eq!(bytes_to_pcm(&bytes).unwrap(), samples);
        assert!(bytes_to_pcm(&[1, 2, 3]).is_err());
    }
}
