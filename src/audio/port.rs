//! Seams between the engine and audio hardware
//!
//! The client drives these from its capture and playback threads. The cpal
//! implementations live behind the `device` feature; tests supply their own.

use crate::error::AudioError;

/// Source of mono 16-bit PCM at the profile's sample rate
pub trait CapturePort: Send {
    /// Wait for the next `frames` samples.
    ///
    /// Returns `Ok(None)` when nothing arrived within the port's own poll
    /// window, so the caller can check for shutdown and try again.
    fn pull_buffer(&mut self, frames: usize) -> Result<Option<Vec<i16>>, AudioError>;
}

/// Sink for mono 16-bit PCM at the profile's sample rate
pub trait PlaybackPort: Send {
    fn push_buffer(&mut self, samples: &[i16]) -> Result<(), AudioError>;
}

impl<P: CapturePort + ?Sized> CapturePort for Box<P> {
    fn pull_buffer(&mut self, frames: usize) -> Result<Option<Vec<i16>>, AudioError> {
        (**self).pull_buffer(frames)
    }
}

impl<P: PlaybackPort + ?Sized> PlaybackPort for Box<P> {
    fn push_buffer(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        (**self).push_buffer(samples)
    }
}
