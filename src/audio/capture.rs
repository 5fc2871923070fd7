//! Audio capture from an input device
//!
//! The cpal stream lives on its own thread (streams are not `Send`). The
//! callback downmixes to mono, converts to i16 and hands chunks over a
//! bounded channel; `pull_buffer` reassembles them into capture buffers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};

use crate::audio::device::find_input;
use crate::audio::port::CapturePort;
use crate::constants::READ_POLL_INTERVAL;
use crate::error::AudioError;
use crate::profile::AudioProfile;

/// Callback chunks in flight before the oldest audio is discarded
const CHUNK_QUEUE_DEPTH: usize = 64;

/// Microphone capture port backed by cpal
pub struct CpalCapture {
    chunks: Receiver<Vec<i16>>,
    errors: Receiver<AudioError>,
    pending: Vec<i16>,
    running: Arc<AtomicBool>,
    overflows: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
    device_name: String,
}

impl CpalCapture {
    /// Open `device_name` (or the default input) for `profile` and start it
    pub fn open(device_name: Option<&str>, profile: &AudioProfile) -> Result<Self, AudioError> {
        let device = find_input(device_name)?;
        let config = device.input_config(profile)?;
        let name = device.name.clone();

        let (chunk_tx, chunk_rx) = bounded::<Vec<i16>>(CHUNK_QUEUE_DEPTH);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running = Arc::new(AtomicBool::new(true));
        let overflows = Arc::new(AtomicU64::new(0));

        let handle = {
            let running = running.clone();
            let overflows = overflows.clone();
            let channels = config.channels as usize;

            thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || {
                    let callback_running = running.clone();
                    let stream = device.inner().build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            if !callback_running.load(Ordering::Relaxed) {
                                return;
                            }
                            let mono = downmix_to_i16(data, channels);
                            if chunk_tx.try_send(mono).is_err() {
                                overflows.fetch_add(1, Ordering::Relaxed);
                            }
                        },
                        move |err| {
                            let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                        },
                        None,
                    );

                    let stream = match stream.map_err(|e| AudioError::StreamError(e.to_string())) {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                    let _ = ready_tx.send(Ok(()));

                    while running.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(10));
                    }
                    // Stream is dropped here, stopping capture
                })
                .map_err(|e| AudioError::StreamError(e.to_string()))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(AudioError::StreamError("capture thread exited during startup".into()));
            }
        }

        tracing::info!(device = %name, rate = profile.sample_rate, "capture started");
        Ok(Self {
            chunks: chunk_rx,
            errors: error_rx,
            pending: Vec::new(),
            running,
            overflows,
            thread_handle: Some(handle),
            device_name: name,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Callback chunks discarded because the consumer fell behind
    pub fn overflow_count(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl CapturePort for CpalCapture {
    fn pull_buffer(&mut self, frames: usize) -> Result<Option<Vec<i16>>, AudioError> {
        if let Ok(err) = self.errors.try_recv() {
            return Err(err);
        }

        while self.pending.len() < frames {
            match self.chunks.recv_timeout(READ_POLL_INTERVAL) {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(AudioError::PortClosed),
            }
        }

        let rest = self.pending.split_off(frames);
        Ok(Some(std::mem::replace(&mut self.pending, rest)))
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Average interleaved f32 channels into mono i16
fn downmix_to_i16(data: &[f32], channels: usize) -> Vec<i16> {
    let channels = channels.max(1);
    data.chunks(channels)
        .map(|frame| {
            let mean = frame.iter().sum::<f32>() / frame.len() as f32;
            (mean.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
        })
        .collect()
}
