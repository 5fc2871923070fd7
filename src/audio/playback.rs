//! Audio playback to an output device
//!
//! Mirrors capture: the cpal stream runs on its own thread and pulls mono
//! samples from a shared queue, writing each one to every output channel.
//! Gaps are filled with silence.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::bounded;
use parking_lot::Mutex;

use crate::audio::device::find_output;
use crate::audio::port::PlaybackPort;
use crate::constants::JITTER_CAPACITY;
use crate::error::AudioError;
use crate::profile::AudioProfile;

/// Speaker playback port backed by cpal
pub struct CpalPlayback {
    queue: Arc<Mutex<VecDeque<i16>>>,
    max_queued: usize,
    running: Arc<AtomicBool>,
    stream_failed: Arc<AtomicBool>,
    underruns: Arc<AtomicU64>,
    trimmed: u64,
    thread_handle: Option<JoinHandle<()>>,
    device_name: String,
}

impl CpalPlayback {
    /// Open `device_name` (or the default output) for `profile` and start it
    pub fn open(device_name: Option<&str>, profile: &AudioProfile) -> Result<Self, AudioError> {
        let device = find_output(device_name)?;
        let config = device.output_config(profile)?;
        let name = device.name.clone();

        let max_queued = profile.buffer_frames as usize * JITTER_CAPACITY;
        let queue = Arc::new(Mutex::new(VecDeque::with_capacity(max_queued)));
        let running = Arc::new(AtomicBool::new(true));
        let stream_failed = Arc::new(AtomicBool::new(false));
        let underruns = Arc::new(AtomicU64::new(0));
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let handle = {
            let queue = queue.clone();
            let running = running.clone();
            let stream_failed = stream_failed.clone();
            let underruns = underruns.clone();
            let channels = config.channels as usize;

            thread::Builder::new()
                .name("audio-playback".into())
                .spawn(move || {
                    let stream = device.inner().build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            let mut queue = queue.lock();
                            let mut starved = false;
                            for frame in data.chunks_mut(channels.max(1)) {
                                let sample = match queue.pop_front() {
                                    Some(s) => s as f32 / i16::MAX as f32,
                                    None => {
                                        starved = true;
                                        0.0
                                    }
                                };
                                frame.fill(sample);
                            }
                            if starved {
                                underruns.fetch_add(1, Ordering::Relaxed);
                            }
                        },
                        move |err| {
                            tracing::error!("playback stream error: {}", err);
                            stream_failed.store(true, Ordering::Relaxed);
                        },
                        None,
                    );

                    let stream = match stream {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
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
                return Err(AudioError::StreamError("playback thread exited during startup".into()));
            }
        }

        tracing::info!(device = %name, rate = profile.sample_rate, "playback started");
        Ok(Self {
            queue,
            max_queued,
            running,
            stream_failed,
            underruns,
            trimmed: 0,
            thread_handle: Some(handle),
            device_name: name,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Device callbacks that ran out of samples
    pub fn underrun_count(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Samples discarded because the device fell behind
    pub fn trimmed_count(&self) -> u64 {
        self.trimmed
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl PlaybackPort for CpalPlayback {
    fn push_buffer(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        if self.stream_failed.load(Ordering::Relaxed) {
            return Err(AudioError::StreamError("output stream failed".into()));
        }
        if self.thread_handle.is_none() {
            return Err(AudioError::PortClosed);
        }

        let mut queue = self.queue.lock();
        queue.extend(samples.iter().copied());
        let excess = queue.len().saturating_sub(self.max_queued);
        if excess > 0 {
            queue.drain(..excess);
            self.trimmed += excess as u64;
        }
        Ok(())
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}
