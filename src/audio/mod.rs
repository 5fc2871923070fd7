//! Audio subsystem module

pub mod buffer;
pub mod level;
pub mod port;
pub mod vox;

#[cfg(feature = "device")]
pub mod capture;
#[cfg(feature = "device")]
pub mod device;
#[cfg(feature = "device")]
pub mod playback;

pub use buffer::{FrameQueue, JitterBuffer};
pub use port::{CapturePort, PlaybackPort};
pub use vox::{TransmitDecision, VoxGate, VoxSettings, VoxState};

#[cfg(feature = "device")]
pub use capture::CpalCapture;
#[cfg(feature = "device")]
pub use device::{list_devices, AudioDevice, AudioDeviceInfo};
#[cfg(feature = "device")]
pub use playback::CpalPlayback;
