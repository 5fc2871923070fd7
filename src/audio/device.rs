//! Audio device enumeration and stream configuration

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::AudioError;
use crate::profile::AudioProfile;

/// Rates worth reporting for voice use
const VOICE_SAMPLE_RATES: [u32; 5] = [8000, 16_000, 22_050, 44_100, 48_000];

/// Device summary for `--list-devices`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Wrapper around a cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
}

impl AudioDevice {
    fn from_cpal(device: cpal::Device) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self { inner: device, name }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    /// Input stream config for `profile`, preferring mono at the profile rate
    pub fn input_config(&self, profile: &AudioProfile) -> Result<cpal::StreamConfig, AudioError> {
        let ranges: Vec<_> = self
            .inner
            .supported_input_configs()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
            .collect();
        stream_config(&ranges, profile)
    }

    /// Output stream config for `profile`, preferring mono at the profile rate
    pub fn output_config(&self, profile: &AudioProfile) -> Result<cpal::StreamConfig, AudioError> {
        let ranges: Vec<_> = self
            .inner
            .supported_output_configs()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
            .collect();
        stream_config(&ranges, profile)
    }
}

fn stream_config(
    ranges: &[cpal::SupportedStreamConfigRange],
    profile: &AudioProfile,
) -> Result<cpal::StreamConfig, AudioError> {
    let rate = cpal::SampleRate(profile.sample_rate);
    let channels = ranges
        .iter()
        .filter(|range| range.min_sample_rate() <= rate && rate <= range.max_sample_rate())
        .map(|range| range.channels())
        .min()
        .ok_or_else(|| {
            AudioError::UnsupportedFormat(format!(
                "{} Hz is not supported by the device",
                profile.sample_rate
            ))
        })?;

    Ok(cpal::StreamConfig {
        channels,
        sample_rate: rate,
        buffer_size: cpal::BufferSize::Fixed(profile.period_frames()),
    })
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            let Ok(name) = device.name() else { continue };
            let (sample_rates, channels) = match device.supported_input_configs() {
                Ok(configs) => capabilities(configs),
                Err(_) => (Vec::new(), Vec::new()),
            };
            devices.push(AudioDeviceInfo {
                is_default: default_input_name.as_ref() == Some(&name),
                name,
                is_input: true,
                is_output: false,
                sample_rates,
                channels,
            });
        }
    }

    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            let Ok(name) = device.name() else { continue };
            let is_default = default_output_name.as_ref() == Some(&name);

            // Duplex devices show up once
            if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                existing.is_output = true;
                existing.is_default |= is_default;
                continue;
            }

            let (sample_rates, channels) = match device.supported_output_configs() {
                Ok(configs) => capabilities(configs),
                Err(_) => (Vec::new(), Vec::new()),
            };
            devices.push(AudioDeviceInfo {
                name,
                is_input: false,
                is_output: true,
                is_default,
                sample_rates,
                channels,
            });
        }
    }

    devices
}

fn capabilities(
    configs: impl Iterator<Item = cpal::SupportedStreamConfigRange>,
) -> (Vec<u32>, Vec<u16>) {
    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    for config in configs {
        for rate in VOICE_SAMPLE_RATES {
            let sample_rate = cpal::SampleRate(rate);
            if config.min_sample_rate() <= sample_rate
                && sample_rate <= config.max_sample_rate()
                && !sample_rates.contains(&rate)
            {
                sample_rates.push(rate);
            }
        }
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();
    (sample_rates, channels)
}

/// Input device by name, or the default input
pub fn find_input(name: Option<&str>) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .map(AudioDevice::from_cpal)
            .ok_or_else(|| AudioError::DeviceNotFound("no default input device".to_string())),
        Some(name) => host
            .input_devices()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .map(AudioDevice::from_cpal)
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string())),
    }
}

/// Output device by name, or the default output
pub fn find_output(name: Option<&str>) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .map(AudioDevice::from_cpal)
            .ok_or_else(|| AudioError::DeviceNotFound("no default output device".to_string())),
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .map(AudioDevice::from_cpal)
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string())),
    }
}
