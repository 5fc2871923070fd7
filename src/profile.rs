//! Audio profiles and latency-driven profile selection
//!
//! Four fixed profiles trade latency against robustness and bandwidth.
//! A profile is picked once at session start and never renegotiated.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{
    BYTES_PER_SAMPLE, MAX_BUFFER_FRAMES, MAX_SAMPLE_RATE, MIN_BUFFER_FRAMES, MIN_SAMPLE_RATE,
};
use crate::error::ConfigError;

/// Identifies one of the canonical profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    UltraLowLatency,
    LowLatency,
    Quality,
    BandwidthSaving,
}

impl ProfileKind {
    pub const ALL: [ProfileKind; 4] = [
        ProfileKind::UltraLowLatency,
        ProfileKind::LowLatency,
        ProfileKind::Quality,
        ProfileKind::BandwidthSaving,
    ];

    pub fn profile(self) -> &'static AudioProfile {
        match self {
            ProfileKind::UltraLowLatency => &PROFILES[0],
            ProfileKind::LowLatency => &PROFILES[1],
            ProfileKind::Quality => &PROFILES[2],
            ProfileKind::BandwidthSaving => &PROFILES[3],
        }
    }

    fn slug(self) -> &'static str {
        match self {
            ProfileKind::UltraLowLatency => "ultra_low_latency",
            ProfileKind::LowLatency => "low_latency",
            ProfileKind::Quality => "quality",
            ProfileKind::BandwidthSaving => "bandwidth_saving",
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for ProfileKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ProfileKind::ALL
            .into_iter()
            .find(|k| k.slug() == normalized)
            .ok_or_else(|| ConfigError::UnknownProfile(s.to_string()))
    }
}

/// Immutable audio parameters for one session
#[derive(Debug, Clone, PartialEq)]
pub struct AudioProfile {
    pub kind: ProfileKind,
    pub name: &'static str,
    pub description: &'static str,
    pub sample_rate: u32,
    /// Samples per capture tick, i.e. per audio frame on the wire
    pub buffer_frames: u32,
    /// Deflate level, `None` disables compression
    pub compression_level: Option<u32>,
    pub estimated_latency_ms: f32,
}

impl AudioProfile {
    /// Device period requested from the audio backend
    pub fn period_frames(&self) -> u32 {
        self.buffer_frames / 4
    }

    /// Duration of one capture tick
    pub fn buffer_duration_ms(&self) -> f32 {
        self.buffer_frames as f32 * 1000.0 / self.sample_rate as f32
    }

    /// Uncompressed mono 16-bit bandwidth in kbps
    pub fn bandwidth_kbps(&self) -> f32 {
        let bytes_per_second = self.sample_rate as usize * BYTES_PER_SAMPLE;
        (bytes_per_second * 8) as f32 / 1000.0
    }

    /// Check the rate and buffer size against what the engine accepts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(ConfigError::OutOfRange {
                field: "audio.sample_rate",
                value: self.sample_rate.to_string(),
                expected: "8000..=48000",
            });
        }
        if !(MIN_BUFFER_FRAMES..=MAX_BUFFER_FRAMES).contains(&self.buffer_frames) {
            return Err(ConfigError::OutOfRange {
                field: "audio.buffer_frames",
                value: self.buffer_frames.to_string(),
                expected: "128..=8192",
            });
        }
        Ok(())
    }
}

static PROFILES: [AudioProfile; 4] = [
    AudioProfile {
        kind: ProfileKind::UltraLowLatency,
        name: "Ultra-Low-Latency",
        description: "Ultra low latency, for fast wired LANs",
        sample_rate: 44_100,
        buffer_frames: 512,
        compression_level: None,
        estimated_latency_ms: (512 / 4) as f32 * 1000.0 / 44_100.0,
    },
    AudioProfile {
        kind: ProfileKind::LowLatency,
        name: "Low-Latency",
        description: "Low latency, balanced default",
        sample_rate: 44_100,
        buffer_frames: 1024,
        compression_level: Some(1),
        estimated_latency_ms: (1024 / 4) as f32 * 1000.0 / 44_100.0,
    },
    AudioProfile {
        kind: ProfileKind::Quality,
        name: "Quality",
        description: "Larger buffers, more stable audio",
        sample_rate: 44_100,
        buffer_frames: 2048,
        compression_level: Some(6),
        estimated_latency_ms: (2048 / 4) as f32 * 1000.0 / 44_100.0,
    },
    AudioProfile {
        kind: ProfileKind::BandwidthSaving,
        name: "Bandwidth-Saving",
        description: "Maximum compression, for slow links",
        sample_rate: 44_100,
        buffer_frames: 4096,
        compression_level: Some(9),
        estimated_latency_ms: (4096 / 4) as f32 * 1000.0 / 44_100.0,
    },
];

/// All canonical profiles, lowest latency first
pub fn profiles() -> &'static [AudioProfile] {
    &PROFILES
}

/// Pick the profile whose estimated latency is closest to the target
/// without exceeding it.
///
/// A target below every profile yields Ultra-Low-Latency; no measurement
/// yields Low-Latency.
pub fn select_profile(latency_target_ms: Option<f32>) -> &'static AudioProfile {
    let Some(target) = latency_target_ms.filter(|t| t.is_finite()) else {
        return ProfileKind::LowLatency.profile();
    };

    PROFILES
        .iter()
        .filter(|p| p.estimated_latency_ms <= target)
        .max_by(|a, b| a.estimated_latency_ms.total_cmp(&b.estimated_latency_ms))
        .unwrap_or(&PROFILES[0])
}

/// Kind of link between the peers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Lan,
    Wifi,
    Internet,
}

pub fn select_for_link(link: LinkKind) -> &'static AudioProfile {
    match link {
        LinkKind::Lan => ProfileKind::UltraLowLatency.profile(),
        LinkKind::Wifi => ProfileKind::LowLatency.profile(),
        LinkKind::Internet => ProfileKind::BandwidthSaving.profile(),
    }
}

/// How the session profile is chosen
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ProfileChoice {
    /// Select from the latency target, if any
    #[default]
    Auto,
    Fixed(ProfileKind),
}

impl ProfileChoice {
    pub fn resolve(self, latency_target_ms: Option<f32>) -> &'static AudioProfile {
        match self {
            ProfileChoice::Auto => select_profile(latency_target_ms),
            ProfileChoice::Fixed(kind) => kind.profile(),
        }
    }
}

impl FromStr for ProfileChoice {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(ProfileChoice::Auto)
        } else {
            s.parse().map(ProfileChoice::Fixed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_latencies() {
        let expected = [2.9, 5.8, 11.6, 23.2];
        for (profile, want) in profiles().iter().zip(expected) {
            assert!(
                (profile.estimated_latency_ms - want).abs() < 0.05,
                "{}: {}",
                profile.name,
                profile.estimated_latency_ms
            );
        }
        assert_eq!(ProfileKind::Quality.profile().buffer_frames, 2048);
    }

    #[test]
    fn test_fallback_without_measurement() {
        assert_eq!(select_profile(None).kind, ProfileKind::LowLatency);
        assert_eq!(select_profile(Some(f32::NAN)).kind, ProfileKind::LowLatency);
    }

    #[test]
    fn test_selection_never_exceeds_target() {
        assert_eq!(select_profile(Some(6.0)).kind, ProfileKind::LowLatency);
        assert_eq!(select_profile(Some(11.0)).kind, ProfileKind::LowLatency);
        assert_eq!(select_profile(Some(12.0)).kind, ProfileKind::Quality);
        assert_eq!(select_profile(Some(500.0)).kind, ProfileKind::BandwidthSaving);
        assert_eq!(select_profile(Some(1.0)).kind, ProfileKind::UltraLowLatency);
    }

    #[test]
    fn test_selection_is_idempotent() {
        for target in [0.5, 3.0, 7.5, 20.0, 40.0] {
            let a = select_profile(Some(target));
            let b = select_profile(Some(target));
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("low-latency".parse::<ProfileKind>().unwrap(), ProfileKind::LowLatency);
        assert_eq!("QUALITY".parse::<ProfileKind>().unwrap(), ProfileKind::Quality);
        assert_eq!("auto".parse::<ProfileChoice>().unwrap(), ProfileChoice::Auto);
        assert!("loud".parse::<ProfileKind>().is_err());
    }

    #[test]
    fn test_link_selection_and_bandwidth() {
        assert_eq!(select_for_link(LinkKind::Lan).kind, ProfileKind::UltraLowLatency);
        assert_eq!(select_for_link(LinkKind::Internet).kind, ProfileKind::BandwidthSaving);
        assert!((ProfileKind::LowLatency.profile().bandwidth_kbps() - 705.6).abs() < 0.01);
    }

    #[test]
    fn test_profile_ranges() {
        assert!(profiles().iter().all(|p| p.validate().is_ok()));

        let tiny = AudioProfile {
            buffer_frames: 64,
            ..ProfileKind::UltraLowLatency.profile().clone()
        };
        assert!(matches!(
            tiny.validate(),
            Err(ConfigError::OutOfRange { field: "audio.buffer_frames", .. })
        ));
    }
}
