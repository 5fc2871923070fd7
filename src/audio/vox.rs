//! Voice-activated transmission gate
//!
//! The gate opens once the input level has stayed at or above the threshold
//! for the attack time, and closes once it has stayed below the threshold for
//! the hold time.
//!
//! ```text
//!            level >= thr             held >= attack
//!  Silent ─────────────────▶ Triggered ───────────────▶ Active
//!    ▲   ◀───────────────────    │                       │  ▲
//!    │       level < thr                      level < thr │  │ level >= thr
//!    │                                                   ▼  │
//!    └─────────────────────────────────────────────── Releasing
//!                    below >= hold
//! ```

use std::time::{Duration, Instant};

use crate::audio::level::level_db;
use crate::constants::{LEVEL_FLOOR_DB, MAX_VOX_THRESHOLD_DB, MIN_VOX_THRESHOLD_DB};
use crate::error::ConfigError;

/// Gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoxState {
    Silent,
    Triggered,
    Active,
    Releasing,
}

impl VoxState {
    pub fn is_transmitting(self) -> bool {
        matches!(self, VoxState::Active | VoxState::Releasing)
    }
}

/// Per-buffer gate output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitDecision {
    Transmit,
    Mute,
}

/// Gate parameters
#[derive(Debug, Clone, PartialEq)]
pub struct VoxSettings {
    /// When false every buffer is transmitted
    pub enabled: bool,
    /// dBFS, -60..=0
    pub threshold_db: f32,
    pub attack: Duration,
    pub hold: Duration,
}

impl Default for VoxSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_db: -30.0,
            attack: Duration::from_millis(100),
            hold: Duration::from_millis(1000),
        }
    }
}

impl VoxSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_threshold(self.threshold_db)
    }
}

fn check_threshold(threshold_db: f32) -> Result<(), ConfigError> {
    if (MIN_VOX_THRESHOLD_DB..=MAX_VOX_THRESHOLD_DB).contains(&threshold_db) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field: "vox.threshold_db",
            value: threshold_db.to_string(),
            expected: "-60..=0",
        })
    }
}

/// Attack/hold state machine driven by per-buffer levels
#[derive(Debug)]
pub struct VoxGate {
    settings: VoxSettings,
    state: VoxState,
    triggered_at: Option<Instant>,
    released_at: Option<Instant>,
    last_level_db: f32,
}

impl VoxGate {
    pub fn new(settings: VoxSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            settings,
            state: VoxState::Silent,
            triggered_at: None,
            released_at: None,
            last_level_db: LEVEL_FLOOR_DB,
        })
    }

    pub fn settings(&self) -> &VoxSettings {
        &self.settings
    }

    pub fn state(&self) -> VoxState {
        self.state
    }

    /// Level of the most recently evaluated buffer
    pub fn last_level_db(&self) -> f32 {
        self.last_level_db
    }

    /// Change the threshold. The current state is kept; the next buffer is
    /// compared against the new value.
    pub fn set_threshold_db(&mut self, threshold_db: f32) -> Result<(), ConfigError> {
        check_threshold(threshold_db)?;
        self.settings.threshold_db = threshold_db;
        Ok(())
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled != self.settings.enabled {
            self.settings.enabled = enabled;
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.state = VoxState::Silent;
        self.triggered_at = None;
        self.released_at = None;
    }

    /// Measure `samples` and advance the gate
    pub fn evaluate(&mut self, samples: &[i16], now: Instant) -> TransmitDecision {
        self.evaluate_level(level_db(samples), now)
    }

    /// Advance the gate with an already measured level
    pub fn evaluate_level(&mut self, level_db: f32, now: Instant) -> TransmitDecision {
        self.last_level_db = level_db;
        if !self.settings.enabled {
            return TransmitDecision::Transmit;
        }

        let above = level_db >= self.settings.threshold_db;
        let elapsed = |since: Option<Instant>| {
            since.map_or(Duration::ZERO, |t| now.saturating_duration_since(t))
        };

        self.state = match self.state {
            VoxState::Silent if above => {
                self.triggered_at = Some(now);
                if self.settings.attack.is_zero() {
                    VoxState::Active
                } else {
                    VoxState::Triggered
                }
            }
            VoxState::Silent => VoxState::Silent,
            VoxState::Triggered if !above => VoxState::Silent,
            VoxState::Triggered => {
                if elapsed(self.triggered_at) >= self.settings.attack {
                    VoxState::Active
                } else {
                    VoxState::Triggered
                }
            }
            VoxState::Active if above => VoxState::Active,
            VoxState::Active => {
                self.released_at = Some(now);
                if self.settings.hold.is_zero() {
                    VoxState::Silent
                } else {
                    VoxState::Releasing
                }
            }
            VoxState::Releasing if above => VoxState::Active,
            VoxState::Releasing => {
                if elapsed(self.released_at) >= self.settings.hold {
                    VoxState::Silent
                } else {
                    VoxState::Releasing
                }
            }
        };

        if self.state.is_transmitting() {
            TransmitDecision::Transmit
        } else {
            TransmitDecision::Mute
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::level::db_to_amplitude;

    const TICK: Duration = Duration::from_millis(10);

    fn square(db: f32, len: usize) -> Vec<i16> {
        let amp = db_to_amplitude(db) as i16;
        (0..len).map(|i| if i % 2 == 0 { amp } else { -amp }).collect()
    }

    fn enabled(threshold_db: f32, attack_ms: u64, hold_ms: u64) -> VoxSettings {
        VoxSettings {
            enabled: true,
            threshold_db,
            attack: Duration::from_millis(attack_ms),
            hold: Duration::from_millis(hold_ms),
        }
    }

    #[test]
    fn test_attack_and_hold_window() {
        let mut gate = VoxGate::new(enabled(-30.0, 100, 500)).unwrap();
        let loud = square(-20.0, 441);
        let quiet = square(-80.0, 441);
        let start = Instant::now();

        let mut transmitted = Vec::new();
        for tick in 0..100u32 {
            let t = tick * 10;
            let samples = if t < 200 { &loud } else { &quiet };
            if gate.evaluate(samples, start + TICK * tick) == TransmitDecision::Transmit {
                transmitted.push(t);
            }
        }

        assert_eq!(transmitted.first(), Some(&100));
        assert_eq!(transmitted.last(), Some(&690));
        assert_eq!(transmitted.len(), (100..=690).step_by(10).count());
        assert_eq!(gate.state(), VoxState::Silent);
    }

    #[test]
    fn test_below_threshold_never_transmits() {
        let mut gate = VoxGate::new(enabled(-30.0, 0, 0)).unwrap();
        let start = Instant::now();
        for tick in 0..200u32 {
            let level = -31.0 - (tick % 30) as f32;
            assert_eq!(gate.evaluate_level(level, start + TICK * tick), TransmitDecision::Mute);
        }
    }

    #[test]
    fn test_short_burst_does_not_open() {
        let mut gate = VoxGate::new(enabled(-30.0, 100, 500)).unwrap();
        let start = Instant::now();
        for tick in 0..5u32 {
            gate.evaluate_level(-10.0, start + TICK * tick);
        }
        assert_eq!(gate.evaluate_level(-50.0, start + TICK * 5), TransmitDecision::Mute);
        assert_eq!(gate.state(), VoxState::Silent);
    }

    #[test]
    fn test_speech_during_release_reopens() {
        let mut gate = VoxGate::new(enabled(-30.0, 0, 300)).unwrap();
        let start = Instant::now();
        assert_eq!(gate.evaluate_level(-10.0, start), TransmitDecision::Transmit);
        assert_eq!(gate.evaluate_level(-50.0, start + TICK), TransmitDecision::Transmit);
        assert_eq!(gate.state(), VoxState::Releasing);
        assert_eq!(gate.evaluate_level(-10.0, start + TICK * 20), TransmitDecision::Transmit);
        assert_eq!(gate.state(), VoxState::Active);
    }

    #[test]
    fn test_disabled_always_transmits() {
        let mut gate = VoxGate::new(VoxSettings::default()).unwrap();
        let now = Instant::now();
        assert_eq!(gate.evaluate(&[0; 64], now), TransmitDecision::Transmit);
        assert_eq!(gate.last_level_db(), LEVEL_FLOOR_DB);
    }

    #[test]
    fn test_threshold_range() {
        assert!(VoxGate::new(enabled(-61.0, 0, 0)).is_err());
        let mut gate = VoxGate::new(enabled(-60.0, 0, 0)).unwrap();
        assert!(gate.set_threshold_db(0.0).is_ok());
        assert!(matches!(
            gate.set_threshold_db(0.5),
            Err(ConfigError::OutOfRange { field: "vox.threshold_db", .. })
        ));
        assert_eq!(gate.settings().threshold_db, 0.0);
    }
}
