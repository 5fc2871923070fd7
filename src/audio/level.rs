//! Signal level measurement

use crate::constants::LEVEL_FLOOR_DB;

/// Full-scale amplitude for 16-bit PCM
const FULL_SCALE: f32 = i16::MAX as f32;

/// Root-mean-square amplitude of the buffer
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Level in dBFS, clamped to `LEVEL_FLOOR_DB`
pub fn level_db(samples: &[i16]) -> f32 {
    let rms = rms(samples);
    if rms <= 0.0 {
        return LEVEL_FLOOR_DB;
    }
    (20.0 * (rms / FULL_SCALE).log10()).max(LEVEL_FLOOR_DB)
}

/// Peak amplitude that a square wave needs to reach `db` dBFS
pub fn db_to_amplitude(db: f32) -> f32 {
    FULL_SCALE * 10f32.powf(db / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_hits_floor() {
        assert_eq!(level_db(&[]), LEVEL_FLOOR_DB);
        assert_eq!(level_db(&[0; 512]), LEVEL_FLOOR_DB);
    }

    #[test]
    fn test_full_scale_is_zero_db() {
        let square: Vec<i16> = (0..512)
            .map(|i| if i % 2 == 0 { i16::MAX } else { -i16::MAX })
            .collect();
        assert!(level_db(&square).abs() < 0.01);
    }

    #[test]
    fn test_minus_twenty_db() {
        let amp = db_to_amplitude(-20.0) as i16;
        let square: Vec<i16> = (0..1024).map(|i| if i % 2 == 0 { amp } else { -amp }).collect();
        assert!((level_db(&square) + 20.0).abs() < 0.1);
    }

    #[test]
    fn test_lsb_noise_above_floor() {
        assert!(level_db(&[1, -1, 1, -1]) > LEVEL_FLOOR_DB);
    }
}
