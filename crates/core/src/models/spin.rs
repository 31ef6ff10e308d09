//! Spin intensity and the broadcast spin message

use std::f64::consts::TAU;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::wheel::ease_out_cubic;

/// Spin intensity chosen on the slider (1 = quick, 10 = epic)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Intensity(u8);

impl Intensity {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    pub fn new(level: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&level) {
            Ok(Self(level))
        } else {
            Err(Error::InvalidIntensity(level))
        }
    }

    pub fn level(self) -> u8 {
        self.0
    }
}

impl Default for Intensity {
    fn default() -> Self {
        Self(5)
    }
}

impl TryFrom<u8> for Intensity {
    type Error = Error;

    fn try_from(level: u8) -> Result<Self> {
        Self::new(level)
    }
}

impl From<Intensity> for u8 {
    fn from(intensity: Intensity) -> Self {
        intensity.0
    }
}

impl std::fmt::Display for Intensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Everything a viewer needs to replay a spin exactly as the host runs it.
///
/// All randomness is drawn once on the host; viewers never re-roll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpinMessage {
    pub intensity: u8,
    /// Milliseconds
    pub duration: f64,
    /// Full rotations
    pub spins: f64,
    pub random_angle: f64,
    pub start_rotation: f64,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl SpinMessage {
    /// Draw fresh spin parameters for the given intensity
    pub fn generate<R: Rng + ?Sized>(
        intensity: Intensity,
        start_rotation: f64,
        timestamp: i64,
        rng: &mut R,
    ) -> Self {
        let step = f64::from(intensity.level() - 1);

        let min_duration = 1000.0 + step * 700.0;
        let max_duration = 2000.0 + step * 1000.0;
        let duration = min_duration + rng.gen::<f64>() * (max_duration - min_duration);

        let min_rotations = 2.0 + step * 0.6;
        let max_rotations = 4.0 + step * 1.1;
        let spins = min_rotations + rng.gen::<f64>() * (max_rotations - min_rotations);

        let random_angle = rng.gen::<f64>() * TAU;

        Self {
            intensity: intensity.level(),
            duration,
            spins,
            random_angle,
            start_rotation,
            timestamp,
        }
    }

    /// Reject messages that cannot be replayed
    pub fn validate(&self) -> Result<()> {
        Intensity::new(self.intensity)
            .map_err(|_| Error::InvalidSpinMessage(format!("intensity {}", self.intensity)))?;
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(Error::InvalidSpinMessage(format!(
                "duration {}",
                self.duration
            )));
        }
        let angles = [self.spins, self.random_angle, self.start_rotation];
        if angles.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidSpinMessage("non-finite rotation".into()));
        }
        // Finite inputs can still overflow once scaled by TAU
        if !self.total_rotation().is_finite() || !self.final_rotation().is_finite() {
            return Err(Error::InvalidSpinMessage(format!(
                "rotation overflows with {} spins",
                self.spins
            )));
        }
        Ok(())
    }

    /// Rotation added over the whole spin
    pub fn total_rotation(&self) -> f64 {
        self.spins * TAU + self.random_angle
    }

    /// Linear progress in [0, 1] after `elapsed_ms`
    pub fn progress_at(&self, elapsed_ms: f64) -> f64 {
        (elapsed_ms / self.duration).min(1.0)
    }

    /// Wheel rotation at a given linear progress
    pub fn rotation_at_progress(&self, progress: f64) -> f64 {
        self.start_rotation + self.total_rotation() * ease_out_cubic(progress)
    }

    /// Rotation the wheel settles on
    pub fn final_rotation(&self) -> f64 {
        self.rotation_at_progress(1.0)
    }
}
