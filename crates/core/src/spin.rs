//! Spin state machine
//!
//! `Idle -> Spinning` on a local spin or a replayed remote message,
//! `Spinning -> Idle` once the elapsed time reaches the message's duration.
//! The machine never reads a clock; callers pass the elapsed time, so a host
//! and a replaying viewer fed the same inputs produce the same frames.

use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};
use crate::models::{Intensity, SpinMessage};

/// Who started the current spin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinOrigin {
    /// Started here; this session owns the outcome
    Local,
    /// Replayed from a host broadcast
    Remote,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpinPhase {
    Idle,
    Spinning {
        message: SpinMessage,
        origin: SpinOrigin,
    },
}

/// One evaluated animation frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpinFrame {
    pub rotation: f64,
    pub progress: f64,
    pub origin: SpinOrigin,
    /// Set on the frame that reaches progress 1; the machine is Idle again
    pub finished: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpinMachine {
    phase: SpinPhase,
}

impl SpinMachine {
    pub fn new() -> Self {
        Self {
            phase: SpinPhase::Idle,
        }
    }

    pub fn phase(&self) -> &SpinPhase {
        &self.phase
    }

    pub fn is_spinning(&self) -> bool {
        matches!(self.phase, SpinPhase::Spinning { .. })
    }

    /// Start a local spin from the current rotation
    pub fn start_local<R: Rng + ?Sized>(
        &mut self,
        intensity: Intensity,
        name_count: usize,
        current_rotation: f64,
        timestamp: i64,
        rng: &mut R,
    ) -> Result<SpinMessage> {
        if self.is_spinning() {
            return Err(Error::AlreadySpinning);
        }
        if name_count == 0 {
            return Err(Error::EmptyWheel);
        }

        let message = SpinMessage::generate(intensity, current_rotation, timestamp, rng);
        self.phase = SpinPhase::Spinning {
            message: message.clone(),
            origin: SpinOrigin::Local,
        };
        Ok(message)
    }

    /// Replay a spin received from the host
    pub fn start_remote(&mut self, message: SpinMessage) -> Result<()> {
        if self.is_spinning() {
            return Err(Error::AlreadySpinning);
        }
        message.validate()?;

        self.phase = SpinPhase::Spinning {
            message,
            origin: SpinOrigin::Remote,
        };
        Ok(())
    }

    /// Evaluate the frame `elapsed` after the spin started.
    ///
    /// Returns `None` while idle.
    pub fn advance(&mut self, elapsed: Duration) -> Option<SpinFrame> {
        let SpinPhase::Spinning { message, origin } = &self.phase else {
            return None;
        };

        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let progress = message.progress_at(elapsed_ms);
        let frame = SpinFrame {
            rotation: message.rotation_at_progress(progress),
            progress,
            origin: *origin,
            finished: progress >= 1.0,
        };

        if frame.finished {
            self.phase = SpinPhase::Idle;
        }
        Some(frame)
    }
}

impl Default for SpinMachine {
    fn default() -> Self {
        Self::new()
    }
}
