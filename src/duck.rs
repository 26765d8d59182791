//! Input gain ducking.
//!
//! While the remote side is speaking the uplink gain is pulled down so the
//! speaker output bleeding into the microphone is not sent back. The gain
//! follows its target exponentially; the target depends only on the turn state.

use crate::config::DuckSettings;
use crate::turn::TurnState;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// An f32 gain readable from any thread without locking.
#[derive(Debug, Clone)]
pub struct SharedGain(Arc<AtomicU32>);

impl SharedGain {
    pub fn new(value: f32) -> Self {
        Self(Arc::new(AtomicU32::new(value.to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

impl Default for SharedGain {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Exponential approach toward a state-dependent target gain.
#[derive(Debug)]
pub struct DuckController {
    ducked_gain: f32,
    attack: Duration,
    release: Duration,
    gain: SharedGain,
}

impl DuckController {
    pub fn new(settings: &DuckSettings) -> Self {
        Self {
            ducked_gain: settings.ducked_gain,
            attack: Duration::from_millis(settings.attack_ms as u64),
            release: Duration::from_millis(settings.release_ms as u64),
            gain: SharedGain::new(1.0),
        }
    }

    /// Target gain for a turn state.
    pub fn target(&self, state: TurnState) -> f32 {
        match state {
            TurnState::Speaking => self.ducked_gain,
            _ => 1.0,
        }
    }

    /// Moves the gain `dt` closer to the target for `state`.
    ///
    /// Returns the new gain.
    pub fn advance(&mut self, state: TurnState, dt: Duration) -> f32 {
        let target = self.target(state);
        let current = self.gain.get();
        if current == target {
            return current;
        }

        let tau = if target < current {
            self.attack
        } else {
            self.release
        };

        let next = if tau.is_zero() {
            target
        } else {
            let alpha = 1.0 - (-dt.as_secs_f32() / tau.as_secs_f32()).exp();
            let moved = current + (target - current) * alpha;
            // Snap once inaudibly close so the target is actually reached.
            if (target - moved).abs() < 1e-4 {
                target
            } else {
                moved
            }
        };

        self.gain.set(next);
        next
    }

    pub fn gain(&self) -> f32 {
        self.gain.get()
    }

    /// Handle for readers on other threads.
    pub fn shared(&self) -> SharedGain {
        self.gain.clone()
    }

    /// Jump straight to unity (session teardown).
    pub fn reset(&mut self) {
        self.gain.set(1.0);
    }
}
