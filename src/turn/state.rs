use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Who holds the floor, as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnState {
    /// No session; nothing captured or played.
    Idle,
    /// Session open, waiting for the user to start talking.
    Armed,
    /// User speech confirmed; frames are streamed.
    Listening,
    /// User finished; waiting for the remote to answer.
    Processing,
    /// Remote audio is playing.
    Speaking,
}

impl TurnState {
    fn to_u8(self) -> u8 {
        match self {
            TurnState::Idle => 0,
            TurnState::Armed => 1,
            TurnState::Listening => 2,
            TurnState::Processing => 3,
            TurnState::Speaking => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => TurnState::Armed,
            2 => TurnState::Listening,
            3 => TurnState::Processing,
            4 => TurnState::Speaking,
            _ => TurnState::Idle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::Armed => "armed",
            TurnState::Listening => "listening",
            TurnState::Processing => "processing",
            TurnState::Speaking => "speaking",
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free published copy of the current [`TurnState`].
///
/// Only the coordinator writes it; audio callbacks and the UI read it.
#[derive(Debug, Clone)]
pub struct TurnCell(Arc<AtomicU8>);

impl TurnCell {
    pub fn new(state: TurnState) -> Self {
        Self(Arc::new(AtomicU8::new(state.to_u8())))
    }

    pub fn get(&self) -> TurnState {
        TurnState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: TurnState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }
}

impl Default for TurnCell {
    fn default() -> Self {
        Self::new(TurnState::Idle)
    }
}
