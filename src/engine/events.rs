use crate::turn::{TranscriptEntry, TurnState};
use std::fmt;

/// Notifications for the UI layer. The UI only subscribes; it never
/// reaches into the engine except through the handle's mute/close calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    StateChanged(TurnState),
    TranscriptAppended(TranscriptEntry),
    /// Full accumulated user text for the current turn.
    LiveUserPartial(String),
    /// Full accumulated assistant text for the current turn.
    LiveAssistantPartial(String),
    /// A fault the user should see. Fatal faults are emitted once.
    Fault(String),
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::StateChanged(state) => write!(f, "[{}]", state),
            EngineEvent::TranscriptAppended(entry) => write!(f, "{}", entry),
            EngineEvent::LiveUserPartial(text) => write!(f, "user... {}", text),
            EngineEvent::LiveAssistantPartial(text) => write!(f, "assistant... {}", text),
            EngineEvent::Fault(reason) => write!(f, "fault: {}", reason),
        }
    }
}
