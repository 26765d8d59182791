//! Turn-taking between the user and the remote speaker.

pub mod machine;
pub mod state;
pub mod transcript;

pub use machine::{Action, TurnConfig, TurnMachine};
pub use state::{TurnCell, TurnState};
pub use transcript::{Role, Transcript, TranscriptEntry, Utterance};
