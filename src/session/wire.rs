//! JSON messages exchanged with a live speech endpoint.
//!
//! Client → server: one `setup` message, then a `realtimeInput` per frame.
//! Server → client: `setupComplete`, then `serverContent` messages carrying
//! transcription fragments, audio parts, and turn signals.

use crate::audio::codec::{EncodedFrame, decode_base64};
use crate::error::{ParleyError, Result};
use crate::session::{SessionConfig, SessionEvent};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<Empty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Content {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeInput {
    pub media: Blob,
}

/// Everything the server may send; unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ServerError>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_transcription: Option<Transcription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_transcription: Option<Transcription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<Content>,
    pub interrupted: bool,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Transcription {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerError {
    pub message: String,
}

/// The opening message for a session.
pub fn setup_message(config: &SessionConfig) -> Result<String> {
    let setup = Setup {
        generation_config: GenerationConfig {
            response_modalities: vec!["AUDIO".to_string()],
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: config.voice.name().to_string(),
                    },
                },
            },
        },
        system_instruction: Content {
            parts: vec![Part {
                text: Some(config.system_instruction.clone()),
                inline_data: None,
            }],
        },
        input_audio_transcription: config.input_transcription.then(Empty::default),
        output_audio_transcription: config.output_transcription.then(Empty::default),
    };
    to_json(&ClientMessage::Setup(setup))
}

/// One uplink audio frame.
pub fn audio_message(frame: &EncodedFrame) -> Result<String> {
    to_json(&ClientMessage::RealtimeInput(RealtimeInput {
        media: Blob {
            mime_type: frame.mime_type.clone(),
            data: frame.data.clone(),
        },
    }))
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| ParleyError::Protocol {
        message: format!("failed to encode message: {}", e),
    })
}

/// Translate one server message into session events, in protocol order:
/// user text, assistant text, audio, interrupted, turn complete.
///
/// Audio parts that fail to decode are dropped with a warning; the rest of
/// the message still applies.
///
/// # Errors
/// `Protocol` if the text is not a JSON object.
pub fn parse_server_message(text: &str) -> Result<Vec<SessionEvent>> {
    let message: ServerMessage = serde_json::from_str(text).map_err(|e| ParleyError::Protocol {
        message: format!("invalid server message: {}", e),
    })?;

    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(SessionEvent::Opened);
    }

    if let Some(content) = message.server_content {
        if let Some(t) = content.input_transcription
            && !t.text.is_empty()
        {
            events.push(SessionEvent::PartialUserText(t.text));
        }
        if let Some(t) = content.output_transcription
            && !t.text.is_empty()
        {
            events.push(SessionEvent::PartialAssistantText(t.text));
        }
        for blob in content
            .model_turn
            .into_iter()
            .flat_map(|turn| turn.parts)
            .filter_map(|part| part.inline_data)
        {
            match decode_base64(&blob.data) {
                Ok(bytes) => events.push(SessionEvent::AudioChunk(bytes)),
                Err(e) => tracing::warn!(target: "parley::session", error = %e, "dropping audio part"),
            }
        }
        if content.interrupted {
            events.push(SessionEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(SessionEvent::TurnComplete);
        }
    }

    if let Some(error) = message.error {
        events.push(SessionEvent::Error(error.message));
    }

    Ok(events)
}
