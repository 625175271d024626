pub mod gemini;
pub mod openai;
pub mod session;

use crate::state::Role;
use serde_json::Value;
use std::sync::Arc;

/// Normalized events produced by translating a provider's wire messages.
/// The state machine only ever sees these; provider-specific shapes stay
/// inside the adapter that parsed them.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The realtime channel is open and configured.
    Opened,
    /// Server VAD detected the user starting to speak.
    SpeechStarted,
    /// Server VAD detected the user going quiet.
    SpeechStopped,
    /// Partial transcript text for one turn.
    TranscriptDelta {
        item_id: String,
        role: Role,
        text: String,
    },
    /// Final transcript for one turn; replaces accumulated partials.
    TranscriptDone {
        item_id: String,
        role: Role,
        text: String,
    },
    /// The assistant began producing a response.
    AssistantStarted,
    /// The assistant's response is complete.
    AssistantFinished,
    /// A chunk of assistant audio (16-bit LE PCM) for playback.
    AssistantAudio(Vec<u8>),
    /// The model requests execution of a named tool.
    ToolCall {
        call_id: String,
        item_id: Option<String>,
        name: String,
        arguments: Value,
    },
    /// The user barged in over playing assistant audio.
    Interrupted,
    /// Provider-level error. Terminal for the session.
    Error(String),
    /// Informational status (logged by the driver, never reaches the
    /// state machine).
    Status(String),
}

/// How outbound audio bytes are framed for the wire.
#[derive(Debug, Clone)]
pub enum AudioEncoding {
    /// Wrap base64-encoded audio in a flat JSON envelope
    /// (e.g. `{"type": "input_audio_buffer.append", "audio": "..."}`).
    Base64Json {
        type_field: String,
        type_value: String,
        audio_field: String,
    },
    /// Wrap base64-encoded audio in a nested `realtimeInput` envelope with a
    /// mime type (Gemini Live framing).
    Base64Realtime { mime_type: String },
    /// Send raw PCM bytes as a binary frame.
    RawBinary,
}

/// Everything needed to establish and configure a provider connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Optional JSON message to send immediately after connecting.
    pub init_message: Option<Value>,
    pub audio_encoding: AudioEncoding,
    /// Optional JSON message to send before closing the channel.
    pub close_message: Option<Value>,
    pub sample_rate: u32,
}

/// Settings passed to a provider to build its ConnectionConfig. The token is
/// the ephemeral client secret from the credential endpoint, never a
/// long-lived API key.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub token: String,
    pub model: String,
    pub voice: String,
    pub language: String,
}

/// Trait each realtime voice backend implements. Swapping providers means
/// swapping this adapter; nothing downstream branches on provider.
pub trait RealtimeProvider: Send + Sync {
    fn name(&self) -> &str;

    fn connection_config(&self, settings: &ProviderSettings) -> ConnectionConfig;

    /// Translate one wire message into normalized events. Unknown event
    /// types come back as `Status` and are dropped after logging.
    fn parse_event(&self, text: &str) -> Vec<SessionEvent>;

    /// Wire messages that carry a correlated tool result back to the model
    /// and prompt it to continue.
    fn tool_result_messages(&self, call_id: &str, tool_name: &str, output: &Value) -> Vec<Value>;
}

/// Create a provider adapter by ID.
pub fn create_provider(id: &str) -> Arc<dyn RealtimeProvider> {
    match id {
        "gemini" => Arc::new(gemini::GeminiProvider::new()),
        _ => Arc::new(openai::OpenAiProvider),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_selection_defaults_to_openai() {
        assert_eq!(create_provider("openai").name(), "OpenAI Realtime");
        assert_eq!(create_provider("gemini").name(), "Gemini Live");
        assert_eq!(create_provider("something-else").name(), "OpenAI Realtime");
    }
}
