use crate::params::{ParamField, ParamUpdate, SearchParameters};
use crate::provider::SessionEvent;
use crate::tools::ToolCallRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TOOL_END_CONVERSATION: &str = "endConversation";
pub const TOOL_SEARCH_PROPERTIES: &str = "searchProperties";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One piece of a conversation turn: a text fragment or a tool call with its
/// correlated result once one exists.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePart {
    Text(String),
    ToolCall {
        name: String,
        arguments: Value,
        result: Option<Value>,
    },
}

/// One conversation turn. Created on the first partial event for its id,
/// mutated in place by later deltas, marked completed on the final event.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationMessage {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub completed: bool,
}

impl ConversationMessage {
    fn new(id: String, role: Role) -> Self {
        Self {
            id,
            role,
            parts: Vec::new(),
            completed: false,
        }
    }

    /// Append delta text, extending the trailing text part so the
    /// reconstructed text is the ordered concatenation of deltas.
    fn append_text(&mut self, delta: &str) {
        if let Some(MessagePart::Text(existing)) = self.parts.last_mut() {
            existing.push_str(delta);
        } else {
            self.parts.push(MessagePart::Text(delta.to_string()));
        }
    }

    /// Replace accumulated partial text with the final transcript. Partials
    /// are revisable; finals are immutable.
    fn finalize_text(&mut self, text: &str) {
        self.parts.retain(|p| !matches!(p, MessagePart::Text(_)));
        if !text.is_empty() {
            self.parts.insert(0, MessagePart::Text(text.to_string()));
        }
        self.completed = true;
    }

    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let MessagePart::Text(t) = part {
                out.push_str(t);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Active,
    Closed,
    Error,
}

/// Side effects the state machine asks the session driver to perform.
/// Keeping these as data (instead of callbacks) is what makes the machine
/// testable without a live transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Execute a registered tool and reply with the correlated result over
    /// the transport's control channel.
    DispatchTool(ToolCallRecord),
    /// Queue assistant audio for playback.
    PlayAudio(Vec<u8>),
    /// Barge-in: drop all queued assistant audio and reset scheduling.
    FlushPlayback,
    /// Tear down transport and microphone; the session is over.
    Teardown,
}

/// The conversation state machine. Owns session lifecycle, the running
/// message list, and the accumulated search parameters. All other components
/// report events here rather than mutating state directly.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub status: SessionStatus,
    pub messages: Vec<ConversationMessage>,
    pub params: SearchParameters,
    /// Fields set by the most recent update (the highlight contract).
    pub glow: Vec<ParamField>,
    pub user_speaking: bool,
    pub assistant_speaking: bool,
    pub listening: bool,
    pub error: Option<String>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            status: SessionStatus::Idle,
            messages: Vec::new(),
            params: SearchParameters::default(),
            glow: Vec::new(),
            user_speaking: false,
            assistant_speaking: false,
            listening: false,
            error: None,
        }
    }

    /// `idle -> connecting`: clears prior messages and the last error.
    /// Accumulated parameters survive so the user keeps their progress.
    pub fn begin_connect(&mut self) {
        self.messages.clear();
        self.error = None;
        self.user_speaking = false;
        self.assistant_speaking = false;
        self.listening = false;
        self.status = SessionStatus::Connecting;
    }

    /// Connect failed before the channel opened. Terminal for this attempt;
    /// the caller must start a fresh session to retry.
    pub fn connect_failed(&mut self, cause: &str) {
        self.status = SessionStatus::Error;
        self.error = Some(cause.to_string());
        self.listening = false;
        self.user_speaking = false;
        self.assistant_speaking = false;
    }

    /// `stop()` from any state. Safe from idle (no-op) and safe twice in a
    /// row; cleanup may run from multiple teardown triggers. A session that
    /// already failed stays in `Error` so the cause remains visible.
    pub fn stop(&mut self) {
        self.user_speaking = false;
        self.assistant_speaking = false;
        self.listening = false;
        if self.status != SessionStatus::Idle && self.status != SessionStatus::Error {
            self.status = SessionStatus::Closed;
        }
    }

    /// The event channel ended without an error event: unexpected close.
    pub fn channel_closed(&mut self) {
        if self.status == SessionStatus::Active || self.status == SessionStatus::Connecting {
            self.stop();
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Merge a parameter update and record the glow fields.
    pub fn apply_params(&mut self, update: &ParamUpdate) {
        let changed = self.params.merge(update);
        if !changed.is_empty() {
            self.glow = changed;
        }
    }

    /// Full reset: messages, parameters, flags. Used when the user discards
    /// the session entirely.
    pub fn reset(&mut self) {
        *self = Conversation::new();
    }

    /// Record a locally-entered user turn (typed-input fallback, demo).
    /// Local turns mint their own id; provider turns carry the wire item id.
    pub fn push_user_text(&mut self, text: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let message = self.upsert(&id, Role::User);
        message.append_text(text);
        message.completed = true;
        id
    }

    fn upsert(&mut self, id: &str, role: Role) -> &mut ConversationMessage {
        if let Some(pos) = self.messages.iter().position(|m| m.id == id) {
            return &mut self.messages[pos];
        }
        self.messages.push(ConversationMessage::new(id.to_string(), role));
        let last = self.messages.len() - 1;
        &mut self.messages[last]
    }

    /// Attach a dispatched tool result to its originating message part.
    pub fn record_tool_result(&mut self, record: &ToolCallRecord, result: Value) {
        let Some(message_id) = record.message_id.as_deref() else {
            return;
        };
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == message_id) {
            for part in message.parts.iter_mut() {
                if let MessagePart::ToolCall { name, result: slot, .. } = part {
                    if name == &record.tool_name && slot.is_none() {
                        *slot = Some(result);
                        return;
                    }
                }
            }
        }
    }

    /// Apply one normalized event and return the side effects the driver
    /// must perform. Pure with respect to I/O.
    pub fn apply(&mut self, event: SessionEvent) -> Vec<Action> {
        match event {
            SessionEvent::Opened => {
                if self.status == SessionStatus::Connecting {
                    self.status = SessionStatus::Active;
                    self.listening = true;
                }
                Vec::new()
            }
            SessionEvent::SpeechStarted => {
                self.user_speaking = true;
                // User talking over assistant audio is a barge-in even before
                // the provider reports the interruption.
                if self.assistant_speaking {
                    vec![Action::FlushPlayback]
                } else {
                    Vec::new()
                }
            }
            SessionEvent::SpeechStopped => {
                self.user_speaking = false;
                Vec::new()
            }
            SessionEvent::TranscriptDelta { item_id, role, text } => {
                self.upsert(&item_id, role).append_text(&text);
                Vec::new()
            }
            SessionEvent::TranscriptDone { item_id, role, text } => {
                self.upsert(&item_id, role).finalize_text(&text);
                Vec::new()
            }
            SessionEvent::AssistantStarted => {
                self.assistant_speaking = true;
                Vec::new()
            }
            SessionEvent::AssistantFinished => {
                self.assistant_speaking = false;
                Vec::new()
            }
            SessionEvent::AssistantAudio(pcm) => vec![Action::PlayAudio(pcm)],
            SessionEvent::Interrupted => {
                self.assistant_speaking = false;
                vec![Action::FlushPlayback]
            }
            SessionEvent::ToolCall {
                call_id,
                item_id,
                name,
                arguments,
            } => {
                if name == TOOL_END_CONVERSATION {
                    // Special case: the session is over. Transcript discarded,
                    // no tool-result round trip.
                    self.messages.clear();
                    self.stop();
                    return vec![Action::Teardown];
                }
                if name == TOOL_SEARCH_PROPERTIES {
                    // Parameter extraction happens here so the UI reflects the
                    // query even if the backend search is slow or fails.
                    let update = ParamUpdate::from_search_args(&arguments);
                    if !update.is_empty() {
                        self.apply_params(&update);
                    }
                }
                if let Some(ref message_id) = item_id {
                    self.upsert(message_id, Role::Assistant)
                        .parts
                        .push(MessagePart::ToolCall {
                            name: name.clone(),
                            arguments: arguments.clone(),
                            result: None,
                        });
                }
                vec![Action::DispatchTool(ToolCallRecord {
                    call_id,
                    tool_name: name,
                    arguments,
                    message_id: item_id,
                })]
            }
            SessionEvent::Error(message) => {
                self.status = SessionStatus::Error;
                self.error = Some(message);
                self.listening = false;
                self.user_speaking = false;
                self.assistant_speaking = false;
                vec![Action::Teardown]
            }
            // Informational; the driver logs these before they get here.
            SessionEvent::Status(_) => Vec::new(),
        }
    }
}
