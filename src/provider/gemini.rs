use super::{
    AudioEncoding, ConnectionConfig, ProviderSettings, RealtimeProvider, SessionEvent,
};
use crate::state::Role;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use std::sync::Mutex;

/// Gemini Live does not assign ids to transcript streams, so the adapter
/// numbers turns itself and accumulates text until `turnComplete`.
#[derive(Default)]
struct TurnState {
    index: u64,
    user_text: String,
    model_text: String,
    model_started: bool,
}

pub struct GeminiProvider {
    turn: Mutex<TurnState>,
}

impl GeminiProvider {
    pub fn new() -> Self {
        Self {
            turn: Mutex::new(TurnState::default()),
        }
    }
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeProvider for GeminiProvider {
    fn name(&self) -> &str {
        "Gemini Live"
    }

    fn connection_config(&self, settings: &ProviderSettings) -> ConnectionConfig {
        let url = format!(
            "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent?key={}",
            settings.token
        );

        let init_message = json!({
            "setup": {
                "model": format!("models/{}", settings.model),
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {
                        "voiceConfig": {
                            "prebuiltVoiceConfig": { "voiceName": settings.voice }
                        },
                        "languageCode": settings.language,
                    },
                },
                "inputAudioTranscription": {},
                "outputAudioTranscription": {},
            },
        });

        ConnectionConfig {
            url,
            headers: vec![(
                "Host".into(),
                "generativelanguage.googleapis.com".into(),
            )],
            init_message: Some(init_message),
            audio_encoding: AudioEncoding::Base64Realtime {
                mime_type: "audio/pcm;rate=16000".into(),
            },
            close_message: None,
            sample_rate: 16000,
        }
    }

    fn parse_event(&self, text: &str) -> Vec<SessionEvent> {
        let event: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => return vec![SessionEvent::Error(format!("parse error: {}", e))],
        };

        if event.get("setupComplete").is_some() {
            return vec![SessionEvent::Opened];
        }

        if let Some(tool_call) = event.get("toolCall") {
            let mut events = Vec::new();
            if let Some(calls) = tool_call.get("functionCalls").and_then(|v| v.as_array()) {
                for call in calls {
                    let call_id = call
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();
                    let name = call
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();
                    if call_id.is_empty() || name.is_empty() {
                        continue;
                    }
                    events.push(SessionEvent::ToolCall {
                        call_id,
                        item_id: None,
                        name,
                        arguments: call.get("args").cloned().unwrap_or_else(|| json!({})),
                    });
                }
            }
            if events.is_empty() {
                return vec![SessionEvent::Status("toolCall without functionCalls".into())];
            }
            return events;
        }

        if let Some(content) = event.get("serverContent") {
            let mut turn = match self.turn.lock() {
                Ok(t) => t,
                Err(poisoned) => poisoned.into_inner(),
            };
            let mut events = Vec::new();

            if content
                .get("interrupted")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
            {
                turn.model_started = false;
                return vec![SessionEvent::Interrupted];
            }

            if let Some(t) = content
                .get("inputTranscription")
                .and_then(|v| v.get("text"))
                .and_then(|v| v.as_str())
            {
                turn.user_text.push_str(t);
                events.push(SessionEvent::TranscriptDelta {
                    item_id: format!("user-{}", turn.index),
                    role: Role::User,
                    text: t.to_string(),
                });
            }

            if let Some(t) = content
                .get("outputTranscription")
                .and_then(|v| v.get("text"))
                .and_then(|v| v.as_str())
            {
                turn.model_text.push_str(t);
                events.push(SessionEvent::TranscriptDelta {
                    item_id: format!("model-{}", turn.index),
                    role: Role::Assistant,
                    text: t.to_string(),
                });
            }

            if let Some(parts) = content
                .get("modelTurn")
                .and_then(|v| v.get("parts"))
                .and_then(|v| v.as_array())
            {
                for part in parts {
                    if let Some(data) = part
                        .get("inlineData")
                        .and_then(|v| v.get("data"))
                        .and_then(|v| v.as_str())
                    {
                        if !turn.model_started {
                            turn.model_started = true;
                            events.push(SessionEvent::AssistantStarted);
                        }
                        match BASE64.decode(data.as_bytes()) {
                            Ok(pcm) => events.push(SessionEvent::AssistantAudio(pcm)),
                            Err(e) => events
                                .push(SessionEvent::Status(format!("bad inline audio: {}", e))),
                        }
                    } else if let Some(t) = part.get("text").and_then(|v| v.as_str()) {
                        turn.model_text.push_str(t);
                        events.push(SessionEvent::TranscriptDelta {
                            item_id: format!("model-{}", turn.index),
                            role: Role::Assistant,
                            text: t.to_string(),
                        });
                    }
                }
            }

            if content
                .get("turnComplete")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
            {
                if !turn.user_text.is_empty() {
                    let user_text = std::mem::take(&mut turn.user_text);
                    events.push(SessionEvent::TranscriptDone {
                        item_id: format!("user-{}", turn.index),
                        role: Role::User,
                        text: user_text,
                    });
                }
                let model_text = std::mem::take(&mut turn.model_text);
                events.push(SessionEvent::TranscriptDone {
                    item_id: format!("model-{}", turn.index),
                    role: Role::Assistant,
                    text: model_text,
                });
                if turn.model_started {
                    turn.model_started = false;
                    events.push(SessionEvent::AssistantFinished);
                }
                turn.index += 1;
            }

            if events.is_empty() {
                return vec![SessionEvent::Status("serverContent without content".into())];
            }
            return events;
        }

        if let Some(go_away) = event.get("goAway") {
            return vec![SessionEvent::Error(format!("server goAway: {}", go_away))];
        }

        vec![SessionEvent::Status(format!("unknown event: {}", event))]
    }

    fn tool_result_messages(&self, call_id: &str, tool_name: &str, output: &Value) -> Vec<Value> {
        vec![json!({
            "toolResponse": {
                "functionResponses": [{
                    "id": call_id,
                    "name": tool_name,
                    "response": output,
                }],
            },
        })]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_complete_opens_the_session() {
        let provider = GeminiProvider::new();
        assert_eq!(
            provider.parse_event(r#"{"setupComplete":{}}"#),
            vec![SessionEvent::Opened]
        );
    }

    #[test]
    fn function_calls_fan_out_to_tool_events() {
        let provider = GeminiProvider::new();
        let events = provider.parse_event(
            r#"{"toolCall":{"functionCalls":[{"id":"fc-1","name":"navigateTo","args":{"page":"rent"}}]}}"#,
        );
        assert_eq!(events.len(), 1);
        match &events[0] {
            SessionEvent::ToolCall {
                call_id,
                name,
                arguments,
                ..
            } => {
                assert_eq!(call_id, "fc-1");
                assert_eq!(name, "navigateTo");
                assert_eq!(arguments["page"], "rent");
            }
            other => panic!("expected ToolCall, got {:?}", other),
        }
    }

    #[test]
    fn interrupted_flag_maps_to_interruption() {
        let provider = GeminiProvider::new();
        assert_eq!(
            provider.parse_event(r#"{"serverContent":{"interrupted":true}}"#),
            vec![SessionEvent::Interrupted]
        );
    }

    #[test]
    fn transcriptions_accumulate_until_turn_complete() {
        let provider = GeminiProvider::new();
        provider.parse_event(
            r#"{"serverContent":{"inputTranscription":{"text":"two "}}}"#,
        );
        provider.parse_event(
            r#"{"serverContent":{"inputTranscription":{"text":"bedrooms"}}}"#,
        );
        let events = provider.parse_event(r#"{"serverContent":{"turnComplete":true}}"#);
        assert!(events.contains(&SessionEvent::TranscriptDone {
            item_id: "user-0".into(),
            role: Role::User,
            text: "two bedrooms".into(),
        }));

        // The next turn gets a fresh id.
        let events = provider.parse_event(
            r#"{"serverContent":{"inputTranscription":{"text":"with a pool"}}}"#,
        );
        assert_eq!(
            events,
            vec![SessionEvent::TranscriptDelta {
                item_id: "user-1".into(),
                role: Role::User,
                text: "with a pool".into(),
            }]
        );
    }

    #[test]
    fn inline_audio_starts_the_assistant_and_decodes() {
        let provider = GeminiProvider::new();
        // "AAAA" decodes to three zero bytes.
        let events = provider.parse_event(
            r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm","data":"AAAA"}}]}}}"#,
        );
        assert_eq!(events[0], SessionEvent::AssistantStarted);
        assert_eq!(events[1], SessionEvent::AssistantAudio(vec![0, 0, 0]));
    }

    #[test]
    fn tool_result_uses_function_response_envelope() {
        let provider = GeminiProvider::new();
        let messages = provider.tool_result_messages(
            "fc-2",
            "changeTheme",
            &serde_json::json!({"success": true}),
        );
        assert_eq!(messages.len(), 1);
        let responses = &messages[0]["toolResponse"]["functionResponses"];
        assert_eq!(responses[0]["id"], "fc-2");
        assert_eq!(responses[0]["name"], "changeTheme");
    }

    #[test]
    fn unknown_payloads_become_status() {
        let provider = GeminiProvider::new();
        let events = provider.parse_event(r#"{"usageMetadata":{"totalTokenCount":12}}"#);
        assert!(matches!(events[0], SessionEvent::Status(_)));
    }
}
