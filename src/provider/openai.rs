use super::{
    AudioEncoding, ConnectionConfig, ProviderSettings, RealtimeProvider, SessionEvent,
};
use crate::state::Role;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

pub struct OpenAiProvider;

impl RealtimeProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "OpenAI Realtime"
    }

    fn connection_config(&self, settings: &ProviderSettings) -> ConnectionConfig {
        let url = format!("wss://api.openai.com/v1/realtime?model={}", settings.model);

        let init_message = json!({
            "type": "session.update",
            "session": {
                "modalities": ["audio", "text"],
                "voice": settings.voice,
                "input_audio_format": "pcm16",
                "output_audio_format": "pcm16",
                "input_audio_transcription": {
                    "model": "gpt-4o-mini-transcribe",
                    "language": settings.language,
                },
                "turn_detection": {
                    "type": "server_vad",
                    "threshold": 0.5,
                    "prefix_padding_ms": 300,
                    "silence_duration_ms": 500,
                },
            },
        });

        ConnectionConfig {
            url,
            headers: vec![
                ("Authorization".into(), format!("Bearer {}", settings.token)),
                ("Host".into(), "api.openai.com".into()),
                ("OpenAI-Beta".into(), "realtime=v1".into()),
            ],
            init_message: Some(init_message),
            audio_encoding: AudioEncoding::Base64Json {
                type_field: "type".into(),
                type_value: "input_audio_buffer.append".into(),
                audio_field: "audio".into(),
            },
            close_message: None,
            sample_rate: 24000,
        }
    }

    fn parse_event(&self, text: &str) -> Vec<SessionEvent> {
        let event: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => return vec![SessionEvent::Error(format!("parse error: {}", e))],
        };

        let event_type = event.get("type").and_then(|t| t.as_str()).unwrap_or("");
        let item_id = |event: &Value| {
            event
                .get("item_id")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown-item")
                .to_string()
        };

        match event_type {
            "session.created" => vec![SessionEvent::Opened],
            "input_audio_buffer.speech_started" => vec![SessionEvent::SpeechStarted],
            "input_audio_buffer.speech_stopped" => vec![SessionEvent::SpeechStopped],
            "conversation.item.input_audio_transcription.delta" => {
                match event.get("delta").and_then(|d| d.as_str()) {
                    Some(delta) if !delta.is_empty() => vec![SessionEvent::TranscriptDelta {
                        item_id: item_id(&event),
                        role: Role::User,
                        text: delta.to_string(),
                    }],
                    _ => vec![SessionEvent::Status("empty transcription delta".into())],
                }
            }
            "conversation.item.input_audio_transcription.completed" => {
                let transcript = event
                    .get("transcript")
                    .and_then(|t| t.as_str())
                    .unwrap_or("")
                    .trim();
                vec![SessionEvent::TranscriptDone {
                    item_id: item_id(&event),
                    role: Role::User,
                    text: transcript.to_string(),
                }]
            }
            "response.created" => vec![SessionEvent::AssistantStarted],
            "response.done" => vec![SessionEvent::AssistantFinished],
            "response.audio_transcript.delta" | "response.output_audio_transcript.delta" => {
                match event.get("delta").and_then(|d| d.as_str()) {
                    Some(delta) => vec![SessionEvent::TranscriptDelta {
                        item_id: item_id(&event),
                        role: Role::Assistant,
                        text: delta.to_string(),
                    }],
                    None => vec![SessionEvent::Status("empty audio transcript delta".into())],
                }
            }
            "response.audio_transcript.done" | "response.output_audio_transcript.done" => {
                let transcript = event
                    .get("transcript")
                    .and_then(|t| t.as_str())
                    .unwrap_or("");
                vec![SessionEvent::TranscriptDone {
                    item_id: item_id(&event),
                    role: Role::Assistant,
                    text: transcript.to_string(),
                }]
            }
            "response.audio.delta" | "response.output_audio.delta" => {
                match event
                    .get("delta")
                    .and_then(|d| d.as_str())
                    .map(|b64| BASE64.decode(b64.as_bytes()))
                {
                    Some(Ok(pcm)) => vec![SessionEvent::AssistantAudio(pcm)],
                    Some(Err(e)) => {
                        vec![SessionEvent::Status(format!("bad audio delta: {}", e))]
                    }
                    None => vec![SessionEvent::Status("audio delta without payload".into())],
                }
            }
            "response.function_call_arguments.done" => {
                let call_id = event
                    .get("call_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let name = event
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                if call_id.is_empty() || name.is_empty() {
                    return vec![SessionEvent::Status("tool call missing id or name".into())];
                }
                // Arguments arrive as a JSON-encoded string.
                let arguments = event
                    .get("arguments")
                    .and_then(|v| v.as_str())
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or_else(|| json!({}));
                vec![SessionEvent::ToolCall {
                    call_id,
                    item_id: event.get("item_id").and_then(|v| v.as_str()).map(String::from),
                    name,
                    arguments,
                }]
            }
            "input_audio_buffer.cleared" | "conversation.item.truncated" => {
                vec![SessionEvent::Interrupted]
            }
            "error" => {
                let message = event
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("OpenAI error");
                vec![SessionEvent::Error(message.to_string())]
            }
            "rate_limits.updated" | "session.updated" => {
                vec![SessionEvent::Status(event_type.to_string())]
            }
            "" => vec![SessionEvent::Status(format!("event missing type: {}", event))],
            _ => vec![SessionEvent::Status(event_type.to_string())],
        }
    }

    fn tool_result_messages(&self, call_id: &str, _tool_name: &str, output: &Value) -> Vec<Value> {
        let output_text = match output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        vec![
            json!({
                "type": "conversation.item.create",
                "item": {
                    "type": "function_call_output",
                    "call_id": call_id,
                    "output": output_text,
                },
            }),
            json!({ "type": "response.create" }),
        ]
    }
}
