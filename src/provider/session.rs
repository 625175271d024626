use super::{AudioEncoding, ConnectionConfig, RealtimeProvider, ProviderSettings, SessionEvent};
use crate::audio::{Microphone, Playback, PlaybackQueue};
use crate::settings::Settings;
use crate::state::{Action, Conversation};
use crate::tools::{serialize_result, tool_declarations, ToolRegistry};
use crate::VoiceError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Local;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite};

fn wall_ts() -> String {
    Local::now().format("%H:%M:%S%.3f").to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub value: String,
}

/// Ephemeral session credential minted by the trusted backend. The client
/// never sees a long-lived API key.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionCredential {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub expires_at: i64,
    pub client_secret: ClientSecret,
}

/// Interpret the credential endpoint's reply. Non-success status and
/// response-embedded errors both fail auth.
pub fn parse_credential_response(status: u16, body: &str) -> crate::Result<SessionCredential> {
    if !(200..300).contains(&status) {
        return Err(VoiceError::Auth(format!(
            "credential endpoint returned {}",
            status
        )));
    }
    let value: Value = serde_json::from_str(body)
        .map_err(|e| VoiceError::Auth(format!("credential body unreadable: {}", e)))?;
    if let Some(error) = value.get("error") {
        return Err(VoiceError::Auth(format!("credential error: {}", error)));
    }
    serde_json::from_value(value)
        .map_err(|e| VoiceError::Auth(format!("credential body malformed: {}", e)))
}

/// POST `{model, voice, customTools}` to the trusted backend and return the
/// ephemeral credential.
pub async fn fetch_credential(settings: &Settings) -> crate::Result<SessionCredential> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .map_err(|e| VoiceError::Auth(format!("failed to build client: {}", e)))?;

    let response = client
        .post(&settings.credential_url)
        .json(&json!({
            "model": settings.model,
            "voice": settings.voice,
            "customTools": tool_declarations(),
        }))
        .send()
        .await
        .map_err(|e| VoiceError::Auth(format!("credential request failed: {}", e)))?;

    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| VoiceError::Auth(format!("credential body failed: {}", e)))?;
    parse_credential_response(status, &body)
}

fn build_ws_request(config: &ConnectionConfig) -> crate::Result<tungstenite::http::Request<()>> {
    let mut request = tungstenite::http::Request::builder()
        .uri(&config.url)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        );

    for (name, value) in &config.headers {
        request = request.header(name.as_str(), value.as_str());
    }

    request
        .body(())
        .map_err(|e| VoiceError::Negotiation(format!("failed to build request: {}", e)))
}

fn encode_audio_frame(encoding: &AudioEncoding, pcm: Vec<u8>) -> tungstenite::Message {
    match encoding {
        AudioEncoding::Base64Json {
            type_field,
            type_value,
            audio_field,
        } => {
            let mut map = serde_json::Map::new();
            map.insert(type_field.clone(), Value::String(type_value.clone()));
            map.insert(audio_field.clone(), Value::String(BASE64.encode(&pcm)));
            tungstenite::Message::Text(Value::Object(map).to_string().into())
        }
        AudioEncoding::Base64Realtime { mime_type } => {
            let msg = json!({
                "realtimeInput": {
                    "audio": {
                        "data": BASE64.encode(&pcm),
                        "mimeType": mime_type,
                    },
                },
            });
            tungstenite::Message::Text(msg.to_string().into())
        }
        AudioEncoding::RawBinary => tungstenite::Message::Binary(pcm.into()),
    }
}

/// A live realtime channel. Owns the socket pumps; exposes the normalized
/// event stream and a buffered control sender.
pub struct SessionHandle {
    pub events: mpsc::Receiver<SessionEvent>,
    control_tx: mpsc::Sender<Value>,
    closed: Arc<AtomicBool>,
    close_message: Option<Value>,
    pub sample_rate: u32,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl SessionHandle {
    /// Enqueue a control message. Messages queue in FIFO order and are
    /// flushed by the outbound pump; this only fails once `close()` has
    /// begun (buffering policy, applied consistently).
    pub fn send(&self, event: Value) -> crate::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VoiceError::ChannelNotReady("session closed".into()));
        }
        self.control_tx
            .try_send(event)
            .map_err(|e| VoiceError::Channel(format!("control enqueue failed: {}", e)))
    }

    /// Tear down the channel. Idempotent; after return no further events are
    /// delivered through `events`.
    pub async fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(msg) = self.close_message.take() {
            let _ = self.control_tx.send(msg).await;
            // Give the pump a beat to flush the farewell.
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.events.close();
        while self.events.try_recv().is_ok() {}
        println!("[session] closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Perform the provider handshake and start relaying. Fails with `Auth` when
/// the credential fetch is rejected and `Negotiation` when channel setup
/// fails. On success both pumps are live: outbound audio/control, inbound
/// events.
pub async fn connect(
    provider: Arc<dyn RealtimeProvider>,
    settings: &Settings,
    mut audio_rx: mpsc::Receiver<Vec<u8>>,
) -> crate::Result<SessionHandle> {
    let credential = fetch_credential(settings).await?;
    println!(
        "[session] [{}] credential ok, model={}",
        wall_ts(),
        credential.model
    );

    let provider_settings = ProviderSettings {
        token: credential.client_secret.value,
        model: settings.model.clone(),
        voice: settings.voice.clone(),
        language: settings.language.clone(),
    };
    let config = provider.connection_config(&provider_settings);
    let request = build_ws_request(&config)?;
    let provider_name = provider.name().to_string();
    println!("[session] [{}] connecting {}", wall_ts(), provider_name);

    let ws_stream = match connect_async(request).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            return Err(VoiceError::Negotiation(format!(
                "{} connect failed: {}",
                provider_name, e
            )))
        }
    };
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    if let Some(ref init) = config.init_message {
        ws_tx
            .send(tungstenite::Message::Text(init.to_string().into()))
            .await
            .map_err(|e| VoiceError::Negotiation(format!("init send failed: {}", e)))?;
    }

    let (event_tx, events) = mpsc::channel::<SessionEvent>(256);
    let (control_tx, mut control_rx) = mpsc::channel::<Value>(64);
    let closed = Arc::new(AtomicBool::new(false));

    // Outbound pump: microphone frames and queued control messages, FIFO.
    let audio_encoding = config.audio_encoding.clone();
    let pname_send = provider_name.clone();
    let send_task = tokio::spawn(async move {
        let mut frames: u64 = 0;
        loop {
            tokio::select! {
                frame = audio_rx.recv() => {
                    let pcm = match frame {
                        Some(p) => p,
                        None => break,
                    };
                    if pcm.is_empty() {
                        continue;
                    }
                    frames += 1;
                    if frames % 500 == 0 {
                        println!("[session] {} audio frames sent", frames);
                    }
                    if ws_tx.send(encode_audio_frame(&audio_encoding, pcm)).await.is_err() {
                        break;
                    }
                }
                ctrl = control_rx.recv() => {
                    let msg = match ctrl {
                        Some(m) => m,
                        None => break,
                    };
                    if ws_tx
                        .send(tungstenite::Message::Text(msg.to_string().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
        println!("[session] {} outbound pump stopped", pname_send);
        let _ = ws_tx.close().await;
    });

    // Inbound pump: wire messages through the translator onto the event
    // channel. Status events are logged here and dropped.
    let recv_provider = provider.clone();
    let pname_recv = provider_name;
    let recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    log::error!("[session] {} websocket error: {}", pname_recv, e);
                    let _ = event_tx
                        .send(SessionEvent::Error(format!("websocket error: {}", e)))
                        .await;
                    break;
                }
            };
            let text = match msg {
                tungstenite::Message::Text(t) => t.to_string(),
                tungstenite::Message::Binary(bytes) => {
                    match String::from_utf8(bytes.to_vec()) {
                        Ok(t) => t,
                        Err(_) => continue,
                    }
                }
                tungstenite::Message::Close(frame) => {
                    if let Some(frame) = frame {
                        println!(
                            "[session] {} closed by peer: {} {}",
                            pname_recv, frame.code, frame.reason
                        );
                    }
                    break;
                }
                _ => continue,
            };

            for event in recv_provider.parse_event(&text) {
                match event {
                    SessionEvent::Status(status) => {
                        println!("[session] {} {}", pname_recv, status);
                    }
                    other => {
                        if event_tx.send(other).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
        println!("[session] {} inbound pump stopped", pname_recv);
    });

    Ok(SessionHandle {
        events,
        control_tx,
        closed,
        close_message: config.close_message.clone(),
        sample_rate: config.sample_rate,
        tasks: vec![send_task, recv_task],
    })
}

/// Drive one full conversation: connect, acquire the microphone, drain
/// events through the state machine, execute its actions, and tear
/// everything down exactly once. `stop_rx` flipping to true aborts, safe
/// while the connect is still pending (the eventual session is discarded,
/// not adopted).
pub async fn run_session(
    provider: Arc<dyn RealtimeProvider>,
    settings: &Settings,
    registry: Arc<ToolRegistry>,
    conversation: &mut Conversation,
    mut stop_rx: watch::Receiver<bool>,
) -> crate::Result<()> {
    conversation.begin_connect();

    let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>(128);

    let mut handle = tokio::select! {
        result = connect(provider.clone(), settings, frame_rx) => match result {
            Ok(handle) => handle,
            Err(e) => {
                conversation.connect_failed(&e.to_string());
                return Err(e);
            }
        },
        _ = stop_rx.changed() => {
            // Stopped while the connect was pending; the dropped future
            // releases whatever it had established.
            conversation.stop();
            return Ok(());
        }
    };

    let microphone = match Microphone::acquire(
        settings.mic_device(),
        frame_tx,
        handle.sample_rate,
    ) {
        Ok(mic) => mic,
        Err(e) => {
            conversation.connect_failed(&e.to_string());
            handle.close().await;
            return Err(e);
        }
    };

    let playback_queue = PlaybackQueue::new();
    let playback = Playback::start(playback_queue.clone(), handle.sample_rate);
    if let Err(ref e) = playback {
        // Audio out is best-effort; a missing speaker should not kill the
        // conversation.
        log::warn!("[session] playback unavailable: {}", e);
    }

    let result = drive_events(
        provider.as_ref(),
        registry,
        conversation,
        &mut handle,
        &playback_queue,
        &mut stop_rx,
    )
    .await;

    handle.close().await;
    microphone.release();
    playback_queue.flush();
    if let Ok(playback) = playback {
        playback.stop();
    }
    conversation.stop();
    result
}

async fn drive_events(
    provider: &dyn RealtimeProvider,
    registry: Arc<ToolRegistry>,
    conversation: &mut Conversation,
    handle: &mut SessionHandle,
    playback_queue: &PlaybackQueue,
    stop_rx: &mut watch::Receiver<bool>,
) -> crate::Result<()> {
    loop {
        let event = tokio::select! {
            event = handle.events.recv() => event,
            _ = stop_rx.changed() => {
                println!("[session] stop requested");
                return Ok(());
            }
        };
        let Some(event) = event else {
            conversation.channel_closed();
            return Ok(());
        };

        for action in conversation.apply(event) {
            match action {
                Action::PlayAudio(pcm) => {
                    playback_queue.enqueue_pcm16(&pcm);
                }
                Action::FlushPlayback => {
                    println!("[session] [{}] barge-in, flushing playback", wall_ts());
                    playback_queue.flush();
                }
                Action::DispatchTool(record) => {
                    let registry = registry.clone();
                    // Handlers may block on the data RPC; keep the event loop
                    // free while they run.
                    let dispatched = tokio::task::spawn_blocking(move || {
                        let result = registry.dispatch(&record);
                        (record, result)
                    })
                    .await;
                    let (record, result) = match dispatched {
                        Ok(pair) => pair,
                        Err(e) => {
                            log::error!("[session] dispatch task failed: {}", e);
                            continue;
                        }
                    };
                    conversation.record_tool_result(&record, result.clone());
                    let output = Value::String(serialize_result(&result));
                    for msg in
                        provider.tool_result_messages(&record.call_id, &record.tool_name, &output)
                    {
                        handle.send(msg)?;
                    }
                }
                Action::Teardown => {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_parses_on_success() {
        let body = r#"{
            "id": "sess_1",
            "model": "gpt-4o-realtime-preview",
            "expires_at": 1735000000,
            "client_secret": { "value": "ek_abc" }
        }"#;
        let credential = parse_credential_response(200, body).unwrap();
        assert_eq!(credential.id, "sess_1");
        assert_eq!(credential.client_secret.value, "ek_abc");
    }

    #[test]
    fn non_success_status_is_auth_error() {
        let err = parse_credential_response(403, "{}").unwrap_err();
        assert!(matches!(err, VoiceError::Auth(_)));
        assert!(err.to_string().contains("403"));
    }

    #[test]
    fn embedded_error_field_is_auth_error() {
        let err = parse_credential_response(200, r#"{"error": {"message": "bad model"}}"#)
            .unwrap_err();
        assert!(matches!(err, VoiceError::Auth(_)));
    }

    #[test]
    fn missing_secret_is_auth_error() {
        let err = parse_credential_response(200, r#"{"id": "sess_2"}"#).unwrap_err();
        assert!(matches!(err, VoiceError::Auth(_)));
    }

    #[test]
    fn ws_request_carries_provider_headers() {
        let config = ConnectionConfig {
            url: "wss://example.test/v1/realtime".into(),
            headers: vec![("Authorization".into(), "Bearer ek_test".into())],
            init_message: None,
            audio_encoding: AudioEncoding::RawBinary,
            close_message: None,
            sample_rate: 24000,
        };
        let request = build_ws_request(&config).unwrap();
        assert_eq!(
            request.headers().get("Authorization").map(|v| v.as_bytes()),
            Some(&b"Bearer ek_test"[..])
        );
        assert!(request.headers().get("Sec-WebSocket-Key").is_some());
    }

    #[test]
    fn audio_frames_encode_per_provider_framing() {
        let flat = encode_audio_frame(
            &AudioEncoding::Base64Json {
                type_field: "type".into(),
                type_value: "input_audio_buffer.append".into(),
                audio_field: "audio".into(),
            },
            vec![0, 0],
        );
        match flat {
            tungstenite::Message::Text(text) => {
                let value: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(value["type"], "input_audio_buffer.append");
                assert_eq!(value["audio"], "AAA=");
            }
            other => panic!("expected text frame, got {:?}", other),
        }

        let nested = encode_audio_frame(
            &AudioEncoding::Base64Realtime {
                mime_type: "audio/pcm;rate=16000".into(),
            },
            vec![1, 2, 3],
        );
        match nested {
            tungstenite::Message::Text(text) => {
                let value: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(value["realtimeInput"]["audio"]["mimeType"], "audio/pcm;rate=16000");
            }
            other => panic!("expected text frame, got {:?}", other),
        }

        let raw = encode_audio_frame(&AudioEncoding::RawBinary, vec![9, 9]);
        assert!(matches!(raw, tungstenite::Message::Binary(_)));
    }
}
