//! End-to-end state machine coverage driven by scripted event sequences,
//! the same stream a live transport would deliver, minus the network.

use haus_voice::backend::StaticDataRpc;
use haus_voice::params::{Amenity, ParamField, PermanentTag};
use haus_voice::provider::{create_provider, RealtimeProvider, SessionEvent};
use haus_voice::state::{Action, Conversation, Role, SessionStatus};
use haus_voice::tools::{default_registry, serialize_result, UiBridge};
use serde_json::json;
use std::sync::Arc;

/// A full happy-path conversation: connect, user turn, tool round trip,
/// assistant reply, model-initiated close.
#[test]
fn full_conversation_flow() {
    let ui = UiBridge::new();
    let registry = default_registry(Arc::new(StaticDataRpc::with_demo_listings()), ui.clone());

    let mut conversation = Conversation::new();
    conversation.begin_connect();
    assert_eq!(conversation.status, SessionStatus::Connecting);

    conversation.apply(SessionEvent::Opened);
    assert_eq!(conversation.status, SessionStatus::Active);
    assert!(conversation.listening);

    // User asks for a property.
    conversation.apply(SessionEvent::SpeechStarted);
    for chunk in ["show me apartments ", "in Bondi ", "with a pool"] {
        conversation.apply(SessionEvent::TranscriptDelta {
            item_id: "turn-1".into(),
            role: Role::User,
            text: chunk.into(),
        });
    }
    conversation.apply(SessionEvent::SpeechStopped);
    conversation.apply(SessionEvent::TranscriptDone {
        item_id: "turn-1".into(),
        role: Role::User,
        text: "Show me apartments in Bondi with a pool.".into(),
    });

    // The model extracts parameters through a tool call.
    let actions = conversation.apply(SessionEvent::ToolCall {
        call_id: "call-1".into(),
        item_id: Some("turn-2".into()),
        name: "searchProperties".into(),
        arguments: json!({
            "location": "Bondi",
            "propertyType": "apartment",
            "amenities": ["pool"],
        }),
    });
    let record = match actions.as_slice() {
        [Action::DispatchTool(record)] => record.clone(),
        other => panic!("expected a single dispatch, got {:?}", other),
    };

    // Parameters landed before dispatch, with glow on the changed fields.
    assert_eq!(conversation.params.location.as_deref(), Some("Bondi"));
    assert_eq!(conversation.params.property_type.as_deref(), Some("apartment"));
    assert_eq!(conversation.params.amenities, vec![Amenity::Pool]);
    assert!(conversation.glow.contains(&ParamField::Location));

    // Dispatch resolves against the canned backend and correlates back.
    let result = registry.dispatch(&record);
    assert_eq!(result["success"], true);
    conversation.record_tool_result(&record, result.clone());
    assert!(serialize_result(&result).len() <= haus_voice::tools::TOOL_RESULT_MAX_CHARS);

    // Assistant replies with audio and transcript.
    conversation.apply(SessionEvent::AssistantStarted);
    let actions = conversation.apply(SessionEvent::AssistantAudio(vec![0, 1, 2, 3]));
    assert!(matches!(actions.as_slice(), [Action::PlayAudio(_)]));
    conversation.apply(SessionEvent::TranscriptDone {
        item_id: "turn-2".into(),
        role: Role::Assistant,
        text: "I found two apartments in Bondi with a pool.".into(),
    });
    conversation.apply(SessionEvent::AssistantFinished);
    assert!(!conversation.assistant_speaking);

    // Model closes the session; transcript is discarded, no reply is sent.
    let actions = conversation.apply(SessionEvent::ToolCall {
        call_id: "call-2".into(),
        item_id: None,
        name: "endConversation".into(),
        arguments: json!({}),
    });
    assert_eq!(actions, vec![Action::Teardown]);
    assert_eq!(conversation.status, SessionStatus::Closed);
    assert!(conversation.messages.is_empty());
    // Parameters survive for the results page.
    assert_eq!(conversation.params.location.as_deref(), Some("Bondi"));
}

/// Barge-in mid-reply must flush playback without ending the session.
#[test]
fn barge_in_keeps_session_alive() {
    let mut conversation = Conversation::new();
    conversation.begin_connect();
    conversation.apply(SessionEvent::Opened);
    conversation.apply(SessionEvent::AssistantStarted);

    let actions = conversation.apply(SessionEvent::Interrupted);
    assert_eq!(actions, vec![Action::FlushPlayback]);
    assert_eq!(conversation.status, SessionStatus::Active);
    assert!(conversation.listening);
}

/// A mid-session channel fault keeps the transcript but lands in error.
#[test]
fn channel_fault_preserves_progress() {
    let mut conversation = Conversation::new();
    conversation.begin_connect();
    conversation.apply(SessionEvent::Opened);
    conversation.apply(SessionEvent::TranscriptDelta {
        item_id: "turn-1".into(),
        role: Role::User,
        text: "three bedrooms in Newtown".into(),
    });
    conversation.apply(SessionEvent::ToolCall {
        call_id: "call-1".into(),
        item_id: None,
        name: "searchProperties".into(),
        arguments: json!({ "location": "Newtown", "bedroomsMin": 3 }),
    });

    let actions = conversation.apply(SessionEvent::Error("connection reset by peer".into()));
    assert_eq!(actions, vec![Action::Teardown]);
    assert_eq!(conversation.status, SessionStatus::Error);
    // The driver's teardown stop() must not mask the failure.
    conversation.stop();
    assert_eq!(conversation.status, SessionStatus::Error);
    assert_eq!(conversation.messages.len(), 1);
    assert_eq!(conversation.params.location.as_deref(), Some("Newtown"));
    assert_eq!(conversation.params.bedrooms, Some(3));

    // A fresh start clears the error and the stale transcript.
    conversation.begin_connect();
    assert!(conversation.error.is_none());
    assert!(conversation.messages.is_empty());
    assert_eq!(conversation.status, SessionStatus::Connecting);
}

/// The same wire transcript through both adapters produces equivalent
/// normalized turns; the translator isolates every provider difference.
#[test]
fn adapters_normalize_to_the_same_events() {
    let openai = create_provider("openai");
    let gemini = create_provider("gemini");

    let openai_events = openai.parse_event(
        r#"{"type":"conversation.item.input_audio_transcription.delta","item_id":"i1","delta":"hello"}"#,
    );
    let gemini_events =
        gemini.parse_event(r#"{"serverContent":{"inputTranscription":{"text":"hello"}}}"#);

    let text_of = |events: &[SessionEvent]| match events {
        [SessionEvent::TranscriptDelta { role, text, .. }] => (*role, text.clone()),
        other => panic!("expected one delta, got {:?}", other),
    };
    assert_eq!(text_of(&openai_events), (Role::User, "hello".to_string()));
    assert_eq!(text_of(&gemini_events), (Role::User, "hello".to_string()));
}

/// Tool calls parsed off the wire run through the registry and produce a
/// correlated result even for names nobody registered.
#[test]
fn wire_tool_call_round_trip_with_unknown_name() {
    let ui = UiBridge::new();
    let registry = default_registry(Arc::new(StaticDataRpc::with_demo_listings()), ui);
    let provider = create_provider("openai");

    let events = provider.parse_event(
        r#"{"type":"response.function_call_arguments.done","call_id":"c9","item_id":"i9","name":"bookInspection","arguments":"{\"propertyId\":\"prop-001\"}"}"#,
    );

    let mut conversation = Conversation::new();
    conversation.begin_connect();
    conversation.apply(SessionEvent::Opened);

    let mut dispatched = None;
    for event in events {
        for action in conversation.apply(event) {
            if let Action::DispatchTool(record) = action {
                dispatched = Some(registry.dispatch(&record));
            }
        }
    }
    let result = dispatched.expect("tool call should dispatch");
    assert_eq!(result, json!({ "success": true, "toolName": "bookInspection" }));
    // The reply envelope still correlates by call id.
    let messages = provider.tool_result_messages("c9", "bookInspection", &result);
    assert_eq!(messages[0]["item"]["call_id"], "c9");

    // The conversation is unharmed.
    assert_eq!(conversation.status, SessionStatus::Active);
}

#[test]
fn permanent_tags_accumulate_across_turns() {
    let mut conversation = Conversation::new();
    conversation.begin_connect();
    conversation.apply(SessionEvent::Opened);

    conversation.apply_params(&haus_voice::params::ParamUpdate {
        tags: vec![PermanentTag::Premium],
        ..Default::default()
    });
    conversation.apply_params(&haus_voice::params::ParamUpdate {
        tags: vec![PermanentTag::Premium, PermanentTag::OpenHouse],
        ..Default::default()
    });
    assert_eq!(
        conversation.params.tags,
        vec![PermanentTag::Premium, PermanentTag::OpenHouse]
    );
}
