pub mod audio;
pub mod backend;
pub mod demo;
pub mod params;
pub mod provider;
pub mod settings;
pub mod state;
pub mod tools;

use thiserror::Error;

/// Error taxonomy for the voice session layer.
///
/// Fatal conditions bubble up to the conversation state machine exactly once;
/// no component retries on its own. The only recovery path is the caller
/// starting a fresh session.
#[derive(Error, Debug, Clone)]
pub enum VoiceError {
    /// Microphone access denied by the user or OS. Surfaced, never retried.
    #[error("Microphone access denied: {0}")]
    Permission(String),

    /// No usable input/output device, or the capture stream failed to build.
    #[error("Audio device error: {0}")]
    Device(String),

    /// Credential fetch or validation failed. Session aborted.
    #[error("Credential fetch failed: {0}")]
    Auth(String),

    /// Realtime channel or media setup failed. Session aborted.
    #[error("Channel negotiation failed: {0}")]
    Negotiation(String),

    /// A control message was submitted after teardown began.
    #[error("Control channel not ready: {0}")]
    ChannelNotReady(String),

    /// Mid-session transport fault. Session forced closed.
    #[error("Realtime channel fault: {0}")]
    Channel(String),

    /// A tool handler failed. Caught inside the dispatcher and converted to
    /// a soft result so the conversation continues.
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// Backend data RPC failure.
    #[error("Data RPC error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, VoiceError>;
