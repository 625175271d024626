use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Realtime voice backend: "openai" or "gemini".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Trusted backend path that mints ephemeral session credentials.
    #[serde(default = "default_credential_url")]
    pub credential_url: String,
    /// Base URL for the document-store RPC the search tools call.
    #[serde(default = "default_data_rpc_url")]
    pub data_rpc_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Preferred capture device; empty means the system default.
    #[serde(default)]
    pub mic_device: String,
}

impl Settings {
    pub fn mic_device(&self) -> Option<&str> {
        if self.mic_device.is_empty() {
            None
        } else {
            Some(self.mic_device.as_str())
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            credential_url: default_credential_url(),
            data_rpc_url: default_data_rpc_url(),
            model: default_model(),
            voice: default_voice(),
            language: default_language(),
            mic_device: String::new(),
        }
    }
}

fn default_provider() -> String {
    "openai".into()
}
fn default_credential_url() -> String {
    "http://localhost:3000/api/voice/session".into()
}
fn default_data_rpc_url() -> String {
    "http://localhost:3000".into()
}
fn default_model() -> String {
    "gpt-4o-realtime-preview".into()
}
fn default_voice() -> String {
    "coral".into()
}
fn default_language() -> String {
    "en".into()
}

pub fn settings_path() -> Result<PathBuf, String> {
    if let Some(dir) = dirs::data_local_dir() {
        return Ok(dir.join("Haus").join("settings.json"));
    }
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".haus").join("settings.json"));
    }
    Err("Failed to resolve data directory".into())
}

pub fn load() -> Settings {
    let path = match settings_path() {
        Ok(p) => p,
        Err(_) => return Settings::default(),
    };
    match fs::read_to_string(&path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
        Err(_) => Settings::default(),
    }
}

pub fn save(settings: &Settings) -> Result<(), String> {
    let path = settings_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create settings dir: {}", e))?;
    }
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;
    fs::write(&path, json).map_err(|e| format!("Failed to write settings: {}", e))
}
