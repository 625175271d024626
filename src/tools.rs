use crate::backend::DataRpc;
use crate::VoiceError;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Upper bound on a serialized tool result sent over the control channel.
/// Oversized payloads (a big search result page) are cut here rather than
/// risking the transport rejecting the message.
pub const TOOL_RESULT_MAX_CHARS: usize = 15_000;

/// Pages the model is allowed to navigate to.
const KNOWN_PAGES: &[&str] = &[
    "home",
    "buy",
    "rent",
    "sell",
    "agents",
    "agencies",
    "services",
    "commercial",
    "concierge",
];

const KNOWN_THEMES: &[&str] = &["light", "dark", "system"];

/// Ephemeral correlation entry for one model-issued tool call. Created when
/// the tool-call event arrives, discarded once the result has been handed to
/// the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub message_id: Option<String>,
}

type ToolHandler = Box<dyn Fn(&Value) -> crate::Result<Value> + Send + Sync>;

/// UI-facing state the tool handlers close over: the router target and the
/// active theme. The session driver reads these after dispatch; rendering is
/// someone else's job.
#[derive(Debug, Default)]
pub struct UiBridge {
    page: Mutex<Option<String>>,
    theme: Mutex<Option<String>>,
}

impl UiBridge {
    pub fn new() -> Arc<UiBridge> {
        Arc::new(UiBridge::default())
    }

    pub fn navigate(&self, page: &str) {
        if let Ok(mut guard) = self.page.lock() {
            *guard = Some(page.to_string());
        }
    }

    pub fn set_theme(&self, theme: &str) {
        if let Ok(mut guard) = self.theme.lock() {
            *guard = Some(theme.to_string());
        }
    }

    pub fn current_page(&self) -> Option<String> {
        self.page.lock().ok().and_then(|g| g.clone())
    }

    pub fn current_theme(&self) -> Option<String> {
        self.theme.lock().ok().and_then(|g| g.clone())
    }
}

/// Registry mapping tool names to handlers, populated at startup.
///
/// Dispatch never throws outward: handler failures become
/// `{"success": false, "error": ...}` results so the conversation continues,
/// and unregistered names get a generic acknowledgement instead of breaking
/// the turn when the model hallucinates a tool.
pub struct ToolRegistry {
    handlers: HashMap<String, ToolHandler>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&Value) -> crate::Result<Value> + Send + Sync + 'static,
    {
        self.handlers.insert(name.to_string(), Box::new(handler));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Execute one tool call and produce its correlated result.
    pub fn dispatch(&self, record: &ToolCallRecord) -> Value {
        match self.handlers.get(&record.tool_name) {
            Some(handler) => match handler(&record.arguments) {
                Ok(result) => result,
                Err(e) => {
                    log::error!("[tools] {} failed: {}", record.tool_name, e);
                    json!({ "success": false, "error": e.to_string() })
                }
            },
            None => {
                log::warn!(
                    "[tools] unregistered tool \"{}\" acknowledged",
                    record.tool_name
                );
                json!({ "success": true, "toolName": record.tool_name })
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize a result for the wire, bounded by `TOOL_RESULT_MAX_CHARS`.
pub fn serialize_result(result: &Value) -> String {
    let mut text = result.to_string();
    if text.chars().count() > TOOL_RESULT_MAX_CHARS {
        text = text.chars().take(TOOL_RESULT_MAX_CHARS).collect();
    }
    text
}

/// The tool surface exposed to the model: fixed names with JSON-schema
/// parameter declarations. Sent to the credential endpoint as `customTools`.
pub fn tool_declarations() -> Value {
    json!([
        {
            "name": "searchProperties",
            "description": "Search listings matching the user's criteria. Call whenever the user states or refines a requirement.",
            "parameters": {
                "type": "object",
                "properties": {
                    "location": { "type": "string", "description": "Suburb or region, e.g. Bondi" },
                    "priceMin": { "type": "integer" },
                    "priceMax": { "type": "integer" },
                    "bedroomsMin": { "type": "integer" },
                    "propertyType": { "type": "string", "enum": ["house", "apartment", "townhouse", "villa", "studio", "land"] },
                    "amenities": { "type": "array", "items": { "type": "string" } }
                }
            }
        },
        {
            "name": "getPropertyDetails",
            "description": "Fetch full details for one property by id.",
            "parameters": {
                "type": "object",
                "properties": {
                    "propertyId": { "type": "string" }
                },
                "required": ["propertyId"]
            }
        },
        {
            "name": "navigateTo",
            "description": "Navigate the app to a page.",
            "parameters": {
                "type": "object",
                "properties": {
                    "page": { "type": "string", "enum": KNOWN_PAGES }
                },
                "required": ["page"]
            }
        },
        {
            "name": "changeTheme",
            "description": "Switch the app color theme.",
            "parameters": {
                "type": "object",
                "properties": {
                    "theme": { "type": "string", "enum": KNOWN_THEMES }
                },
                "required": ["theme"]
            }
        },
        {
            "name": "endConversation",
            "description": "End the voice session when the user is done.",
            "parameters": { "type": "object", "properties": {} }
        }
    ])
}

/// Build the standard registry. `endConversation` is not registered here:
/// the state machine intercepts it before dispatch and no reply is sent.
pub fn default_registry(rpc: Arc<dyn DataRpc>, ui: Arc<UiBridge>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    let search_rpc = rpc.clone();
    registry.register("searchProperties", move |args| {
        let results = search_rpc.query("properties:search", args.clone())?;
        Ok(json!({ "success": true, "results": results }))
    });

    let details_rpc = rpc;
    registry.register("getPropertyDetails", move |args| {
        let property_id = args
            .get("propertyId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| VoiceError::ToolExecution("propertyId missing".into()))?;
        let details = details_rpc.query("properties:get", json!({ "id": property_id }))?;
        Ok(json!({ "success": true, "property": details }))
    });

    let nav_ui = ui.clone();
    registry.register("navigateTo", move |args| {
        let page = args
            .get("page")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_lowercase();
        if !KNOWN_PAGES.contains(&page.as_str()) {
            return Err(VoiceError::ToolExecution(format!("unknown page: {}", page)));
        }
        nav_ui.navigate(&page);
        Ok(json!({ "success": true, "page": page }))
    });

    let theme_ui = ui;
    registry.register("changeTheme", move |args| {
        let theme = args
            .get("theme")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_lowercase();
        if !KNOWN_THEMES.contains(&theme.as_str()) {
            return Err(VoiceError::ToolExecution(format!("unknown theme: {}", theme)));
        }
        theme_ui.set_theme(&theme);
        Ok(json!({ "success": true, "theme": theme }))
    });

    registry
}
