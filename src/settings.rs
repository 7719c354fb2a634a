use serde::{Deserialize, Serialize};

/// Greeting seeded into a new thread when the organization has not configured
/// one of its own.
pub const DEFAULT_GREETING: &str = "Hello, how can we help you today?";

/// Voice-assistant configuration consumed by the widget client. The voice SDK
/// itself runs client-side; this service only stores and serves the settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VoiceSettings {
    pub enabled: bool,
    pub assistant_id: Option<String>,
    pub phone_number: Option<String>,
}

/// Per-organization widget configuration. Read-only from the conversation
/// flow; written through the dashboard customization surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WidgetSettings {
    pub greeting: Option<String>,
    #[serde(default)]
    pub default_suggestions: Vec<String>,
    #[serde(default)]
    pub voice: VoiceSettings,
}

impl WidgetSettings {
    pub fn greeting_or_default(&self) -> &str {
        self.greeting
            .as_deref()
            .filter(|greeting| !greeting.trim().is_empty())
            .unwrap_or(DEFAULT_GREETING)
    }
}

pub fn resolve_greeting(settings: Option<&WidgetSettings>) -> String {
    settings
        .map(|s| s.greeting_or_default().to_string())
        .unwrap_or_else(|| DEFAULT_GREETING.to_string())
}
