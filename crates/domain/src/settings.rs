//! Recognized configuration options.
//!
//! Every option the runtime reads is enumerated here with its kind,
//! default, and whether its value is a secret (encrypted at rest).
//! Unknown keys are passed through untouched by the registry.

/// Value kind for validation on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Str,
    Int,
    Bool,
}

/// Static metadata for a recognized setting.
#[derive(Debug, Clone, Copy)]
pub struct SettingDef {
    pub key: &'static str,
    pub kind: SettingKind,
    pub default: &'static str,
    pub secret: bool,
    /// Allowed values for enum-like string settings (empty = any).
    pub choices: &'static [&'static str],
}

/// All recognized settings.
///
/// The `auth_*` and `jwt_*` knobs are surfaced for the boundary
/// middleware; the core never reads them.
pub const SETTINGS: &[SettingDef] = &[
    SettingDef { key: "host", kind: SettingKind::Str, default: "127.0.0.1", secret: false, choices: &[] },
    SettingDef { key: "port", kind: SettingKind::Int, default: "8080", secret: false, choices: &[] },
    SettingDef { key: "ollama_base_url", kind: SettingKind::Str, default: "http://localhost:11434", secret: false, choices: &[] },
    SettingDef { key: "ollama_model", kind: SettingKind::Str, default: "llama3.1", secret: false, choices: &[] },
    SettingDef { key: "anthropic_api_key", kind: SettingKind::Str, default: "", secret: true, choices: &[] },
    SettingDef { key: "claude_model", kind: SettingKind::Str, default: "claude-3-5-sonnet-20240620", secret: false, choices: &[] },
    SettingDef { key: "complexity_threshold", kind: SettingKind::Int, default: "50", secret: false, choices: &[] },
    SettingDef { key: "max_research_tasks", kind: SettingKind::Int, default: "5", secret: false, choices: &[] },
    SettingDef { key: "persona_tone", kind: SettingKind::Str, default: "balanced", secret: false, choices: &["balanced", "professional", "casual", "technical"] },
    SettingDef { key: "tool_calling_mode", kind: SettingKind::Str, default: "native", secret: false, choices: &["native", "legacy"] },
    SettingDef { key: "auth_enabled", kind: SettingKind::Bool, default: "false", secret: false, choices: &[] },
    SettingDef { key: "jwt_access_ttl", kind: SettingKind::Int, default: "900", secret: false, choices: &[] },
    SettingDef { key: "jwt_refresh_ttl", kind: SettingKind::Int, default: "604800", secret: false, choices: &[] },
];

/// Settings that require the model router to be rebuilt when they change.
pub const MODEL_KEYS: &[&str] = &[
    "ollama_base_url",
    "ollama_model",
    "anthropic_api_key",
    "claude_model",
    "complexity_threshold",
];

/// Look up the definition of a recognized key.
pub fn lookup(key: &str) -> Option<&'static SettingDef> {
    SETTINGS.iter().find(|d| d.key == key)
}

/// Whether a key's value must be encrypted at rest.
pub fn is_secret(key: &str) -> bool {
    lookup(key).map(|d| d.secret).unwrap_or(false)
}

/// Validate a value against the key's kind and choices.
/// Unknown keys are accepted as-is.
pub fn validate(key: &str, value: &str) -> std::result::Result<(), String> {
    let Some(def) = lookup(key) else {
        return Ok(());
    };
    match def.kind {
        SettingKind::Int => {
            value
                .parse::<i64>()
                .map_err(|_| format!("'{key}' expects an integer, got '{value}'"))?;
        }
        SettingKind::Bool => {
            if !matches!(value, "true" | "false" | "1" | "0") {
                return Err(format!("'{key}' expects a boolean, got '{value}'"));
            }
        }
        SettingKind::Str => {}
    }
    if !def.choices.is_empty() && !def.choices.contains(&value) {
        return Err(format!(
            "'{key}' must be one of {:?}, got '{value}'",
            def.choices
        ));
    }
    // complexity_threshold is additionally range-clamped by the router;
    // reject clearly invalid values here.
    if key == "complexity_threshold" {
        let v: i64 = value.parse().unwrap_or(-1);
        if !(0..=100).contains(&v) {
            return Err(format!("'complexity_threshold' must be in [0,100], got '{value}'"));
        }
    }
    Ok(())
}
