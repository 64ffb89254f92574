use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Which upstream-side credential shape a host expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    OpenAi,
    Anthropic,
    Google,
}

impl AuthScheme {
    /// Path-based inference used when a registry entry doesn't pin one
    /// (§4.1: `/anthropic/` or `/v1/messages` ⇒ anthropic; otherwise openai).
    pub fn infer_from_path(path: &str) -> Self {
        let normalized = format!("/{}", path.trim_start_matches('/'));
        if normalized.contains("/anthropic/") || normalized.ends_with("/v1/messages") {
            AuthScheme::Anthropic
        } else {
            AuthScheme::OpenAi
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// One entry of the SSRF whitelist: a host this gateway is willing to
/// connect out to, and how to treat it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamEntry {
    pub auth_scheme: Option<AuthScheme>,
    pub scheme: Scheme,
}

/// Read-only host -> descriptor map. Built once at startup, never mutated.
pub type Registry = HashMap<String, UpstreamEntry>;

/// Minimal built-in whitelist used when the config document is absent or
/// doesn't override a given host (spec §6: "absence ⇒ built-in minimal
/// whitelist containing at least api.openai.com and
/// generativelanguage.googleapis.com").
pub fn builtin_registry() -> Registry {
    let mut registry = Registry::new();
    registry.insert(
        "api.openai.com".to_string(),
        UpstreamEntry {
            auth_scheme: Some(AuthScheme::OpenAi),
            scheme: Scheme::Https,
        },
    );
    registry.insert(
        "generativelanguage.googleapis.com".to_string(),
        UpstreamEntry {
            auth_scheme: Some(AuthScheme::Google),
            scheme: Scheme::Https,
        },
    );
    registry
}

/// Case-insensitive exact-match lookup; the SSRF boundary (§4.3).
pub fn lookup<'a>(registry: &'a Registry, host: &str) -> Option<&'a UpstreamEntry> {
    registry.get(&host.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_covers_required_hosts() {
        let registry = builtin_registry();
        assert!(lookup(&registry, "api.openai.com").is_some());
        assert!(lookup(&registry, "API.OPENAI.COM").is_some());
        assert!(lookup(&registry, "generativelanguage.googleapis.com").is_some());
        assert!(lookup(&registry, "evil.example.com").is_none());
    }

    #[test]
    fn auth_scheme_inferred_from_path() {
        assert_eq!(
            AuthScheme::infer_from_path("anthropic/v1/messages"),
            AuthScheme::Anthropic
        );
        assert_eq!(
            AuthScheme::infer_from_path("v1/messages"),
            AuthScheme::Anthropic
        );
        assert_eq!(
            AuthScheme::infer_from_path("v1/chat/completions"),
            AuthScheme::OpenAi
        );
    }
}
