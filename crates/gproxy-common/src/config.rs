use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::probe_config::{ProbeFilterConfig, ProbeFilterDoc, ProbeRequestDoc};
use crate::registry::{builtin_registry, AuthScheme, Registry, Scheme, UpstreamEntry};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown auth_type {0:?} for allowed_domains entry")]
    UnknownAuthType(String),
    #[error("default_upstream {0:?} is not present in allowed_domains")]
    UnknownDefaultUpstream(String),
}

#[derive(Debug, Clone, Deserialize)]
struct UpstreamEntryDoc {
    auth_type: Option<String>,
    #[serde(default = "default_true")]
    https: bool,
}

fn default_true() -> bool {
    true
}

/// The on-disk shape of the optional startup configuration document
/// (spec §6). Every field is optional; absence of the whole file, or of any
/// one key, falls back to built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigDocument {
    allowed_domains: Option<HashMap<String, UpstreamEntryDoc>>,
    probe_request: Option<ProbeRequestDoc>,
    probe_filter: Option<ProbeFilterDoc>,
    /// Host (must be a key of `allowed_domains`) used as the OpenAI-compat
    /// facade's default upstream when the requested model isn't
    /// Gemini-prefixed. Not named by the spec's three documented keys; added
    /// to resolve Open Question 1 without silently guessing an upstream.
    default_upstream: Option<String>,
    /// Bind port, overridable here so a config file alone can set it
    /// (the CLI `--port` flag still takes precedence, see apps/gproxy).
    port: Option<u16>,
}

/// Final, immutable policy snapshot the rest of the process reads from.
/// Loaded once at startup; never mutated afterward (spec §5).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub registry: Registry,
    pub probe: ProbeFilterConfig,
    pub default_upstream: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            registry: builtin_registry(),
            probe: ProbeFilterConfig::default(),
            default_upstream: None,
        }
    }
}

impl GatewayConfig {
    /// Loads the config document at `path` if it exists, merges it over the
    /// built-in defaults, and returns the resulting immutable snapshot.
    /// A missing file is not an error (spec §2: "Absent file ⇒ built-in
    /// minimal defaults").
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let doc: ConfigDocument =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_document(doc)
    }

    fn from_document(doc: ConfigDocument) -> Result<Self, ConfigError> {
        let mut registry = builtin_registry();
        if let Some(domains) = doc.allowed_domains {
            for (host, entry) in domains {
                let auth_scheme = match entry.auth_type.as_deref() {
                    None => None,
                    Some("openai") => Some(AuthScheme::OpenAi),
                    Some("anthropic") => Some(AuthScheme::Anthropic),
                    Some("google") => Some(AuthScheme::Google),
                    Some(other) => return Err(ConfigError::UnknownAuthType(other.to_string())),
                };
                registry.insert(
                    host.to_ascii_lowercase(),
                    UpstreamEntry {
                        auth_scheme,
                        scheme: if entry.https { Scheme::Https } else { Scheme::Http },
                    },
                );
            }
        }

        if let Some(default_upstream) = &doc.default_upstream {
            let key = default_upstream.to_ascii_lowercase();
            if !registry.contains_key(&key) {
                return Err(ConfigError::UnknownDefaultUpstream(default_upstream.clone()));
            }
        }

        let probe = ProbeFilterConfig::default().merge(doc.probe_request, doc.probe_filter);

        Ok(Self {
            port: doc.port.unwrap_or(8080),
            registry,
            probe,
            default_upstream: doc.default_upstream.map(|v| v.to_ascii_lowercase()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = GatewayConfig::load(Path::new("/nonexistent/gproxy-config.json")).unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.registry.contains_key("api.openai.com"));
    }

    #[test]
    fn parses_allowed_domains_and_default_upstream() {
        let doc: ConfigDocument = serde_json::from_str(
            r#"{
                "allowed_domains": {
                    "api.deepseek.com": {"auth_type": "openai", "https": true}
                },
                "default_upstream": "api.deepseek.com"
            }"#,
        )
        .unwrap();
        let config = GatewayConfig::from_document(doc).unwrap();
        assert!(config.registry.contains_key("api.deepseek.com"));
        assert_eq!(config.default_upstream.as_deref(), Some("api.deepseek.com"));
    }

    #[test]
    fn rejects_default_upstream_not_in_registry() {
        let doc: ConfigDocument = serde_json::from_str(
            r#"{"default_upstream": "not-registered.example.com"}"#,
        )
        .unwrap();
        assert!(GatewayConfig::from_document(doc).is_err());
    }
}
