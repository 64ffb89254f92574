//! SSRF whitelist lookup (spec §4.3). A plain `Arc<HashMap<..>>` built once
//! at startup from config and never mutated again — the teacher's
//! `state/mod.rs::AppState.providers: ArcSwap<HashMap<...>>` is a live-reload
//! mechanism the spec explicitly doesn't want (config is load-once, see
//! DESIGN.md).

use std::sync::Arc;

use gproxy_common::{Registry as RegistryMap, UpstreamEntry};

pub type Registry = Arc<RegistryMap>;

pub fn build(map: RegistryMap) -> Registry {
    Arc::new(map)
}

/// Case-insensitive exact host lookup. `None` means the host is not
/// whitelisted and the caller must reject with `403`.
pub fn lookup<'a>(registry: &'a Registry, host: &str) -> Option<&'a UpstreamEntry> {
    gproxy_common::registry::lookup(registry, host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gproxy_common::registry::builtin_registry;

    #[test]
    fn known_host_resolves_case_insensitively() {
        let registry = build(builtin_registry());
        assert!(lookup(&registry, "API.OPENAI.COM").is_some());
    }

    #[test]
    fn unknown_host_is_rejected() {
        let registry = build(builtin_registry());
        assert!(lookup(&registry, "evil.example.com").is_none());
    }
}
