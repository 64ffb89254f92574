//! Pre-dispatch junk-traffic predicate (spec §4.2) plus the body-size cap
//! (§4.1 step 2). Both run as ordered stages of one pipeline so there is a
//! single set of short-circuit rules and a single rejection counter, rather
//! than splitting size enforcement into middleware and UA/path rules into a
//! separate log filter (see DESIGN.md Open Question 2).

use std::sync::atomic::{AtomicU64, Ordering};

use gproxy_common::ProbeFilterConfig;
use http::{HeaderMap, Method};

use crate::error::ProxyError;

pub const MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;

/// Counts requests rejected by the probe filter. Spec §4.2 calls for "no log
/// entry beyond a counter" on a probe match.
#[derive(Debug, Default)]
pub struct ProbeCounter {
    rejected: AtomicU64,
}

impl ProbeCounter {
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn increment(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }
}

/// Runs the probe filter, then the body-size cap, in that order. Returns the
/// rejection as a `ProxyError` ready to send back to the client.
pub fn check(
    config: &ProbeFilterConfig,
    counter: &ProbeCounter,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    peer_addr: Option<&str>,
    content_length: Option<u64>,
) -> Result<(), ProxyError> {
    if matches_probe(config, method, path, headers, peer_addr) {
        counter.increment();
        return Err(ProxyError::forbidden("forbidden"));
    }

    if let Some(len) = content_length
        && len > MAX_BODY_BYTES
    {
        return Err(ProxyError::payload_too_large("payload too large"));
    }

    Ok(())
}

fn matches_probe(
    config: &ProbeFilterConfig,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    peer_addr: Option<&str>,
) -> bool {
    let normalized = format!("/{}", path.trim_start_matches('/'));

    if !config
        .allowed_methods
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(method.as_str()))
    {
        return true;
    }

    if config.path_blocklist.iter().any(|blocked| blocked == &normalized) {
        return true;
    }

    if config
        .path_prefix_blocklist
        .iter()
        .any(|prefix| normalized.starts_with(prefix.as_str()))
    {
        return true;
    }

    if let Some(ua) = headers
        .get(http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        && config
            .user_agent_substrings
            .iter()
            .any(|needle| ua.contains(needle.as_str()))
    {
        return true;
    }

    if let Some(ip) = peer_addr
        && config.ip_blocklist.iter().any(|blocked| blocked == ip)
    {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_ua(ua: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::USER_AGENT, ua.parse().unwrap());
        headers
    }

    #[test]
    fn scanner_user_agent_is_rejected() {
        let config = ProbeFilterConfig::default();
        let counter = ProbeCounter::default();
        let headers = headers_with_ua("CensysInspect/1.2");
        let result = check(&config, &counter, &Method::GET, "/", &headers, None, None);
        assert!(result.is_err());
        assert_eq!(counter.rejected(), 1);
    }

    #[test]
    fn ordinary_request_passes() {
        let config = ProbeFilterConfig::default();
        let counter = ProbeCounter::default();
        let headers = headers_with_ua("my-client/1.0");
        let result = check(
            &config,
            &counter,
            &Method::POST,
            "/api.openai.com/v1/chat/completions",
            &headers,
            None,
            Some(128),
        );
        assert!(result.is_ok());
        assert_eq!(counter.rejected(), 0);
    }

    #[test]
    fn oversized_body_is_413_not_probe_rejection() {
        let config = ProbeFilterConfig::default();
        let counter = ProbeCounter::default();
        let headers = headers_with_ua("my-client/1.0");
        let result = check(
            &config,
            &counter,
            &Method::POST,
            "/api.openai.com/v1/chat/completions",
            &headers,
            None,
            Some(MAX_BODY_BYTES + 1),
        );
        let err = result.unwrap_err();
        assert_eq!(err.status, http::StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(counter.rejected(), 0);
    }

    #[test]
    fn blocklisted_path_is_rejected() {
        let config = ProbeFilterConfig::default();
        let counter = ProbeCounter::default();
        let headers = headers_with_ua("my-client/1.0");
        let result = check(&config, &counter, &Method::GET, "/.env", &headers, None, None);
        assert!(result.is_err());
    }
}
