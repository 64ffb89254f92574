//! Outbound credential translation (spec §4.4). This is an inversion of the
//! teacher's `auth.rs`, which validated *inbound* API keys against a
//! `MemoryAuth` snapshot; here the client's credential is extracted once and
//! re-emitted in whatever shape the resolved upstream expects. The
//! bearer/`x-api-key` extraction order is kept from the teacher's
//! `extract_api_key` helper.

use gproxy_common::AuthScheme;
use http::{HeaderMap, HeaderName, HeaderValue};

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Headers to send upstream, plus an optional query-string fragment (used by
/// the Google scheme's `?key=` credential).
pub struct Translated {
    pub headers: HeaderMap,
    pub query_suffix: Option<String>,
}

/// Extracts the caller's credential: `Authorization: Bearer <tok>` first,
/// then `x-api-key: <tok>`, else empty.
pub fn extract_token(headers: &HeaderMap) -> String {
    if let Some(value) = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        let trimmed = value.trim();
        if let Some(token) = trimmed
            .strip_prefix("Bearer ")
            .or_else(|| trimmed.strip_prefix("bearer "))
        {
            return token.trim().to_string();
        }
    }
    if let Some(value) = headers.get("x-api-key").and_then(|value| value.to_str().ok()) {
        return value.trim().to_string();
    }
    String::new()
}

fn is_hop_by_hop(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    HOP_BY_HOP.contains(&lower.as_str()) || lower.starts_with("proxy-")
}

fn propagate_passthrough_headers(inbound: &HeaderMap, out: &mut HeaderMap) {
    for (name, value) in inbound.iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if is_hop_by_hop(&lower) {
            continue;
        }
        let keep = lower == "accept"
            || lower == "accept-encoding"
            || (lower.starts_with("x-") && lower != "x-api-key");
        if keep {
            out.append(name.clone(), value.clone());
        }
    }
}

/// Translates the caller's credential and headers into the shape the given
/// upstream auth scheme expects.
pub fn translate(scheme: AuthScheme, inbound: &HeaderMap) -> Translated {
    let token = extract_token(inbound);
    let mut headers = HeaderMap::new();
    propagate_passthrough_headers(inbound, &mut headers);
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    match scheme {
        AuthScheme::OpenAi => {
            if !token.is_empty()
                && let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}"))
            {
                headers.insert(http::header::AUTHORIZATION, value);
            }
            Translated {
                headers,
                query_suffix: None,
            }
        }
        AuthScheme::Anthropic => {
            if !token.is_empty()
                && let Ok(value) = HeaderValue::from_str(&token)
            {
                headers.insert(HeaderName::from_static("x-api-key"), value);
            }
            let version = inbound
                .get("anthropic-version")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("2023-06-01");
            if let Ok(value) = HeaderValue::from_str(version) {
                headers.insert(HeaderName::from_static("anthropic-version"), value);
            }
            Translated {
                headers,
                query_suffix: None,
            }
        }
        AuthScheme::Google => {
            let query_suffix = if token.is_empty() {
                None
            } else {
                Some(format!("key={}", percent_encode(&token)))
            };
            Translated {
                headers,
                query_suffix,
            }
        }
    }
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        headers
    }

    #[test]
    fn openai_scheme_emits_bearer_and_json_content_type() {
        let translated = translate(AuthScheme::OpenAi, &headers_with_bearer("sk-X"));
        assert_eq!(
            translated.headers.get(http::header::AUTHORIZATION).unwrap(),
            "Bearer sk-X"
        );
        assert_eq!(translated.headers.get(http::header::CONTENT_TYPE).unwrap(), "application/json");
        assert!(translated.query_suffix.is_none());
    }

    #[test]
    fn anthropic_scheme_emits_x_api_key_and_default_version() {
        let translated = translate(AuthScheme::Anthropic, &headers_with_bearer("sk-ant-X"));
        assert_eq!(translated.headers.get("x-api-key").unwrap(), "sk-ant-X");
        assert_eq!(translated.headers.get("anthropic-version").unwrap(), "2023-06-01");
    }

    #[test]
    fn anthropic_scheme_preserves_caller_supplied_version() {
        let mut headers = headers_with_bearer("sk-ant-X");
        headers.insert("anthropic-version", "2024-01-01".parse().unwrap());
        let translated = translate(AuthScheme::Anthropic, &headers);
        assert_eq!(translated.headers.get("anthropic-version").unwrap(), "2024-01-01");
    }

    #[test]
    fn google_scheme_has_no_auth_header_but_a_key_query_suffix() {
        let translated = translate(AuthScheme::Google, &headers_with_bearer("AIzaX"));
        assert!(translated.headers.get(http::header::AUTHORIZATION).is_none());
        assert_eq!(translated.query_suffix.as_deref(), Some("key=AIzaX"));
    }

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = headers_with_bearer("sk-X");
        headers.insert(http::header::CONNECTION, "keep-alive".parse().unwrap());
        headers.insert(http::header::HOST, "localhost".parse().unwrap());
        let translated = translate(AuthScheme::OpenAi, &headers);
        assert!(translated.headers.get(http::header::CONNECTION).is_none());
        assert!(translated.headers.get(http::header::HOST).is_none());
    }

    #[test]
    fn x_api_key_extraction_falls_back_when_no_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "raw-key".parse().unwrap());
        assert_eq!(extract_token(&headers), "raw-key");
    }

    #[test]
    fn extract_token_is_empty_with_no_credential_headers() {
        // dispatch_upstream rejects this with 403 before ever calling translate.
        assert_eq!(extract_token(&HeaderMap::new()), "");
    }
}
