use bytes::Bytes;
use http::StatusCode;

#[derive(Debug)]
pub struct ProxyError {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ProxyError {
    pub fn bad_request(message: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            body: message.into(),
        }
    }

    pub fn not_found(message: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: message.into(),
        }
    }

    pub fn method_not_allowed(message: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::METHOD_NOT_ALLOWED,
            body: message.into(),
        }
    }

    pub fn payload_too_large(message: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            body: message.into(),
        }
    }

    pub fn bad_gateway(message: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            body: message.into(),
        }
    }

    pub fn gateway_timeout(message: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::GATEWAY_TIMEOUT,
            body: message.into(),
        }
    }

    pub fn internal(message: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: message.into(),
        }
    }

    /// The client-facing `{error: {message, type}}` envelope used for client
    /// errors (spec §7). Policy errors (probe/whitelist) use the raw minimal
    /// body constructors above instead.
    pub fn json_body(message: &str, kind: &str) -> Bytes {
        Bytes::from(
            serde_json::json!({ "error": { "message": message, "type": kind } }).to_string(),
        )
    }
}
