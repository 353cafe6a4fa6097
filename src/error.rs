//! Request-failure taxonomy and HTTP response helpers

use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};

/// Boxed error type shared by fixed and streamed response bodies
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Response body type used throughout the gateway. Unsync because the
/// streamed upstream body is not guaranteed to be Sync.
pub type GatewayBody = UnsyncBoxBody<Bytes, BoxError>;

/// Terminal per-request failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorCode {
    /// Unknown path tenant identity
    TenantNotFound,
    /// Required query parameters missing or unreadable
    MalformedRequest,
    /// Challenge signature did not verify
    InvalidSignature,
    /// Callback body failed envelope parsing
    MalformedEnvelope,
    /// Tenant data format carries no envelope
    UnsupportedFormat,
    /// Envelope ciphertext failed to decrypt
    DecryptFailed,
    /// Embedded tenant identity differs from the path identity
    TenantMismatch,
    /// Proxy target URL could not be constructed
    BadTargetUrl,
    /// Upstream round trip failed at the transport level
    UpstreamUnreachable,
    /// Method not supported on this path
    MethodNotAllowed,
}

impl GatewayErrorCode {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayErrorCode::TenantNotFound => StatusCode::NOT_FOUND,
            GatewayErrorCode::MalformedRequest
            | GatewayErrorCode::InvalidSignature
            | GatewayErrorCode::MalformedEnvelope
            | GatewayErrorCode::UnsupportedFormat
            | GatewayErrorCode::DecryptFailed
            | GatewayErrorCode::TenantMismatch
            | GatewayErrorCode::BadTargetUrl => StatusCode::BAD_REQUEST,
            GatewayErrorCode::UpstreamUnreachable => StatusCode::BAD_GATEWAY,
            GatewayErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    /// Get the error code as a string for the X-Gateway-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            GatewayErrorCode::TenantNotFound => "TENANT_NOT_FOUND",
            GatewayErrorCode::MalformedRequest => "MALFORMED_REQUEST",
            GatewayErrorCode::InvalidSignature => "INVALID_SIGNATURE",
            GatewayErrorCode::MalformedEnvelope => "MALFORMED_ENVELOPE",
            GatewayErrorCode::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            GatewayErrorCode::DecryptFailed => "DECRYPT_FAILED",
            GatewayErrorCode::TenantMismatch => "TENANT_MISMATCH",
            GatewayErrorCode::BadTargetUrl => "BAD_TARGET_URL",
            GatewayErrorCode::UpstreamUnreachable => "UPSTREAM_UNREACHABLE",
            GatewayErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
        }
    }
}

/// Empty response body
pub fn empty_body() -> GatewayBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Fixed response body
pub fn full_body(content: impl Into<Bytes>) -> GatewayBody {
    Full::new(content.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Build the terminal response for a failed request.
///
/// Validation failures carry an empty body; upstream failures carry a
/// generic body so no upstream error detail leaks to the caller. The code
/// itself is exposed in the X-Gateway-Error header.
pub fn error_response(code: GatewayErrorCode) -> Response<GatewayBody> {
    let body = match code {
        GatewayErrorCode::UpstreamUnreachable => full_body("upstream request failed"),
        _ => empty_body(),
    };

    Response::builder()
        .status(code.status_code())
        .header("X-Gateway-Error", code.as_header_value())
        .body(body)
        .expect("valid response with StatusCode enum and static headers")
}
