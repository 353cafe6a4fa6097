//! Inbound callback handlers
//!
//! Two operations per tenant path: the read-only challenge exchange the
//! platform uses to verify endpoint ownership, and the delivery callback
//! carrying the actual message. Both run after the dispatcher has already
//! resolved the tenant, so unknown tenants never reach this module.

use crate::config::EncryptionMode;
use crate::crypter::{MessageCrypter, TenantCrypter};
use crate::directory::Tenant;
use crate::envelope::{self, EnvelopeError};
use crate::error::{empty_body, error_response, full_body, GatewayBody, GatewayErrorCode};
use crate::routes::parse_query;
use hyper::{Response, StatusCode};
use tracing::{debug, info, warn};

/// Handle the challenge exchange (GET /{tenant}).
///
/// Verifies the provided signature over `(timestamp, nonce)` with the
/// tenant's token and echoes `echostr` back verbatim on success.
pub fn handle_challenge(tenant: &Tenant, raw_query: &str) -> Response<GatewayBody> {
    let params = parse_query(raw_query);
    let param = |name: &str| {
        params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    };

    let (Some(signature), Some(timestamp), Some(nonce)) =
        (param("signature"), param("timestamp"), param("nonce"))
    else {
        debug!(tenant = %tenant.id, "Challenge missing required query parameters");
        return error_response(GatewayErrorCode::MalformedRequest);
    };

    let crypter = TenantCrypter::new(&tenant.token, &tenant.encryption_key, &tenant.id);
    if !crypter.verify_signature(timestamp, nonce, signature) {
        warn!(tenant = %tenant.id, "Challenge signature mismatch");
        return error_response(GatewayErrorCode::InvalidSignature);
    }

    let echo = param("echostr").unwrap_or("").to_string();
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(full_body(echo))
        .expect("valid response with static parts")
}

/// Handle a delivery callback (POST /{tenant}).
///
/// Secure tenants: parse the envelope per the configured data format,
/// decrypt, and reject unless the embedded tenant identity matches the
/// path identity, even when decryption itself succeeded. Tenants without
/// encryption accept the body as plaintext directly.
pub fn handle_delivery(tenant: &Tenant, body: &[u8]) -> Response<GatewayBody> {
    match tenant.encryption_mode {
        EncryptionMode::Secure => handle_secure_delivery(tenant, body),
        EncryptionMode::Compatible => {
            // Reserved dual-mode; the platform side never implemented it,
            // so the body is acknowledged and ignored
            warn!(tenant = %tenant.id, "Compatible encryption mode is not implemented, body ignored");
            accepted()
        }
        EncryptionMode::None => {
            dispatch(tenant, body);
            accepted()
        }
    }
}

fn handle_secure_delivery(tenant: &Tenant, body: &[u8]) -> Response<GatewayBody> {
    let envelope = match envelope::parse(tenant.data_format, body) {
        Ok(envelope) => envelope,
        Err(EnvelopeError::UnsupportedFormat(format)) => {
            warn!(tenant = %tenant.id, ?format, "Tenant data format carries no envelope");
            return error_response(GatewayErrorCode::UnsupportedFormat);
        }
        Err(e) => {
            warn!(tenant = %tenant.id, error = %e, "Failed to parse callback envelope");
            return error_response(GatewayErrorCode::MalformedEnvelope);
        }
    };

    let crypter = TenantCrypter::new(&tenant.token, &tenant.encryption_key, &tenant.id);
    let (payload, embedded_id) = match crypter.decrypt(&envelope.encrypt) {
        Ok(decrypted) => decrypted,
        Err(e) => {
            warn!(tenant = %tenant.id, error = %e, "Failed to decrypt callback envelope");
            return error_response(GatewayErrorCode::DecryptFailed);
        }
    };

    // A successfully decrypted envelope addressed to another tenant is a
    // forged or misrouted message
    if embedded_id != tenant.id {
        warn!(
            tenant = %tenant.id,
            embedded = %embedded_id,
            "Envelope tenant identity mismatch"
        );
        return error_response(GatewayErrorCode::TenantMismatch);
    }

    dispatch(tenant, &payload);
    accepted()
}

/// Hand an accepted payload to the downstream consumer.
/// Nothing is persisted here; delivery is log-and-forward.
fn dispatch(tenant: &Tenant, payload: &[u8]) {
    info!(tenant = %tenant.id, bytes = payload.len(), "Callback accepted");
    debug!(
        tenant = %tenant.id,
        payload = %String::from_utf8_lossy(payload),
        "Callback payload"
    );
}

fn accepted() -> Response<GatewayBody> {
    Response::builder()
        .status(StatusCode::OK)
        .body(empty_body())
        .expect("valid response with static parts")
}
