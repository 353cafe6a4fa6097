//! Tollgate - a multi-tenant ingress gateway for a third-party HTTP API family
//!
//! This library provides a gateway that:
//! - Resolves tenants from the request path against a hot-reloadable snapshot
//! - Authenticates inbound platform callbacks (challenge signature check,
//!   envelope decryption with embedded-identity verification)
//! - Routes outbound calls to the matching upstream host per subpath
//! - Injects per-tenant credentials and cached short-lived tokens into the
//!   query string, overwriting anything client-supplied
//! - Streams upstream responses back unbuffered over a pooled client

pub mod cache;
pub mod config;
pub mod crypter;
pub mod directory;
pub mod envelope;
pub mod error;
pub mod inbound;
pub mod proxy;
pub mod routes;

pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
