//! Gateway HTTP server and streaming reverse proxy
//!
//! Every request first resolves its tenant from the path. The bare tenant
//! path is handed to the inbound callback handlers; anything deeper is
//! routed, credential-injected, and forwarded to the matching upstream
//! host with the response streamed back unbuffered.

use crate::cache::TokenCache;
use crate::config::UpstreamConfig;
use crate::directory::{Tenant, TenantDirectory};
use crate::error::{error_response, BoxError, GatewayBody, GatewayErrorCode};
use crate::inbound;
use crate::routes::{self, UpstreamHosts};
use futures::{StreamExt, TryStreamExt};
use http_body_util::{BodyExt, BodyStream, StreamBody};
use hyper::body::{Body as _, Frame, Incoming};
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";

/// Shared per-process state handed to every connection
struct GatewayContext {
    directory: Arc<TenantDirectory>,
    cache: Arc<dyn TokenCache>,
    hosts: UpstreamHosts,
    client: reqwest::Client,
}

/// The gateway HTTP server
pub struct GatewayServer {
    bind_addr: SocketAddr,
    context: Arc<GatewayContext>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayServer {
    /// Build the server and its pooled upstream client.
    /// The client is constructed once here and shared by every request;
    /// keep-alive reuse across the small set of upstream hosts is the point.
    pub fn new(
        bind_addr: SocketAddr,
        directory: Arc<TenantDirectory>,
        cache: Arc<dyn TokenCache>,
        upstream: &UpstreamConfig,
    ) -> anyhow::Result<(Self, watch::Sender<bool>)> {
        let client = reqwest::Client::builder()
            .connect_timeout(upstream.connect_timeout())
            .pool_idle_timeout(upstream.pool_idle_timeout())
            .pool_max_idle_per_host(upstream.pool_max_idle_per_host)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build upstream client: {}", e))?;

        debug!(
            connect_timeout_secs = upstream.connect_timeout_secs,
            pool_idle_timeout_secs = upstream.pool_idle_timeout_secs,
            pool_max_idle = upstream.pool_max_idle_per_host,
            "Upstream client configured"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let context = Arc::new(GatewayContext {
            directory,
            cache,
            hosts: UpstreamHosts::from(upstream),
            client,
        });

        Ok((
            Self {
                bind_addr,
                context,
                shutdown_rx,
            },
            shutdown_tx,
        ))
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "Gateway listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let context = Arc::clone(&self.context);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, context).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Gateway server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    context: Arc<GatewayContext>,
) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let context = Arc::clone(&context);
        async move { handle_request(req, context, addr).await }
    });

    // Auto builder serves both HTTP/1.1 and h2c on the same port
    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    req: Request<Incoming>,
    context: Arc<GatewayContext>,
    client_addr: SocketAddr,
) -> Result<Response<GatewayBody>, hyper::Error> {
    // Generate or propagate request ID for log correlation
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let (tenant_id, subpath) = split_tenant_path(req.uri().path());
    debug!(
        client = %client_addr,
        method = %req.method(),
        path = %req.uri().path(),
        request_id,
        "Incoming request"
    );

    if tenant_id.is_empty() {
        return Ok(error_response(GatewayErrorCode::TenantNotFound));
    }

    // Tenant guard: unknown tenants terminate here, before any body read
    // or crypto work
    let tenant = match context.directory.resolve(&tenant_id) {
        Some(tenant) => tenant,
        None => {
            debug!(tenant = %tenant_id, request_id, "Unknown tenant");
            return Ok(error_response(GatewayErrorCode::TenantNotFound));
        }
    };

    match subpath {
        None => {
            if req.method() == Method::GET {
                let query = req.uri().query().unwrap_or("");
                Ok(inbound::handle_challenge(&tenant, query))
            } else if req.method() == Method::POST {
                let body = req.into_body().collect().await?.to_bytes();
                Ok(inbound::handle_delivery(&tenant, &body))
            } else {
                Ok(error_response(GatewayErrorCode::MethodNotAllowed))
            }
        }
        Some(subpath) => {
            if req.method() == Method::GET || req.method() == Method::POST {
                Ok(forward(req, &tenant, &subpath, &context, &request_id).await)
            } else {
                Ok(error_response(GatewayErrorCode::MethodNotAllowed))
            }
        }
    }
}

/// Split `/{tenant}` or `/{tenant}/{subpath...}` into its components
fn split_tenant_path(path: &str) -> (String, Option<String>) {
    let trimmed = path.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((tenant, rest)) if !rest.is_empty() => (tenant.to_string(), Some(rest.to_string())),
        Some((tenant, _)) => (tenant.to_string(), None),
        None => (trimmed.to_string(), None),
    }
}

/// Forward one outbound request to its routed upstream and stream the
/// response back.
///
/// The request body is streamed in and the response body streamed out, so
/// neither direction is ever materialized. Dropping the returned response
/// (client disconnect) drops the upstream stream with it, aborting the
/// round trip.
async fn forward(
    req: Request<Incoming>,
    tenant: &Tenant,
    subpath: &str,
    context: &GatewayContext,
    request_id: &str,
) -> Response<GatewayBody> {
    let raw_query = req.uri().query().unwrap_or("");
    let decision = routes::decide(
        tenant,
        subpath,
        raw_query,
        &context.hosts,
        context.cache.as_ref(),
    )
    .await;

    let target = if decision.query.is_empty() {
        format!("{}/{}", decision.base, subpath)
    } else {
        format!("{}/{}?{}", decision.base, subpath, decision.query)
    };
    let url = match reqwest::Url::parse(&target) {
        Ok(url) => url,
        Err(e) => {
            warn!(tenant = %tenant.id, subpath, error = %e, request_id, "Malformed target URL");
            return error_response(GatewayErrorCode::BadTargetUrl);
        }
    };
    let host = url.host_str().unwrap_or("").to_string();

    let method = match reqwest::Method::from_bytes(req.method().as_str().as_bytes()) {
        Ok(method) => method,
        Err(_) => return error_response(GatewayErrorCode::MalformedRequest),
    };

    debug!(
        tenant = %tenant.id,
        %host,
        path = subpath,
        request_id,
        "Forwarding to upstream"
    );

    let (parts, body) = req.into_parts();
    let mut builder = context.client.request(method, url);
    for (name, value) in parts.headers.iter() {
        // Host is derived from the target URL; Content-Length is
        // recomputed by the client for the streamed body; Connection is
        // hop-by-hop and would defeat upstream keep-alive reuse
        if name == &header::HOST
            || name == &header::CONTENT_LENGTH
            || name == &header::CONNECTION
        {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    if !body.is_end_stream() {
        let body_stream = BodyStream::new(body).filter_map(|frame| async move {
            match frame {
                Ok(frame) => frame.into_data().ok().map(Ok),
                Err(e) => Some(Err(e)),
            }
        });
        builder = builder.body(reqwest::Body::wrap_stream(body_stream));
    }

    let upstream_response = match builder.send().await {
        Ok(response) => response,
        Err(e) => {
            // Log detailed error internally, return generic message externally
            error!(tenant = %tenant.id, %host, error = %e, request_id, "Upstream request failed");
            return error_response(GatewayErrorCode::UpstreamUnreachable);
        }
    };

    let status = StatusCode::from_u16(upstream_response.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::builder().status(status);
    for (name, value) in upstream_response.headers() {
        if is_managed_response_header(name.as_str()) {
            continue;
        }
        response = response.header(name.as_str(), value.as_bytes());
    }

    let body_stream = upstream_response
        .bytes_stream()
        .map_ok(Frame::data)
        .map_err(|e| Box::new(e) as BoxError);

    match response.body(StreamBody::new(body_stream).boxed_unsync()) {
        Ok(response) => response,
        Err(e) => {
            error!(tenant = %tenant.id, %host, error = %e, request_id, "Invalid upstream response headers");
            error_response(GatewayErrorCode::UpstreamUnreachable)
        }
    }
}

/// Headers the response writer manages itself; never copied from upstream
fn is_managed_response_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("connection")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_tenant_path() {
        assert_eq!(split_tenant_path("/acme"), ("acme".to_string(), None));
        assert_eq!(split_tenant_path("/acme/"), ("acme".to_string(), None));
        assert_eq!(
            split_tenant_path("/acme/cgi-bin/message/send"),
            (
                "acme".to_string(),
                Some("cgi-bin/message/send".to_string())
            )
        );
        assert_eq!(split_tenant_path("/"), (String::new(), None));
        assert_eq!(split_tenant_path(""), (String::new(), None));
    }

    #[test]
    fn test_managed_response_headers() {
        assert!(is_managed_response_header("Content-Length"));
        assert!(is_managed_response_header("content-length"));
        assert!(is_managed_response_header("Connection"));
        assert!(is_managed_response_header("CONNECTION"));
        assert!(!is_managed_response_header("Content-Type"));
        assert!(!is_managed_response_header("X-Upstream"));
        assert!(!is_managed_response_header("Transfer-Encoding"));
    }
}
