//! Outbound routing table and credential injection
//!
//! Each outbound subpath maps to one upstream base host plus a set of
//! query-parameter mutations. Injected credentials overwrite any
//! client-supplied value of the same name so a caller can never smuggle
//! its own; every other client parameter passes through unchanged.

use crate::cache::TokenCache;
use crate::config::UpstreamConfig;
use crate::directory::Tenant;

/// Session/token-exchange endpoints on the primary host
const PATH_SESSION_TOKEN: &str = "sns/oauth2/access_token";
const PATH_SESSION_CODE: &str = "sns/jscode2session";
const PATH_SESSION_REFRESH: &str = "sns/oauth2/refresh_token";
/// Qr-code endpoint on the secondary host
const PATH_QRCODE: &str = "cgi-bin/showqrcode";
/// Enterprise-token endpoint on the tertiary host
const PATH_ENTERPRISE_TOKEN: &str = "cgi-bin/gettoken";

/// Upstream base URLs the routing table selects between
#[derive(Debug, Clone)]
pub struct UpstreamHosts {
    pub primary: String,
    pub secondary: String,
    pub tertiary: String,
}

impl From<&UpstreamConfig> for UpstreamHosts {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            primary: config.primary_base.clone(),
            secondary: config.secondary_base.clone(),
            tertiary: config.tertiary_base.clone(),
        }
    }
}

/// Where one outbound request goes and with which query string
#[derive(Debug)]
pub struct RouteDecision {
    /// Upstream base URL, no trailing slash
    pub base: String,
    /// Fully re-encoded query string, credentials injected
    pub query: String,
}

/// Resolve `(tenant, subpath, query)` to an upstream target.
///
/// Exact first-match on the subpath literal with an explicit default row,
/// so unknown subpaths are never silently dropped. Cache lookups degrade
/// to the empty string.
pub async fn decide(
    tenant: &Tenant,
    subpath: &str,
    raw_query: &str,
    hosts: &UpstreamHosts,
    cache: &dyn TokenCache,
) -> RouteDecision {
    let mut params = parse_query(raw_query);

    let base = match subpath {
        PATH_SESSION_TOKEN | PATH_SESSION_CODE => {
            set_param(&mut params, "appid", tenant.id.clone());
            set_param(&mut params, "secret", tenant.app_secret.clone());
            hosts.primary.clone()
        }
        PATH_SESSION_REFRESH => {
            set_param(&mut params, "appid", tenant.id.clone());
            hosts.primary.clone()
        }
        PATH_QRCODE => {
            let ticket = cached_value(cache, tenant.ticket_cache_key.as_deref()).await;
            set_param(&mut params, "ticket", ticket);
            hosts.secondary.clone()
        }
        PATH_ENTERPRISE_TOKEN => {
            set_param(&mut params, "corpid", tenant.id.clone());
            set_param(&mut params, "corpsecret", tenant.app_secret.clone());
            hosts.tertiary.clone()
        }
        _ => {
            let token = cached_value(cache, tenant.access_token_cache_key.as_deref()).await;
            set_param(&mut params, "access_token", token);
            hosts.primary.clone()
        }
    };

    RouteDecision {
        base,
        query: encode_query(&params),
    }
}

async fn cached_value(cache: &dyn TokenCache, key: Option<&str>) -> String {
    match key {
        Some(key) if !key.is_empty() => match cache.get(key).await {
            Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            None => String::new(),
        },
        _ => String::new(),
    }
}

/// Replace every occurrence of `name`, then append the injected value
fn set_param(params: &mut Vec<(String, String)>, name: &str, value: String) {
    params.retain(|(existing, _)| existing != name);
    params.push((name.to_string(), value));
}

/// Decode a raw query string into ordered name/value pairs
pub(crate) fn parse_query(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(name), decode_component(value))
        })
        .collect()
}

fn decode_component(component: &str) -> String {
    // Form encoding: a literal '+' means a space
    let component = component.replace('+', " ");
    match urlencoding::decode(&component) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => component,
    }
}

fn encode_query(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(name, value)| format!("{}={}", urlencoding::encode(name), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::{DataFormat, EncryptionMode};

    fn hosts() -> UpstreamHosts {
        UpstreamHosts {
            primary: "https://primary.example".to_string(),
            secondary: "https://secondary.example".to_string(),
            tertiary: "https://tertiary.example".to_string(),
        }
    }

    fn tenant() -> Tenant {
        Tenant {
            id: "acme".to_string(),
            token: "tok".to_string(),
            app_secret: "s3cret".to_string(),
            encryption_key: String::new(),
            data_format: DataFormat::Raw,
            encryption_mode: EncryptionMode::None,
            access_token_cache_key: Some("acme:access-token".to_string()),
            ticket_cache_key: Some("acme:ticket".to_string()),
        }
    }

    fn has_param(query: &str, pair: &str) -> bool {
        query.split('&').any(|p| p == pair)
    }

    #[tokio::test]
    async fn test_session_token_routes_inject_app_credentials() {
        let cache = MemoryCache::new();
        for subpath in [PATH_SESSION_TOKEN, PATH_SESSION_CODE] {
            let decision = decide(&tenant(), subpath, "code=xyz", &hosts(), &cache).await;
            assert_eq!(decision.base, "https://primary.example");
            assert!(has_param(&decision.query, "code=xyz"));
            assert!(has_param(&decision.query, "appid=acme"));
            assert!(has_param(&decision.query, "secret=s3cret"));
        }
    }

    #[tokio::test]
    async fn test_refresh_route_omits_secret() {
        let cache = MemoryCache::new();
        let decision = decide(&tenant(), PATH_SESSION_REFRESH, "", &hosts(), &cache).await;
        assert_eq!(decision.base, "https://primary.example");
        assert!(has_param(&decision.query, "appid=acme"));
        assert!(!decision.query.contains("secret="));
    }

    #[tokio::test]
    async fn test_qrcode_route_uses_secondary_host_and_ticket() {
        let cache = MemoryCache::new();
        cache.insert("acme:ticket", "tick-9");

        let decision = decide(&tenant(), PATH_QRCODE, "", &hosts(), &cache).await;
        assert_eq!(decision.base, "https://secondary.example");
        assert!(has_param(&decision.query, "ticket=tick-9"));
    }

    #[tokio::test]
    async fn test_enterprise_route_uses_tertiary_host() {
        let cache = MemoryCache::new();
        let decision = decide(&tenant(), PATH_ENTERPRISE_TOKEN, "", &hosts(), &cache).await;
        assert_eq!(decision.base, "https://tertiary.example");
        assert!(has_param(&decision.query, "corpid=acme"));
        assert!(has_param(&decision.query, "corpsecret=s3cret"));
    }

    #[tokio::test]
    async fn test_default_route_injects_access_token() {
        let cache = MemoryCache::new();
        cache.insert("acme:access-token", "tok-42");

        let decision = decide(&tenant(), "cgi-bin/message/send", "to=u1", &hosts(), &cache).await;
        assert_eq!(decision.base, "https://primary.example");
        assert!(has_param(&decision.query, "to=u1"));
        assert!(has_param(&decision.query, "access_token=tok-42"));
    }

    #[tokio::test]
    async fn test_absent_cache_degrades_to_empty_credential() {
        let cache = MemoryCache::new();
        let decision = decide(&tenant(), "cgi-bin/anything", "", &hosts(), &cache).await;
        assert_eq!(decision.query, "access_token=");
    }

    #[tokio::test]
    async fn test_unconfigured_cache_key_degrades_to_empty_credential() {
        let cache = MemoryCache::new();
        let mut tenant = tenant();
        tenant.access_token_cache_key = None;

        let decision = decide(&tenant, "cgi-bin/anything", "", &hosts(), &cache).await;
        assert_eq!(decision.query, "access_token=");
    }

    #[tokio::test]
    async fn test_injection_overwrites_client_supplied_credentials() {
        let cache = MemoryCache::new();
        cache.insert("acme:access-token", "real");

        let decision = decide(
            &tenant(),
            "cgi-bin/message/send",
            "access_token=spoofed&keep=me&access_token=again",
            &hosts(),
            &cache,
        )
        .await;

        assert!(has_param(&decision.query, "access_token=real"));
        assert!(has_param(&decision.query, "keep=me"));
        assert!(!decision.query.contains("spoofed"));
        assert_eq!(decision.query.matches("access_token=").count(), 1);
    }

    #[tokio::test]
    async fn test_other_parameters_survive_with_encoding() {
        let cache = MemoryCache::new();
        let decision = decide(
            &tenant(),
            "cgi-bin/anything",
            "msg=hello%20world&empty=",
            &hosts(),
            &cache,
        )
        .await;
        assert!(has_param(&decision.query, "msg=hello%20world"));
        assert!(has_param(&decision.query, "empty="));
    }

    #[tokio::test]
    async fn test_plus_encoded_space_keeps_its_meaning() {
        let cache = MemoryCache::new();
        let decision = decide(
            &tenant(),
            "cgi-bin/anything",
            "msg=hello+world&sum=1%2B2",
            &hosts(),
            &cache,
        )
        .await;
        // '+' decodes as a space; an escaped plus stays a literal plus
        assert!(has_param(&decision.query, "msg=hello%20world"));
        assert!(has_param(&decision.query, "sum=1%2B2"));
    }
}
