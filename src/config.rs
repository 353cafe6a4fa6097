use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Global configuration for the gateway
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream hosts and transport settings
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Token cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Registered tenants
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Listen port (default: 8080)
    #[serde(default = "default_listen_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_listen_port(),
        }
    }
}

/// Upstream API hosts plus transport limits for the pooled client
#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    /// Primary API host, used by the token-exchange routes and the default route
    #[serde(default = "default_primary_base")]
    pub primary_base: String,

    /// Secondary API host, used by the qr-code route
    #[serde(default = "default_secondary_base")]
    pub secondary_base: String,

    /// Tertiary API host, used by the enterprise-token route
    #[serde(default = "default_tertiary_base")]
    pub tertiary_base: String,

    /// Connect timeout in seconds (default: 30)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle connection timeout in seconds (default: 90)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,

    /// Maximum idle connections per upstream host (default: 100)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            primary_base: default_primary_base(),
            secondary_base: default_secondary_base(),
            tertiary_base: default_tertiary_base(),
            connect_timeout_secs: default_connect_timeout(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CacheConfig {
    /// Redis connection URL, e.g. "redis://127.0.0.1:6379".
    /// When unset, cached-token lookups resolve to the empty string.
    pub url: Option<String>,
}

/// Wire format of a tenant's callback envelopes
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// Body is delivered as-is, no envelope
    #[default]
    Raw,
    Xml,
    Json,
}

/// How a tenant's callback bodies are protected
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMode {
    /// Plaintext callbacks
    #[default]
    None,
    /// Reserved dual plaintext-or-encrypted mode; no-op upstream
    Compatible,
    /// Encrypted envelope with embedded tenant identity
    Secure,
}

/// One registered tenant
#[derive(Debug, Deserialize, Clone)]
pub struct TenantConfig {
    /// Path-addressable tenant identity
    pub id: String,

    /// Shared secret used for callback signature verification
    pub token: String,

    /// Application secret injected into outbound credential parameters
    #[serde(default)]
    pub app_secret: String,

    /// Key for the envelope cipher (required when encryption_mode = "secure")
    #[serde(default)]
    pub encryption_key: String,

    #[serde(default)]
    pub data_format: DataFormat,

    #[serde(default)]
    pub encryption_mode: EncryptionMode,

    /// Cache key holding this tenant's ephemeral access token
    pub access_token_cache_key: Option<String>,

    /// Cache key holding this tenant's qr-code ticket
    pub ticket_cache_key: Option<String>,
}

impl TenantConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("tenant id must not be empty".to_string());
        }
        if self.id.contains('/') || self.id.contains('?') || self.id.contains('#') {
            return Err(format!("tenant id '{}' is not path-addressable", self.id));
        }
        if self.token.is_empty() {
            return Err(format!("tenant '{}' has an empty token", self.id));
        }
        if self.encryption_mode == EncryptionMode::Secure {
            if self.encryption_key.is_empty() {
                return Err(format!(
                    "tenant '{}' uses secure encryption but has no encryption_key",
                    self.id
                ));
            }
            if self.data_format == DataFormat::Raw {
                return Err(format!(
                    "tenant '{}' uses secure encryption but data_format is not xml or json",
                    self.id
                ));
            }
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for tenant in &self.tenants {
            if let Err(e) = tenant.validate() {
                anyhow::bail!("Invalid tenant config: {}", e);
            }
            if !seen.insert(tenant.id.as_str()) {
                anyhow::bail!("Duplicate tenant id: {}", tenant.id);
            }
        }
        for base in [
            &self.upstream.primary_base,
            &self.upstream.secondary_base,
            &self.upstream.tertiary_base,
        ] {
            if !base.starts_with("http://") && !base.starts_with("https://") {
                anyhow::bail!("Upstream base '{}' must be an http(s) URL", base);
            }
            if base.ends_with('/') {
                anyhow::bail!("Upstream base '{}' must not end with a slash", base);
            }
        }
        Ok(())
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_primary_base() -> String {
    "https://api.weixin.qq.com".to_string()
}

fn default_secondary_base() -> String {
    "https://mp.weixin.qq.com".to_string()
}

fn default_tertiary_base() -> String {
    "https://qyapi.weixin.qq.com".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_pool_max_idle_per_host() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.upstream.primary_base, "https://api.weixin.qq.com");
        assert_eq!(config.upstream.connect_timeout_secs, 30);
        assert_eq!(config.upstream.pool_idle_timeout_secs, 90);
        assert_eq!(config.upstream.pool_max_idle_per_host, 100);
        assert!(config.cache.url.is_none());
        assert!(config.tenants.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_tenant() {
        let toml = r#"
            [[tenants]]
            id = "acme"
            token = "tok"
            app_secret = "s3cret"
            encryption_key = "k"
            data_format = "xml"
            encryption_mode = "secure"
            access_token_cache_key = "acme:access-token"
            ticket_cache_key = "acme:ticket"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        let tenant = &config.tenants[0];
        assert_eq!(tenant.id, "acme");
        assert_eq!(tenant.data_format, DataFormat::Xml);
        assert_eq!(tenant.encryption_mode, EncryptionMode::Secure);
        assert_eq!(
            tenant.access_token_cache_key.as_deref(),
            Some("acme:access-token")
        );
    }

    #[test]
    fn test_tenant_defaults() {
        let toml = r#"
            [[tenants]]
            id = "acme"
            token = "tok"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        let tenant = &config.tenants[0];
        assert_eq!(tenant.data_format, DataFormat::Raw);
        assert_eq!(tenant.encryption_mode, EncryptionMode::None);
        assert!(tenant.app_secret.is_empty());
        assert!(tenant.ticket_cache_key.is_none());
    }

    #[test]
    fn test_duplicate_tenant_id_rejected() {
        let toml = r#"
            [[tenants]]
            id = "acme"
            token = "a"

            [[tenants]]
            id = "acme"
            token = "b"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secure_mode_requires_key_and_format() {
        let toml = r#"
            [[tenants]]
            id = "acme"
            token = "tok"
            encryption_mode = "secure"
            data_format = "json"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());

        let toml = r#"
            [[tenants]]
            id = "acme"
            token = "tok"
            encryption_mode = "secure"
            encryption_key = "k"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tenant_id_must_be_path_safe() {
        let toml = r#"
            [[tenants]]
            id = "a/b"
            token = "tok"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [server]
            bind = "127.0.0.1"
            port = 9090

            [[tenants]]
            id = "acme"
            token = "tok"
            "#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.tenants.len(), 1);

        assert!(Config::load("/nonexistent/config.toml").is_err());
    }

    #[test]
    fn test_upstream_base_validation() {
        let toml = r#"
            [upstream]
            primary_base = "ftp://example.com"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());

        let toml = r#"
            [upstream]
            primary_base = "https://example.com/"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }
}
