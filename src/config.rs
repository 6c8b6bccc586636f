//! Process configuration.
//!
//! Each process builds its configuration once at startup and hands clones of
//! it to the components that need it. Nothing reads ambient state afterwards.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

use crate::auth::AuthScope;
use crate::{Error, Result};

/// Token the bundled client presents and the server accepts by default.
pub const DEFAULT_TOKEN: &str = "valid-token";

/// Default listening and connection port.
pub const DEFAULT_PORT: u16 = 50051;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname or IP address to bind to.
    pub host: String,
    /// Port number to listen on.
    pub port: u16,
    /// Token callers must present in the `token` metadata entry.
    pub token: String,
    /// Which call shapes the token check applies to.
    pub auth_scope: AuthScope,
    /// Server-streaming output settings.
    pub stream: StreamSettings,
    /// TLS configuration.
    pub tls: TlsSettings,
    /// Metrics exporter configuration.
    pub metrics: MetricsSettings,
}

/// How the server-streaming handler paces its output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Number of responses produced per request.
    pub count: usize,
    /// Delay between two responses, in milliseconds.
    pub interval_ms: u64,
}

impl StreamSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            count: 10,
            interval_ms: 1000,
        }
    }
}

/// TLS configuration settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TlsSettings {
    /// Whether TLS is enabled.
    pub enabled: bool,
    /// Path to TLS certificate file (PEM format).
    pub cert_path: String,
    /// Path to TLS private key file (PEM format).
    pub key_path: String,
}

impl TlsSettings {
    /// Reads the certificate and key into a server TLS configuration.
    pub fn server_tls_config(&self) -> Result<ServerTlsConfig> {
        let cert = std::fs::read(&self.cert_path)?;
        let key = std::fs::read(&self.key_path)?;
        Ok(ServerTlsConfig::new().identity(Identity::from_pem(cert, key)))
    }
}

/// Metrics exporter settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Whether metrics export is enabled.
    pub enabled: bool,
    /// Port number for the Prometheus listener.
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            token: DEFAULT_TOKEN.to_string(),
            auth_scope: AuthScope::default(),
            stream: StreamSettings::default(),
            tls: TlsSettings::default(),
            metrics: MetricsSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Converts host and port into a socket address.
    pub fn addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.host, self.port)
    }

    /// Socket address of the metrics listener, on the same host as the server.
    pub fn metrics_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.host, self.metrics.port)
    }

    /// Loads configuration from `.env` file, TOML file, and environment variables.
    ///
    /// Configuration priority (highest to lowest):
    /// 1. Environment variables with `SERVER_` prefix
    /// 2. TOML configuration file (if exists)
    /// 3. `.env` file (if exists)
    /// 4. Built-in defaults
    ///
    /// Nested keys are separated by a double underscore, so
    /// `SERVER_TLS__CERT_PATH` sets `tls.cert_path`.
    ///
    /// The TOML file path can be set via `SERVER_CONFIG_PATH`. If not set, it
    /// defaults to `./config/server.toml`. A missing file is skipped.
    ///
    /// # Environment Variable Examples
    /// ```bash
    /// SERVER_PORT=50051
    /// SERVER_TOKEN=valid-token
    /// SERVER_AUTH_SCOPE=all-shapes
    /// SERVER_STREAM__COUNT=10
    /// SERVER_STREAM__INTERVAL_MS=1000
    /// SERVER_TLS__ENABLED=true
    /// SERVER_TLS__CERT_PATH=/etc/certs/server.crt
    /// SERVER_TLS__KEY_PATH=/etc/certs/server.key
    /// ```
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> figment::error::Result<Self> {
        use figment::providers::{Env, Format, Serialized, Toml};
        use figment::Figment;

        let _ = dotenvy::dotenv();

        let config_path = std::env::var("SERVER_CONFIG_PATH")
            .unwrap_or_else(|_| "config/server.toml".to_string());

        Figment::from(Serialized::defaults(ServerConfig::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("SERVER_").ignore(&["CONFIG_PATH"]).split("__"))
            .extract()
    }

    /// Checks the configuration once, before anything is started.
    pub fn validate(&self) -> Result<()> {
        self.addr()?;

        if self.token.is_empty() {
            return Err(Error::Config("token cannot be empty".to_string()));
        }

        if self.tls.enabled {
            if self.tls.cert_path.is_empty() {
                return Err(Error::Config(
                    "TLS is enabled but cert_path is empty".to_string(),
                ));
            }
            if self.tls.key_path.is_empty() {
                return Err(Error::Config(
                    "TLS is enabled but key_path is empty".to_string(),
                ));
            }
            require_file("TLS certificate", &self.tls.cert_path)?;
            require_file("TLS key", &self.tls.key_path)?;
        }

        if self.metrics.enabled {
            self.metrics_addr()?;
        }

        Ok(())
    }
}

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server hostname or IP address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Token attached to every call, if any.
    pub token: Option<String>,
    /// Delay between two sends on the request-streaming shapes.
    pub pacing: Duration,
    /// TLS configuration.
    pub tls: ClientTlsSettings,
}

/// Client-side TLS settings.
#[derive(Clone, Debug, Default)]
pub struct ClientTlsSettings {
    /// Whether TLS is enabled.
    pub enabled: bool,
    /// Trusted CA certificate (PEM format).
    pub ca_cert_path: String,
    /// Name to verify the server certificate against, if not the host.
    pub domain_name: Option<String>,
}

impl ClientTlsSettings {
    /// Reads the CA certificate into a client TLS configuration.
    pub fn client_tls_config(&self) -> Result<ClientTlsConfig> {
        let ca = std::fs::read(&self.ca_cert_path)?;
        let mut tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(ca));
        if let Some(domain) = &self.domain_name {
            tls = tls.domain_name(domain.clone());
        }
        Ok(tls)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            token: Some(DEFAULT_TOKEN.to_string()),
            pacing: Duration::from_millis(1000),
            tls: ClientTlsSettings::default(),
        }
    }
}

impl ClientConfig {
    /// URI of the server endpoint.
    pub fn endpoint(&self) -> String {
        let scheme = if self.tls.enabled { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("host cannot be empty".to_string()));
        }

        if self.tls.enabled {
            if self.tls.ca_cert_path.is_empty() {
                return Err(Error::Config(
                    "TLS is enabled but no CA certificate was given".to_string(),
                ));
            }
            require_file("CA certificate", &self.tls.ca_cert_path)?;
        }

        Ok(())
    }
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{host}:{port}").parse().map_err(|e| {
        Error::Config(format!(
            "Invalid address configuration (host: {host}, port: {port}): {e}"
        ))
    })
}

fn require_file(what: &str, path: &str) -> Result<()> {
    if Path::new(path).exists() {
        Ok(())
    } else {
        Err(Error::Config(format!("{what} file does not exist: {path}")))
    }
}
