use clap::Parser;
use greeting_rpc::config::ServerConfig;
use greeting_rpc::{serve, AuthScope, GreetServiceImpl};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "greet-server")]
#[command(about = "Greeting service demonstrating the four gRPC call shapes", long_about = None)]
#[command(version)]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Enable TLS
    #[arg(long)]
    tls: bool,

    /// Server certificate (PEM)
    #[arg(long)]
    cert: Option<String>,

    /// Server private key (PEM)
    #[arg(long)]
    key: Option<String>,

    /// Token callers must present
    #[arg(long, env = "SERVER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Which call shapes require the token: unary-only or all-shapes
    #[arg(long)]
    auth_scope: Option<AuthScope>,

    /// Responses per GreetManyTimes call
    #[arg(long)]
    stream_count: Option<usize>,

    /// Delay between GreetManyTimes responses, in milliseconds
    #[arg(long)]
    stream_interval_ms: Option<u64>,

    /// Enable the Prometheus metrics endpoint
    #[arg(long, env = "METRICS_ENABLED", default_value = "false")]
    metrics: bool,

    /// Metrics port
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,
}

impl Args {
    /// Command-line flags and their environment bindings win over file configuration.
    fn apply(self, config: &mut ServerConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.tls {
            config.tls.enabled = true;
        }
        if let Some(cert) = self.cert {
            config.tls.cert_path = cert;
        }
        if let Some(key) = self.key {
            config.tls.key_path = key;
        }
        if let Some(token) = self.token {
            config.token = token;
        }
        if let Some(scope) = self.auth_scope {
            config.auth_scope = scope;
        }
        if let Some(count) = self.stream_count {
            config.stream.count = count;
        }
        if let Some(interval_ms) = self.stream_interval_ms {
            config.stream.interval_ms = interval_ms;
        }
        if self.metrics {
            config.metrics.enabled = true;
        }
        if let Some(port) = self.metrics_port {
            config.metrics.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = ServerConfig::from_env().unwrap_or_else(|e| {
        error!("Failed to load configuration: {e}");
        info!("Using default configuration");
        ServerConfig::default()
    });
    args.apply(&mut config);

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {e}");
        return Err(e.into());
    }

    if config.metrics.enabled {
        let metrics_addr = config.metrics_addr()?;
        match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
        {
            Ok(()) => info!("Metrics server started on {metrics_addr}"),
            Err(e) => error!("Failed to start metrics server: {e}"),
        }
    }

    let addr = config.addr()?;
    let listener = TcpListener::bind(addr).await.inspect_err(|e| {
        error!("Failed to listen on {addr}: {e}");
    })?;

    info!(
        %addr,
        tls = config.tls.enabled,
        auth_scope = ?config.auth_scope,
        stream_count = config.stream.count,
        stream_interval_ms = config.stream.interval_ms,
        "Server started"
    );

    let service = GreetServiceImpl::new(config.stream);
    if let Err(e) = serve(&config, service, listener, shutdown_signal()).await {
        error!("Server error: {e}");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
