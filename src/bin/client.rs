use std::time::Duration;

use clap::Parser;
use greeting_rpc::config::{ClientConfig, ClientTlsSettings, DEFAULT_PORT, DEFAULT_TOKEN};
use greeting_rpc::{CallShape, GreetClient};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "greet-client")]
#[command(about = "Drives one of the four greeting call shapes", long_about = None)]
#[command(version)]
struct Cli {
    /// Server hostname or IP
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Enable TLS
    #[arg(long)]
    tls: bool,

    /// Trusted CA certificate (PEM)
    #[arg(long, default_value = "")]
    cacert: String,

    /// Name to verify the server certificate against
    #[arg(long)]
    domain: Option<String>,

    /// Type of call: un (unary), ss (server streaming), cs (client streaming) or bs (bidirectional)
    #[arg(long, default_value = "un")]
    call: CallShape,

    /// Token attached to every call
    #[arg(long, default_value = DEFAULT_TOKEN)]
    token: String,

    /// Send calls without a token
    #[arg(long, conflicts_with = "token")]
    no_token: bool,

    /// Delay between streamed requests, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pacing_ms: u64,
}

impl From<Cli> for ClientConfig {
    fn from(cli: Cli) -> Self {
        Self {
            host: cli.host,
            port: cli.port,
            token: (!cli.no_token).then_some(cli.token),
            pacing: Duration::from_millis(cli.pacing_ms),
            tls: ClientTlsSettings {
                enabled: cli.tls,
                ca_cert_path: cli.cacert,
                domain_name: cli.domain,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let shape = cli.call;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from(cli);
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {e}");
        return Err(e.into());
    }

    let shutdown = CancellationToken::new();
    let client = match GreetClient::connect(&config).await {
        Ok(client) => client.with_cancellation(shutdown.clone()),
        Err(e) => {
            error!("Could not connect to {}: {e}", config.endpoint());
            return Err(e.into());
        }
    };

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal, cancelling call");
                shutdown.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl+C: {e}"),
        }
    });

    match client.run(shape).await {
        Ok(report) => {
            for result in report.results() {
                println!("{result}");
            }
            info!(%shape, status = %report.status, responses = report.responses.len(), "Call complete");
            Ok(())
        }
        Err(e) => {
            if let Some(report) = e.report() {
                for result in report.results() {
                    println!("{result}");
                }
            }
            error!(%shape, status = %e.terminal_status(), "Error while calling {}: {e}", shape.route_name());
            Err(e.into())
        }
    }
}
