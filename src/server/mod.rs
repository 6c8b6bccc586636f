//! Responder side: the four interaction handlers and the server that hosts them.

use std::future::Future;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::info;

use crate::auth::{AuthLayer, TokenValidator};
use crate::config::ServerConfig;
use crate::proto::greet_service_server::GreetServiceServer;
use crate::Result;

/// gRPC service implementation.
pub mod service;

/// Handler invocation counters.
pub mod state;

pub use service::GreetServiceImpl;
pub use state::HandlerStats;

/// Serves `service` on `listener` until `shutdown` resolves.
///
/// Every call passes through the token check before the generated router
/// dispatches it to its handler. Health reporting follows the server's
/// lifecycle: serving once started, not serving once shutdown begins.
pub async fn serve<F>(
    config: &ServerConfig,
    service: GreetServiceImpl,
    listener: TcpListener,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<GreetServiceServer<GreetServiceImpl>>()
        .await;

    let mut builder = Server::builder();
    if config.tls.enabled {
        builder = builder.tls_config(config.tls.server_tls_config()?)?;
    }

    let auth = AuthLayer::new(TokenValidator::new(config.token.clone()), config.auth_scope);

    let signal = async move {
        shutdown.await;
        health_reporter
            .set_not_serving::<GreetServiceServer<GreetServiceImpl>>()
            .await;
        info!("Initiating graceful shutdown (allowing in-flight calls to complete)");
    };

    builder
        .layer(auth)
        .add_service(health_service)
        .add_service(GreetServiceServer::new(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
        .await?;

    Ok(())
}
