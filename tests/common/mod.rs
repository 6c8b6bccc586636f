//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use greeting_rpc::config::{ClientConfig, ServerConfig, StreamSettings};
use greeting_rpc::{serve, AuthScope, GreetClient, GreetServiceImpl, HandlerStats};
use tokio::net::TcpListener;

/// Initialize test tracing (call once at the beginning of tests).
///
/// Subsequent calls are safe and will be ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new("greeting_rpc=debug");

    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .try_init();
}

/// A server running on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub stats: HandlerStats,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Server configuration with unpaced streams.
pub fn fast_config(scope: AuthScope) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        auth_scope: scope,
        stream: StreamSettings {
            count: 10,
            interval_ms: 0,
        },
        ..ServerConfig::default()
    }
}

pub async fn start_test_server(config: ServerConfig) -> TestServer {
    init_tracing();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let service = GreetServiceImpl::new(config.stream);
    let stats = service.stats();

    let handle = tokio::spawn(async move {
        serve(&config, service, listener, std::future::pending())
            .await
            .unwrap();
    });

    TestServer {
        addr,
        stats,
        handle,
    }
}

pub fn client_config(server: &TestServer, token: Option<&str>) -> ClientConfig {
    ClientConfig {
        host: server.addr.ip().to_string(),
        port: server.addr.port(),
        token: token.map(str::to_string),
        pacing: Duration::ZERO,
        ..ClientConfig::default()
    }
}

pub async fn connect(server: &TestServer, token: Option<&str>) -> GreetClient {
    GreetClient::connect(&client_config(server, token))
        .await
        .expect("Failed to connect to server")
}
