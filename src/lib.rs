//! Four interaction shapes of a greeting service over one gRPC connection.
//!
//! - **Unary**: one request, one response, gated by a token check.
//! - **Server streaming**: one request, a paced sequence of responses.
//! - **Client streaming**: a sequence of requests, one aggregated response.
//! - **Bidirectional streaming**: requests and responses interleaved, with the
//!   caller sending and receiving from two independent tasks.
//!
//! [`server`] hosts the handlers, [`client`] holds the matching drivers, and
//! [`auth`] gates calls before they reach a handler.

/// Token check applied before dispatch.
pub mod auth;

/// Call state machine, terminal status and call reports.
pub mod call;

/// Caller-side interaction drivers.
pub mod client;

/// Process configuration.
pub mod config;

/// Error types.
pub mod error;

/// Wire messages and generated gRPC stubs.
pub mod proto;

/// Responder-side handlers and server bootstrap.
pub mod server;

/// Call shapes and the routes they are served on.
pub mod shape;

pub use auth::{AuthLayer, AuthScope, TokenValidator};
pub use call::{CallReport, CallState, TerminalStatus};
pub use client::GreetClient;
pub use config::{ClientConfig, ServerConfig, StreamSettings};
pub use error::{Error, Result};
pub use proto::{GreetRequest, GreetResponse, Greeter};
pub use server::{serve, GreetServiceImpl, HandlerStats};
pub use shape::CallShape;
