//! Token check applied to inbound calls before they reach a handler.
//!
//! The caller attaches its token as the `token` call metadata entry. gRPC
//! metadata travels as HTTP/2 headers, so the check runs as a tower layer
//! in front of the generated router, where the request path tells us the
//! shape of the call before any message has been decoded.
//!
//! Rejected calls are answered with UNAUTHENTICATED directly from the layer,
//! so the handler never runs for them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tonic::body::BoxBody;
use tonic::codegen::http::{self, HeaderMap};
use tonic::Status;
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::shape::CallShape;

/// Metadata key carrying the caller's token.
pub const TOKEN_METADATA_KEY: &str = "token";

/// Which call shapes must present a valid token.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthScope {
    /// Only single request/single response calls are gated.
    #[default]
    UnaryOnly,
    /// Every greeting call is gated, whatever its shape.
    AllShapes,
}

impl AuthScope {
    /// Whether calls of `shape` must pass the token check.
    pub fn requires_auth(self, shape: CallShape) -> bool {
        match self {
            AuthScope::UnaryOnly => shape == CallShape::Unary,
            AuthScope::AllShapes => true,
        }
    }
}

impl std::str::FromStr for AuthScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unary-only" | "unary" => Ok(AuthScope::UnaryOnly),
            "all-shapes" | "all" => Ok(AuthScope::AllShapes),
            other => Err(format!(
                "unknown auth scope {other}; expected unary-only or all-shapes"
            )),
        }
    }
}

/// Compares the `token` metadata of a call against the configured token.
#[derive(Clone, Debug)]
pub struct TokenValidator {
    expected: String,
}

impl TokenValidator {
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
        }
    }

    /// Admits the call if its metadata carries the expected token.
    #[allow(clippy::result_large_err)]
    pub fn authorize(&self, headers: &HeaderMap) -> Result<(), Status> {
        let token = headers
            .get(TOKEN_METADATA_KEY)
            .ok_or_else(|| Status::unauthenticated("missing call metadata"))?;

        match token.to_str() {
            Ok(token) if token == self.expected => Ok(()),
            _ => Err(Status::unauthenticated("invalid token")),
        }
    }
}

/// Tower layer installing the token check on a gRPC router.
#[derive(Clone)]
pub struct AuthLayer {
    validator: Arc<TokenValidator>,
    scope: AuthScope,
}

impl AuthLayer {
    pub fn new(validator: TokenValidator, scope: AuthScope) -> Self {
        Self {
            validator: Arc::new(validator),
            scope,
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            validator: self.validator.clone(),
            scope: self.scope,
        }
    }
}

/// Service produced by [`AuthLayer`].
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    validator: Arc<TokenValidator>,
    scope: AuthScope,
}

impl<S> AuthService<S> {
    /// Decides whether a call on `path` may proceed.
    #[allow(clippy::result_large_err)]
    fn admit(&self, path: &str, headers: &HeaderMap) -> Result<(), Status> {
        let keys: Vec<&str> = headers.keys().map(|k| k.as_str()).collect();
        debug!(path, metadata = ?keys, "Inbound call metadata");

        let Some(shape) = CallShape::from_path(path) else {
            return Ok(());
        };
        debug!(
            %shape,
            streams_requests = shape.streams_requests(),
            streams_responses = shape.streams_responses(),
            "Resolved call shape"
        );

        if !self.scope.requires_auth(shape) {
            return Ok(());
        }

        self.validator.authorize(headers).inspect_err(|status| {
            metrics::counter!("greet.auth.rejected").increment(1);
            warn!(%shape, reason = status.message(), "Rejected call");
        })
    }
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for AuthService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<BoxBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        if let Err(status) = self.admit(req.uri().path(), req.headers()) {
            return Box::pin(async move { Ok(status.into_http()) });
        }

        // The clone has not been polled ready; swap so the ready one serves this call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(inner.call(req))
    }
}
