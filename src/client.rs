//! Caller side: one driver per call shape.
//!
//! Every driver returns a [`CallReport`] on success. End-of-stream on the
//! inbound direction is the normal way a streaming call finishes and is never
//! reported as an error. Any other failure is returned as an [`Error`] whose
//! [`Error::terminal_status`] classifies it and whose [`Error::report`]
//! holds the state and the responses observed before the failure.
//!
//! Request streams are fed by a spawned send task through a bounded queue.
//! Dropping the queue's sender is the half-close: once the send task returns
//! nothing more can be sent on that call.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::Channel;
use tonic::{Request, Status, Streaming};
use tracing::{debug, info};

use crate::auth::TOKEN_METADATA_KEY;
use crate::call::{CallReport, CallState};
use crate::config::ClientConfig;
use crate::proto::greet_service_client::GreetServiceClient;
use crate::proto::{GreetRequest, GreetResponse};
use crate::shape::CallShape;
use crate::{Error, Result};

/// Capacity of the per-call outbound queue on the request-streaming shapes.
const REQUEST_BUFFER: usize = 16;

/// Capacity of the queue between a receive task and its driver.
const RESPONSE_BUFFER: usize = 16;

/// First names sent by the request-streaming drivers when run with defaults.
pub const DEFAULT_NAMES: [&str; 5] = ["Stephane", "John", "Lucy", "Mark", "Piper"];

/// One request per name in [`DEFAULT_NAMES`].
pub fn default_requests() -> Vec<GreetRequest> {
    DEFAULT_NAMES
        .iter()
        .map(|name| GreetRequest::first_name_only(*name))
        .collect()
}

/// Aborts the task when dropped, so an abandoned call leaves nothing running.
struct TaskGuard<T>(JoinHandle<T>);

impl<T> Future for TaskGuard<T> {
    type Output = std::result::Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for TaskGuard<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Driver for the greeting service over a single channel.
///
/// Clones share the channel and the set of in-flight calls that
/// [`GreetClient::cancel_in_flight`] acts on.
#[derive(Clone)]
pub struct GreetClient {
    inner: GreetServiceClient<Channel>,
    token: Option<String>,
    pacing: Duration,
    shutdown: CancellationToken,
    in_flight: Arc<Mutex<CancellationToken>>,
}

impl GreetClient {
    /// Connects to the server described by `config`.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let mut endpoint = Channel::from_shared(config.endpoint())
            .map_err(|e| Error::Config(format!("Invalid endpoint {}: {e}", config.endpoint())))?;

        if config.tls.enabled {
            endpoint = endpoint.tls_config(config.tls.client_tls_config()?)?;
        }

        let channel = endpoint.connect().await?;
        Ok(Self::new(channel, config))
    }

    /// Wraps an established channel.
    pub fn new(channel: Channel, config: &ClientConfig) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            inner: GreetServiceClient::new(channel),
            token: config.token.clone(),
            pacing: config.pacing,
            in_flight: Arc::new(Mutex::new(shutdown.child_token())),
            shutdown,
        }
    }

    /// Ties every call of this client to `shutdown`, e.g. a process-wide signal.
    ///
    /// Once `shutdown` is cancelled, in-flight calls end with CANCELLED and
    /// later calls fail immediately.
    pub fn with_cancellation(mut self, shutdown: CancellationToken) -> Self {
        self.in_flight = Arc::new(Mutex::new(shutdown.child_token()));
        self.shutdown = shutdown;
        self
    }

    /// Cancels the calls currently in flight on this client and its clones.
    ///
    /// Calls started afterwards run normally.
    pub fn cancel_in_flight(&self) {
        let mut current = lock(&self.in_flight);
        current.cancel();
        *current = self.shutdown.child_token();
    }

    /// Runs the driver for `shape` with the default requests.
    pub async fn run(&self, shape: CallShape) -> Result<CallReport> {
        match shape {
            CallShape::Unary => self.unary("John", "Doe").await,
            CallShape::ServerStreaming => self.server_streaming("John", "Doe").await,
            CallShape::ClientStreaming => self.client_streaming(default_requests()).await,
            CallShape::Bidirectional => self.bidirectional(default_requests()).await,
        }
    }

    /// Single request, single response.
    pub async fn unary(&self, first_name: &str, last_name: &str) -> Result<CallReport> {
        info!("Starting to do a Unary RPC...");
        let mut call = CallProgress::new(CallShape::Unary);
        let mut client = self.inner.clone();

        let outcome = self
            .until_cancelled(async {
                let request = self.request(GreetRequest::new(first_name, last_name))?;
                let response = client.greet(request).await?.into_inner();
                call.close_outbound();

                info!(result = %response.result, "Response from Greet");
                call.receive(response);
                call.close_inbound();
                Ok::<(), Error>(())
            })
            .await;

        call.conclude(outcome)
    }

    /// Single request, then every response until end-of-stream.
    pub async fn server_streaming(&self, first_name: &str, last_name: &str) -> Result<CallReport> {
        info!("Starting to do a Server Streaming RPC...");
        let mut call = CallProgress::new(CallShape::ServerStreaming);
        let mut client = self.inner.clone();

        let outcome = self
            .until_cancelled(async {
                let request = self.request(GreetRequest::new(first_name, last_name))?;
                let mut inbound = client.greet_many_times(request).await?.into_inner();
                call.close_outbound();

                while let Some(response) = inbound.message().await? {
                    info!(
                        shape = %CallShape::ServerStreaming,
                        result = %response.result,
                        "Received response"
                    );
                    call.receive(response);
                }
                call.close_inbound();
                Ok::<(), Error>(())
            })
            .await;

        call.conclude(outcome)
    }

    /// Many requests, half-close, then exactly one response.
    pub async fn client_streaming(&self, requests: Vec<GreetRequest>) -> Result<CallReport> {
        info!("Starting to do a Client Streaming RPC...");
        let mut call = CallProgress::new(CallShape::ClientStreaming);
        let mut client = self.inner.clone();

        let outcome = self
            .until_cancelled(async {
                let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
                let request = self.request(ReceiverStream::new(rx))?;
                let sender = TaskGuard(tokio::spawn(send_paced(
                    CallShape::ClientStreaming,
                    requests,
                    self.pacing,
                    tx,
                )));

                let (response_tx, responses) = mpsc::channel(1);
                let receiver = TaskGuard(tokio::spawn(async move {
                    let response = client.long_greet(request).await?.into_inner();
                    info!(result = %response.result, "LongGreet Response");
                    let _ = response_tx.send(response).await;
                    Ok::<(), Status>(())
                }));

                drive(&mut call, sender, receiver, responses).await
            })
            .await;

        call.conclude(outcome)
    }

    /// Many requests and many responses, sent and received concurrently.
    ///
    /// The send task and the receive task run independently; the call only
    /// completes once the send task has half-closed and the receive task has
    /// observed end-of-stream.
    pub async fn bidirectional(&self, requests: Vec<GreetRequest>) -> Result<CallReport> {
        info!("Starting to do a BiDi Streaming RPC...");
        let mut call = CallProgress::new(CallShape::Bidirectional);
        let mut client = self.inner.clone();

        let outcome = self
            .until_cancelled(async {
                let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
                let request = self.request(ReceiverStream::new(rx))?;
                let sender = TaskGuard(tokio::spawn(send_paced(
                    CallShape::Bidirectional,
                    requests,
                    self.pacing,
                    tx,
                )));

                let (response_tx, responses) = mpsc::channel(RESPONSE_BUFFER);
                let receiver = TaskGuard(tokio::spawn(async move {
                    let inbound = client.greet_everyone(request).await?.into_inner();
                    forward_responses(CallShape::Bidirectional, inbound, response_tx).await
                }));

                drive(&mut call, sender, receiver, responses).await
            })
            .await;

        call.conclude(outcome)
    }

    /// Wraps a message or stream into a request carrying the call metadata.
    fn request<T>(&self, message: T) -> Result<Request<T>> {
        let mut request = Request::new(message);
        if let Some(token) = &self.token {
            let value: MetadataValue<Ascii> = token
                .parse()
                .map_err(|_| Error::Config("token is not valid call metadata".to_string()))?;
            request.metadata_mut().insert(TOKEN_METADATA_KEY, value);
        }
        Ok(request)
    }

    /// Drives `call` unless it is cancelled first.
    ///
    /// Cancelling drops the call future, which resets both directions of the
    /// call and aborts any task it owns.
    async fn until_cancelled<F>(&self, call: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let cancel = lock(&self.in_flight).clone();

        tokio::select! {
            result = call => result,
            _ = cancel.cancelled() => {
                debug!("Call cancelled by caller");
                Err(Error::Status(Status::cancelled("call cancelled by caller")))
            }
        }
    }
}

fn lock(token: &Mutex<CancellationToken>) -> MutexGuard<'_, CancellationToken> {
    token.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the driver has observed of one call so far.
struct CallProgress {
    shape: CallShape,
    state: CallState,
    responses: Vec<GreetResponse>,
}

impl CallProgress {
    fn new(shape: CallShape) -> Self {
        Self {
            shape,
            state: CallState::Open,
            responses: Vec::new(),
        }
    }

    fn close_outbound(&mut self) {
        self.state = self.state.close_outbound();
        debug!(shape = %self.shape, state = ?self.state, "Outbound direction closed");
    }

    fn close_inbound(&mut self) {
        self.state = self.state.close_inbound();
        debug!(shape = %self.shape, state = ?self.state, "Inbound direction closed");
    }

    fn receive(&mut self, response: GreetResponse) {
        self.responses.push(response);
    }

    /// Turns the outcome of the call into its report.
    fn conclude(self, outcome: Result<()>) -> Result<CallReport> {
        match outcome {
            Ok(()) => Ok(CallReport::completed(self.shape, self.responses, self.state)),
            Err(source) => {
                let status = source.terminal_status();
                debug!(shape = %self.shape, state = ?self.state, %status, "Call failed");
                let report = CallReport::failed(self.shape, self.responses, self.state, status);
                Err(Error::Call {
                    report: Box::new(report),
                    source: Box::new(source),
                })
            }
        }
    }
}

/// Runs the send half and the receive half of a call until both are closed.
///
/// Responses are recorded as the receive task forwards them. Whichever half
/// finishes first closes its direction while the other keeps going, and a
/// failure on either side ends the call at once.
async fn drive(
    call: &mut CallProgress,
    mut sender: TaskGuard<usize>,
    mut receiver: TaskGuard<std::result::Result<(), Status>>,
    mut responses: mpsc::Receiver<GreetResponse>,
) -> Result<()> {
    while !call.state.is_closed() {
        tokio::select! {
            sent = &mut sender, if call.state.can_send() => {
                let sent = sent?;
                debug!(shape = %call.shape, sent, "Send task finished");
                call.close_outbound();
            }
            response = responses.recv(), if call.state.can_receive() => match response {
                Some(response) => call.receive(response),
                None => {
                    // The forwarding side is gone; its result tells end-of-stream from failure.
                    (&mut receiver).await??;
                    call.close_inbound();
                }
            },
        }
    }

    Ok(())
}

/// Sends `requests` in order, pausing `pacing` between sends, then half-closes.
async fn send_paced(
    shape: CallShape,
    requests: Vec<GreetRequest>,
    pacing: Duration,
    tx: mpsc::Sender<GreetRequest>,
) -> usize {
    let mut sent = 0;

    for request in requests {
        if sent > 0 && !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }

        info!(%shape, request = ?request, "Sending request");
        if tx.send(request).await.is_err() {
            debug!(%shape, sent, "Call closed before every request was sent");
            break;
        }
        sent += 1;
    }

    debug!(%shape, sent, "Outbound direction half-closed");
    sent
}

/// Forwards responses to the driver until end-of-stream or the first failure.
async fn forward_responses(
    shape: CallShape,
    mut inbound: Streaming<GreetResponse>,
    tx: mpsc::Sender<GreetResponse>,
) -> std::result::Result<(), Status> {
    let mut count = 0usize;

    while let Some(response) = inbound.message().await? {
        info!(%shape, result = %response.result, "Received response");
        if tx.send(response).await.is_err() {
            debug!(%shape, "Driver went away, stopping receive task");
            return Ok(());
        }
        count += 1;
    }

    debug!(%shape, count, "End of stream");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::TerminalStatus;

    #[test]
    fn default_requests_carry_first_names_only() {
        let requests = default_requests();
        assert_eq!(requests.len(), 5);
        assert_eq!(requests[0].first_name(), "Stephane");
        assert_eq!(requests[4].first_name(), "Piper");
        assert!(requests
            .iter()
            .all(|r| r.greeter.as_ref().map(|g| g.last_name.is_empty()) == Some(true)));
    }

    #[tokio::test]
    async fn send_paced_half_closes_after_last_request() {
        let (tx, mut rx) = mpsc::channel(8);
        let sent = send_paced(
            CallShape::ClientStreaming,
            default_requests(),
            Duration::ZERO,
            tx,
        )
        .await;

        assert_eq!(sent, 5);
        let mut names = Vec::new();
        while let Some(request) = rx.recv().await {
            names.push(request.first_name().to_string());
        }
        assert_eq!(names, DEFAULT_NAMES);
    }

    #[tokio::test]
    async fn send_paced_stops_when_call_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let sent = send_paced(
            CallShape::Bidirectional,
            default_requests(),
            Duration::ZERO,
            tx,
        )
        .await;
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn dropped_guard_aborts_its_task() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let guard = TaskGuard(tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        }));

        drop(guard);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn drive_records_responses_and_closes_both_directions() {
        let mut call = CallProgress::new(CallShape::Bidirectional);
        let (tx, responses) = mpsc::channel(4);
        let sender = TaskGuard(tokio::spawn(async {
            tokio::task::yield_now().await;
            2
        }));
        let receiver = TaskGuard(tokio::spawn(async move {
            for name in ["Ada", "Bob"] {
                let _ = tx.send(GreetResponse::new(format!("Hello {name}! "))).await;
            }
            Ok(())
        }));

        drive(&mut call, sender, receiver, responses).await.unwrap();
        assert_eq!(call.state, CallState::Closed);

        let report = call.conclude(Ok(())).unwrap();
        assert_eq!(report.results(), vec!["Hello Ada! ", "Hello Bob! "]);
        assert_eq!(report.status, TerminalStatus::Ok);
    }

    #[tokio::test]
    async fn receive_failure_yields_a_closed_report_with_partial_responses() {
        let mut call = CallProgress::new(CallShape::Bidirectional);
        let (tx, responses) = mpsc::channel(4);
        let sender = TaskGuard(tokio::spawn(std::future::pending::<usize>()));
        let receiver = TaskGuard(tokio::spawn(async move {
            let _ = tx.send(GreetResponse::new("Hello Ada! ")).await;
            Err(Status::internal("stream reset"))
        }));

        let outcome = drive(&mut call, sender, receiver, responses).await;
        let err = call.conclude(outcome).unwrap_err();

        assert_eq!(err.terminal_status(), TerminalStatus::Internal);
        let report = err.report().unwrap();
        assert_eq!(report.state, CallState::Closed);
        assert_eq!(report.results(), vec!["Hello Ada! "]);
    }

    #[tokio::test]
    async fn panicking_receive_task_is_not_a_clean_end_of_stream() {
        let mut call = CallProgress::new(CallShape::ClientStreaming);
        let (tx, responses) = mpsc::channel::<GreetResponse>(1);
        let sender = TaskGuard(tokio::spawn(async { 0 }));
        let receiver = TaskGuard(tokio::spawn(async move {
            let _tx = tx;
            let names: Vec<String> = Vec::new();
            let _ = &names[0];
            Ok::<(), Status>(())
        }));

        let err = drive(&mut call, sender, receiver, responses)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Task(_)));
        assert_eq!(err.terminal_status(), TerminalStatus::Internal);
    }
}
