use std::future::Future;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, info, warn};

use super::state::HandlerStats;
use crate::config::StreamSettings;
use crate::proto::greet_service_server::GreetService;
use crate::proto::{GreetRequest, GreetResponse};
use crate::shape::CallShape;

/// Capacity of the per-call outbound queue on the streaming shapes.
const RESPONSE_BUFFER: usize = 16;

type ResponseSender = mpsc::Sender<Result<GreetResponse, Status>>;

/// Unary greeting text.
pub fn greeting(first_name: &str) -> String {
    format!("Hello {first_name}")
}

/// Greeting text for the `index`-th server-streamed response.
pub fn numbered_greeting(first_name: &str, index: usize) -> String {
    format!("Hello {first_name} number {index}")
}

/// Greeting text used by the request-streaming shapes.
pub fn exclaimed_greeting(first_name: &str) -> String {
    format!("Hello {first_name}! ")
}

/// gRPC service implementation for `example.greeting.GreetService`.
#[derive(Clone, Debug)]
pub struct GreetServiceImpl {
    stream: StreamSettings,
    stats: HandlerStats,
}

impl GreetServiceImpl {
    /// Creates a new greeting service with the given stream settings.
    pub fn new(stream: StreamSettings) -> Self {
        Self {
            stream,
            stats: HandlerStats::new(),
        }
    }

    /// Handler invocation counters, shared with every clone of this service.
    pub fn stats(&self) -> HandlerStats {
        self.stats.clone()
    }
}

/// Runs a handler body on its own task so a panic resolves to INTERNAL.
async fn supervised<F, T>(shape: CallShape, body: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(body).await {
        Ok(result) => result,
        Err(e) => {
            error!(%shape, "Handler task failed: {e}");
            Err(Status::internal("handler failed"))
        }
    }
}

/// Spawns the producer of a response stream.
///
/// The stream only ends once the producer has finished, and a producer that
/// panics ends it with INTERNAL instead of a clean end-of-stream.
fn spawn_producer<F>(shape: CallShape, tx: ResponseSender, producer: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(producer);
    tokio::spawn(async move {
        if let Err(e) = handle.await {
            error!(%shape, "Response producer failed: {e}");
            let _ = tx.send(Err(Status::internal("handler failed"))).await;
        }
    });
}

async fn produce_numbered(first_name: String, settings: StreamSettings, tx: ResponseSender) {
    let interval = settings.interval();

    for index in 0..settings.count {
        if index > 0 && !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }

        let response = GreetResponse::new(numbered_greeting(&first_name, index));
        if tx.send(Ok(response)).await.is_err() {
            debug!(index, "Caller went away, stopping GreetManyTimes");
            return;
        }
    }
}

async fn echo_greetings(mut inbound: Streaming<GreetRequest>, tx: ResponseSender) {
    loop {
        match inbound.message().await {
            Ok(Some(request)) => {
                let response = GreetResponse::new(exclaimed_greeting(request.first_name()));
                if tx.send(Ok(response)).await.is_err() {
                    debug!("Caller went away, stopping GreetEveryone");
                    return;
                }
            }
            Ok(None) => return,
            Err(status) => {
                warn!(code = ?status.code(), "Error while reading GreetEveryone requests: {status}");
                let _ = tx.send(Err(status)).await;
                return;
            }
        }
    }
}

#[tonic::async_trait]
impl GreetService for GreetServiceImpl {
    type GreetManyTimesStream = ReceiverStream<Result<GreetResponse, Status>>;
    type GreetEveryoneStream = ReceiverStream<Result<GreetResponse, Status>>;

    async fn greet(
        &self,
        request: Request<GreetRequest>,
    ) -> Result<Response<GreetResponse>, Status> {
        self.stats.record(CallShape::Unary);

        let req = request.into_inner();
        info!(request = ?req, "Greet invoked");

        Ok(Response::new(GreetResponse::new(greeting(req.first_name()))))
    }

    async fn greet_many_times(
        &self,
        request: Request<GreetRequest>,
    ) -> Result<Response<Self::GreetManyTimesStream>, Status> {
        self.stats.record(CallShape::ServerStreaming);

        let req = request.into_inner();
        info!(request = ?req, count = self.stream.count, "GreetManyTimes invoked");

        let (tx, rx) = mpsc::channel(RESPONSE_BUFFER);
        let first_name = req.first_name().to_string();
        spawn_producer(
            CallShape::ServerStreaming,
            tx.clone(),
            produce_numbered(first_name, self.stream, tx),
        );

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn long_greet(
        &self,
        request: Request<Streaming<GreetRequest>>,
    ) -> Result<Response<GreetResponse>, Status> {
        self.stats.record(CallShape::ClientStreaming);
        info!("LongGreet invoked with a streaming request");

        let mut inbound = request.into_inner();
        let result = supervised(CallShape::ClientStreaming, async move {
            let mut result = String::new();
            while let Some(req) = inbound.message().await.inspect_err(|status| {
                warn!(code = ?status.code(), "Error while reading LongGreet requests: {status}");
            })? {
                result.push_str(&exclaimed_greeting(req.first_name()));
            }
            Ok(result)
        })
        .await?;

        Ok(Response::new(GreetResponse::new(result)))
    }

    async fn greet_everyone(
        &self,
        request: Request<Streaming<GreetRequest>>,
    ) -> Result<Response<Self::GreetEveryoneStream>, Status> {
        self.stats.record(CallShape::Bidirectional);
        info!("GreetEveryone invoked with a streaming request");

        let (tx, rx) = mpsc::channel(RESPONSE_BUFFER);
        let inbound = request.into_inner();
        spawn_producer(
            CallShape::Bidirectional,
            tx.clone(),
            echo_greetings(inbound, tx),
        );

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
