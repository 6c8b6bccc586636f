//! Wire messages and generated gRPC stubs for `example.greeting.GreetService`.
//!
//! The message layout matches `proto/greeting.proto`. Missing fields decode to
//! their zero value, so a request without a `greeter` greets the empty name.

/// The person being greeted.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct Greeter {
    #[prost(string, tag = "1")]
    pub first_name: String,
    #[prost(string, tag = "2")]
    pub last_name: String,
}

/// Greeting request, sent by a driver once per message.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct GreetRequest {
    #[prost(message, optional, tag = "1")]
    pub greeter: Option<Greeter>,
}

/// Greeting response, sent by a handler once per message.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct GreetResponse {
    #[prost(string, tag = "1")]
    pub result: String,
}

impl GreetRequest {
    /// Creates a request for a full name.
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            greeter: Some(Greeter {
                first_name: first_name.into(),
                last_name: last_name.into(),
            }),
        }
    }

    /// Creates a request carrying only a first name.
    pub fn first_name_only(first_name: impl Into<String>) -> Self {
        Self::new(first_name, String::new())
    }

    /// First name of the greeter, or `""` when the greeter is absent.
    pub fn first_name(&self) -> &str {
        self.greeter
            .as_ref()
            .map(|g| g.first_name.as_str())
            .unwrap_or_default()
    }
}

impl GreetResponse {
    pub fn new(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
        }
    }
}

include!(concat!(env!("OUT_DIR"), "/example.greeting.GreetService.rs"));
