//! Call shapes and the routes they are served on.

use std::fmt;
use std::str::FromStr;

/// Fully qualified gRPC service name.
pub const SERVICE_NAME: &str = "example.greeting.GreetService";

/// Cardinality of the messages exchanged in each direction of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallShape {
    /// One request, one response.
    Unary,
    /// One request, many responses.
    ServerStreaming,
    /// Many requests, one response.
    ClientStreaming,
    /// Many requests and many responses, interleaved.
    Bidirectional,
}

impl CallShape {
    /// All shapes, in the order the service declares them.
    pub const ALL: [CallShape; 4] = [
        CallShape::Unary,
        CallShape::ServerStreaming,
        CallShape::ClientStreaming,
        CallShape::Bidirectional,
    ];

    /// Method name on the wire.
    pub fn route_name(self) -> &'static str {
        match self {
            CallShape::Unary => "Greet",
            CallShape::ServerStreaming => "GreetManyTimes",
            CallShape::ClientStreaming => "LongGreet",
            CallShape::Bidirectional => "GreetEveryone",
        }
    }

    /// HTTP/2 path the method is served on, e.g. `/example.greeting.GreetService/Greet`.
    pub fn path(self) -> String {
        format!("/{SERVICE_NAME}/{}", self.route_name())
    }

    /// Resolves the shape of an inbound call from its request path.
    ///
    /// Returns `None` for paths that do not belong to the greeting service.
    pub fn from_path(path: &str) -> Option<Self> {
        let method = path
            .strip_prefix('/')?
            .strip_prefix(SERVICE_NAME)?
            .strip_prefix('/')?;

        Self::ALL
            .into_iter()
            .find(|shape| shape.route_name() == method)
    }

    /// Whether the caller sends more than one message.
    pub fn streams_requests(self) -> bool {
        matches!(self, CallShape::ClientStreaming | CallShape::Bidirectional)
    }

    /// Whether the handler sends more than one message.
    pub fn streams_responses(self) -> bool {
        matches!(self, CallShape::ServerStreaming | CallShape::Bidirectional)
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallShape::Unary => "unary",
            CallShape::ServerStreaming => "server-streaming",
            CallShape::ClientStreaming => "client-streaming",
            CallShape::Bidirectional => "bidirectional-streaming",
        };
        f.write_str(name)
    }
}

impl FromStr for CallShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "un" | "unary" => Ok(CallShape::Unary),
            "ss" | "server-streaming" => Ok(CallShape::ServerStreaming),
            "cs" | "client-streaming" => Ok(CallShape::ClientStreaming),
            "bs" | "bidi" | "bidirectional-streaming" => Ok(CallShape::Bidirectional),
            other => Err(format!(
                "unknown call type {other}; expected un, ss, cs or bs"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_round_trips_through_from_path() {
        for shape in CallShape::ALL {
            assert_eq!(CallShape::from_path(&shape.path()), Some(shape));
        }
    }

    #[test]
    fn unary_path_matches_wire_route() {
        assert_eq!(
            CallShape::Unary.path(),
            "/example.greeting.GreetService/Greet"
        );
    }

    #[test]
    fn foreign_paths_have_no_shape() {
        assert_eq!(CallShape::from_path("/grpc.health.v1.Health/Check"), None);
        assert_eq!(CallShape::from_path("/example.greeting.GreetService/Nope"), None);
        assert_eq!(CallShape::from_path("example.greeting.GreetService/Greet"), None);
        assert_eq!(CallShape::from_path(""), None);
    }

    #[test]
    fn parses_cli_short_codes() {
        assert_eq!("un".parse::<CallShape>(), Ok(CallShape::Unary));
        assert_eq!("ss".parse::<CallShape>(), Ok(CallShape::ServerStreaming));
        assert_eq!("CS".parse::<CallShape>(), Ok(CallShape::ClientStreaming));
        assert_eq!("bs".parse::<CallShape>(), Ok(CallShape::Bidirectional));
        assert!("xx".parse::<CallShape>().is_err());
    }

    #[test]
    fn stream_directions() {
        assert!(!CallShape::Unary.streams_requests());
        assert!(!CallShape::Unary.streams_responses());
        assert!(CallShape::ServerStreaming.streams_responses());
        assert!(CallShape::ClientStreaming.streams_requests());
        assert!(CallShape::Bidirectional.streams_requests());
        assert!(CallShape::Bidirectional.streams_responses());
    }
}
