//! Error types for the greeting service

use crate::call::{CallReport, TerminalStatus};

/// Main error types for the library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The connection could not be established or the server failed to run.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A call finished with a non-OK gRPC status.
    #[error("Call failed: {0}")]
    Status(#[from] tonic::Status),

    /// Configuration was malformed or inconsistent.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// TLS material could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A driver task stopped without completing its half of the call.
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A call ended abruptly; the report records what was observed until then.
    #[error("{} call ended with {}: {source}", .report.shape, .report.status)]
    Call {
        report: Box<CallReport>,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Classifies this failure as the terminal status the caller observes.
    pub fn terminal_status(&self) -> TerminalStatus {
        match self {
            Error::Status(status) => TerminalStatus::from(status.code()),
            Error::Task(e) if e.is_cancelled() => TerminalStatus::Cancelled,
            Error::Call { report, .. } => report.status,
            _ => TerminalStatus::Internal,
        }
    }

    /// Report of the failed call, when the failure happened inside one.
    pub fn report(&self) -> Option<&CallReport> {
        match self {
            Error::Call { report, .. } => Some(report),
            _ => None,
        }
    }

    /// The gRPC status behind this failure, if there is one.
    pub fn status(&self) -> Option<&tonic::Status> {
        match self {
            Error::Status(status) => Some(status),
            Error::Call { source, .. } => source.status(),
            _ => None,
        }
    }
}

/// Result type alias for greeting operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallState;
    use crate::shape::CallShape;

    #[test]
    fn call_failure_reports_its_recorded_status() {
        let source = Error::Status(tonic::Status::unauthenticated("invalid token"));
        let report = CallReport::failed(
            CallShape::Unary,
            Vec::new(),
            CallState::Open,
            source.terminal_status(),
        );
        let err = Error::Call {
            report: Box::new(report),
            source: Box::new(source),
        };

        assert_eq!(err.terminal_status(), TerminalStatus::Unauthenticated);
        assert_eq!(err.status().map(|s| s.message()), Some("invalid token"));
        assert_eq!(err.report().map(|r| r.state), Some(CallState::Closed));
        assert!(err.to_string().starts_with("unary call ended with UNAUTHENTICATED"));
    }
}
