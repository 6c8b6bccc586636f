//! Per-call bookkeeping shared by every driver.
//!
//! A call has two independent directions. The driver half-closes its outbound
//! direction once it has nothing left to send, and observes end-of-stream on
//! its inbound direction when the handler is done. The call is over once both
//! have happened, or as soon as a failure forces it shut.

use std::fmt;

use tonic::Code;

use crate::proto::GreetResponse;
use crate::shape::CallShape;

/// Lifecycle of a call as seen by the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    /// Both directions are open.
    Open,
    /// The driver has half-closed; responses may still arrive.
    OutboundClosed,
    /// The handler has finished sending; the driver may still send.
    InboundClosed,
    /// Both directions are closed. No transition leaves this state.
    Closed,
}

impl CallState {
    /// Records that the driver has sent its last message.
    pub fn close_outbound(self) -> Self {
        match self {
            CallState::Open => CallState::OutboundClosed,
            CallState::InboundClosed | CallState::Closed => CallState::Closed,
            CallState::OutboundClosed => CallState::OutboundClosed,
        }
    }

    /// Records that end-of-stream was observed on the inbound direction.
    pub fn close_inbound(self) -> Self {
        match self {
            CallState::Open => CallState::InboundClosed,
            CallState::OutboundClosed | CallState::Closed => CallState::Closed,
            CallState::InboundClosed => CallState::InboundClosed,
        }
    }

    /// Abrupt termination: both directions are gone at once.
    pub fn fail(self) -> Self {
        CallState::Closed
    }

    pub fn is_closed(self) -> bool {
        self == CallState::Closed
    }

    /// Whether the driver may still hand messages to the outbound queue.
    pub fn can_send(self) -> bool {
        matches!(self, CallState::Open | CallState::InboundClosed)
    }

    /// Whether responses may still arrive.
    pub fn can_receive(self) -> bool {
        matches!(self, CallState::Open | CallState::OutboundClosed)
    }
}

/// Final outcome of a call, set exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalStatus {
    /// Normal completion, including end-of-stream after many responses.
    Ok,
    /// The auth check rejected the call.
    Unauthenticated,
    /// Decode or transport failure mid-call, or a handler fault.
    Internal,
    /// The peer or the caller abandoned the call.
    Cancelled,
}

impl From<Code> for TerminalStatus {
    fn from(code: Code) -> Self {
        match code {
            Code::Ok => TerminalStatus::Ok,
            Code::Unauthenticated => TerminalStatus::Unauthenticated,
            Code::Cancelled => TerminalStatus::Cancelled,
            _ => TerminalStatus::Internal,
        }
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TerminalStatus::Ok => "OK",
            TerminalStatus::Unauthenticated => "UNAUTHENTICATED",
            TerminalStatus::Internal => "INTERNAL",
            TerminalStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// What a driver observed over the lifetime of one call.
#[derive(Clone, Debug, PartialEq)]
pub struct CallReport {
    /// Shape the call was opened with.
    pub shape: CallShape,
    /// Every response received, in arrival order.
    pub responses: Vec<GreetResponse>,
    /// Final state of the call.
    pub state: CallState,
    /// Terminal status of the call.
    pub status: TerminalStatus,
}

impl CallReport {
    /// Report for a call that ran to completion with both directions closed.
    pub fn completed(shape: CallShape, responses: Vec<GreetResponse>, state: CallState) -> Self {
        Self {
            shape,
            responses,
            state,
            status: TerminalStatus::Ok,
        }
    }

    /// Report for a call that ended abruptly. Responses received before the
    /// failure are kept.
    pub fn failed(
        shape: CallShape,
        responses: Vec<GreetResponse>,
        state: CallState,
        status: TerminalStatus,
    ) -> Self {
        Self {
            shape,
            responses,
            state: state.fail(),
            status,
        }
    }

    /// Result strings of every response, in arrival order.
    pub fn results(&self) -> Vec<&str> {
        self.responses.iter().map(|r| r.result.as_str()).collect()
    }
}
