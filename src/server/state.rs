use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::shape::CallShape;

/// Per-shape handler invocation counters.
///
/// A call rejected before dispatch never increments its counter, which makes
/// the auth gate observable from tests and at runtime.
#[derive(Clone, Debug, Default)]
pub struct HandlerStats {
    counts: Arc<[AtomicU64; 4]>,
}

impl HandlerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that the handler for `shape` started running.
    pub fn record(&self, shape: CallShape) {
        self.counts[Self::slot(shape)].fetch_add(1, Ordering::Relaxed);
        metrics::counter!("greet.handler.invocations", "shape" => shape.route_name())
            .increment(1);
    }

    /// Number of times the handler for `shape` ran.
    pub fn invocations(&self, shape: CallShape) -> u64 {
        self.counts[Self::slot(shape)].load(Ordering::Relaxed)
    }

    /// Total handler invocations across all shapes.
    pub fn total(&self) -> u64 {
        CallShape::ALL.iter().map(|s| self.invocations(*s)).sum()
    }

    fn slot(shape: CallShape) -> usize {
        match shape {
            CallShape::Unary => 0,
            CallShape::ServerStreaming => 1,
            CallShape::ClientStreaming => 2,
            CallShape::Bidirectional => 3,
        }
    }
}
