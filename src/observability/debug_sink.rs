//! Caller-supplied diagnostic channel
//!
//! Informational notes (duplicate subscriptions, operations skipped while
//! disconnected, transport debug traces) go here in addition to `tracing`.

use std::fmt;
use std::sync::Arc;

/// Callback receiving one diagnostic line at a time. Defaults to a no-op.
#[derive(Clone)]
pub struct DebugSink(Arc<dyn Fn(&str) + Send + Sync>);

impl DebugSink {
    pub fn new(sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(sink))
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn emit(&self, line: &str) {
        (self.0)(line)
    }
}

impl Default for DebugSink {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for DebugSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DebugSink")
    }
}
