//! Observability for the socket client
//!
//! Structured logging through `tracing`, plus the caller-supplied
//! [`DebugSink`] that receives the client's diagnostic notes.

pub mod debug_sink;
pub mod logging;

pub use debug_sink::DebugSink;
pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{session_span, subscription_span};
