//! Transport boundary for the socket client
//!
//! The wire protocol (framing, handshake, heartbeats) lives outside this
//! crate. A transport plugs in by implementing [`SessionFactory`], which
//! builds one [`Session`] per connection attempt. Sessions report lifecycle
//! events through the [`SessionEventSink`] they were created with; the sink
//! is bound to the session's generation so the client can tell a current
//! session's events from a replaced one's.

use crate::observability::DebugSink;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

pub mod frame;

pub use frame::{Body, CloseEvent, Frame, Headers, Message, PublishOptions, PublishRequest};

/// Caller-owned handler invoked for every message on a destination.
///
/// The client holds a shared reference; the same handler is re-bound to a
/// fresh session after every reconnect.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Errors raised by a transport session
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Session activation failed")]
    ActivationFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Session deactivation failed")]
    DeactivationFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription to {destination} failed")]
    SubscriptionFailed {
        destination: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Unsubscribe from {destination} failed")]
    UnsubscribeFailed {
        destination: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Publishing to {destination} failed")]
    PublishFailed {
        destination: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Session is closed")]
    SessionClosed,
}

/// Lifecycle events a session reports asynchronously
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake completed
    Connected(Frame),
    /// Protocol-level failure reported by the broker
    ProtocolError(Frame),
    /// Underlying socket closed
    TransportClosed(CloseEvent),
}

/// Event slot handed to a session at construction.
///
/// Each session gets exactly one sink. Emitting after the client has shut
/// down is harmless and returns `false`.
#[derive(Debug, Clone)]
pub struct SessionEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, SessionEvent)>,
}

impl SessionEventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, SessionEvent)>) -> Self {
        Self { generation, tx }
    }

    /// Generation of the session this sink belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, event: SessionEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }

    pub fn connected(&self, frame: Frame) -> bool {
        self.emit(SessionEvent::Connected(frame))
    }

    pub fn protocol_error(&self, frame: Frame) -> bool {
        self.emit(SessionEvent::ProtocolError(frame))
    }

    pub fn transport_closed(&self, event: CloseEvent) -> bool {
        self.emit(SessionEvent::TransportClosed(event))
    }
}

/// Live transport-side subscription.
///
/// Released through [`SubscriptionHandle::unsubscribe`]; dropping a handle
/// without unsubscribing only forgets it.
#[async_trait]
pub trait SubscriptionHandle: Send {
    /// Transport-assigned subscription id
    fn id(&self) -> &str;

    async fn unsubscribe(&mut self) -> Result<(), TransportError>;
}

/// One transport session (one connection attempt's lifetime).
///
/// `activate` and `deactivate` only *request* the transition; the outcome is
/// reported later through the session's [`SessionEventSink`].
#[async_trait]
pub trait Session: Send {
    /// Static metadata sent with the handshake; set before each `activate`
    fn set_connect_headers(&mut self, headers: Headers);

    async fn activate(&mut self) -> Result<(), TransportError>;

    async fn deactivate(&mut self) -> Result<(), TransportError>;

    async fn subscribe(
        &mut self,
        destination: &str,
        handler: MessageHandler,
    ) -> Result<Box<dyn SubscriptionHandle>, TransportError>;

    async fn publish(&mut self, request: PublishRequest) -> Result<(), TransportError>;
}

/// Builds a fresh session, with a fresh underlying socket, on every call
pub trait SessionFactory: Send + Sync {
    fn create_session(&self, url: &Url, events: SessionEventSink, debug: DebugSink) -> Box<dyn Session>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_tags_events_with_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = SessionEventSink::new(7, tx);

        assert_eq!(sink.generation(), 7);
        assert!(sink.connected(Frame::new("CONNECTED")));
        assert!(sink.transport_closed(CloseEvent::new(1006, "")));

        let (generation, event) = rx.try_recv().unwrap();
        assert_eq!(generation, 7);
        assert_eq!(event, SessionEvent::Connected(Frame::new("CONNECTED")));

        let (generation, event) = rx.try_recv().unwrap();
        assert_eq!(generation, 7);
        assert!(matches!(event, SessionEvent::TransportClosed(_)));
    }

    #[test]
    fn test_sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = SessionEventSink::new(1, tx);
        drop(rx);

        assert!(!sink.protocol_error(Frame::new("ERROR")));
    }

    #[test]
    fn test_transport_error_display() {
        let errors = vec![
            TransportError::ActivationFailed("boom".into()),
            TransportError::DeactivationFailed("boom".into()),
            TransportError::SubscriptionFailed {
                destination: "/topic/a".to_string(),
                source: "boom".into(),
            },
            TransportError::UnsubscribeFailed {
                destination: "/topic/a".to_string(),
                source: "boom".into(),
            },
            TransportError::PublishFailed {
                destination: "/topic/a".to_string(),
                source: "boom".into(),
            },
            TransportError::SessionClosed,
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
