//! Mock transport for testing
//!
//! `MockSessionFactory` builds in-memory sessions that record every call
//! made against them. Tests drive the lifecycle by emitting connect, error
//! and close events for a given generation, and push inbound messages to
//! the handlers bound on the latest session.

use crate::observability::DebugSink;
use crate::transport::{
    CloseEvent, Frame, Headers, Message, MessageHandler, PublishRequest, Session,
    SessionEventSink, SessionFactory, SubscriptionHandle, TransportError,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use url::Url;

/// A call recorded against a mock session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCall {
    SetConnectHeaders(Headers),
    Activate,
    Deactivate,
    Subscribe(String),
    Unsubscribe(String),
    Publish(PublishRequest),
}

struct LiveBinding {
    id: String,
    destination: String,
    handler: MessageHandler,
}

struct SessionRecord {
    generation: u64,
    url: Url,
    events: SessionEventSink,
    debug: DebugSink,
    calls: Vec<SessionCall>,
    live: Vec<LiveBinding>,
}

#[derive(Default)]
struct MockState {
    sessions: Vec<SessionRecord>,
    failing_destinations: HashSet<String>,
    fail_activation: bool,
    next_subscription_id: u64,
}

impl MockState {
    fn session_mut(&mut self, generation: u64) -> Option<&mut SessionRecord> {
        self.sessions.iter_mut().find(|s| s.generation == generation)
    }

    fn session(&self, generation: u64) -> Option<&SessionRecord> {
        self.sessions.iter().find(|s| s.generation == generation)
    }
}

/// Factory of in-memory sessions sharing one recorded state
#[derive(Clone, Default)]
pub struct MockSessionFactory {
    state: Arc<Mutex<MockState>>,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every subscribe to `destination` fail
    pub fn fail_subscriptions_to(&self, destination: &str) {
        self.lock().failing_destinations.insert(destination.to_string());
    }

    pub fn allow_subscriptions_to(&self, destination: &str) {
        self.lock().failing_destinations.remove(destination);
    }

    /// Make every subsequent `activate` fail
    pub fn fail_activation(&self, fail: bool) {
        self.lock().fail_activation = fail;
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn latest_generation(&self) -> Option<u64> {
        self.lock().sessions.last().map(|s| s.generation)
    }

    pub fn url(&self, generation: u64) -> Option<Url> {
        self.lock().session(generation).map(|s| s.url.clone())
    }

    pub fn calls(&self, generation: u64) -> Vec<SessionCall> {
        self.lock()
            .session(generation)
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    pub fn activate_count(&self, generation: u64) -> usize {
        self.calls(generation)
            .iter()
            .filter(|call| matches!(call, SessionCall::Activate))
            .count()
    }

    pub fn deactivate_count(&self, generation: u64) -> usize {
        self.calls(generation)
            .iter()
            .filter(|call| matches!(call, SessionCall::Deactivate))
            .count()
    }

    pub fn subscribe_calls(&self, generation: u64) -> Vec<String> {
        self.calls(generation)
            .into_iter()
            .filter_map(|call| match call {
                SessionCall::Subscribe(destination) => Some(destination),
                _ => None,
            })
            .collect()
    }

    pub fn unsubscribe_calls(&self, generation: u64) -> Vec<String> {
        self.calls(generation)
            .into_iter()
            .filter_map(|call| match call {
                SessionCall::Unsubscribe(destination) => Some(destination),
                _ => None,
            })
            .collect()
    }

    /// Publishes recorded across every session
    pub fn published(&self) -> Vec<PublishRequest> {
        self.lock()
            .sessions
            .iter()
            .flat_map(|s| s.calls.iter())
            .filter_map(|call| match call {
                SessionCall::Publish(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Destinations currently bound on a session
    pub fn live_destinations(&self, generation: u64) -> Vec<String> {
        self.lock()
            .session(generation)
            .map(|s| s.live.iter().map(|b| b.destination.clone()).collect())
            .unwrap_or_default()
    }

    fn sink(&self, generation: u64) -> Option<SessionEventSink> {
        self.lock().session(generation).map(|s| s.events.clone())
    }

    /// Report a completed handshake for `generation`
    pub fn connect(&self, generation: u64) -> bool {
        self.sink(generation)
            .map(|sink| sink.connected(Frame::new("CONNECTED").with_header("version", "1.2")))
            .unwrap_or(false)
    }

    /// Report a broker ERROR frame for `generation`
    pub fn protocol_error(&self, generation: u64, message: &str) -> bool {
        self.sink(generation)
            .map(|sink| sink.protocol_error(Frame::new("ERROR").with_header("message", message)))
            .unwrap_or(false)
    }

    /// Report the socket of `generation` closing
    pub fn close(&self, generation: u64, code: u16) -> bool {
        self.sink(generation)
            .map(|sink| sink.transport_closed(CloseEvent::new(code, "")))
            .unwrap_or(false)
    }

    /// Deliver a message to handlers bound on the latest session. Returns
    /// how many handlers received it.
    pub fn deliver(&self, destination: &str, body: impl Into<Bytes>) -> usize {
        let handlers: Vec<MessageHandler> = {
            let state = self.lock();
            state
                .sessions
                .last()
                .map(|s| {
                    s.live
                        .iter()
                        .filter(|b| b.destination == destination)
                        .map(|b| b.handler.clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        let body = body.into();
        for handler in &handlers {
            handler(Message::new(destination, body.clone()));
        }
        handlers.len()
    }
}

impl SessionFactory for MockSessionFactory {
    fn create_session(&self, url: &Url, events: SessionEventSink, debug: DebugSink) -> Box<dyn Session> {
        let generation = events.generation();
        self.lock().sessions.push(SessionRecord {
            generation,
            url: url.clone(),
            events,
            debug,
            calls: Vec::new(),
            live: Vec::new(),
        });
        Box::new(MockSession {
            generation,
            state: self.state.clone(),
        })
    }
}

struct MockSession {
    generation: u64,
    state: Arc<Mutex<MockState>>,
}

impl MockSession {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: SessionCall) {
        let debug = {
            let mut state = self.lock();
            match state.session_mut(self.generation) {
                Some(session) => {
                    session.calls.push(call.clone());
                    session.debug.clone()
                }
                None => return,
            }
        };
        debug.emit(&format!(">>> {call:?}"));
    }
}

#[async_trait]
impl Session for MockSession {
    fn set_connect_headers(&mut self, headers: Headers) {
        self.record(SessionCall::SetConnectHeaders(headers));
    }

    async fn activate(&mut self) -> Result<(), TransportError> {
        if self.lock().fail_activation {
            return Err(TransportError::ActivationFailed("mock activation failure".into()));
        }
        self.record(SessionCall::Activate);
        Ok(())
    }

    async fn deactivate(&mut self) -> Result<(), TransportError> {
        self.record(SessionCall::Deactivate);
        if let Some(session) = self.lock().session_mut(self.generation) {
            session.live.clear();
        }
        Ok(())
    }

    async fn subscribe(
        &mut self,
        destination: &str,
        handler: MessageHandler,
    ) -> Result<Box<dyn SubscriptionHandle>, TransportError> {
        self.record(SessionCall::Subscribe(destination.to_string()));

        let mut state = self.lock();
        if state.failing_destinations.contains(destination) {
            return Err(TransportError::SubscriptionFailed {
                destination: destination.to_string(),
                source: "mock subscription failure".into(),
            });
        }

        state.next_subscription_id += 1;
        let id = format!("sub-{}", state.next_subscription_id);
        if let Some(session) = state.session_mut(self.generation) {
            session.live.push(LiveBinding {
                id: id.clone(),
                destination: destination.to_string(),
                handler,
            });
        }

        Ok(Box::new(MockSubscription {
            id,
            destination: destination.to_string(),
            generation: self.generation,
            state: self.state.clone(),
        }))
    }

    async fn publish(&mut self, request: PublishRequest) -> Result<(), TransportError> {
        self.record(SessionCall::Publish(request));
        Ok(())
    }
}

struct MockSubscription {
    id: String,
    destination: String,
    generation: u64,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl SubscriptionHandle for MockSubscription {
    fn id(&self) -> &str {
        &self.id
    }

    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(session) = state.session_mut(self.generation) {
            session.live.retain(|b| b.id != self.id);
            session
                .calls
                .push(SessionCall::Unsubscribe(self.destination.clone()));
        }
        Ok(())
    }
}
