//! Lifecycle reactor
//!
//! Wires transport events to registry transitions and to the controller's
//! reconnect trigger:
//!
//! | Event              | Precondition            | Action                                          | Next state     |
//! |--------------------|-------------------------|-------------------------------------------------|----------------|
//! | activate           | Disconnected            | request activation                              | Connecting     |
//! | connected          | Connecting or Connected | activate pending, connect callback              | Connected      |
//! | protocol error     | any                     | drain, error callback, schedule reconnect       | Disconnected   |
//! | transport closed   | any                     | drain, close callback, schedule reconnect       | Disconnected   |
//! | deactivate         | Connecting or Connected | drain, request deactivation, cancel reconnect   | Disconnected   |
//!
//! Error and close are handled identically apart from which caller callback
//! runs: for subscription continuity every transport failure is the same.

use super::connection::{ConnectionController, ConnectionState};
use super::registry::{SubscribeOutcome, SubscriptionRegistry};
use crate::error::{ClientError, ClientResult};
use crate::transport::{CloseEvent, Frame, Headers, MessageHandler, PublishRequest, SessionEvent};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type FrameCallback = Arc<dyn Fn(&Frame) + Send + Sync>;
pub type CloseCallback = Arc<dyn Fn(&CloseEvent) + Send + Sync>;

/// Caller callbacks for connect, protocol error and socket close.
///
/// Registration is last-writer-wins: each `configure` replaces the whole
/// set, and a callback left unset is a no-op.
#[derive(Clone, Default)]
pub struct LifecycleCallbacks {
    on_connect: Option<FrameCallback>,
    on_error: Option<FrameCallback>,
    on_close: Option<CloseCallback>,
}

impl LifecycleCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(mut self, callback: impl Fn(&Frame) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&Frame) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn on_close(mut self, callback: impl Fn(&CloseEvent) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(callback));
        self
    }

    fn connected(&self, frame: &Frame) {
        if let Some(callback) = &self.on_connect {
            callback(frame);
        }
    }

    fn errored(&self, frame: &Frame) {
        if let Some(callback) = &self.on_error {
            callback(frame);
        }
    }

    fn closed(&self, event: &CloseEvent) {
        if let Some(callback) = &self.on_close {
            callback(event);
        }
    }
}

impl fmt::Debug for LifecycleCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleCallbacks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

/// Inputs to the connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Activate,
    Connected,
    ProtocolError,
    TransportClosed,
    Deactivate,
}

impl From<&SessionEvent> for LifecycleEvent {
    fn from(event: &SessionEvent) -> Self {
        match event {
            SessionEvent::Connected(_) => LifecycleEvent::Connected,
            SessionEvent::ProtocolError(_) => LifecycleEvent::ProtocolError,
            SessionEvent::TransportClosed(_) => LifecycleEvent::TransportClosed,
        }
    }
}

/// Next connection state after `event` (pure function)
pub fn next_state(current: ConnectionState, event: LifecycleEvent) -> ConnectionState {
    use ConnectionState::*;
    match (current, event) {
        (Disconnected, LifecycleEvent::Activate) => Connecting,
        (state, LifecycleEvent::Activate) => state,
        // a handshake that completes after a manual deactivate is ignored
        (Disconnected, LifecycleEvent::Connected) => Disconnected,
        (_, LifecycleEvent::Connected) => Connected,
        (_, LifecycleEvent::ProtocolError | LifecycleEvent::TransportClosed) => Disconnected,
        (_, LifecycleEvent::Deactivate) => Disconnected,
    }
}

/// Point-in-time view of the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub state: ConnectionState,
    pub generation: u64,
    pub active: Vec<String>,
    pub pending: Vec<String>,
    pub reconnect_armed: bool,
}

impl ClientSnapshot {
    /// Every destination with a registered handler, active or pending
    pub fn destinations(&self) -> Vec<String> {
        let mut all: Vec<String> = self.active.iter().chain(&self.pending).cloned().collect();
        all.sort();
        all
    }
}

/// Composes the controller, the registry and the caller callbacks
pub struct LifecycleReactor {
    controller: ConnectionController,
    registry: SubscriptionRegistry,
    callbacks: LifecycleCallbacks,
}

impl LifecycleReactor {
    pub fn new(controller: ConnectionController) -> Self {
        Self {
            controller,
            registry: SubscriptionRegistry::new(),
            callbacks: LifecycleCallbacks::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.controller.state()
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            state: self.controller.state(),
            generation: self.controller.generation(),
            active: self.registry.active_destinations(),
            pending: self.registry.pending_destinations(),
            reconnect_armed: self.controller.has_armed_timer(),
        }
    }

    /// Replace the callback set; `None` headers keeps the current ones
    pub fn configure(&mut self, headers: Option<Headers>, callbacks: LifecycleCallbacks) {
        if let Some(headers) = headers {
            self.controller.set_connect_headers(headers);
        }
        debug!(callbacks = ?callbacks, "Lifecycle callbacks configured");
        self.callbacks = callbacks;
    }

    fn usage_error(&self, operation: &'static str, detail: &str) -> ClientError {
        self.report_usage(detail);
        ClientError::not_connected(operation, self.controller.state())
    }

    fn report_usage(&self, detail: &str) {
        let line = format!("Cannot {detail}\n No socket connected");
        warn!("{}", line);
        self.controller.debug_sink().emit(&line);
    }

    fn reported<T>(&self, result: ClientResult<T>, detail: impl FnOnce() -> String) -> ClientResult<T> {
        if matches!(&result, Err(error) if error.is_usage_error()) {
            self.report_usage(&detail());
        }
        result
    }

    pub async fn activate(&mut self) -> ClientResult<()> {
        self.controller.activate().await?;
        Ok(())
    }

    pub async fn deactivate(&mut self) -> ClientResult<()> {
        if self.controller.state() == ConnectionState::Disconnected {
            return Err(self.usage_error("close socket", "close socket"));
        }
        // the session is going away; keep handlers for the next activate
        self.registry.drain_to_pending();
        self.controller.deactivate().await
    }

    pub async fn subscribe(&mut self, destination: &str, handler: MessageHandler) -> SubscribeOutcome {
        self.registry
            .request(&mut self.controller, destination, handler)
            .await
    }

    pub async fn unsubscribe(&mut self, destination: &str) -> ClientResult<bool> {
        let result = self.registry.release(&mut self.controller, destination).await;
        self.reported(result, || format!("unsubscribe {destination}"))
    }

    pub async fn unsubscribe_all(&mut self) -> ClientResult<usize> {
        let result = self.registry.release_all(&mut self.controller).await;
        self.reported(result, || "unsubscribe all".to_string())
    }

    /// Publish straight to the session; never queued
    pub async fn publish(&mut self, request: PublishRequest) -> ClientResult<()> {
        if !self.controller.is_connected() {
            let detail = format!("send message to {}", request.destination);
            return Err(self.usage_error("publish", &detail));
        }
        self.controller.publish(request).await?;
        Ok(())
    }

    /// React to a transport event. Events from a replaced session are
    /// discarded.
    pub async fn handle_session_event(&mut self, generation: u64, event: SessionEvent) {
        if !self.controller.is_current(generation) {
            debug!(
                generation,
                current = self.controller.generation(),
                "Discarding event from replaced session"
            );
            return;
        }

        let current = self.controller.state();
        let next = next_state(current, LifecycleEvent::from(&event));

        match event {
            SessionEvent::Connected(frame) => {
                if next != ConnectionState::Connected {
                    debug!("Ignoring handshake completed after deactivate");
                    return;
                }
                self.controller.set_state(next);
                info!(generation, "Transport session connected");
                self.registry.activate_pending(&mut self.controller).await;
                self.callbacks.connected(&frame);
            }
            SessionEvent::ProtocolError(frame) => {
                self.fail(next);
                warn!(generation, "Broker reported error: {}", frame);
                self.callbacks.errored(&frame);
                self.controller.schedule_reconnect();
            }
            SessionEvent::TransportClosed(close) => {
                self.fail(next);
                warn!(generation, "Transport closed with {}", close);
                self.callbacks.closed(&close);
                self.controller.schedule_reconnect();
            }
        }
    }

    fn fail(&mut self, next: ConnectionState) {
        self.controller.set_state(next);
        self.registry.drain_to_pending();
    }

    /// React to the reconnect timer firing
    pub async fn handle_reconnect_due(&mut self, token: u64) {
        self.controller.on_reconnect_due(token).await;
    }

    pub async fn shutdown(&mut self) {
        self.registry.drain_to_pending();
        self.controller.shutdown().await;
        info!("Socket client shut down");
    }
}
