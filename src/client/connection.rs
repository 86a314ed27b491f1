//! Connection controller
//!
//! Owns exactly one transport session at a time, the connection state, the
//! session generation counter and the one-shot reconnect timer. Nothing else
//! in the crate touches the session directly: subscribe, unsubscribe and
//! publish are routed through the controller so a handle from a replaced
//! session can never be used against the current one.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::observability::DebugSink;
use crate::transport::{
    Headers, MessageHandler, PublishRequest, Session, SessionEvent, SessionEventSink,
    SessionFactory, SubscriptionHandle, TransportError,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use url::Url;

/// Connection state of the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state, and the state after any failure or manual deactivate
    #[default]
    Disconnected,
    /// Activation requested, handshake not yet confirmed
    Connecting,
    /// Handshake confirmed; subscribe and publish go straight to the session
    Connected,
}

/// A transport subscription bound to the session generation that issued it
pub struct LiveSubscription {
    generation: u64,
    destination: String,
    handle: Box<dyn SubscriptionHandle>,
}

impl LiveSubscription {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn id(&self) -> &str {
        self.handle.id()
    }
}

impl fmt::Debug for LiveSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSubscription")
            .field("generation", &self.generation)
            .field("destination", &self.destination)
            .field("id", &self.handle.id())
            .finish()
    }
}

struct ArmedTimer {
    token: u64,
    handle: JoinHandle<()>,
}

/// Channels the controller writes into; the event loop reads the other ends
pub(crate) struct ControllerChannels {
    pub events_tx: mpsc::UnboundedSender<(u64, SessionEvent)>,
    pub timer_tx: mpsc::UnboundedSender<u64>,
    pub state_tx: watch::Sender<ConnectionState>,
}

pub struct ConnectionController {
    url: Url,
    factory: Arc<dyn SessionFactory>,
    session: Box<dyn Session>,
    generation: u64,
    state: ConnectionState,
    connect_headers: Headers,
    debug_sink: DebugSink,
    reconnect_delay: Option<Duration>,
    // cleared by deactivate(), restored by activate()
    auto_reconnect: bool,
    // current session was deactivated on request; never reactivated
    session_retired: bool,
    armed: Option<ArmedTimer>,
    next_timer_token: u64,
    events_tx: mpsc::UnboundedSender<(u64, SessionEvent)>,
    timer_tx: mpsc::UnboundedSender<u64>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionController {
    /// Build the controller and its first session (generation 1)
    pub(crate) fn new(
        url: Url,
        config: &ClientConfig,
        factory: Arc<dyn SessionFactory>,
        channels: ControllerChannels,
    ) -> Self {
        let generation = 1;
        let session = factory.create_session(
            &url,
            SessionEventSink::new(generation, channels.events_tx.clone()),
            config.debug_sink.clone(),
        );
        debug!(url = %url, generation, "Created transport session");

        Self {
            url,
            factory,
            session,
            generation,
            state: ConnectionState::Disconnected,
            connect_headers: config.headers.clone(),
            debug_sink: config.debug_sink.clone(),
            reconnect_delay: config.reconnect_delay(),
            auto_reconnect: false,
            session_retired: false,
            armed: None,
            next_timer_token: 0,
            events_tx: channels.events_tx,
            timer_tx: channels.timer_tx,
            state_tx: channels.state_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Generation of the current session
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn debug_sink(&self) -> &DebugSink {
        &self.debug_sink
    }

    pub fn has_armed_timer(&self) -> bool {
        self.armed.is_some()
    }

    /// Record a state transition and publish it to state watchers
    pub(crate) fn set_state(&mut self, next: ConnectionState) -> ConnectionState {
        let previous = std::mem::replace(&mut self.state, next);
        if previous != next {
            debug!(generation = self.generation, "Connection state: {:?} -> {:?}", previous, next);
            self.state_tx.send_replace(next);
        }
        previous
    }

    /// Store connect headers and push them into the current session
    pub fn set_connect_headers(&mut self, headers: Headers) {
        self.session.set_connect_headers(headers.clone());
        self.connect_headers = headers;
    }

    pub fn connect_headers(&self) -> &Headers {
        &self.connect_headers
    }

    /// Request activation. Returns `Ok(false)` when already connecting or
    /// connected.
    ///
    /// A session closed by `deactivate` is replaced first, so its late close
    /// and handshake events arrive under a retired generation.
    pub async fn activate(&mut self) -> Result<bool, TransportError> {
        if self.state != ConnectionState::Disconnected {
            debug!(state = ?self.state, "Activate ignored, session already active");
            return Ok(false);
        }
        if self.session_retired {
            self.replace_session().await;
        }

        self.auto_reconnect = true;
        self.session.set_connect_headers(self.connect_headers.clone());
        self.session.activate().await?;
        self.set_state(ConnectionState::Connecting);
        info!(url = %self.url, generation = self.generation, "Activating transport session");
        Ok(true)
    }

    /// Request deactivation and move to `Disconnected` without waiting for
    /// the transport to confirm. Cancels any armed reconnect timer.
    pub async fn deactivate(&mut self) -> ClientResult<()> {
        if self.state == ConnectionState::Disconnected {
            return Err(ClientError::not_connected("close socket", self.state));
        }

        self.auto_reconnect = false;
        self.cancel_reconnect();
        self.set_state(ConnectionState::Disconnected);
        self.session_retired = true;
        info!(generation = self.generation, "Deactivating transport session");
        self.session.deactivate().await?;
        Ok(())
    }

    /// Arm the one-shot reconnect timer.
    ///
    /// No-op when reconnection is disabled (delay 0), suspended by a manual
    /// deactivate, or a timer is already armed.
    pub fn schedule_reconnect(&mut self) -> bool {
        let Some(delay) = self.reconnect_delay else {
            debug!("Auto-reconnect disabled, staying disconnected");
            return false;
        };
        if !self.auto_reconnect {
            debug!("Auto-reconnect suspended after deactivate");
            return false;
        }
        if self.armed.is_some() {
            debug!("Reconnect timer already armed");
            return false;
        }

        self.next_timer_token += 1;
        let token = self.next_timer_token;
        let timer_tx = self.timer_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timer_tx.send(token);
        });
        self.armed = Some(ArmedTimer { token, handle });
        info!(delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
        true
    }

    /// Cancel an armed reconnect timer, if any
    pub fn cancel_reconnect(&mut self) -> bool {
        match self.armed.take() {
            Some(timer) => {
                timer.handle.abort();
                debug!(token = timer.token, "Reconnect timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Handle a reconnect timer firing.
    ///
    /// Builds a new session and activates it unless a connection has been
    /// established in the meantime. Returns whether a new session was built.
    pub async fn on_reconnect_due(&mut self, token: u64) -> bool {
        match &self.armed {
            Some(timer) if timer.token == token => {
                self.armed = None;
            }
            _ => {
                debug!(token, "Ignoring stale reconnect timer");
                return false;
            }
        }

        if self.is_connected() {
            debug!("Reconnect timer fired while connected, nothing to do");
            return false;
        }

        info!("Websocket disconnected. Trying to reconnect.");
        self.replace_session().await;
        self.set_state(ConnectionState::Disconnected);
        if let Err(e) = self.activate().await {
            error!(generation = self.generation, "Reconnect activation failed: {}", e);
            self.schedule_reconnect();
        }
        true
    }

    /// Swap in a freshly built session and retire the previous one
    async fn replace_session(&mut self) {
        let generation = self.generation + 1;
        let fresh = self.factory.create_session(
            &self.url,
            SessionEventSink::new(generation, self.events_tx.clone()),
            self.debug_sink.clone(),
        );
        let mut retired = std::mem::replace(&mut self.session, fresh);
        self.generation = generation;
        debug!(generation, "Created transport session");

        if std::mem::take(&mut self.session_retired) {
            return;
        }
        if let Err(e) = retired.deactivate().await {
            debug!(generation = generation - 1, "Retired session deactivate failed: {}", e);
        }
    }

    /// Subscribe through the current session
    pub async fn subscribe(
        &mut self,
        destination: &str,
        handler: MessageHandler,
    ) -> Result<LiveSubscription, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::SessionClosed);
        }
        let handle = self.session.subscribe(destination, handler).await?;
        Ok(LiveSubscription {
            generation: self.generation,
            destination: destination.to_string(),
            handle,
        })
    }

    /// Release a live subscription. Handles from an earlier generation are
    /// dropped without touching the transport.
    pub async fn release(&mut self, mut live: LiveSubscription) -> Result<(), TransportError> {
        if !self.is_current(live.generation) {
            debug!(
                destination = %live.destination,
                generation = live.generation,
                "Dropping handle from replaced session"
            );
            return Ok(());
        }
        live.handle.unsubscribe().await
    }

    /// Publish through the current session
    pub async fn publish(&mut self, request: PublishRequest) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::SessionClosed);
        }
        self.session.publish(request).await
    }

    /// Teardown: cancel the timer and deactivate the session if it is live
    pub async fn shutdown(&mut self) {
        self.auto_reconnect = false;
        self.cancel_reconnect();
        if self.state != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected);
            self.session_retired = true;
            if let Err(e) = self.session.deactivate().await {
                debug!("Session deactivate during shutdown failed: {}", e);
            }
        }
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        self.cancel_reconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockSessionFactory, SessionCall};

    struct Harness {
        controller: ConnectionController,
        factory: MockSessionFactory,
        events_rx: mpsc::UnboundedReceiver<(u64, SessionEvent)>,
        timer_rx: mpsc::UnboundedReceiver<u64>,
        state_rx: watch::Receiver<ConnectionState>,
    }

    fn harness(reconnect_delay_ms: u64) -> Harness {
        let config = ClientConfig::new("ws://host/ws")
            .with_reconnect_delay(Duration::from_millis(reconnect_delay_ms))
            .with_header("Authorization", "Bearer token");
        let url = config.validate().unwrap();
        let factory = MockSessionFactory::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let controller = ConnectionController::new(
            url,
            &config,
            Arc::new(factory.clone()),
            ControllerChannels {
                events_tx,
                timer_tx,
                state_tx,
            },
        );
        Harness {
            controller,
            factory,
            events_rx,
            timer_rx,
            state_rx,
        }
    }

    #[tokio::test]
    async fn test_first_session_is_generation_one() {
        let h = harness(100);

        assert_eq!(h.controller.generation(), 1);
        assert_eq!(h.controller.state(), ConnectionState::Disconnected);
        assert_eq!(h.factory.session_count(), 1);
        assert_eq!(h.factory.url(1).unwrap().as_str(), "ws://host/ws");
    }

    #[tokio::test]
    async fn test_activate_moves_to_connecting_once() {
        let mut h = harness(100);

        assert!(h.controller.activate().await.unwrap());
        assert_eq!(h.controller.state(), ConnectionState::Connecting);
        assert_eq!(*h.state_rx.borrow(), ConnectionState::Connecting);

        // Second activate is a no-op
        assert!(!h.controller.activate().await.unwrap());
        assert_eq!(h.factory.activate_count(1), 1);
    }

    #[tokio::test]
    async fn test_activate_applies_connect_headers() {
        let mut h = harness(100);
        h.controller.activate().await.unwrap();

        let calls = h.factory.calls(1);
        let headers = calls
            .iter()
            .find_map(|call| match call {
                SessionCall::SetConnectHeaders(headers) => Some(headers.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            headers.get("Authorization").map(String::as_str),
            Some("Bearer token")
        );
    }

    #[tokio::test]
    async fn test_deactivate_while_disconnected_is_usage_error() {
        let mut h = harness(100);

        let result = h.controller.deactivate().await;
        assert!(matches!(result, Err(ClientError::NotConnected { .. })));
        assert_eq!(h.factory.deactivate_count(1), 0);
    }

    #[tokio::test]
    async fn test_deactivate_is_immediate() {
        let mut h = harness(100);
        h.controller.activate().await.unwrap();
        h.controller.set_state(ConnectionState::Connected);

        h.controller.deactivate().await.unwrap();
        assert_eq!(h.controller.state(), ConnectionState::Disconnected);
        assert_eq!(h.factory.deactivate_count(1), 1);
    }

    #[tokio::test]
    async fn test_activate_after_deactivate_builds_new_generation() {
        let mut h = harness(100);
        h.controller.activate().await.unwrap();
        h.controller.set_state(ConnectionState::Connected);
        h.controller.deactivate().await.unwrap();
        assert_eq!(h.controller.generation(), 1);

        assert!(h.controller.activate().await.unwrap());

        assert_eq!(h.controller.generation(), 2);
        assert!(!h.controller.is_current(1));
        assert_eq!(h.factory.activate_count(2), 1);
        // The deactivated session is not asked to deactivate again
        assert_eq!(h.factory.deactivate_count(1), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_builds_new_generation() {
        let mut h = harness(100);
        h.controller.activate().await.unwrap();
        h.controller.set_state(ConnectionState::Disconnected);

        assert!(h.controller.schedule_reconnect());
        let token = h.timer_rx.recv().await.unwrap();
        assert!(h.controller.on_reconnect_due(token).await);

        assert_eq!(h.controller.generation(), 2);
        assert_eq!(h.controller.state(), ConnectionState::Connecting);
        assert_eq!(h.factory.session_count(), 2);
        assert_eq!(h.factory.activate_count(2), 1);
        // The replaced session is retired
        assert_eq!(h.factory.deactivate_count(1), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fire_after_connect_is_noop() {
        let mut h = harness(100);
        h.controller.activate().await.unwrap();
        h.controller.schedule_reconnect();
        h.controller.set_state(ConnectionState::Connected);

        let token = h.timer_rx.recv().await.unwrap();
        assert!(!h.controller.on_reconnect_due(token).await);
        assert_eq!(h.controller.generation(), 1);
        assert_eq!(h.factory.session_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_timer_armed() {
        let mut h = harness(100);
        h.controller.activate().await.unwrap();
        h.controller.set_state(ConnectionState::Disconnected);

        assert!(h.controller.schedule_reconnect());
        assert!(!h.controller.schedule_reconnect());
        assert!(h.controller.has_armed_timer());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_never_arms() {
        let mut h = harness(0);
        h.controller.activate().await.unwrap();
        h.controller.set_state(ConnectionState::Disconnected);

        assert!(!h.controller.schedule_reconnect());
        assert!(!h.controller.has_armed_timer());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_cancels_timer_and_suspends_reconnect() {
        let mut h = harness(100);
        h.controller.activate().await.unwrap();
        h.controller.schedule_reconnect();

        h.controller.deactivate().await.unwrap();
        assert!(!h.controller.has_armed_timer());
        assert!(!h.controller.schedule_reconnect());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(h.timer_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_token_is_ignored() {
        let mut h = harness(100);
        h.controller.activate().await.unwrap();
        h.controller.set_state(ConnectionState::Disconnected);
        h.controller.schedule_reconnect();

        assert!(!h.controller.on_reconnect_due(999).await);
        assert!(h.controller.has_armed_timer());
    }

    #[tokio::test]
    async fn test_release_skips_stale_handles() {
        let mut h = harness(100);
        h.controller.activate().await.unwrap();
        h.controller.set_state(ConnectionState::Connected);

        let handler: MessageHandler = Arc::new(|_| {});
        let live = h.controller.subscribe("/topic/a", handler).await.unwrap();
        assert_eq!(live.generation(), 1);
        assert_eq!(live.destination(), "/topic/a");

        // Pretend the session was replaced
        h.controller.replace_session().await;
        h.controller.release(live).await.unwrap();

        assert!(h.factory.unsubscribe_calls(1).is_empty());
        assert!(h.factory.unsubscribe_calls(2).is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_requires_connection() {
        let mut h = harness(100);
        let handler: MessageHandler = Arc::new(|_| {});

        let result = h.controller.subscribe("/topic/a", handler).await;
        assert!(matches!(result, Err(TransportError::SessionClosed)));
        assert!(h.factory.subscribe_calls(1).is_empty());
    }

    #[tokio::test]
    async fn test_session_events_carry_generation() {
        let mut h = harness(100);
        h.controller.activate().await.unwrap();

        assert!(h.factory.connect(1));
        let (generation, event) = h.events_rx.recv().await.unwrap();
        assert_eq!(generation, 1);
        assert!(matches!(event, SessionEvent::Connected(_)));
    }
}
