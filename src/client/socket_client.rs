//! Caller-facing socket client
//!
//! [`SocketClient`] is a cheap, cloneable handle. The controller, registry
//! and callbacks live in a single event-loop task; handles talk to it over a
//! command channel and read the connection state from a watch channel.
//! Transport events and reconnect timer firings are drained ahead of caller
//! commands, so a command issued after an event was observed is applied to
//! the state that event produced.

use super::connection::{ConnectionController, ConnectionState, ControllerChannels};
use super::lifecycle::{ClientSnapshot, LifecycleCallbacks, LifecycleReactor};
use super::registry::SubscribeOutcome;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::transport::{
    Headers, Message, MessageHandler, PublishOptions, PublishRequest, SessionEvent, SessionFactory,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, Instrument};

const COMMAND_CHANNEL_CAPACITY: usize = 64;

enum Command {
    Configure {
        headers: Option<Headers>,
        callbacks: LifecycleCallbacks,
        reply: oneshot::Sender<()>,
    },
    Activate {
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Deactivate {
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Subscribe {
        destination: String,
        handler: MessageHandler,
        reply: oneshot::Sender<SubscribeOutcome>,
    },
    Unsubscribe {
        destination: String,
        reply: oneshot::Sender<ClientResult<bool>>,
    },
    UnsubscribeAll {
        reply: oneshot::Sender<ClientResult<usize>>,
    },
    Publish {
        request: PublishRequest,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<ClientSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Resilient pub/sub client over a session transport
#[derive(Clone)]
pub struct SocketClient {
    commands: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl SocketClient {
    /// Validate the configuration and start the client's event loop.
    ///
    /// The event loop is spawned on the current Tokio runtime; without one
    /// this fails with [`ClientError::NoRuntime`]. No connection is
    /// attempted until [`activate`](Self::activate).
    pub fn new(
        config: impl Into<ClientConfig>,
        factory: Arc<dyn SessionFactory>,
    ) -> ClientResult<Self> {
        let config = config.into();
        let url = config.validate()?;
        let runtime = Handle::try_current()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let controller = ConnectionController::new(
            url.clone(),
            &config,
            factory,
            ControllerChannels {
                events_tx,
                timer_tx,
                state_tx,
            },
        );

        let event_loop = EventLoop {
            reactor: LifecycleReactor::new(controller),
            events_rx,
            timer_rx,
            commands_rx,
        };
        runtime.spawn(event_loop.run());
        info!(url = %url, reconnect_delay_ms = config.reconnect_delay_ms, "Socket client created");

        Ok(Self {
            commands: commands_tx,
            state_rx,
        })
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> ClientResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| ClientError::EventLoopStopped)?;
        response.await.map_err(|_| ClientError::EventLoopStopped)
    }

    /// Set connect headers and lifecycle callbacks.
    ///
    /// `None` headers keeps the current ones. Callbacks replace the
    /// previous set wholesale.
    pub async fn configure(
        &self,
        headers: Option<Headers>,
        callbacks: LifecycleCallbacks,
    ) -> ClientResult<()> {
        self.request(|reply| Command::Configure {
            headers,
            callbacks,
            reply,
        })
        .await
    }

    /// Begin connecting. No-op when already connecting or connected.
    pub async fn activate(&self) -> ClientResult<()> {
        self.request(|reply| Command::Activate { reply }).await?
    }

    /// Close the connection and suspend auto-reconnect. Registered handlers
    /// are kept and re-bound on the next [`activate`](Self::activate).
    pub async fn deactivate(&self) -> ClientResult<()> {
        self.request(|reply| Command::Deactivate { reply }).await?
    }

    /// Register `handler` for `destination`.
    ///
    /// Bound immediately when connected; otherwise queued and bound on the
    /// next successful connect. At most one handler per destination: a
    /// repeat request is a no-op reported as a duplicate.
    pub async fn subscribe(
        &self,
        destination: impl Into<String>,
        handler: impl Fn(Message) + Send + Sync + 'static,
    ) -> ClientResult<SubscribeOutcome> {
        let destination = destination.into();
        let handler: MessageHandler = Arc::new(handler);
        self.request(|reply| Command::Subscribe {
            destination,
            handler,
            reply,
        })
        .await
    }

    /// Release the handler for `destination`. Returns whether an active
    /// subscription was released.
    pub async fn unsubscribe(&self, destination: impl Into<String>) -> ClientResult<bool> {
        let destination = destination.into();
        self.request(|reply| Command::Unsubscribe { destination, reply })
            .await?
    }

    /// Release every active subscription. Pending entries are kept.
    pub async fn unsubscribe_all(&self) -> ClientResult<usize> {
        self.request(|reply| Command::UnsubscribeAll { reply }).await?
    }

    /// Publish a text body. Never queued: fails when not connected.
    pub async fn publish(
        &self,
        destination: impl Into<String>,
        body: impl Into<String>,
        options: PublishOptions,
    ) -> ClientResult<()> {
        let request = PublishRequest::text(destination, body, options);
        self.request(|reply| Command::Publish { request, reply })
            .await?
    }

    /// Publish a binary body. Never queued: fails when not connected.
    pub async fn publish_binary(
        &self,
        destination: impl Into<String>,
        body: impl Into<Bytes>,
        headers: Headers,
    ) -> ClientResult<()> {
        let request = PublishRequest::binary(destination, body, headers);
        self.request(|reply| Command::Publish { request, reply })
            .await?
    }

    pub async fn snapshot(&self) -> ClientResult<ClientSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Stop the event loop. Cancels any reconnect timer and deactivates a
    /// live session. Every handle fails with `EventLoopStopped` afterwards.
    pub async fn shutdown(&self) -> ClientResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch channel carrying every state transition
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait until the connection reaches `target`
    pub async fn wait_for_state(
        &self,
        target: ConnectionState,
        timeout: Duration,
    ) -> ClientResult<()> {
        let mut state_rx = self.state_rx.clone();
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                if *state_rx.borrow_and_update() == target {
                    return Ok(());
                }
                if state_rx.changed().await.is_err() {
                    return Err(ClientError::EventLoopStopped);
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout {
                target,
                waited: timeout,
            }),
        }
    }
}

struct EventLoop {
    reactor: LifecycleReactor,
    events_rx: mpsc::UnboundedReceiver<(u64, SessionEvent)>,
    timer_rx: mpsc::UnboundedReceiver<u64>,
    commands_rx: mpsc::Receiver<Command>,
}

impl EventLoop {
    async fn run(mut self) {
        debug!("Socket client event loop started");
        loop {
            tokio::select! {
                biased;

                Some((generation, event)) = self.events_rx.recv() => {
                    self.reactor
                        .handle_session_event(generation, event)
                        .instrument(crate::session_span!(generation))
                        .await;
                }
                Some(token) = self.timer_rx.recv() => {
                    self.reactor.handle_reconnect_due(token).await;
                }
                command = self.commands_rx.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.reactor.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All client handles dropped");
                        self.reactor.shutdown().await;
                        break;
                    }
                },
            }
        }
        debug!("Socket client event loop stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        // a dropped reply receiver means the caller stopped waiting
        match command {
            Command::Configure {
                headers,
                callbacks,
                reply,
            } => {
                self.reactor.configure(headers, callbacks);
                let _ = reply.send(());
            }
            Command::Activate { reply } => {
                let _ = reply.send(self.reactor.activate().await);
            }
            Command::Deactivate { reply } => {
                let _ = reply.send(self.reactor.deactivate().await);
            }
            Command::Subscribe {
                destination,
                handler,
                reply,
            } => {
                let _ = reply.send(self.reactor.subscribe(&destination, handler).await);
            }
            Command::Unsubscribe { destination, reply } => {
                let _ = reply.send(self.reactor.unsubscribe(&destination).await);
            }
            Command::UnsubscribeAll { reply } => {
                let _ = reply.send(self.reactor.unsubscribe_all().await);
            }
            Command::Publish { request, reply } => {
                let _ = reply.send(self.reactor.publish(request).await);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.reactor.snapshot());
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::testing::MockSessionFactory;

    fn client(delay_ms: u64) -> (SocketClient, MockSessionFactory) {
        let factory = MockSessionFactory::new();
        let config = ClientConfig::new("ws://host/ws")
            .with_reconnect_delay(Duration::from_millis(delay_ms));
        let client = SocketClient::new(config, Arc::new(factory.clone())).unwrap();
        (client, factory)
    }

    #[tokio::test]
    async fn test_missing_url_is_fatal() {
        let result = SocketClient::new("", Arc::new(MockSessionFactory::new()));
        assert!(matches!(
            result,
            Err(ClientError::Config(ConfigError::MissingUrl))
        ));
    }

    #[test]
    fn test_construction_outside_runtime_is_an_error() {
        let result = SocketClient::new("ws://host/ws", Arc::new(MockSessionFactory::new()));

        assert!(matches!(result, Err(ClientError::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_client_starts_disconnected() {
        let (client, factory) = client(100);

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert_eq!(factory.session_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activate_and_connect() {
        let (client, factory) = client(100);
        client.activate().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Connecting);

        factory.connect(1);
        client
            .wait_for_state(ConnectionState::Connected, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_state_times_out() {
        let (client, _factory) = client(100);

        let result = client
            .wait_for_state(ConnectionState::Connected, Duration::from_millis(50))
            .await;

        assert!(matches!(result, Err(ClientError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_handles_fail_after_shutdown() {
        let (client, _factory) = client(100);
        let other = client.clone();

        client.shutdown().await.unwrap();

        assert!(matches!(
            other.snapshot().await,
            Err(ClientError::EventLoopStopped)
        ));
        assert!(matches!(
            other.activate().await,
            Err(ClientError::EventLoopStopped)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_before_activate_is_queued() {
        let (client, factory) = client(100);

        let outcome = client.subscribe("/topic/a", |_| {}).await.unwrap();
        assert_eq!(outcome, SubscribeOutcome::Queued);

        client.activate().await.unwrap();
        factory.connect(1);
        let snapshot = client.snapshot().await.unwrap();

        assert_eq!(snapshot.active, vec!["/topic/a"]);
        assert!(snapshot.pending.is_empty());
    }
}
