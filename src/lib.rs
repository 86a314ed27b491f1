//! Resilient Socket - pub/sub client over a session transport
//!
//! A client for a STOMP-style messaging broker reached over a persistent
//! socket session, built to survive transport failures without losing
//! caller subscriptions.
//!
//! # Overview
//!
//! This crate provides:
//! - A connection controller owning one session at a time, with a fixed-delay reconnect timer
//! - A subscription registry that queues handlers while disconnected and re-binds them after reconnect
//! - Lifecycle callbacks for connect, protocol error and socket close
//! - A pluggable transport boundary ([`SessionFactory`]) and an in-memory mock for tests
//!
//! # Quick Start
//!
//! ```rust
//! use resilient_socket::testing::MockSessionFactory;
//! use resilient_socket::{ClientConfig, ConnectionState, SocketClient};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let factory = MockSessionFactory::new();
//! let config = ClientConfig::new("ws://host/ws").with_reconnect_delay(Duration::from_millis(100));
//! let client = SocketClient::new(config, Arc::new(factory.clone())).unwrap();
//!
//! // Queued until the first successful connect
//! client.subscribe("/topic/a", |_message| {}).await.unwrap();
//! client.activate().await.unwrap();
//!
//! factory.connect(1);
//! client
//!     .wait_for_state(ConnectionState::Connected, Duration::from_secs(1))
//!     .await
//!     .unwrap();
//! assert_eq!(client.snapshot().await.unwrap().active, vec!["/topic/a"]);
//! # });
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod testing;
pub mod transport;

pub use client::{ClientSnapshot, ConnectionState, LifecycleCallbacks, SocketClient, SubscribeOutcome};
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, ClientResult};
pub use observability::DebugSink;
pub use transport::{
    CloseEvent, Frame, Headers, Message, MessageHandler, PublishOptions, PublishRequest, Session,
    SessionEvent, SessionEventSink, SessionFactory, SubscriptionHandle, TransportError,
};
