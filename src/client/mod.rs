//! Resilient pub/sub client
//!
//! Keeps caller subscriptions alive across transport failures: handlers
//! registered while disconnected are queued, handlers bound to a failed
//! session are re-bound after the automatic reconnect.
//!
//! # Architecture
//!
//! - [`connection`] - Connection state, session ownership and the reconnect timer
//! - [`registry`] - Active and pending subscription maps
//! - [`lifecycle`] - Transport events mapped onto registry and timer transitions
//! - [`socket_client`] - Caller-facing handle and the event loop
//!
//! # Usage
//!
//! ```rust,no_run
//! use resilient_socket::client::{LifecycleCallbacks, SocketClient};
//! use resilient_socket::testing::MockSessionFactory;
//! use resilient_socket::PublishOptions;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let client = SocketClient::new("ws://localhost:8080/ws", Arc::new(MockSessionFactory::new()))?;
//! client
//!     .configure(None, LifecycleCallbacks::new().on_connect(|_| println!("connected")))
//!     .await?;
//! client.subscribe("/topic/news", |message| println!("{:?}", message.body_text())).await?;
//! client.activate().await?;
//! client.publish("/app/news", "hello", PublishOptions::new()).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod connection;
pub mod lifecycle;
pub mod registry;
pub mod socket_client;

pub use connection::{ConnectionController, ConnectionState, LiveSubscription};
pub use lifecycle::{next_state, ClientSnapshot, LifecycleCallbacks, LifecycleEvent, LifecycleReactor};
pub use registry::{SubscribeOutcome, SubscriptionRegistry};
pub use socket_client::SocketClient;
