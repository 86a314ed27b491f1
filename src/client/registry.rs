//! Subscription registry
//!
//! The authoritative record of caller intent, split into two disjoint maps:
//!
//! - *active*: destination bound to a live transport subscription plus its
//!   handler
//! - *pending*: destination whose handler is waiting for a (re)connection
//!
//! A destination is in at most one of the two. Transport failures move
//! entries from active to pending without losing the handler; a successful
//! connection moves them back. Only an explicit unsubscribe removes an entry.

use super::connection::{ConnectionController, LiveSubscription};
use crate::error::{ClientError, ClientResult};
use crate::transport::MessageHandler;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn, Instrument};

/// What a subscribe request did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Bound to a live transport subscription
    Subscribed,
    /// Stored in pending until the next successful connection
    Queued,
    /// Destination already active; first handler kept
    AlreadyActive,
    /// Destination already pending; first handler kept
    AlreadyPending,
}

impl SubscribeOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::AlreadyActive | Self::AlreadyPending)
    }
}

struct ActiveEntry {
    handler: MessageHandler,
    live: LiveSubscription,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    active: BTreeMap<String, ActiveEntry>,
    pending: BTreeMap<String, MessageHandler>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_destinations(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    pub fn pending_destinations(&self) -> Vec<String> {
        self.pending.keys().cloned().collect()
    }

    pub fn is_active(&self, destination: &str) -> bool {
        self.active.contains_key(destination)
    }

    pub fn is_pending(&self, destination: &str) -> bool {
        self.pending.contains_key(destination)
    }

    /// Total registered destinations across both maps
    pub fn len(&self) -> usize {
        self.active.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register interest in `destination`.
    ///
    /// Connected: subscribe through the controller unless already active.
    /// Otherwise: queue in pending unless already there. Duplicates keep the
    /// first handler. A transport failure while subscribing leaves the entry
    /// pending so the next connection retries it.
    pub async fn request(
        &mut self,
        controller: &mut ConnectionController,
        destination: &str,
        handler: MessageHandler,
    ) -> SubscribeOutcome {
        let span = crate::subscription_span!(destination = %destination);
        self.request_inner(controller, destination, handler)
            .instrument(span)
            .await
    }

    async fn request_inner(
        &mut self,
        controller: &mut ConnectionController,
        destination: &str,
        handler: MessageHandler,
    ) -> SubscribeOutcome {
        if self.active.contains_key(destination) {
            note(controller, &format!("Already subscribed to {destination}"));
            return SubscribeOutcome::AlreadyActive;
        }
        if self.pending.contains_key(destination) {
            note(controller, &format!("Already queued {destination}"));
            return SubscribeOutcome::AlreadyPending;
        }

        if !controller.is_connected() {
            debug!("Not connected, queueing subscription");
            self.pending.insert(destination.to_string(), handler);
            return SubscribeOutcome::Queued;
        }

        match controller.subscribe(destination, handler.clone()).await {
            Ok(live) => {
                debug!(id = live.id(), generation = live.generation(), "Subscribed");
                self.active
                    .insert(destination.to_string(), ActiveEntry { handler, live });
                SubscribeOutcome::Subscribed
            }
            Err(e) => {
                error!("Subscribe failed, keeping {} pending: {}", destination, e);
                self.pending.insert(destination.to_string(), handler);
                SubscribeOutcome::Queued
            }
        }
    }

    /// Drop interest in `destination`. Requires a live connection.
    ///
    /// Unknown destinations are a no-op so unsubscribe stays idempotent.
    /// Returns whether an entry was removed.
    pub async fn release(
        &mut self,
        controller: &mut ConnectionController,
        destination: &str,
    ) -> ClientResult<bool> {
        if !controller.is_connected() {
            return Err(ClientError::not_connected("unsubscribe", controller.state()));
        }

        if let Some(entry) = self.active.remove(destination) {
            if let Err(e) = controller.release(entry.live).await {
                warn!("Unsubscribe from {} failed: {}", destination, e);
            }
            debug!(destination = %destination, "Unsubscribed");
            return Ok(true);
        }
        if self.pending.remove(destination).is_some() {
            debug!(destination = %destination, "Removed queued subscription");
            return Ok(true);
        }

        note(controller, &format!("Not subscribed to {destination}"));
        Ok(false)
    }

    /// Unsubscribe every active entry. Pending entries are left alone, they
    /// were never subscribed. Returns how many entries were released.
    pub async fn release_all(&mut self, controller: &mut ConnectionController) -> ClientResult<usize> {
        if !controller.is_connected() {
            return Err(ClientError::not_connected("unsubscribe all", controller.state()));
        }

        let active = std::mem::take(&mut self.active);
        let released = active.len();
        for (destination, entry) in active {
            if let Err(e) = controller.release(entry.live).await {
                warn!("Unsubscribe from {} failed: {}", destination, e);
            }
        }
        info!(released, "Unsubscribed all active destinations");
        Ok(released)
    }

    /// Move every active entry to pending, dropping its now-dead handle and
    /// keeping its handler. Returns how many entries moved.
    pub fn drain_to_pending(&mut self) -> usize {
        let active = std::mem::take(&mut self.active);
        let moved = active.len();
        for (destination, entry) in active {
            // the handle belongs to a failed session, never invoke it
            drop(entry.live);
            self.pending.entry(destination).or_insert(entry.handler);
        }
        if moved > 0 {
            info!(moved, pending = self.pending.len(), "Moved subscriptions to pending");
        }
        moved
    }

    /// Re-request every pending entry against the now-connected transport.
    /// Returns how many became active.
    pub async fn activate_pending(&mut self, controller: &mut ConnectionController) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let mut activated = 0;
        for (destination, handler) in pending {
            if self.request(controller, &destination, handler).await == SubscribeOutcome::Subscribed {
                activated += 1;
            }
        }
        if activated > 0 {
            info!(activated, "Restored pending subscriptions");
        }
        activated
    }
}

fn note(controller: &ConnectionController, line: &str) {
    debug!("{}", line);
    controller.debug_sink().emit(line);
}
