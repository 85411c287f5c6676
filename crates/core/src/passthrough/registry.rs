use std::collections::HashMap;

use parking_lot::RwLock;

use super::{ErrorHandler, PacketBatch, PacketCallback, Subscription, SubscriptionId};
use crate::error::{CameraError, Result};

/// Live passthrough subscriptions, keyed by id.
///
/// Fan-out holds the read lock, so publishing to many subscribers runs
/// concurrently with other readers; subscribe and unsubscribe take the
/// write lock. Subscriptions are stopped after they leave the map, never
/// while the lock is held.
///
/// The registry belongs to the camera, not to a stream session, so
/// subscriptions survive reconnects.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    enabled: bool,
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
}

impl SubscriptionRegistry {
    /// `enabled` is whether passthrough was requested for the camera.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Start a subscription with a queue of `capacity` batches.
    pub fn subscribe(
        &self,
        capacity: usize,
        callback: PacketCallback,
        on_error: ErrorHandler,
    ) -> Result<SubscriptionId> {
        if !self.enabled {
            return Err(CameraError::PassthroughNotEnabled);
        }
        let sub = Subscription::start(capacity, callback, on_error)?;
        let id = sub.id();
        self.subscriptions.write().insert(id, sub);
        tracing::info!(subscription_id = %id, capacity, "passthrough subscriber added");
        Ok(id)
    }

    /// Stop and remove one subscription. Unknown ids, including ids that
    /// were already removed, are an error.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let removed = self.subscriptions.write().remove(&id);
        match removed {
            Some(mut sub) => {
                sub.close();
                tracing::info!(subscription_id = %id, "passthrough subscriber removed");
                Ok(())
            }
            None => Err(CameraError::SubscriptionNotFound(id)),
        }
    }

    /// Stop and remove every subscription.
    pub fn unsubscribe_all(&self) {
        let drained: Vec<Subscription> = self.subscriptions.write().drain().map(|(_, s)| s).collect();
        if drained.is_empty() {
            return;
        }
        let count = drained.len();
        for mut sub in drained {
            sub.close();
        }
        tracing::debug!(count, "all passthrough subscribers removed");
    }

    /// Hand a batch to every subscription. Per-subscriber failures are
    /// logged and do not affect the others.
    ///
    /// Dropped batches are reported to each subscriber's error handler once
    /// the read lock is released, so a handler may call
    /// [`unsubscribe`](Self::unsubscribe) or [`subscribe`](Self::subscribe).
    pub fn publish(&self, batch: &PacketBatch) {
        let mut dropped: Vec<(ErrorHandler, CameraError)> = Vec::new();
        {
            let subscriptions = self.subscriptions.read();
            for (id, sub) in subscriptions.iter() {
                match sub.publish(batch.clone()) {
                    Ok(()) => {}
                    Err(e @ CameraError::QueueFull { .. }) => {
                        tracing::debug!(subscription_id = %id, error = %e, "RTP packets dropped");
                        dropped.push((sub.error_handler(), e));
                    }
                    Err(e) => {
                        tracing::debug!(subscription_id = %id, error = %e, "RTP packets dropped");
                    }
                }
            }
        }
        for (on_error, e) in dropped {
            on_error(e);
        }
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.read().contains_key(&id)
    }

    pub fn ids(&self) -> Vec<SubscriptionId> {
        let mut ids: Vec<_> = self.subscriptions.read().keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}
