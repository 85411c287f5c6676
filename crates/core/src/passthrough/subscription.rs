use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded, select};
use parking_lot::Mutex;

use super::{ErrorHandler, PacketBatch, PacketCallback, SubscriptionId};
use crate::error::{CameraError, Result};

/// Lifecycle of a [`Subscription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Delivery thread not yet running.
    Starting,
    /// Accepting batches.
    Active,
    /// Stopped; batches are rejected.
    Closed,
}

/// One passthrough consumer: a bounded FIFO queue drained by a dedicated
/// delivery thread that invokes the consumer's callback.
///
/// [`publish`](Self::publish) never blocks. When the queue is at capacity
/// the batch is dropped and [`CameraError::QueueFull`] returned; the caller
/// passes that to [`error_handler`](Self::error_handler) once it holds no
/// locks, since the handler may unsubscribe.
pub struct Subscription {
    id: SubscriptionId,
    capacity: usize,
    state: Mutex<SubscriptionState>,
    queue: Sender<PacketBatch>,
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    on_error: ErrorHandler,
}

impl Subscription {
    /// Create a subscription and start its delivery thread.
    pub fn start(
        capacity: usize,
        callback: PacketCallback,
        on_error: ErrorHandler,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(CameraError::InvalidConfig(
                "subscription buffer size must be at least 1".into(),
            ));
        }

        let id = SubscriptionId::next();
        let (queue, batches) = bounded::<PacketBatch>(capacity);
        let (stop, stopped) = bounded::<()>(0);

        let mut sub = Self {
            id,
            capacity,
            state: Mutex::new(SubscriptionState::Starting),
            queue,
            stop: Some(stop),
            worker: None,
            on_error: on_error.clone(),
        };

        let worker = thread::Builder::new()
            .name(format!("rtp-{id}"))
            .spawn(move || deliver(id, batches, stopped, callback, on_error))?;
        sub.worker = Some(worker);
        *sub.state.lock() = SubscriptionState::Active;

        tracing::debug!(subscription_id = %id, capacity, "subscription started");
        Ok(sub)
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    /// Queue a batch for delivery without waiting. A full queue drops the
    /// batch and returns [`CameraError::QueueFull`].
    pub fn publish(&self, batch: PacketBatch) -> Result<()> {
        if self.state() != SubscriptionState::Active {
            return Err(CameraError::SubscriptionClosed(self.id));
        }

        match self.queue.try_send(batch) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(CameraError::QueueFull {
                id: self.id,
                capacity: self.capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(CameraError::SubscriptionClosed(self.id)),
        }
    }

    /// The handler to tell about this subscription's failures. Call it
    /// without holding any registry lock.
    pub(crate) fn error_handler(&self) -> ErrorHandler {
        Arc::clone(&self.on_error)
    }

    /// Stop the delivery thread and wait for it. Batches still queued are
    /// discarded. Safe to call more than once.
    pub fn close(&mut self) {
        {
            let mut state = self.state.lock();
            if *state == SubscriptionState::Closed {
                return;
            }
            *state = SubscriptionState::Closed;
        }

        drop(self.stop.take());
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == thread::current().id() {
                // closed from inside its own callback; the thread exits on its own
                return;
            }
            if worker.join().is_err() {
                tracing::error!(subscription_id = %self.id, "subscription delivery thread panicked");
            }
        }
        tracing::debug!(subscription_id = %self.id, "subscription closed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("state", &self.state())
            .field("queued", &self.queue.len())
            .finish()
    }
}

fn deliver(
    id: SubscriptionId,
    batches: Receiver<PacketBatch>,
    stopped: Receiver<()>,
    mut callback: PacketCallback,
    on_error: ErrorHandler,
) {
    loop {
        // a stop request wins over queued work
        if let Err(TryRecvError::Disconnected) = stopped.try_recv() {
            break;
        }
        select! {
            recv(stopped) -> _ => break,
            recv(batches) -> batch => {
                let Ok(batch) = batch else { break };
                if let Err(e) = callback(&batch) {
                    on_error(e);
                }
            }
        }
    }
    tracing::trace!(subscription_id = %id, "delivery thread exiting");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::media::rtp::RtpPacket;

    fn batch(seq: u16) -> PacketBatch {
        Arc::from(vec![RtpPacket {
            marker: true,
            payload_type: 96,
            sequence_number: seq,
            timestamp: 0,
            ssrc: 1,
            csrc: Vec::new(),
            payload: vec![0x65],
        }])
    }

    fn counting_handler() -> (ErrorHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handler: ErrorHandler = Arc::new(move |e| {
            if matches!(e, CameraError::QueueFull { .. }) {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        (handler, count)
    }

    #[test]
    fn delivers_in_order() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (handler, _) = counting_handler();
        let mut sub = Subscription::start(
            8,
            Box::new(move |pkts| {
                tx.send(pkts[0].sequence_number).ok();
                Ok(())
            }),
            handler,
        )
        .unwrap();
        assert_eq!(sub.state(), SubscriptionState::Active);

        for seq in 0..5 {
            sub.publish(batch(seq)).unwrap();
        }
        let got: Vec<u16> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
        sub.close();
    }

    #[test]
    fn full_queue_drops_without_calling_handler() {
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        let (handler, dropped) = counting_handler();

        let mut sub = Subscription::start(
            1,
            Box::new(move |_| {
                entered_tx.send(()).ok();
                release_rx.recv().ok();
                Ok(())
            }),
            handler,
        )
        .unwrap();

        // worker takes batch 0 and blocks in the callback
        sub.publish(batch(0)).unwrap();
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        // batch 1 fills the single slot; batch 2 has nowhere to go
        sub.publish(batch(1)).unwrap();
        let err = sub.publish(batch(2)).unwrap_err();
        assert!(matches!(err, CameraError::QueueFull { capacity: 1, .. }));
        assert!(sub.publish(batch(3)).is_err());
        // reporting is left to the registry, outside its lock
        assert_eq!(dropped.load(Ordering::SeqCst), 0);

        drop(release_tx);
        sub.close();
    }

    #[test]
    fn callback_errors_go_to_handler() {
        let (err_tx, err_rx) = crossbeam_channel::unbounded();
        let handler: ErrorHandler = Arc::new(move |e| {
            err_tx.send(e.to_string()).ok();
        });
        let mut sub = Subscription::start(
            2,
            Box::new(|_| Err(CameraError::Callback("peer gone".into()))),
            handler,
        )
        .unwrap();
        sub.publish(batch(0)).unwrap();
        let msg = err_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(msg.contains("peer gone"));
        sub.close();
    }

    #[test]
    fn closed_subscription_rejects_publish() {
        let (handler, _) = counting_handler();
        let mut sub = Subscription::start(1, Box::new(|_| Ok(())), handler).unwrap();
        sub.close();
        sub.close();
        assert_eq!(sub.state(), SubscriptionState::Closed);
        assert!(matches!(
            sub.publish(batch(0)),
            Err(CameraError::SubscriptionClosed(_))
        ));
    }

    #[test]
    fn zero_capacity_rejected() {
        let (handler, _) = counting_handler();
        assert!(Subscription::start(0, Box::new(|_| Ok(())), handler).is_err());
    }
}
