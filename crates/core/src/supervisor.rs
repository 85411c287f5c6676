//! Periodic connection health check and reconnect.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, after, bounded, select};

use crate::error::{CameraError, Result};

/// Something the supervisor can check and rebuild.
pub trait Supervised: Send + 'static {
    /// Cheap liveness check against the remote end.
    fn probe(&self) -> Result<()>;

    /// Tear down whatever is there and connect again.
    fn reconnect(&self) -> Result<()>;
}

/// Whether a probe failure means the connection must be rebuilt.
pub fn needs_reconnect(error: &CameraError) -> bool {
    error.is_connection_error() || matches!(error, CameraError::Status { .. })
}

/// Background thread running [`Supervised::probe`] every `interval` and
/// [`Supervised::reconnect`] when the probe reports a dead connection.
///
/// Ticks run one at a time on a single thread, so reconnects never overlap.
#[derive(Debug)]
pub struct Supervisor {
    cancel: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Supervisor {
    pub fn start<S: Supervised>(target: S, interval: Duration) -> Result<Self> {
        let (cancel, cancelled) = bounded::<()>(1);
        let worker = thread::Builder::new()
            .name("rtsp-supervisor".into())
            .spawn(move || {
                loop {
                    select! {
                        // a send or a dropped sender both mean stop
                        recv(cancelled) -> _ => break,
                        recv(after(interval)) -> _ => {}
                    }
                    tick(&target);
                }
                tracing::debug!("supervisor stopped");
            })?;

        Ok(Self {
            cancel: Some(cancel),
            worker: Some(worker),
        })
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Cancel and wait for an in-flight tick to finish. Idempotent.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.try_send(());
        }
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::error!("supervisor thread panicked");
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tick<S: Supervised>(target: &S) {
    match target.probe() {
        Ok(()) => tracing::trace!("connection healthy"),
        Err(e) if needs_reconnect(&e) => {
            tracing::warn!(error = %e, "connection unhealthy, reconnecting");
            match target.reconnect() {
                Ok(()) => tracing::info!("reconnected"),
                Err(e) => tracing::warn!(error = %e, "reconnect failed, retrying next tick"),
            }
        }
        Err(e) => tracing::debug!(error = %e, "health probe failed"),
    }
}
