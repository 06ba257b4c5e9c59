//! Outbound half of the host link.
//!
//! [`HostSender`] is the handle every component uses to talk to the host.
//! A send completes once the transport writer has taken the event, so
//! callers observe back-pressure from the socket and learn when the writer
//! is gone.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use yeedeck_types::OutboundEvent;

use crate::error::{DaemonError, Result};

/// Event waiting for the writer plus the signal that it was taken
#[derive(Debug)]
pub(crate) struct Outbound {
    pub(crate) event: OutboundEvent,
    pub(crate) taken: oneshot::Sender<()>,
}

/// Cloneable handle for sending events to the host
#[derive(Debug, Clone)]
pub struct HostSender {
    tx: mpsc::Sender<Outbound>,
}

/// Writer side of the outbound queue
#[derive(Debug)]
pub struct HostReceiver {
    pub(crate) rx: mpsc::Receiver<Outbound>,
}

/// Create a connected sender/receiver pair.
#[must_use]
pub fn channel() -> (HostSender, HostReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (HostSender { tx }, HostReceiver { rx })
}

impl HostSender {
    /// Queue an event and wait until the writer has taken it.
    ///
    /// # Errors
    ///
    /// Returns `DaemonError::TransportClosed` if the writer has stopped.
    pub async fn send(&self, event: OutboundEvent) -> Result<()> {
        let (taken, rx) = oneshot::channel();
        self.tx
            .send(Outbound { event, taken })
            .await
            .map_err(|_| DaemonError::TransportClosed)?;
        rx.await.map_err(|_| DaemonError::TransportClosed)
    }

    /// Set a key to state 1 (`on`) or 0.
    ///
    /// # Errors
    ///
    /// See [`HostSender::send`].
    pub async fn set_state(&self, context: &str, on: bool) -> Result<()> {
        self.send(OutboundEvent::set_state(context, on)).await
    }

    /// Flash the alert indicator on a key.
    ///
    /// # Errors
    ///
    /// See [`HostSender::send`].
    pub async fn show_alert(&self, context: &str) -> Result<()> {
        self.send(OutboundEvent::show_alert(context)).await
    }

    /// Write a line to the host's plugin log (and ours).
    ///
    /// # Errors
    ///
    /// See [`HostSender::send`].
    pub async fn log_message(&self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        debug!("{message}");
        self.send(OutboundEvent::log_message(message)).await
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl HostReceiver {
    /// Take the next event, releasing its sender.
    pub async fn recv(&mut self) -> Option<OutboundEvent> {
        let outbound = self.rx.recv().await?;
        // The sender may have given up waiting
        let _ = outbound.taken.send(());
        Some(outbound.event)
    }
}
