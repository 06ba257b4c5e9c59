//! Per-session notification listener.
//!
//! Follows a device's pushed notifications and mirrors power changes onto
//! every key subscribed to the session. State changes are applied under the
//! address slot lock, the same section `acquire` and `release` use.

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::device::{DeviceNotification, POWER_PROPERTY};
use crate::host::HostSender;
use crate::session::Slot;

/// Everything a listener needs to update its session
pub(crate) struct Listener<D> {
    pub(crate) address: String,
    pub(crate) slot: Slot<D>,
    pub(crate) generation: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) host: HostSender,
}

impl<D: Send + Sync + 'static> Listener<D> {
    pub(crate) fn spawn(
        self,
        notifications: BoxStream<'static, DeviceNotification>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(notifications))
    }

    async fn run(self, mut notifications: BoxStream<'static, DeviceNotification>) {
        debug!("[{}] Listening for device notifications", self.address);

        loop {
            let notification = tokio::select! {
                () = self.cancel.cancelled() => break,
                next = notifications.next() => match next {
                    Some(notification) => notification,
                    None => {
                        debug!("[{}] Notification stream ended", self.address);
                        break;
                    }
                },
            };

            let Some(power) = power_change(&notification) else {
                continue;
            };

            // Release holds the slot while awaiting us, so never block on it
            // once cancelled
            let mut slot = tokio::select! {
                () = self.cancel.cancelled() => break,
                slot = self.slot.lock() => slot,
            };

            let Some(session) = slot
                .as_mut()
                .filter(|session| session.generation == self.generation)
            else {
                debug!("[{}] Session retired, listener exiting", self.address);
                break;
            };

            session.power = power;
            trace!(
                "[{}] Power is now {}, updating {} keys",
                self.address,
                if power { "on" } else { "off" },
                session.subscribers.len()
            );

            for ctx in &session.subscribers {
                if let Err(e) = self.host.set_state(ctx.as_str(), power).await {
                    warn!("[{}] Failed to update key {ctx}: {e}", self.address);
                }
            }
        }

        debug!("[{}] Listener stopped", self.address);
    }
}

/// Power state carried by a notification, if it is a recognized change.
pub(crate) fn power_change(notification: &DeviceNotification) -> Option<bool> {
    if !notification.is_property_change() {
        return None;
    }

    match notification.property(POWER_PROPERTY)? {
        "on" => Some(true),
        "off" => Some(false),
        other => {
            debug!("Ignoring unknown power value {other:?}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NotificationKind;
    use crate::session::DeviceSession;
    use crate::testing::record_host;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{Mutex, mpsc};
    use yeedeck_types::SET_STATE;

    #[test]
    fn test_power_change_on_off() {
        let on = DeviceNotification::property_change([("power", "on")]);
        let off = DeviceNotification::property_change([("power", "off"), ("bright", "1")]);
        assert_eq!(power_change(&on), Some(true));
        assert_eq!(power_change(&off), Some(false));
    }

    #[test]
    fn test_power_change_ignores_other_values() {
        let unknown = DeviceNotification::property_change([("power", "dimmed")]);
        let missing = DeviceNotification::property_change([("bright", "40")]);
        let other_kind = DeviceNotification {
            kind: NotificationKind::Other("music".to_string()),
            properties: HashMap::from([("power".to_string(), "on".to_string())]),
        };
        assert_eq!(power_change(&unknown), None);
        assert_eq!(power_change(&missing), None);
        assert_eq!(power_change(&other_kind), None);
    }

    struct Harness {
        slot: Slot<()>,
        notify: mpsc::UnboundedSender<DeviceNotification>,
        cancel: CancellationToken,
        handle: JoinHandle<()>,
        events: mpsc::UnboundedReceiver<yeedeck_types::OutboundEvent>,
    }

    async fn harness(subscribers: &[&str], generation: u64) -> Harness {
        let (host, events) = record_host();
        let cancel = CancellationToken::new();
        let slot: Slot<()> = Arc::new(Mutex::new(None));

        let (notify, rx) = mpsc::unbounded_channel();
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|n| (n, rx))
        })
        .boxed();

        let handle = Listener {
            address: "192.0.2.10".to_string(),
            slot: Arc::clone(&slot),
            generation,
            cancel: cancel.clone(),
            host,
        }
        .spawn(stream);

        let mut session = DeviceSession::new(
            "192.0.2.10",
            Arc::new(()),
            false,
            1,
            cancel.clone(),
            tokio::spawn(async {}),
        );
        for ctx in subscribers {
            session.subscribe((*ctx).into());
        }
        *slot.lock().await = Some(session);

        Harness {
            slot,
            notify,
            cancel,
            handle,
            events,
        }
    }

    #[tokio::test]
    async fn test_power_on_updates_every_subscriber() {
        let mut h = harness(&["k1", "k2"], 1).await;

        h.notify
            .send(DeviceNotification::property_change([("power", "on")]))
            .unwrap();

        let mut updated = Vec::new();
        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(2), h.events.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event.event, SET_STATE);
            assert_eq!(event.state(), Some(1));
            updated.push(event.context.unwrap());
        }
        updated.sort();
        assert_eq!(updated, vec!["k1", "k2"]);
        assert!(h.slot.lock().await.as_ref().unwrap().power);

        h.cancel.cancel();
        h.handle.await.unwrap();
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_power_off_publishes_zero() {
        let mut h = harness(&["k1"], 1).await;
        h.slot.lock().await.as_mut().unwrap().power = true;

        h.notify
            .send(DeviceNotification::property_change([("power", "off")]))
            .unwrap();

        let event = h.events.recv().await.unwrap();
        assert_eq!(event.state(), Some(0));
        assert!(!h.slot.lock().await.as_ref().unwrap().power);
    }

    #[tokio::test]
    async fn test_no_power_property_publishes_nothing() {
        let mut h = harness(&["k1", "k2"], 1).await;

        h.notify
            .send(DeviceNotification::property_change([("bright", "40")]))
            .unwrap();
        // A later recognized change proves the first one was skipped
        h.notify
            .send(DeviceNotification::property_change([("power", "on")]))
            .unwrap();

        for _ in 0..2 {
            let event = h.events.recv().await.unwrap();
            assert_eq!(event.state(), Some(1));
        }

        h.cancel.cancel();
        h.handle.await.unwrap();
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_retired_generation_is_ignored() {
        let mut h = harness(&["k1"], 2).await;

        h.notify
            .send(DeviceNotification::property_change([("power", "on")]))
            .unwrap();

        // Generation mismatch ends the listener without publishing
        tokio::time::timeout(Duration::from_secs(2), h.handle)
            .await
            .unwrap()
            .unwrap();
        assert!(h.events.try_recv().is_err());
        assert!(!h.slot.lock().await.as_ref().unwrap().power);
    }

    #[tokio::test]
    async fn test_stops_on_cancel_while_slot_locked() {
        let h = harness(&["k1"], 1).await;

        let guard = h.slot.lock().await;
        h.notify
            .send(DeviceNotification::property_change([("power", "on")]))
            .unwrap();
        tokio::task::yield_now().await;

        h.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), h.handle)
            .await
            .unwrap()
            .unwrap();
        drop(guard);
    }

    #[tokio::test]
    async fn test_stops_when_stream_ends() {
        let h = harness(&["k1"], 1).await;
        drop(h.notify);

        tokio::time::timeout(Duration::from_secs(2), h.handle)
            .await
            .unwrap()
            .unwrap();
    }
}
