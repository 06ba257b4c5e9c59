//! Session registry keyed by device address.
//!
//! The registry multiplexes many keys onto one device connection:
//! - `acquire` creates the session on first use and subscribes the key
//! - `release` unsubscribes, tearing the session down with its last key
//! - `lookup` returns the device of an existing session
//!
//! Each address has its own slot lock, so a slow connect on one address
//! never blocks another. A session is present iff it has subscribers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::device::{Connector, Device};
use crate::error::{DaemonError, Result};
use crate::host::HostSender;
use crate::listener::Listener;
use crate::session::{DeviceSession, Slot, SurfaceContext};

/// What happens to the device connection when its session ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReleasePolicy {
    /// Close the connection explicitly
    #[default]
    Close,
    /// Leave the connection to be dropped with its last handle
    Keep,
}

type SlotGuard<D> = OwnedMutexGuard<Option<DeviceSession<D>>>;

pub struct SessionRegistry<C: Connector> {
    connector: C,
    host: HostSender,
    policy: ReleasePolicy,
    slots: Mutex<HashMap<String, Slot<C::Device>>>,
    generation: AtomicU64,
}

impl<C: Connector> SessionRegistry<C> {
    #[must_use]
    pub fn new(connector: C, host: HostSender, policy: ReleasePolicy) -> Self {
        Self {
            connector,
            host,
            policy,
            slots: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn policy(&self) -> ReleasePolicy {
        self.policy
    }

    /// Subscribe `ctx` to the session for `address`, connecting on first use.
    ///
    /// The cached power state is published to `ctx` either way.
    ///
    /// # Errors
    ///
    /// Returns the connector's error if a new connection fails; nothing is
    /// stored in that case.
    pub async fn acquire(&self, address: &str, ctx: &SurfaceContext) -> Result<Arc<C::Device>> {
        let Some((slot, mut guard)) = self.lock_slot(address, true).await else {
            return Err(DaemonError::NotFound(address.to_string()));
        };

        if let Some(session) = guard.as_mut() {
            if session.subscribe(ctx.clone()) {
                debug!("[{address}] Key {ctx} subscribed");
            } else {
                trace!("[{address}] Key {ctx} already subscribed");
            }
            self.publish_state(ctx, session.power).await;
            return Ok(Arc::clone(&session.device));
        }

        debug!("[{address}] Connecting for key {ctx}");
        let device = match self.connector.connect(address).await {
            Ok(device) => Arc::new(device),
            Err(e) => {
                self.discard_slot(address, &slot).await;
                return Err(e);
            }
        };

        let power = match device.is_power_on().await {
            Ok(power) => power,
            Err(e) => {
                warn!("[{address}] Power probe failed, assuming off: {e}");
                false
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let listener = Listener {
            address: address.to_string(),
            slot: Arc::clone(&slot),
            generation,
            cancel: cancel.clone(),
            host: self.host.clone(),
        }
        .spawn(device.listen(cancel.clone()));

        let mut session = DeviceSession::new(
            address,
            Arc::clone(&device),
            power,
            generation,
            cancel,
            listener,
        );
        session.subscribe(ctx.clone());
        *guard = Some(session);

        info!("[{address}] Session opened for key {ctx} (power: {power})");
        self.publish_state(ctx, power).await;

        Ok(device)
    }

    /// Unsubscribe `ctx`, ending the session when no key is left.
    ///
    /// Returns `true` if the session was torn down.
    pub async fn release(&self, address: &str, ctx: &SurfaceContext) -> bool {
        let Some((slot, mut guard)) = self.lock_slot(address, false).await else {
            trace!("[{address}] Release for key {ctx}: no session");
            return false;
        };

        let Some(session) = guard.as_mut() else {
            return false;
        };

        if !session.unsubscribe(ctx) {
            trace!("[{address}] Key {ctx} was not subscribed");
            return false;
        }
        debug!("[{address}] Key {ctx} unsubscribed");

        if !session.is_idle() {
            return false;
        }

        if let Some(session) = guard.take() {
            self.teardown(session).await;
        }
        self.discard_slot(address, &slot).await;
        true
    }

    /// Device of the existing session for `address`.
    ///
    /// # Errors
    ///
    /// Returns `DaemonError::NotFound` if there is no session.
    pub async fn lookup(&self, address: &str) -> Result<Arc<C::Device>> {
        self.with_session(address, |session| Arc::clone(&session.device))
            .await
            .ok_or_else(|| DaemonError::NotFound(address.to_string()))
    }

    pub async fn contains(&self, address: &str) -> bool {
        self.with_session(address, |_| ()).await.is_some()
    }

    /// Subscribed keys of the session for `address`, sorted.
    pub async fn subscribers(&self, address: &str) -> Vec<SurfaceContext> {
        self.with_session(address, |session| {
            session.subscribers().cloned().collect::<Vec<_>>()
        })
        .await
        .unwrap_or_default()
    }

    pub async fn power_state(&self, address: &str) -> Option<bool> {
        self.with_session(address, DeviceSession::power).await
    }

    /// Number of live sessions
    pub async fn len(&self) -> usize {
        let slots: Vec<Slot<C::Device>> = self.slots.lock().await.values().cloned().collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Tear down every session.
    pub async fn shutdown(&self) {
        let slots: Vec<(String, Slot<C::Device>)> = self.slots.lock().await.drain().collect();
        if slots.is_empty() {
            return;
        }

        info!("Closing {} device sessions", slots.len());
        for (_, slot) in slots {
            let session = slot.lock().await.take();
            if let Some(session) = session {
                self.teardown(session).await;
            }
        }
    }

    async fn teardown(&self, mut session: DeviceSession<C::Device>) {
        session.cancel.cancel();
        if let Some(listener) = session.listener.take()
            && let Err(e) = listener.await
        {
            warn!("[{}] Listener task failed: {e}", session.address);
        }

        match self.policy {
            ReleasePolicy::Close => session.device.close().await,
            ReleasePolicy::Keep => {
                trace!("[{}] Leaving connection to be dropped", session.address);
            }
        }

        info!("[{}] Session closed", session.address);
    }

    async fn publish_state(&self, ctx: &SurfaceContext, power: bool) {
        if let Err(e) = self.host.set_state(ctx.as_str(), power).await {
            warn!("Failed to publish state to key {ctx}: {e}");
        }
    }

    async fn with_session<R>(
        &self,
        address: &str,
        f: impl FnOnce(&DeviceSession<C::Device>) -> R,
    ) -> Option<R> {
        let slot = self.slots.lock().await.get(address).cloned()?;
        let guard = slot.lock().await;
        guard.as_ref().map(f)
    }

    /// Lock the slot for `address`, creating it if `create` is set.
    ///
    /// A slot can be retired while we wait on it; in that case retry on the
    /// current one so two sessions never coexist for an address.
    async fn lock_slot(
        &self,
        address: &str,
        create: bool,
    ) -> Option<(Slot<C::Device>, SlotGuard<C::Device>)> {
        loop {
            let slot = {
                let mut slots = self.slots.lock().await;
                if create {
                    Arc::clone(slots.entry(address.to_string()).or_default())
                } else {
                    Arc::clone(slots.get(address)?)
                }
            };

            let guard = Arc::clone(&slot).lock_owned().await;

            let current = self
                .slots
                .lock()
                .await
                .get(address)
                .is_some_and(|s| Arc::ptr_eq(s, &slot));
            if current {
                return Some((slot, guard));
            }
            trace!("[{address}] Slot retired while waiting, retrying");
        }
    }

    /// Remove `slot` from the map if it is still the current one. Caller
    /// holds the slot lock.
    async fn discard_slot(&self, address: &str, slot: &Slot<C::Device>) {
        let mut slots = self.slots.lock().await;
        if slots.get(address).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            slots.remove(address);
        }
    }
}

impl<C: Connector> std::fmt::Debug for SessionRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
