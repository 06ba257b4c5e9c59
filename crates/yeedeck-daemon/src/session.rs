//! Device session types.
//!
//! A session is the single shared connection to one device address plus the
//! set of keys currently showing it.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Opaque host identifier of one key instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceContext(String);

impl SurfaceContext {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SurfaceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SurfaceContext {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SurfaceContext {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Per-address slot guarding at most one session
pub(crate) type Slot<D> = Arc<Mutex<Option<DeviceSession<D>>>>;

pub struct DeviceSession<D> {
    pub(crate) address: String,
    pub(crate) device: Arc<D>,
    pub(crate) subscribers: BTreeSet<SurfaceContext>,
    pub(crate) power: bool,
    /// Distinguishes successive sessions for the same address
    pub(crate) generation: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) listener: Option<JoinHandle<()>>,
}

impl<D> DeviceSession<D> {
    pub(crate) fn new(
        address: &str,
        device: Arc<D>,
        power: bool,
        generation: u64,
        cancel: CancellationToken,
        listener: JoinHandle<()>,
    ) -> Self {
        Self {
            address: address.to_string(),
            device,
            subscribers: BTreeSet::new(),
            power,
            generation,
            cancel,
            listener: Some(listener),
        }
    }

    /// Returns `false` if the context was already subscribed.
    pub(crate) fn subscribe(&mut self, ctx: SurfaceContext) -> bool {
        self.subscribers.insert(ctx)
    }

    /// Returns `false` if the context was not subscribed.
    pub(crate) fn unsubscribe(&mut self, ctx: &SurfaceContext) -> bool {
        self.subscribers.remove(ctx)
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.subscribers.is_empty()
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn power(&self) -> bool {
        self.power
    }

    pub fn subscribers(&self) -> impl Iterator<Item = &SurfaceContext> {
        self.subscribers.iter()
    }
}

impl<D> std::fmt::Debug for DeviceSession<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("address", &self.address)
            .field("subscribers", &self.subscribers)
            .field("power", &self.power)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> DeviceSession<()> {
        DeviceSession::new(
            "192.0.2.10",
            Arc::new(()),
            false,
            1,
            CancellationToken::new(),
            tokio::spawn(async {}),
        )
    }

    #[test]
    fn test_surface_context_from_string() {
        let ctx: SurfaceContext = "ctx-1".to_string().into();
        assert_eq!(format!("{ctx}"), "ctx-1");
        assert_eq!(ctx.as_str(), "ctx-1");
    }

    #[test]
    fn test_surface_context_equality() {
        let a: SurfaceContext = "abc".into();
        let b: SurfaceContext = "abc".into();
        let c: SurfaceContext = "xyz".into();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let mut session = session();
        assert!(session.subscribe("k1".into()));
        assert!(!session.subscribe("k1".into()));
        assert_eq!(session.subscribers().count(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let mut session = session();
        session.subscribe("k1".into());
        session.subscribe("k2".into());

        assert!(session.unsubscribe(&"k1".into()));
        assert!(!session.unsubscribe(&"k1".into()));
        assert!(!session.is_idle());

        assert!(session.unsubscribe(&"k2".into()));
        assert!(session.is_idle());
    }

    #[tokio::test]
    async fn test_new_session_state() {
        let session = session();
        assert_eq!(session.address(), "192.0.2.10");
        assert!(!session.power());
        assert!(session.is_idle());
        assert!(session.listener.is_some());
    }
}
