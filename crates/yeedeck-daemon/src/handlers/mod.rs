//! Inbound event handlers.
//!
//! Every inbound event goes through each registered [`Handler`] in
//! registration order. The [`Dispatcher`] is the only place a handler error
//! is recovered: it is logged locally and to the host, and the key that
//! triggered it flashes its alert indicator.

mod actions;
pub mod settings;

use futures_util::future::BoxFuture;
use tracing::{error, warn};
use yeedeck_types::InboundEvent;

use crate::error::{DaemonError, Result};
use crate::host::HostSender;

pub use actions::{
    ACTION_PREFIX, ACTIONS, ActionContext, ActionHandler, ActionSpec, BRIGHTNESS_ACTION,
    BRIGHTNESS_ADJUST_ACTION, COLOR_ACTION, Operation, TEMPERATURE_ACTION,
    TEMPERATURE_ADJUST_ACTION, TOGGLE_ACTION, action_handlers,
};

/// Reacts to inbound events
pub trait Handler: Send + Sync {
    /// Handle one event. Events the handler does not care about succeed.
    fn handle<'a>(&'a self, event: &'a InboundEvent) -> BoxFuture<'a, Result<()>>;
}

/// Ordered handler list fixed before the transport starts
pub struct Dispatcher {
    handlers: Vec<Box<dyn Handler>>,
    host: HostSender,
}

impl Dispatcher {
    #[must_use]
    pub fn new(host: HostSender) -> Self {
        Self {
            handlers: Vec::new(),
            host,
        }
    }

    pub fn register(&mut self, handler: impl Handler + 'static) {
        self.handlers.push(Box::new(handler));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run every handler on `event`, reporting failures and carrying on.
    pub async fn dispatch(&self, event: &InboundEvent) {
        for handler in &self.handlers {
            if let Err(e) = handler.handle(event).await {
                self.report(event, &e).await;
            }
        }
    }

    async fn report(&self, event: &InboundEvent, err: &DaemonError) {
        error!(
            event = %event.event,
            action = event.action_name(),
            context = %event.context,
            "Handler failed: {err}"
        );

        let message = format!(
            "[ERROR] event [{}] action [{}]: {err}",
            event.event,
            event.action_name()
        );
        if let Err(e) = self.host.log_message(message).await {
            warn!("Failed to forward handler error to host: {e}");
        }
        if let Err(e) = self.host.show_alert(&event.context).await {
            warn!("Failed to show alert on {}: {e}", event.context);
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}
