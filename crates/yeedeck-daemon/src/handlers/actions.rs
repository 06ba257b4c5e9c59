//! Declarative action table.
//!
//! Each [`ActionSpec`] names the action it serves (or any action), the events
//! it accepts and the [`Operation`] to run. [`action_handlers`] turns the
//! table into one [`ActionHandler`] per entry, all sharing one
//! [`ActionContext`].

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};
use yeedeck_types::{EventKind, EventPayload, InboundEvent, Settings};

use super::Handler;
use super::settings;
use crate::device::{Connector, Device};
use crate::error::{DaemonError, Result};
use crate::registry::SessionRegistry;
use crate::session::SurfaceContext;

pub const ACTION_PREFIX: &str = "com.skynewz.yeelight";
pub const TOGGLE_ACTION: &str = "com.skynewz.yeelight.toggle";
pub const COLOR_ACTION: &str = "com.skynewz.yeelight.color";
pub const BRIGHTNESS_ACTION: &str = "com.skynewz.yeelight.brightness";
pub const TEMPERATURE_ACTION: &str = "com.skynewz.yeelight.temperature";
pub const BRIGHTNESS_ADJUST_ACTION: &str = "com.skynewz.yeelight.brightness.adjust";
pub const TEMPERATURE_ADJUST_ACTION: &str = "com.skynewz.yeelight.temperature.adjust";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Subscribe the key to its device session
    Bind,
    /// Unsubscribe the key
    Unbind,
    Toggle,
    Color,
    Brightness,
    Temperature,
    AdjustBrightness,
    AdjustTemperature,
}

#[derive(Debug)]
pub struct ActionSpec {
    /// Action UUID, `None` for entries that apply to every action
    pub action: Option<&'static str>,
    pub events: &'static [EventKind],
    pub operation: Operation,
}

impl ActionSpec {
    #[must_use]
    pub fn matches(&self, event: &InboundEvent) -> bool {
        if let Some(action) = self.action
            && event.action.as_deref() != Some(action)
        {
            return false;
        }
        self.events.contains(&event.kind())
    }
}

pub static ACTIONS: &[ActionSpec] = &[
    ActionSpec {
        action: None,
        events: &[EventKind::WillAppear, EventKind::DidReceiveSettings],
        operation: Operation::Bind,
    },
    ActionSpec {
        action: None,
        events: &[EventKind::WillDisappear],
        operation: Operation::Unbind,
    },
    ActionSpec {
        action: Some(TOGGLE_ACTION),
        events: &[EventKind::KeyUp],
        operation: Operation::Toggle,
    },
    ActionSpec {
        action: Some(COLOR_ACTION),
        events: &[EventKind::KeyUp],
        operation: Operation::Color,
    },
    ActionSpec {
        action: Some(BRIGHTNESS_ACTION),
        events: &[EventKind::KeyUp],
        operation: Operation::Brightness,
    },
    ActionSpec {
        action: Some(TEMPERATURE_ACTION),
        events: &[EventKind::KeyUp],
        operation: Operation::Temperature,
    },
    ActionSpec {
        action: Some(BRIGHTNESS_ADJUST_ACTION),
        events: &[EventKind::KeyUp],
        operation: Operation::AdjustBrightness,
    },
    ActionSpec {
        action: Some(TEMPERATURE_ADJUST_ACTION),
        events: &[EventKind::KeyUp],
        operation: Operation::AdjustTemperature,
    },
];

/// Address a key is bound to. Bind and unbind of one key run under its lock.
type Binding = Arc<Mutex<Option<String>>>;

/// State shared by every action handler
pub struct ActionContext<C: Connector> {
    registry: Arc<SessionRegistry<C>>,
    bindings: Mutex<HashMap<SurfaceContext, Binding>>,
}

impl<C: Connector> ActionContext<C> {
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry<C>>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            bindings: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry<C>> {
        &self.registry
    }

    pub async fn bound_address(&self, ctx: &SurfaceContext) -> Option<String> {
        let binding = self.bindings.lock().await.get(ctx).cloned()?;
        binding.lock().await.clone()
    }

    async fn run(&self, operation: Operation, event: &InboundEvent) -> Result<()> {
        let settings = settings::required(event)?;

        match operation {
            Operation::Bind => self.bind(event, settings).await,
            Operation::Unbind => self.unbind(event, settings).await,
            Operation::Toggle => {
                let on = desired_power(&event.payload);
                let device = self.device(event, settings).await?;
                if on {
                    device.turn_on().await
                } else {
                    device.turn_off().await
                }
            }
            Operation::Color => {
                let (r, g, b) = settings::color(settings.get(Settings::COLOR))?;
                self.device(event, settings).await?.set_rgb(r, g, b).await
            }
            Operation::Brightness => {
                let percent = settings::brightness(settings.get(Settings::BRIGHTNESS))?;
                self.device(event, settings)
                    .await?
                    .set_brightness(percent)
                    .await
            }
            Operation::Temperature => {
                let kelvin = settings::temperature(settings.get(Settings::TEMPERATURE))?;
                self.device(event, settings)
                    .await?
                    .set_color_temperature(kelvin)
                    .await
            }
            Operation::AdjustBrightness => {
                let delta = settings::delta(settings.get(Settings::DELTA))?;
                let duration = settings::duration(settings.get(Settings::DURATION));
                self.device(event, settings)
                    .await?
                    .adjust_brightness(delta, duration)
                    .await
            }
            Operation::AdjustTemperature => {
                let delta = settings::delta(settings.get(Settings::DELTA))?;
                let duration = settings::duration(settings.get(Settings::DURATION));
                self.device(event, settings)
                    .await?
                    .adjust_color_temperature(delta, duration)
                    .await
            }
        }
    }

    async fn bind(&self, event: &InboundEvent, settings: &Settings) -> Result<()> {
        let address = settings::address(settings)?;
        let ctx = SurfaceContext::from(event.context.as_str());
        let (binding, mut bound) = self.lock_binding(&ctx).await;

        if let Some(previous) = bound.take().filter(|previous| previous != address) {
            debug!("Key {ctx} moved from {previous} to {address}");
            self.registry.release(&previous, &ctx).await;
        }

        match self.registry.acquire(address, &ctx).await {
            Ok(_) => {
                *bound = Some(address.to_string());
                Ok(())
            }
            Err(e) => {
                self.forget_binding(&ctx, &binding).await;
                Err(e)
            }
        }
    }

    async fn unbind(&self, event: &InboundEvent, settings: &Settings) -> Result<()> {
        let ctx = SurfaceContext::from(event.context.as_str());
        let (binding, mut bound) = self.lock_binding(&ctx).await;
        let address = bound
            .take()
            .unwrap_or_else(|| settings.address().trim().to_string());

        if address.is_empty() {
            trace!("Key {ctx} was never bound");
        } else {
            self.registry.release(&address, &ctx).await;
        }
        self.forget_binding(&ctx, &binding).await;
        Ok(())
    }

    /// Lock the binding of `ctx`, creating it if needed.
    ///
    /// A binding can be forgotten while we wait on it; retry on the current
    /// one so a key never has two.
    async fn lock_binding(
        &self,
        ctx: &SurfaceContext,
    ) -> (Binding, OwnedMutexGuard<Option<String>>) {
        loop {
            let binding =
                Arc::clone(self.bindings.lock().await.entry(ctx.clone()).or_default());
            let bound = Arc::clone(&binding).lock_owned().await;

            let current = self
                .bindings
                .lock()
                .await
                .get(ctx)
                .is_some_and(|b| Arc::ptr_eq(b, &binding));
            if current {
                return (binding, bound);
            }
        }
    }

    /// Drop the binding of `ctx` if it is still `binding`. Caller holds its
    /// lock.
    async fn forget_binding(&self, ctx: &SurfaceContext, binding: &Binding) {
        let mut bindings = self.bindings.lock().await;
        if bindings.get(ctx).is_some_and(|b| Arc::ptr_eq(b, binding)) {
            bindings.remove(ctx);
        }
    }

    /// Device for a command, binding the key if its bind event has not
    /// landed yet.
    async fn device(&self, event: &InboundEvent, settings: &Settings) -> Result<Arc<C::Device>> {
        let address = settings::address(settings)?;
        match self.registry.lookup(address).await {
            Err(DaemonError::NotFound(_)) => {
                debug!("[{address}] No session yet for key {}", event.context);
                self.bind(event, settings).await?;
                self.registry.lookup(address).await
            }
            found => found,
        }
    }
}

/// Power state a toggle should move to.
///
/// Inside a multi-action the host states the wanted state; otherwise the key
/// flips from the state it shows.
#[must_use]
pub fn desired_power(payload: &EventPayload) -> bool {
    if payload.is_in_multi_action {
        payload.user_desired_state == Some(1)
    } else {
        payload.state != Some(1)
    }
}

/// Handler for one [`ActionSpec`]
pub struct ActionHandler<C: Connector> {
    spec: &'static ActionSpec,
    context: Arc<ActionContext<C>>,
}

impl<C: Connector> Handler for ActionHandler<C> {
    fn handle<'a>(&'a self, event: &'a InboundEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if !self.spec.matches(event) {
                return Ok(());
            }
            trace!(
                "{:?} for {} on {}",
                self.spec.operation,
                event.event,
                event.context
            );
            self.context.run(self.spec.operation, event).await
        })
    }
}

/// One handler per [`ACTIONS`] entry, in table order.
#[must_use]
pub fn action_handlers<C: Connector>(context: &Arc<ActionContext<C>>) -> Vec<ActionHandler<C>> {
    ACTIONS
        .iter()
        .map(|spec| ActionHandler {
            spec,
            context: Arc::clone(context),
        })
        .collect()
}
