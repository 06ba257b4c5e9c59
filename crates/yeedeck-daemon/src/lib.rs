//! Yeedeck daemon: bridges Stream Deck keys to Yeelight bulbs.
//!
//! The host talks to the daemon over a websocket ([`transport`]). Keys bound
//! to the same bulb share one device connection held by the
//! [`SessionRegistry`], and power changes pushed by a bulb are mirrored onto
//! every key bound to it.

pub mod config;
pub mod device;
pub mod error;
pub mod handlers;
pub mod host;
pub(crate) mod listener;
pub mod registry;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use tracing::{info, warn};

pub use config::{Args, Config, normalize_args};
pub use device::{Connector, Device, DeviceNotification, LightConnector, NotificationKind};
pub use error::{DaemonError, Result};
pub use handlers::{ActionContext, Dispatcher, Handler, action_handlers};
pub use host::{HostReceiver, HostSender};
pub use registry::{ReleasePolicy, SessionRegistry};
pub use session::SurfaceContext;
pub use transport::{RunningTransport, Transport};

/// Connect to the host and serve events until the link closes or the
/// process is interrupted.
///
/// # Errors
///
/// Returns an error if the host cannot be reached or the link fails.
pub async fn run(config: Config) -> Result<()> {
    let url = config.host_url();
    let transport = Transport::connect(&url, &config.registration()).await?;

    let registry = Arc::new(SessionRegistry::new(
        LightConnector::new(config.command_timeout),
        transport.host(),
        config.release_policy,
    ));
    let actions = ActionContext::new(Arc::clone(&registry));

    let mut dispatcher = Dispatcher::new(transport.host());
    for handler in action_handlers(&actions) {
        dispatcher.register(handler);
    }

    let running = transport.start(dispatcher);
    let cancel = running.cancellation_token();
    info!("Ready, serving host events");

    tokio::select! {
        () = cancel.cancelled() => {}
        () = interrupted() => running.stop(),
    }

    let result = running.wait().await;
    registry.shutdown().await;
    info!("All device sessions closed");
    result
}

async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            warn!("Cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    }
}
