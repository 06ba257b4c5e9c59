//! LAN control client for Yeelight bulbs.
//!
//! This crate speaks the bulb's line-delimited JSON protocol over TCP. It
//! covers the small command set the plugin needs plus the bulb's pushed
//! property notifications.
//!
//! # Architecture
//!
//! - [`protocol`]: command, reply and notification messages
//! - [`transport`]: `\r\n`-delimited JSON codec for message framing
//! - [`client`]: [`Light`], one TCP connection to one bulb
//! - [`error`]: error type and result alias
//!
//! # Example
//!
//! ```no_run
//! use yeedeck_light::Light;
//!
//! # async fn example() -> yeedeck_light::Result<()> {
//! let light = Light::connect("192.0.2.10").await?;
//! if !light.is_power_on().await? {
//!     light.turn_on().await?;
//! }
//! light.set_brightness(40).await?;
//! light.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod transport;

pub use client::{DEFAULT_COMMAND_TIMEOUT, Light, Notifications};
pub use error::{LightError, Result};
pub use protocol::{Command, DEFAULT_PORT, Frame, Notification, Reply, ReplyError};
pub use transport::{CodecError, LineCodec};
