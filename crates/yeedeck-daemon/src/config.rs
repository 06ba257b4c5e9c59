//! Command line configuration.
//!
//! The host launches plugins with single-dash long flags
//! (`-port 28196 -pluginUUID .. -registerEvent .. -info {..}`), so arguments
//! go through [`normalize_args`] before clap sees them.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use yeedeck_types::{HostInfo, Registration};

use crate::error::{DaemonError, Result};
use crate::registry::ReleasePolicy;

/// Yeelight bridge for the Stream Deck host
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "yeedeck")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Port of the host's websocket server
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Identifier used to register with the host
    #[arg(long = "pluginUUID", value_name = "UUID", default_value = "")]
    pub plugin_uuid: String,

    /// Event name used to register with the host
    #[arg(long = "registerEvent", value_name = "EVENT", default_value = "")]
    pub register_event: String,

    /// Host application and device information as JSON
    #[arg(long, value_name = "JSON", default_value = "")]
    pub info: String,

    /// Timeout for a single device command
    #[arg(long, value_name = "MS", default_value_t = 5000)]
    pub command_timeout_ms: u64,

    /// What happens to a device connection once no key uses it
    #[arg(long, value_enum, default_value_t = ReleasePolicy::Close)]
    pub release_policy: ReleasePolicy,

    /// Directory for log files (defaults to the system temp dir)
    #[arg(long, value_name = "PATH")]
    pub log_dir: Option<PathBuf>,
}

/// Rewrite `-name` long flags as `--name`.
///
/// Short flags (`-h`), values and anything already double-dashed pass
/// through unchanged.
#[must_use]
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| match arg.to_str() {
            Some(s) if is_single_dash_long(s) => format!("-{s}").into(),
            _ => arg,
        })
        .collect()
}

fn is_single_dash_long(arg: &str) -> bool {
    let Some(name) = arg.strip_prefix('-') else {
        return false;
    };
    !name.starts_with('-')
        && name.len() > 1
        && name.starts_with(|c: char| c.is_ascii_alphabetic())
}

/// Validated runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub plugin_uuid: String,
    pub register_event: String,
    pub info: HostInfo,
    pub command_timeout: Duration,
    pub release_policy: ReleasePolicy,
    pub log_dir: PathBuf,
}

impl Config {
    /// # Errors
    ///
    /// Returns `DaemonError::Config` for a missing or zero port, an empty
    /// plugin UUID or register event, or info that is not valid JSON.
    pub fn from_args(args: Args) -> Result<Self> {
        let port = match args.port {
            None | Some(0) => return Err(DaemonError::Config("missing -port".to_string())),
            Some(port) => port,
        };
        if args.plugin_uuid.trim().is_empty() {
            return Err(DaemonError::Config("missing -pluginUUID".to_string()));
        }
        if args.register_event.trim().is_empty() {
            return Err(DaemonError::Config("missing -registerEvent".to_string()));
        }
        let info = HostInfo::from_json(&args.info)
            .map_err(|e| DaemonError::Config(format!("missing or invalid -info: {e}")))?;
        if args.command_timeout_ms == 0 {
            return Err(DaemonError::Config(
                "command timeout must be positive".to_string(),
            ));
        }

        Ok(Self {
            port,
            plugin_uuid: args.plugin_uuid,
            register_event: args.register_event,
            info,
            command_timeout: Duration::from_millis(args.command_timeout_ms),
            release_policy: args.release_policy,
            log_dir: args.log_dir.unwrap_or_else(std::env::temp_dir),
        })
    }

    #[must_use]
    pub fn host_url(&self) -> String {
        format!("ws://localhost:{}", self.port)
    }

    #[must_use]
    pub fn registration(&self) -> Registration {
        Registration::new(&self.register_event, &self.plugin_uuid)
    }
}
