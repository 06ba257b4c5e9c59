//! TCP client for a single bulb.
//!
//! A [`Light`] owns one connection. A background reader task routes replies
//! to the command waiting on them and fans property notifications out to
//! every [`Notifications`] subscriber.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{LightError, Result};
use crate::protocol::{
    ADJUST_BRIGHT, ADJUST_CT, Command, DEFAULT_PORT, Frame, GET_PROP, Notification, Reply,
    SET_BRIGHT, SET_CT_ABX, SET_POWER, SET_RGB, rgb_value, smooth,
};
use crate::transport::LineCodec;

/// How long a command waits for its reply
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

const NOTIFICATION_CAPACITY: usize = 32;

/// Pending command waiting for its reply
type PendingCommand = oneshot::Sender<Reply>;

type CommandSink = SplitSink<Framed<TcpStream, LineCodec>, Command>;

/// Connection to one bulb
pub struct Light {
    address: String,
    sink: Mutex<CommandSink>,
    pending: Arc<Mutex<HashMap<u64, PendingCommand>>>,
    notifications: broadcast::Sender<Notification>,
    next_id: AtomicU64,
    timeout: Duration,
    /// Cancelled by [`Light::close`] or when the reader stops
    closed: CancellationToken,
}

impl std::fmt::Debug for Light {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Light")
            .field("address", &self.address)
            .field("timeout", &self.timeout)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Light {
    /// Connect to a bulb using [`DEFAULT_COMMAND_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// See [`Light::connect_with_timeout`].
    pub async fn connect(address: &str) -> Result<Self> {
        Self::connect_with_timeout(address, DEFAULT_COMMAND_TIMEOUT).await
    }

    /// Connect to a bulb at `host` or `host:port`.
    ///
    /// The port defaults to [`DEFAULT_PORT`]. `timeout` bounds the TCP
    /// connect and every later command.
    ///
    /// # Errors
    ///
    /// Returns `LightError::InvalidAddress` for an empty address,
    /// `LightError::Timeout` if the connect stalls and `LightError::Io` if
    /// it is refused.
    pub async fn connect_with_timeout(address: &str, timeout: Duration) -> Result<Self> {
        let target = socket_target(address)?;
        debug!("Connecting to light at {target}");

        let stream = tokio::time::timeout(timeout, TcpStream::connect(target.as_str()))
            .await
            .map_err(|_| LightError::Timeout)??;
        stream.set_nodelay(true)?;

        let (sink, stream) = Framed::new(stream, LineCodec::new()).split();

        let pending: Arc<Mutex<HashMap<u64, PendingCommand>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let closed = CancellationToken::new();

        tokio::spawn(read_frames(
            stream,
            Arc::clone(&pending),
            notifications.clone(),
            closed.clone(),
            target,
        ));

        Ok(Self {
            address: address.to_string(),
            sink: Mutex::new(sink),
            pending,
            notifications,
            next_id: AtomicU64::new(1),
            timeout,
            closed,
        })
    }

    /// Address this light was connected with
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Send a command and wait for its reply.
    ///
    /// # Errors
    ///
    /// Returns `LightError::ConnectionClosed` once the connection is gone,
    /// `LightError::Timeout` when no reply arrives in time and
    /// `LightError::Device` when the bulb rejects the command.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Vec<Value>> {
        if self.closed.is_cancelled() {
            return Err(LightError::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            // The reader may have drained the map already
            if self.closed.is_cancelled() {
                return Err(LightError::ConnectionClosed);
            }
            pending.insert(id, tx);
        }

        trace!("[{}] -> {method} #{id}", self.address);
        let sent = self
            .sink
            .lock()
            .await
            .send(Command::new(id, method, params))
            .await;
        if let Err(e) = sent {
            self.pending.lock().await.remove(&id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => reply.into_result(),
            Ok(Err(_)) => Err(LightError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(LightError::Timeout)
            }
        }
    }

    /// # Errors
    ///
    /// Fails like [`Light::call`].
    pub async fn turn_on(&self) -> Result<()> {
        self.set_power(true).await
    }

    /// # Errors
    ///
    /// Fails like [`Light::call`].
    pub async fn turn_off(&self) -> Result<()> {
        self.set_power(false).await
    }

    async fn set_power(&self, on: bool) -> Result<()> {
        let state = if on { "on" } else { "off" };
        self.call(SET_POWER, smooth(vec![Value::from(state)]))
            .await
            .map(drop)
    }

    /// # Errors
    ///
    /// Fails like [`Light::call`].
    pub async fn set_rgb(&self, r: u8, g: u8, b: u8) -> Result<()> {
        self.call(SET_RGB, smooth(vec![Value::from(rgb_value(r, g, b))]))
            .await
            .map(drop)
    }

    /// Set brightness in percent (1-100).
    ///
    /// # Errors
    ///
    /// Fails like [`Light::call`].
    pub async fn set_brightness(&self, percent: u8) -> Result<()> {
        self.call(SET_BRIGHT, smooth(vec![Value::from(percent)]))
            .await
            .map(drop)
    }

    /// Set color temperature in kelvin (1700-6500).
    ///
    /// # Errors
    ///
    /// Fails like [`Light::call`].
    pub async fn set_color_temperature(&self, kelvin: u16) -> Result<()> {
        self.call(SET_CT_ABX, smooth(vec![Value::from(kelvin)]))
            .await
            .map(drop)
    }

    /// Change brightness by a signed percentage over `duration_ms`.
    ///
    /// # Errors
    ///
    /// Fails like [`Light::call`].
    pub async fn adjust_brightness(&self, delta: i8, duration_ms: u64) -> Result<()> {
        self.call(
            ADJUST_BRIGHT,
            vec![Value::from(delta), Value::from(duration_ms)],
        )
        .await
        .map(drop)
    }

    /// Change color temperature by a signed percentage over `duration_ms`.
    ///
    /// # Errors
    ///
    /// Fails like [`Light::call`].
    pub async fn adjust_color_temperature(&self, delta: i8, duration_ms: u64) -> Result<()> {
        self.call(ADJUST_CT, vec![Value::from(delta), Value::from(duration_ms)])
            .await
            .map(drop)
    }

    /// Query the power property.
    ///
    /// # Errors
    ///
    /// Fails like [`Light::call`], or with `LightError::UnexpectedReply`
    /// when the bulb reports something other than `on`/`off`.
    pub async fn is_power_on(&self) -> Result<bool> {
        let result = self.call(GET_PROP, vec![Value::from("power")]).await?;
        match result.first().and_then(Value::as_str) {
            Some("on") => Ok(true),
            Some("off") => Ok(false),
            _ => Err(LightError::UnexpectedReply(format!(
                "power property: {result:?}"
            ))),
        }
    }

    /// Subscribe to property notifications until `cancel` fires or the
    /// connection closes.
    #[must_use]
    pub fn notifications(&self, cancel: CancellationToken) -> Notifications {
        Notifications {
            rx: self.notifications.subscribe(),
            cancel,
            closed: self.closed.clone(),
        }
    }

    /// Close the connection. Pending commands fail with
    /// `LightError::ConnectionClosed`.
    pub async fn close(&self) {
        self.closed.cancel();
        if let Err(e) = self.sink.lock().await.close().await {
            debug!("[{}] Error closing connection: {e}", self.address);
        }
    }
}

impl Drop for Light {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

async fn read_frames(
    mut stream: futures_util::stream::SplitStream<Framed<TcpStream, LineCodec>>,
    pending: Arc<Mutex<HashMap<u64, PendingCommand>>>,
    notifications: broadcast::Sender<Notification>,
    closed: CancellationToken,
    target: String,
) {
    loop {
        let frame = tokio::select! {
            () = closed.cancelled() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Frame::Reply(reply))) => {
                let waiter = pending.lock().await.remove(&reply.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(reply);
                    }
                    None => trace!("[{target}] Reply #{} has no waiter", reply.id),
                }
            }
            Some(Ok(Frame::Notification(notification))) => {
                trace!("[{target}] <- {}", notification.method);
                // No subscribers is fine
                let _ = notifications.send(notification);
            }
            Some(Err(e)) => {
                warn!("[{target}] Read error: {e}");
                break;
            }
            None => {
                debug!("[{target}] Connection closed by light");
                break;
            }
        }
    }

    // Cancel under the lock so `call` never parks a waiter after the drain
    let mut pending = pending.lock().await;
    closed.cancel();
    pending.clear();
}

/// Subscription to a light's property notifications
#[derive(Debug)]
pub struct Notifications {
    rx: broadcast::Receiver<Notification>,
    cancel: CancellationToken,
    closed: CancellationToken,
}

impl Notifications {
    /// Next notification, or `None` once cancelled or disconnected.
    pub async fn next(&mut self) -> Option<Notification> {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                received = self.rx.recv() => match received {
                    Ok(notification) => return Some(notification),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Dropped {skipped} light notifications");
                    }
                    Err(RecvError::Closed) => return None,
                },
                () = self.closed.cancelled() => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Notification> + Send + 'static {
        futures_util::stream::unfold(self, |mut notifications| async move {
            let next = notifications.next().await?;
            Some((next, notifications))
        })
    }
}

/// Resolve `host` or `host:port` into a connect target.
fn socket_target(address: &str) -> Result<String> {
    let address = address.trim();
    if address.is_empty() {
        return Err(LightError::InvalidAddress(address.to_string()));
    }

    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr.to_string());
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT).to_string());
    }

    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(address.to_string())
        }
        Some(_) => Err(LightError::InvalidAddress(address.to_string())),
        None => Ok(format!("{address}:{DEFAULT_PORT}")),
    }
}
