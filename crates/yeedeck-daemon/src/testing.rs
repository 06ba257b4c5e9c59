//! Scripted device and host doubles for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use yeedeck_types::OutboundEvent;

use crate::device::{Connector, Device, DeviceNotification};
use crate::error::{DaemonError, Result};
use crate::host::{self, HostSender};

/// Host handle whose events land in an unbounded receiver.
///
/// Events are forwarded before the sender is released, so once a send
/// returns its event is already visible to the test.
pub(crate) fn record_host() -> (HostSender, mpsc::UnboundedReceiver<OutboundEvent>) {
    let (host, mut receiver) = host::channel();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(outbound) = receiver.rx.recv().await {
            let _ = tx.send(outbound.event);
            let _ = outbound.taken.send(());
        }
    });
    (host, rx)
}

/// Command a [`FakeLight`] received
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    TurnOn,
    TurnOff,
    SetRgb(u8, u8, u8),
    SetBrightness(u8),
    SetColorTemperature(u16),
    AdjustBrightness(i8, u64),
    AdjustColorTemperature(i8, u64),
}

#[derive(Debug)]
pub(crate) struct FakeLight {
    address: String,
    power: bool,
    failing_probe: bool,
    failing_commands: bool,
    calls: Mutex<Vec<Call>>,
    notifications: broadcast::Sender<DeviceNotification>,
    listen_cancel: Mutex<Option<CancellationToken>>,
    closed: AtomicBool,
    probes: Arc<Mutex<HashMap<String, usize>>>,
}

impl FakeLight {
    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn notify(&self, notification: DeviceNotification) {
        let _ = self.notifications.send(notification);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn listen_cancelled(&self) -> bool {
        self.listen_cancel
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    fn record(&self, call: Call) -> Result<()> {
        if self.failing_commands {
            return Err(DaemonError::Device(
                format!("{} rejected {call:?}", self.address).into(),
            ));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

impl Device for FakeLight {
    async fn turn_on(&self) -> Result<()> {
        self.record(Call::TurnOn)
    }

    async fn turn_off(&self) -> Result<()> {
        self.record(Call::TurnOff)
    }

    async fn set_rgb(&self, r: u8, g: u8, b: u8) -> Result<()> {
        self.record(Call::SetRgb(r, g, b))
    }

    async fn set_brightness(&self, percent: u8) -> Result<()> {
        self.record(Call::SetBrightness(percent))
    }

    async fn set_color_temperature(&self, kelvin: u16) -> Result<()> {
        self.record(Call::SetColorTemperature(kelvin))
    }

    async fn adjust_brightness(&self, delta: i8, duration_ms: u64) -> Result<()> {
        self.record(Call::AdjustBrightness(delta, duration_ms))
    }

    async fn adjust_color_temperature(&self, delta: i8, duration_ms: u64) -> Result<()> {
        self.record(Call::AdjustColorTemperature(delta, duration_ms))
    }

    async fn is_power_on(&self) -> Result<bool> {
        *self
            .probes
            .lock()
            .unwrap()
            .entry(self.address.clone())
            .or_default() += 1;
        if self.failing_probe {
            return Err(DaemonError::Device("probe failed".into()));
        }
        Ok(self.power)
    }

    fn listen(&self, cancel: CancellationToken) -> BoxStream<'static, DeviceNotification> {
        *self.listen_cancel.lock().unwrap() = Some(cancel.clone());
        let rx = self.notifications.subscribe();
        futures_util::stream::unfold((rx, cancel), |(mut rx, cancel)| async move {
            tokio::select! {
                () = cancel.cancelled() => None,
                next = rx.recv() => next.ok().map(|n| (n, (rx, cancel))),
            }
        })
        .boxed()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct Script {
    power_on: HashSet<String>,
    failing_probe: HashSet<String>,
    failing_commands: HashSet<String>,
    unreachable: HashSet<String>,
    delays: HashMap<String, Duration>,
    connects: HashMap<String, usize>,
}

/// Connector producing [`FakeLight`]s; clones share their script and counters
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeConnector {
    script: Arc<Mutex<Script>>,
    probes: Arc<Mutex<HashMap<String, usize>>>,
}

impl FakeConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn update(self, f: impl FnOnce(&mut Script)) -> Self {
        f(&mut self.script.lock().unwrap());
        self
    }

    pub(crate) fn with_power(self, address: &str, on: bool) -> Self {
        self.update(|s| {
            if on {
                s.power_on.insert(address.to_string());
            } else {
                s.power_on.remove(address);
            }
        })
    }

    pub(crate) fn with_failing_probe(self, address: &str) -> Self {
        self.update(|s| {
            s.failing_probe.insert(address.to_string());
        })
    }

    pub(crate) fn with_failing_commands(self, address: &str) -> Self {
        self.update(|s| {
            s.failing_commands.insert(address.to_string());
        })
    }

    pub(crate) fn with_unreachable(self, address: &str) -> Self {
        self.update(|s| {
            s.unreachable.insert(address.to_string());
        })
    }

    pub(crate) fn with_connect_delay(self, address: &str, delay: Duration) -> Self {
        self.update(|s| {
            s.delays.insert(address.to_string(), delay);
        })
    }

    pub(crate) fn connects(&self, address: &str) -> usize {
        self.script
            .lock()
            .unwrap()
            .connects
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn probes(&self, address: &str) -> usize {
        self.probes
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or_default()
    }
}

impl Connector for FakeConnector {
    type Device = FakeLight;

    async fn connect(&self, address: &str) -> Result<FakeLight> {
        let (delay, unreachable, power, failing_probe, failing_commands) = {
            let mut script = self.script.lock().unwrap();
            *script.connects.entry(address.to_string()).or_default() += 1;
            (
                script.delays.get(address).copied(),
                script.unreachable.contains(address),
                script.power_on.contains(address),
                script.failing_probe.contains(address),
                script.failing_commands.contains(address),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if unreachable {
            return Err(DaemonError::Device(
                format!("{address} is unreachable").into(),
            ));
        }

        let (notifications, _) = broadcast::channel(16);
        Ok(FakeLight {
            address: address.to_string(),
            power,
            failing_probe,
            failing_commands,
            calls: Mutex::new(Vec::new()),
            notifications,
            listen_cancel: Mutex::new(None),
            closed: AtomicBool::new(false),
            probes: Arc::clone(&self.probes),
        })
    }
}
