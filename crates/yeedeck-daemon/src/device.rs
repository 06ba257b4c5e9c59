//! Device capability consumed by the session registry.
//!
//! The registry and handlers only need this small command set plus a
//! notification stream. [`Light`] provides it for Yeelight bulbs; tests plug
//! in a scripted fake.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use yeedeck_light::Light;

use crate::error::Result;

/// Power property name in notifications
pub const POWER_PROPERTY: &str = "power";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    /// One or more properties changed on the device
    PropertyChange,
    Other(String),
}

/// Message pushed by a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNotification {
    pub kind: NotificationKind,
    pub properties: HashMap<String, String>,
}

impl DeviceNotification {
    pub fn property_change<K, V>(properties: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            kind: NotificationKind::PropertyChange,
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    #[must_use]
    pub fn is_property_change(&self) -> bool {
        self.kind == NotificationKind::PropertyChange
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Commands a connected device accepts
pub trait Device: Send + Sync + 'static {
    fn turn_on(&self) -> impl Future<Output = Result<()>> + Send;

    fn turn_off(&self) -> impl Future<Output = Result<()>> + Send;

    fn set_rgb(&self, r: u8, g: u8, b: u8) -> impl Future<Output = Result<()>> + Send;

    /// Brightness in percent, 1-100
    fn set_brightness(&self, percent: u8) -> impl Future<Output = Result<()>> + Send;

    /// Color temperature in kelvin, 1700-6500
    fn set_color_temperature(&self, kelvin: u16) -> impl Future<Output = Result<()>> + Send;

    fn adjust_brightness(
        &self,
        delta: i8,
        duration_ms: u64,
    ) -> impl Future<Output = Result<()>> + Send;

    fn adjust_color_temperature(
        &self,
        delta: i8,
        duration_ms: u64,
    ) -> impl Future<Output = Result<()>> + Send;

    fn is_power_on(&self) -> impl Future<Output = Result<bool>> + Send;

    /// Notifications until `cancel` fires or the device goes away.
    fn listen(&self, cancel: CancellationToken) -> BoxStream<'static, DeviceNotification>;

    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Opens device connections by address
pub trait Connector: Send + Sync + 'static {
    type Device: Device;

    fn connect(&self, address: &str) -> impl Future<Output = Result<Self::Device>> + Send;
}

impl Device for Light {
    async fn turn_on(&self) -> Result<()> {
        Ok(Light::turn_on(self).await?)
    }

    async fn turn_off(&self) -> Result<()> {
        Ok(Light::turn_off(self).await?)
    }

    async fn set_rgb(&self, r: u8, g: u8, b: u8) -> Result<()> {
        Ok(Light::set_rgb(self, r, g, b).await?)
    }

    async fn set_brightness(&self, percent: u8) -> Result<()> {
        Ok(Light::set_brightness(self, percent).await?)
    }

    async fn set_color_temperature(&self, kelvin: u16) -> Result<()> {
        Ok(Light::set_color_temperature(self, kelvin).await?)
    }

    async fn adjust_brightness(&self, delta: i8, duration_ms: u64) -> Result<()> {
        Ok(Light::adjust_brightness(self, delta, duration_ms).await?)
    }

    async fn adjust_color_temperature(&self, delta: i8, duration_ms: u64) -> Result<()> {
        Ok(Light::adjust_color_temperature(self, delta, duration_ms).await?)
    }

    async fn is_power_on(&self) -> Result<bool> {
        Ok(Light::is_power_on(self).await?)
    }

    fn listen(&self, cancel: CancellationToken) -> BoxStream<'static, DeviceNotification> {
        self.notifications(cancel)
            .into_stream()
            .map(|notification| {
                let kind = if notification.is_props() {
                    NotificationKind::PropertyChange
                } else {
                    NotificationKind::Other(notification.method.clone())
                };
                let properties = notification
                    .params
                    .keys()
                    .filter_map(|key| Some((key.clone(), notification.property(key)?)))
                    .collect();
                DeviceNotification { kind, properties }
            })
            .boxed()
    }

    async fn close(&self) {
        Light::close(self).await;
    }
}

/// Connects to Yeelight bulbs over the LAN
#[derive(Debug, Clone, Copy)]
pub struct LightConnector {
    timeout: Duration,
}

impl LightConnector {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for LightConnector {
    fn default() -> Self {
        Self::new(yeedeck_light::DEFAULT_COMMAND_TIMEOUT)
    }
}

impl Connector for LightConnector {
    type Device = Light;

    async fn connect(&self, address: &str) -> Result<Light> {
        Ok(Light::connect_with_timeout(address, self.timeout).await?)
    }
}
