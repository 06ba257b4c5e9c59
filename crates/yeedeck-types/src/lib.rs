//! Shared types for the yeedeck host link.
//!
//! This crate provides the messages exchanged with the Stream Deck
//! application over its websocket: inbound events and their payloads,
//! outbound events, the registration handshake and the launch-time host
//! information. All types are serializable with serde.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Outbound event name: set the visual state of a key.
pub const SET_STATE: &str = "setState";

/// Outbound event name: flash the alert indicator on a key.
pub const SHOW_ALERT: &str = "showAlert";

/// Outbound event name: append a line to the host's plugin log.
pub const LOG_MESSAGE: &str = "logMessage";

/// Deserialize a value that may be null or missing (both become the default)
fn deserialize_null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let opt: Option<T> = Option::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// Inbound event names this plugin interprets.
///
/// Anything else the host sends maps to [`EventKind::Other`] and is still
/// dispatched, it simply matches no action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    KeyDown,
    KeyUp,
    WillAppear,
    WillDisappear,
    DidReceiveSettings,
    Other,
}

impl EventKind {
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "keyDown" => Self::KeyDown,
            "keyUp" => Self::KeyUp,
            "willAppear" => Self::WillAppear,
            "willDisappear" => Self::WillDisappear,
            "didReceiveSettings" => Self::DidReceiveSettings,
            _ => Self::Other,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeyDown => "keyDown",
            Self::KeyUp => "keyUp",
            Self::WillAppear => "willAppear",
            Self::WillDisappear => "willDisappear",
            Self::DidReceiveSettings => "didReceiveSettings",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event received from the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Action UUID of the key, absent for application-level events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    pub event: String,

    /// Opaque identifier of the key instance
    #[serde(default)]
    pub context: String,

    /// Hardware device the key lives on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    #[serde(default, deserialize_with = "deserialize_null_as_default")]
    pub payload: EventPayload,
}

impl InboundEvent {
    #[must_use]
    pub fn new(event: EventKind, action: Option<&str>, context: impl Into<String>) -> Self {
        Self {
            action: action.map(String::from),
            event: event.as_str().to_string(),
            context: context.into(),
            device: None,
            payload: EventPayload::default(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.payload.settings = Some(settings);
        self
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        EventKind::parse(&self.event)
    }

    /// Action UUID or an empty string for application-level events.
    #[must_use]
    pub fn action_name(&self) -> &str {
        self.action.as_deref().unwrap_or_default()
    }
}

/// Payload of an inbound event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,

    #[serde(default)]
    pub is_in_multi_action: bool,

    /// State the user picked for this key inside a multi-action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_desired_state: Option<u8>,

    /// Current visual state of a two-state key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Value>,
}

/// Per-key settings stored by the host.
///
/// Values are kept as raw JSON. The property inspector writes strings, so
/// [`Settings::get`] only ever returns string values and treats everything
/// else as unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(Map<String, Value>);

impl Settings {
    pub const ADDRESS: &'static str = "address";
    pub const COLOR: &'static str = "color";
    pub const BRIGHTNESS: &'static str = "brightness";
    pub const DELTA: &'static str = "delta";
    pub const DURATION: &'static str = "duration";
    pub const TEMPERATURE: &'static str = "temperature";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// String value for `key`, empty when missing or not a string.
    #[must_use]
    pub fn get(&self, key: &str) -> &str {
        self.0.get(key).and_then(Value::as_str).unwrap_or_default()
    }

    #[must_use]
    pub fn address(&self) -> &str {
        self.get(Self::ADDRESS)
    }
}

/// Event sent to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub event: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl OutboundEvent {
    /// Two-state key update: state 1 when the light is on, 0 otherwise.
    #[must_use]
    pub fn set_state(context: impl Into<String>, on: bool) -> Self {
        Self {
            event: SET_STATE.to_string(),
            context: Some(context.into()),
            payload: Some(serde_json::json!({ "state": u8::from(on) })),
        }
    }

    #[must_use]
    pub fn show_alert(context: impl Into<String>) -> Self {
        Self {
            event: SHOW_ALERT.to_string(),
            context: Some(context.into()),
            payload: None,
        }
    }

    #[must_use]
    pub fn log_message(message: impl Into<String>) -> Self {
        Self {
            event: LOG_MESSAGE.to_string(),
            context: None,
            payload: Some(serde_json::json!({ "message": message.into() })),
        }
    }

    /// State carried by a `setState` event.
    #[must_use]
    pub fn state(&self) -> Option<u8> {
        if self.event != SET_STATE {
            return None;
        }
        self.payload
            .as_ref()
            .and_then(|p| p.get("state"))
            .and_then(Value::as_u64)
            .and_then(|s| u8::try_from(s).ok())
    }

    /// Message carried by a `logMessage` event.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        if self.event != LOG_MESSAGE {
            return None;
        }
        self.payload
            .as_ref()
            .and_then(|p| p.get("message"))
            .and_then(Value::as_str)
    }
}

/// First message on the link, identifies the plugin to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub event: String,
    pub uuid: String,
}

impl Registration {
    #[must_use]
    pub fn new(event: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            uuid: uuid.into(),
        }
    }
}

/// Application and device information passed by the host at launch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    #[serde(default)]
    pub application: ApplicationInfo,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<PluginInfo>,

    #[serde(default)]
    pub devices: Vec<DeviceInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_pixel_ratio: Option<u32>,
}

impl HostInfo {
    /// Parse the `-info` launch argument.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not a JSON object of the expected shape.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<DeviceSize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSize {
    pub columns: u32,
    pub rows: u32,
}


#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn set_state_payload_matches_power(context in "[a-zA-Z0-9]{1,40}", on in any::<bool>()) {
            let event = OutboundEvent::set_state(context.clone(), on);
            prop_assert_eq!(event.state(), Some(u8::from(on)));
            prop_assert_eq!(event.context.as_deref(), Some(context.as_str()));
        }

        #[test]
        fn settings_get_returns_stored_strings(key in "[a-z]{1,12}", value in "[ -~]{0,40}") {
            let settings = Settings::new().with(key.clone(), value.clone());
            prop_assert_eq!(settings.get(&key), value.as_str());
        }

        #[test]
        fn unknown_event_names_are_other(name in "[a-z]{1,8}Zz[a-z]{0,8}") {
            prop_assert_eq!(EventKind::parse(&name), EventKind::Other);
        }
    }
}
