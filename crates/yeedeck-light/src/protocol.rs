//! Bulb protocol messages.
//!
//! Every message is one JSON object on its own line. Commands carry an `id`
//! echoed back by the matching reply; notifications have no `id` and report
//! property changes the bulb makes on its own (physical switch, another app).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LightError;

/// TCP port bulbs listen on when LAN control is enabled
pub const DEFAULT_PORT: u16 = 55443;

/// Transition length used for absolute setters, in milliseconds
pub const SMOOTH_DURATION_MS: u64 = 500;

pub const SET_POWER: &str = "set_power";
pub const SET_RGB: &str = "set_rgb";
pub const SET_BRIGHT: &str = "set_bright";
pub const SET_CT_ABX: &str = "set_ct_abx";
pub const ADJUST_BRIGHT: &str = "adjust_bright";
pub const ADJUST_CT: &str = "adjust_ct";
pub const GET_PROP: &str = "get_prop";

/// Notification method for property changes
pub const PROPS: &str = "props";

/// Command sent to the bulb
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl Command {
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

/// Reply to a [`Command`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl Reply {
    #[must_use]
    pub fn success(id: u64, result: Vec<Value>) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn failure(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(ReplyError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Turn the reply into the result values or the bulb's error.
    ///
    /// # Errors
    ///
    /// Returns `LightError::Device` when the bulb rejected the command and
    /// `LightError::UnexpectedReply` when the reply carries neither field.
    pub fn into_result(self) -> Result<Vec<Value>, LightError> {
        match (self.result, self.error) {
            (_, Some(err)) => Err(LightError::Device {
                code: err.code,
                message: err.message,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(LightError::UnexpectedReply(format!(
                "reply {} has neither result nor error",
                self.id
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyError {
    pub code: i64,
    pub message: String,
}

/// Message pushed by the bulb without a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Notification {
    #[must_use]
    pub fn props(params: Map<String, Value>) -> Self {
        Self {
            method: PROPS.to_string(),
            params,
        }
    }

    #[must_use]
    pub fn is_props(&self) -> bool {
        self.method == PROPS
    }

    /// Property value rendered as text; bulbs mix strings and numbers.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<String> {
        match self.params.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Anything the bulb can send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Reply(Reply),
    Notification(Notification),
}

/// Parameters shared by `set_power`, `set_rgb`, `set_bright` and `set_ct_abx`
pub(crate) fn smooth(mut params: Vec<Value>) -> Vec<Value> {
    params.push(Value::from("smooth"));
    params.push(Value::from(SMOOTH_DURATION_MS));
    params
}

/// Pack an RGB triple the way `set_rgb` expects it.
#[must_use]
pub fn rgb_value(r: u8, g: u8, b: u8) -> u32 {
    (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}
