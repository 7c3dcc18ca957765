use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;
use crate::error::Error;

/// A control-surface request, tagged by its `operation` field.
///
/// ```json
/// { "operation": "get-value", "key": "depth", "default": 18 }
/// { "operation": "send-command", "command": "go movetime 1000" }
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "operation", rename_all = "kebab-case")]
pub enum Request {
    GetValue {
        key: String,
        #[serde(default, alias = "defaultValue")]
        default: Option<Value>,
    },
    SetValue {
        key: String,
        #[serde(default)]
        value: Value,
    },
    DeleteValue {
        key: String,
    },
    ListKeys,
    OpenUrl {
        url: String,
        /// Open without focusing
        #[serde(default)]
        background: bool,
    },
    Notify {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },
    Subscribe,
    Unsubscribe,
    SendCommand {
        command: String,
    },
    SetEndpoint {
        url: String,
    },
    Connect {
        #[serde(default)]
        url: Option<String>,
    },
    Disconnect,
    Status,
    #[serde(other)]
    Unrecognized,
}

impl Request {
    /// Decode a request from its JSON form.
    ///
    /// Unknown operations fail with [`Kind::Operation`](crate::error::Kind::Operation),
    /// malformed requests with [`Kind::Validation`](crate::error::Kind::Validation).
    pub fn from_value(value: Value) -> Result<Self> {
        let operation = value
            .get("operation")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);

        match serde_json::from_value(value) {
            Ok(Self::Unrecognized) => Err(Error::unrecognized_operation(
                operation.unwrap_or_default(),
            )),
            Ok(request) => Ok(request),
            Err(e) => Err(Error::validation(format!("invalid request: {e}"))),
        }
    }

    /// Wire name of the operation.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::GetValue { .. } => "get-value",
            Self::SetValue { .. } => "set-value",
            Self::DeleteValue { .. } => "delete-value",
            Self::ListKeys => "list-keys",
            Self::OpenUrl { .. } => "open-url",
            Self::Notify { .. } => "notify",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::SendCommand { .. } => "send-command",
            Self::SetEndpoint { .. } => "set-endpoint",
            Self::Connect { .. } => "connect",
            Self::Disconnect => "disconnect",
            Self::Status => "status",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// Answer to a [`Request`]: `{ok, value?, error?}`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            ok: true,
            value: None,
            error: None,
        }
    }

    #[must_use]
    pub const fn with_value(value: Value) -> Self {
        Self {
            ok: true,
            value: Some(value),
            error: None,
        }
    }

    /// `ok` is `false` but there is nothing to explain, e.g. a command sent while disconnected.
    #[must_use]
    pub const fn rejected() -> Self {
        Self {
            ok: false,
            value: None,
            error: None,
        }
    }

    #[must_use]
    pub const fn from_bool(ok: bool) -> Self {
        if ok { Self::ok() } else { Self::rejected() }
    }

    #[must_use]
    pub fn failed(error: &Error) -> Self {
        // The kind is for logs; consumers see the underlying reason
        let message = error
            .inner()
            .map_or_else(|| error.to_string(), ToString::to_string);
        Self {
            ok: false,
            value: None,
            error: Some(message),
        }
    }
}
