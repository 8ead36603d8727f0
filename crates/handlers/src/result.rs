//! The tri-state handler outcome and normalisation of loose return shapes.

use std::fmt;

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// What a handler did with a message.
///
/// `Skip` and `Handled` let the pipeline continue; `Stop` halts it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerResult {
    #[default]
    Skip,
    Handled,
    Stop,
}

impl HandlerResult {
    pub fn is_handled(self) -> bool {
        !matches!(self, Self::Skip)
    }

    pub fn halts(self) -> bool {
        matches!(self, Self::Stop)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Handled => "handled",
            Self::Stop => "stop",
        }
    }

    /// Map any value a handler may hand back onto the three variants.
    ///
    /// Accepts the sentinel names (`"skip"`, `"handled"`, `"stop"`, any case),
    /// booleans, `null`, and the legacy object shape
    /// `{ "handled": bool, "stopPropagation": bool }`. Anything else is `Skip`.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "handled" => Self::Handled,
                "stop" => Self::Stop,
                _ => Self::Skip,
            },
            Value::Bool(true) => Self::Handled,
            Value::Object(map) => {
                let flag = |key: &str| map.get(key).and_then(Value::as_bool).unwrap_or(false);
                if flag("stopPropagation") || flag("stop_propagation") {
                    Self::Stop
                } else if flag("handled") {
                    Self::Handled
                } else {
                    Self::Skip
                }
            },
            _ => Self::Skip,
        }
    }
}

impl fmt::Display for HandlerResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
