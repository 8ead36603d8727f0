use std::time::Duration;

use {
    patchbay_config::HandlersConfig,
    serde::{Deserialize, Serialize},
};

pub const DEFAULT_PRIORITY: i32 = 100;
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_RESERVED_PREFIX: &str = "_";

/// Static description of a handler. Immutable once registered; a reload
/// replaces the whole set rather than editing a live definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Channel-name patterns. Empty matches nothing; `["*"]` matches all.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Lower runs earlier.
    pub priority: i32,
    /// Disabled handlers are registered but never dispatched.
    pub enabled: bool,
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub skip_bots: bool,
    #[serde(default)]
    pub skip_threads: bool,
    #[serde(default, rename = "skipDMs")]
    pub skip_dms: bool,
}

impl HandlerDefinition {
    /// A definition with the built-in defaults and no channels.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_defaults(name, &DefinitionDefaults::default())
    }

    pub fn with_defaults(name: impl Into<String>, defaults: &DefinitionDefaults) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            channels: Vec::new(),
            priority: defaults.priority,
            enabled: true,
            timeout_ms: defaults.timeout_ms,
            skip_bots: false,
            skip_threads: false,
            skip_dms: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn skip_bots(mut self, skip: bool) -> Self {
        self.skip_bots = skip;
        self
    }

    pub fn skip_threads(mut self, skip: bool) -> Self {
        self.skip_threads = skip;
        self
    }

    pub fn skip_dms(mut self, skip: bool) -> Self {
        self.skip_dms = skip;
        self
    }
}

/// Values applied to fields a handler source leaves out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionDefaults {
    pub priority: i32,
    pub timeout_ms: u64,
    /// Names starting with this are documentation-only.
    pub reserved_prefix: String,
}

impl Default for DefinitionDefaults {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            reserved_prefix: DEFAULT_RESERVED_PREFIX.into(),
        }
    }
}

impl DefinitionDefaults {
    pub fn from_config(config: &HandlersConfig) -> Self {
        Self {
            priority: config.default_priority,
            timeout_ms: config.default_timeout_ms,
            reserved_prefix: config.reserved_prefix.clone(),
        }
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        !self.reserved_prefix.is_empty() && name.starts_with(&self.reserved_prefix)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_uses_builtin_defaults() {
        let def = HandlerDefinition::new("github-pr");
        assert_eq!(def.priority, 100);
        assert_eq!(def.timeout(), Duration::from_secs(5));
        assert!(def.enabled);
        assert!(def.channels.is_empty());
        assert!(!def.skip_bots && !def.skip_threads && !def.skip_dms);
    }

    #[test]
    fn defaults_follow_config() {
        let config = HandlersConfig {
            default_priority: 7,
            default_timeout_ms: 250,
            reserved_prefix: "doc-".into(),
            ..HandlersConfig::default()
        };
        let defaults = DefinitionDefaults::from_config(&config);
        let def = HandlerDefinition::with_defaults("x", &defaults);
        assert_eq!(def.priority, 7);
        assert_eq!(def.timeout_ms, 250);
        assert!(defaults.is_reserved("doc-example"));
        assert!(!defaults.is_reserved("_example"));
    }

    #[test]
    fn empty_prefix_reserves_nothing() {
        let defaults = DefinitionDefaults {
            reserved_prefix: String::new(),
            ..DefinitionDefaults::default()
        };
        assert!(!defaults.is_reserved("_example"));
    }

    #[test]
    fn serialises_with_wire_names() {
        let def = HandlerDefinition::new("h").skip_dms(true).channels(["*"]);
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["skipDMs"], true);
        assert_eq!(json["skipBots"], false);
        assert_eq!(json["timeout"], 5000);
        assert_eq!(json["channels"][0], "*");
    }
}
