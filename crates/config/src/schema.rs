/// Config schema types (handlers, state, outbound http).
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchbayConfig {
    pub handlers: HandlersConfig,
    pub state: StateConfig,
    pub http: HttpConfig,
}

/// Handler discovery and execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlersConfig {
    /// Directory scanned for handler sources.
    pub dir: PathBuf,
    /// Timeout applied when a handler does not declare one.
    pub default_timeout_ms: u64,
    /// Priority applied when a handler does not declare one. Lower runs first.
    pub default_priority: i32,
    /// Sources whose file name or declared name starts with this are
    /// documentation-only and never registered.
    pub reserved_prefix: String,
    /// Upper bound on messages dispatched at the same time. Excess dispatches
    /// wait for a free slot.
    pub max_concurrent_dispatches: usize,
}

impl Default for HandlersConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("handlers"),
            default_timeout_ms: 5_000,
            default_priority: 100,
            reserved_prefix: "_".into(),
            max_concurrent_dispatches: 16,
        }
    }
}

/// Handler state storage limits and location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// SQLite file backing the durable `store` namespace.
    /// Defaults to `<data_dir>/state.db`.
    pub store_path: Option<PathBuf>,
    pub max_bytes_per_handler: usize,
    pub max_total_bytes: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            max_bytes_per_handler: 5 * 1024 * 1024,
            max_total_bytes: 50 * 1024 * 1024,
        }
    }
}

impl StateConfig {
    pub fn resolved_store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| crate::loader::data_dir().join("state.db"))
    }
}

/// Outbound HTTP policy for handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Hosts handlers may call. Empty allows every host not blocked.
    pub allowed_hosts: Vec<String>,
    /// Hosts handlers may never call. Checked before `allowed_hosts`.
    pub blocked_hosts: Vec<String>,
    pub user_agent: String,
    /// Response bodies are truncated to this many bytes.
    pub max_body_bytes: usize,
    /// Per-request timeout; falls back to `handlers.default_timeout_ms`.
    pub timeout_ms: Option<u64>,
    pub max_redirects: usize,
    /// Permit loopback, private, and link-local destinations. Off by default;
    /// every hop is checked against the resolved addresses.
    pub allow_private_networks: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            blocked_hosts: vec![
                "localhost".into(),
                "127.0.0.1".into(),
                "::1".into(),
                "0.0.0.0".into(),
            ],
            user_agent: concat!("patchbay-handler/", env!("CARGO_PKG_VERSION")).into(),
            max_body_bytes: 10 * 1024 * 1024,
            timeout_ms: None,
            max_redirects: 10,
            allow_private_networks: false,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: PatchbayConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.handlers.default_timeout_ms, 5_000);
        assert_eq!(cfg.handlers.default_priority, 100);
        assert_eq!(cfg.handlers.reserved_prefix, "_");
        assert_eq!(cfg.http.blocked_hosts.len(), 4);
        assert!(cfg.http.allowed_hosts.is_empty());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg: PatchbayConfig = toml::from_str(
            r#"
[handlers]
dir = "/srv/handlers"
max_concurrent_dispatches = 4

[state]
store_path = "/var/lib/patchbay/state.db"
"#,
        )
        .unwrap();
        assert_eq!(cfg.handlers.dir, PathBuf::from("/srv/handlers"));
        assert_eq!(cfg.handlers.max_concurrent_dispatches, 4);
        assert_eq!(cfg.handlers.default_timeout_ms, 5_000);
        assert_eq!(
            cfg.state.resolved_store_path(),
            PathBuf::from("/var/lib/patchbay/state.db")
        );
        assert_eq!(cfg.state.max_bytes_per_handler, 5 * 1024 * 1024);
    }
}
