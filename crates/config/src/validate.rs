//! Configuration validation.
//!
//! Checks a config file for syntax errors, unknown keys, and values that
//! would make the dispatch engine misbehave (zero timeouts, inverted limits).

use std::path::{Path, PathBuf};

use crate::{loader::parse_config, schema::PatchbayConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "value", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "handlers.default_timeout_ms"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Known keys per top-level section.
const KNOWN_SECTIONS: &[(&str, &[&str])] = &[
    ("handlers", &[
        "dir",
        "default_timeout_ms",
        "default_priority",
        "reserved_prefix",
        "max_concurrent_dispatches",
    ]),
    ("state", &[
        "store_path",
        "max_bytes_per_handler",
        "max_total_bytes",
    ]),
    ("http", &[
        "allowed_hosts",
        "blocked_hosts",
        "user_agent",
        "max_body_bytes",
        "timeout_ms",
        "max_redirects",
        "allow_private_networks",
    ]),
];

/// Validate the config at `path`, or the discovered config when `None`.
pub fn validate_file(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "file-ref",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let mut result = match std::fs::read_to_string(&actual_path) {
        Ok(raw) => validate_str(&crate::env_subst::substitute_env(&raw), &actual_path),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "file-ref",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate raw config text; `path` decides the format by extension.
pub fn validate_str(raw: &str, path: &Path) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let config = match parse_config(raw, path) {
        Ok(cfg) => cfg,
        Err(e) => {
            diagnostics.push(Diagnostic::new(Severity::Error, "syntax", "", e.to_string()));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    if path.extension().and_then(|e| e.to_str()).unwrap_or("toml") == "toml"
        && let Ok(value) = toml::from_str::<toml::Value>(raw)
    {
        check_unknown_fields(&value, &mut diagnostics);
    }

    diagnostics.extend(validate(&config).diagnostics);
    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Semantic checks on an already-parsed config.
pub fn validate(config: &PatchbayConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();
    let handlers = &config.handlers;

    if handlers.default_timeout_ms == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "value",
            "handlers.default_timeout_ms",
            "timeout must be greater than zero",
        ));
    }
    if handlers.max_concurrent_dispatches == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "value",
            "handlers.max_concurrent_dispatches",
            "at least one concurrent dispatch is required",
        ));
    }
    if handlers.reserved_prefix.is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "value",
            "handlers.reserved_prefix",
            "empty prefix: documentation-only handler files will be loaded",
        ));
    }
    if !handlers.dir.is_dir() {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "file-ref",
            "handlers.dir",
            format!("handlers directory {} does not exist", handlers.dir.display()),
        ));
    }

    let state = &config.state;
    if state.max_bytes_per_handler > state.max_total_bytes {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "value",
            "state.max_bytes_per_handler",
            "per-handler limit exceeds the total limit",
        ));
    }

    let http = &config.http;
    for host in &http.allowed_hosts {
        if http
            .blocked_hosts
            .iter()
            .any(|blocked| blocked.eq_ignore_ascii_case(host))
        {
            diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "value",
                "http.allowed_hosts",
                format!("host '{host}' is both allowed and blocked; blocked wins"),
            ));
        }
    }
    if http.allow_private_networks {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "value",
            "http.allow_private_networks",
            "handlers may reach loopback and private-network addresses",
        ));
    }
    if http.timeout_ms == Some(0) {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "value",
            "http.timeout_ms",
            "timeout must be greater than zero",
        ));
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(value: &toml::Value, diagnostics: &mut Vec<Diagnostic>) {
    let Some(root) = value.as_table() else {
        return;
    };
    for (section, body) in root {
        let Some((_, known)) = KNOWN_SECTIONS.iter().find(|(name, _)| *name == section.as_str()) else {
            diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "unknown-field",
                section.clone(),
                format!("unknown section '{section}'"),
            ));
            continue;
        };
        let Some(table) = body.as_table() else {
            continue;
        };
        for key in table.keys() {
            if !known.contains(&key.as_str()) {
                diagnostics.push(Diagnostic::new(
                    Severity::Warning,
                    "unknown-field",
                    format!("{section}.{key}"),
                    format!("unknown field '{key}'"),
                ));
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn toml_path() -> &'static Path {
        Path::new("patchbay.toml")
    }

    #[test]
    fn syntax_error_is_reported() {
        let result = validate_str("[handlers\n", toml_path());
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[test]
    fn unknown_fields_warn() {
        let result = validate_str(
            "[handlers]\ntimeout = 3\n[metrics]\nenabled = true\n",
            toml_path(),
        );
        let paths: Vec<_> = result
            .diagnostics
            .iter()
            .filter(|d| d.category == "unknown-field")
            .map(|d| d.path.as_str())
            .collect();
        assert!(paths.contains(&"handlers.timeout"));
        assert!(paths.contains(&"metrics"));
    }

    #[test]
    fn zero_timeout_is_error() {
        let mut cfg = PatchbayConfig::default();
        cfg.handlers.default_timeout_ms = 0;
        let result = validate(&cfg);
        assert!(result.has_errors());
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "handlers.default_timeout_ms")
        );
    }

    #[test]
    fn host_both_allowed_and_blocked_warns() {
        let mut cfg = PatchbayConfig::default();
        cfg.http.allowed_hosts = vec!["LOCALHOST".into()];
        let result = validate(&cfg);
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "http.allowed_hosts" && d.severity == Severity::Warning)
        );
    }

    #[test]
    fn private_networks_opt_in_warns() {
        let mut cfg = PatchbayConfig::default();
        assert!(
            !validate(&cfg)
                .diagnostics
                .iter()
                .any(|d| d.path == "http.allow_private_networks")
        );
        cfg.http.allow_private_networks = true;
        assert!(
            validate(&cfg)
                .diagnostics
                .iter()
                .any(|d| d.path == "http.allow_private_networks" && d.severity == Severity::Warning)
        );
    }

    #[test]
    fn inverted_state_limits_warn() {
        let mut cfg = PatchbayConfig::default();
        cfg.state.max_bytes_per_handler = 10;
        cfg.state.max_total_bytes = 5;
        assert!(validate(&cfg).count(Severity::Warning) >= 1);
    }

    #[test]
    fn missing_file_reports_error() {
        let result = validate_file(Some(Path::new("/nonexistent/patchbay.toml")));
        assert!(result.has_errors());
        assert!(result.config_path.is_some());
    }
}
