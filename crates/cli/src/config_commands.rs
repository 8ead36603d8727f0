//! `patchbay config` commands.

use std::path::Path;

use {
    anyhow::Result,
    clap::Subcommand,
    patchbay_config::validate::{self, Diagnostic, Severity, ValidationResult},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors and warnings.
    Validate {
        /// Also show informational diagnostics.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the effective configuration as TOML.
    Show,
}

pub fn handle_config(action: &ConfigAction, path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Validate { verbose } => {
            let result = validate::validate_file(path);
            eprint!("{}", render(&result, *verbose, true));
            if result.has_errors() {
                std::process::exit(1);
            }
            Ok(())
        },
        ConfigAction::Show => {
            let config = match path {
                Some(p) => patchbay_config::load_config(p)?,
                None => patchbay_config::discover_and_load(),
            };
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        },
    }
}

fn paint(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "\x1b[1;31m",
        Severity::Warning => "\x1b[1;33m",
        Severity::Info => "\x1b[1;36m",
    }
}

fn line(d: &Diagnostic, color: bool) -> String {
    let label = if color {
        format!("{}{}\x1b[0m", paint(d.severity), d.severity)
    } else {
        d.severity.to_string()
    };
    if d.path.is_empty() {
        format!("  {label} {}\n", d.message)
    } else {
        format!("  {label} {}: {}\n", d.path, d.message)
    }
}

/// Render a validation result as the report printed by `config validate`.
fn render(result: &ValidationResult, verbose: bool, color: bool) -> String {
    let mut out = match result.config_path {
        Some(ref path) => format!("Checking {}\n\n", path.display()),
        None => "No config file found; checking defaults.\n\n".to_string(),
    };

    let shown: Vec<String> = result
        .diagnostics
        .iter()
        .filter(|d| verbose || d.severity != Severity::Info)
        .map(|d| line(d, color))
        .collect();
    if !shown.is_empty() {
        out.extend(shown);
        out.push('\n');
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if errors + warnings == 0 {
        out.push_str("No issues found.\n");
    } else {
        out.push_str(&format!("{errors} error(s), {warnings} warning(s)\n"));
    }
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::path::PathBuf};

    fn checked(raw: &str) -> ValidationResult {
        let path = PathBuf::from("patchbay.toml");
        let mut result = validate::validate_str(raw, &path);
        result.config_path = Some(path);
        result
    }

    #[test]
    fn errors_are_listed_with_their_path() {
        let result = checked("[handlers]\ndefault_timeout_ms = 0\n");
        let out = render(&result, false, false);
        assert!(out.starts_with("Checking patchbay.toml"));
        assert!(out.contains("  error handlers.default_timeout_ms: timeout must be greater than zero"));
        assert!(out.contains("1 error(s)"));
    }

    #[test]
    fn info_is_hidden_unless_verbose() {
        let result = ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "file-ref",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
        let quiet = render(&result, false, false);
        assert!(!quiet.contains("using defaults"));
        assert!(quiet.ends_with("No issues found.\n"));

        let loud = render(&result, true, false);
        assert!(loud.contains("  info no config file found; using defaults"));
    }

    #[test]
    fn color_wraps_the_severity_label() {
        let result = checked("[http]\ntimeout_ms = 0\n");
        let out = render(&result, false, true);
        assert!(out.contains("\x1b[1;31merror\x1b[0m http.timeout_ms"));
    }
}
