//! CLI commands for handler discovery and validation.

use std::sync::Arc;

use {
    anyhow::Result,
    clap::Subcommand,
    patchbay_config::PatchbayConfig,
    patchbay_handlers::{
        DefinitionDefaults, FsHandlerDiscoverer, HandlerRegistry, LoadReport,
        registry::HandlerKind,
    },
    tracing::error,
};

#[derive(Subcommand)]
pub enum HandlersAction {
    /// List every loaded handler in dispatch order.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Load all handler sources and report every error.
    Check,
}

/// Build a registry over the configured handlers directory and load it.
pub async fn load_registry(config: &PatchbayConfig) -> Result<(HandlerRegistry, LoadReport)> {
    let defaults = DefinitionDefaults::from_config(&config.handlers);
    let registry = HandlerRegistry::new(defaults)
        .with_discoverer(Arc::new(FsHandlerDiscoverer::from_config(&config.handlers)));
    let report = registry.reload().await?;
    Ok((registry, report))
}

pub async fn handle_handlers(action: &HandlersAction, config: &PatchbayConfig) -> Result<()> {
    let (registry, report) = load_registry(config).await?;
    let handlers = registry.snapshot();

    match action {
        HandlersAction::List { json } => {
            if *json {
                let entries: Vec<_> = handlers
                    .iter()
                    .map(|h| {
                        serde_json::json!({
                            "definition": h.definition,
                            "origin": h.origin,
                            "source": h.kind,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }

            if handlers.is_empty() {
                println!("No handlers found.");
                println!(
                    "Place *.toml or *.md handler sources in {}",
                    config.handlers.dir.display()
                );
                return Ok(());
            }

            for h in handlers.iter() {
                let def = &h.definition;
                let status = if def.enabled {
                    "✓"
                } else {
                    "✗"
                };
                let source = match h.kind {
                    HandlerKind::Native => "native".to_string(),
                    HandlerKind::Source(dialect) => format!("{dialect:?}").to_lowercase(),
                };
                println!(
                    "  {status} {priority:>4} {name} [{channels}] ({origin}, {source})",
                    priority = def.priority,
                    name = def.name,
                    channels = def.channels.join(", "),
                    origin = h.origin,
                );
                if !def.description.is_empty() {
                    println!("         {}", def.description);
                }
            }
            if !report.errors.is_empty() {
                eprintln!(
                    "\n{} source(s) failed to load; run `patchbay handlers check`",
                    report.errors.len()
                );
            }
        },
        HandlersAction::Check => {
            println!(
                "{} loaded, {} failed, {} skipped",
                report.handlers.len(),
                report.errors.len(),
                report.skipped.len()
            );
            for err in &report.errors {
                println!("  ✗ {}: {}", err.origin, err.kind);
            }
            if let Err(e) = report.ensure_usable() {
                error!(error = %e, "handler registry is unusable");
                std::process::exit(1);
            }
            if !report.errors.is_empty() {
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
