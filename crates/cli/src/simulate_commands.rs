//! Dry-run one message through the dispatch pipeline.
//!
//! Messaging and AI calls go to recording collaborators and are printed
//! instead of performed. HTTP is recorded too unless `--live-http` is set.

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Context, Result},
    clap::Args,
    patchbay_common::{ChannelType, Message},
    patchbay_config::PatchbayConfig,
    patchbay_handlers::{
        DispatchReport, Dispatcher, Disposition, Sandbox, StateBridge, console::ConsoleCapture,
        http::ReqwestFetcher, recorder::Recorder, state::StateLimits,
    },
};

use crate::handlers_commands::load_registry;

#[derive(Args)]
pub struct SimulateArgs {
    /// Message text.
    #[arg(long, conflicts_with = "message_file")]
    text: Option<String>,
    /// Read the full message event as JSON from this file.
    #[arg(long)]
    message_file: Option<PathBuf>,
    /// Channel name used for matching.
    #[arg(long, default_value = "general")]
    channel_name: String,
    #[arg(long, default_value = "C0000000000")]
    channel: String,
    #[arg(long, default_value = "U0000000000")]
    user: String,
    #[arg(long, default_value = "1700000000.000100")]
    timestamp: String,
    /// Treat the message as a reply in this thread.
    #[arg(long)]
    thread_ts: Option<String>,
    /// Mark the message as sent by this bot id.
    #[arg(long)]
    bot_id: Option<String>,
    /// Treat the message as a direct message.
    #[arg(long)]
    dm: bool,
    /// Answer every AI prompt with this text. Without it AI is unconfigured.
    #[arg(long)]
    ai_reply: Option<String>,
    /// Perform HTTP requests for real, subject to the configured host policy.
    #[arg(long)]
    live_http: bool,
    /// Use the durable state store instead of a throwaway in-memory one.
    #[arg(long)]
    durable_state: bool,
    /// Output the report as JSON.
    #[arg(long)]
    json: bool,
}

impl SimulateArgs {
    fn message(&self) -> Result<Message> {
        if let Some(ref path) = self.message_file {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let message: Message = serde_json::from_str(&raw)
                .with_context(|| format!("invalid message JSON in {}", path.display()))?;
            return Ok(message.with_derived_flags());
        }

        let mut message = Message::new(
            &self.channel,
            &self.channel_name,
            &self.user,
            self.text.clone().unwrap_or_default(),
            &self.timestamp,
        );
        if let Some(ref ts) = self.thread_ts {
            message = message.in_thread(ts);
        }
        if let Some(ref bot) = self.bot_id {
            message = message.from_bot(bot);
        }
        if self.dm {
            message = message.with_channel_type(ChannelType::Im);
        }
        Ok(message)
    }
}

pub async fn handle_simulate(args: &SimulateArgs, config: &PatchbayConfig) -> Result<DispatchReport> {
    let message = args.message()?;
    let (registry, load) = load_registry(config).await?;
    load.ensure_usable()?;

    let state = if args.durable_state {
        StateBridge::open(&config.state).await?
    } else {
        StateBridge::in_memory(StateLimits::from_config(&config.state))
    };

    let recorder = match args.ai_reply {
        Some(ref reply) => Recorder::new().with_ai_reply(reply),
        None => Recorder::new(),
    };
    let console = ConsoleCapture::default();
    let mut services = recorder
        .services(Arc::new(state))
        .with_console_capture(console.clone());
    if args.live_http {
        services.http = Arc::new(ReqwestFetcher::from_config(
            &config.http,
            config.handlers.default_timeout_ms,
        )?);
    }

    let dispatcher = Dispatcher::new(
        Arc::new(registry),
        Sandbox::new(services),
        config.handlers.max_concurrent_dispatches,
    );
    let report = dispatcher.dispatch(message).await;

    if args.json {
        let out = serde_json::json!({
            "report": report,
            "calls": recorder.log.calls(),
            "console": console.lines(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(report);
    }

    for outcome in &report.outcomes {
        let detail = match outcome.disposition {
            Disposition::NotEligible => "channel not matched".to_string(),
            Disposition::Filtered(reason) => format!("filtered ({reason})"),
            Disposition::Invoked => format!("{} in {}ms", outcome.result, outcome.elapsed_ms),
        };
        println!("  {:<24} {detail}", outcome.handler);
        if let Some(ref failure) = outcome.failure {
            println!("  {:<24} ↳ {failure}", "");
        }
    }
    let calls = recorder.log.calls();
    if !calls.is_empty() {
        println!("\nCalls:");
        for call in &calls {
            let status = if call.error.is_some() {
                "✗"
            } else {
                "✓"
            };
            println!("  {status} {}.{} {}", call.service, call.method, call.args);
        }
    }
    let lines = console.lines();
    if !lines.is_empty() {
        println!("\nConsole:");
        for line in &lines {
            println!("  [{}] {:?}: {}", line.handler, line.level, line.text);
        }
    }
    println!(
        "\n{:?}: handled={} stopped={}",
        report.state, report.handled, report.stopped
    );

    Ok(report)
}
