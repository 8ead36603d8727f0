//! Per-message dispatch pipeline.
//!
//! Handlers run strictly one after another in priority order. Different
//! messages dispatch concurrently up to the configured limit; beyond that,
//! dispatches wait for a slot.

use std::sync::Arc;

use {
    patchbay_common::Message,
    serde::Serialize,
    tokio::{sync::Semaphore, task::JoinHandle, time::Instant},
    tracing::{debug, info},
};

use crate::{
    error::InvocationFailure,
    prefilter::{SkipReason, skip_reason},
    registry::HandlerRegistry,
    result::HandlerResult,
    sandbox::Sandbox,
};

/// Why a handler did or did not run for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", content = "reason", rename_all = "snake_case")]
pub enum Disposition {
    /// Channel patterns did not match.
    NotEligible,
    /// Matched, but a skip flag applied.
    Filtered(SkipReason),
    Invoked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerOutcome {
    pub handler: String,
    pub result: HandlerResult,
    #[serde(flatten)]
    pub disposition: Disposition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<InvocationFailure>,
    pub elapsed_ms: u64,
}

impl HandlerOutcome {
    fn gated(handler: &str, disposition: Disposition) -> Self {
        Self {
            handler: handler.to_string(),
            result: HandlerResult::Skip,
            disposition,
            failure: None,
            elapsed_ms: 0,
        }
    }
}

/// Lifecycle of one dispatch. `Pending` only exists before evaluation starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    #[default]
    Pending,
    Completed,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub outcomes: Vec<HandlerOutcome>,
    pub state: DispatchState,
    /// At least one handler returned `Handled` or `Stop`.
    pub handled: bool,
    pub stopped: bool,
}

impl DispatchReport {
    pub fn invoked(&self) -> impl Iterator<Item = &HandlerOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.disposition == Disposition::Invoked)
    }

    pub fn outcome(&self, handler: &str) -> Option<&HandlerOutcome> {
        self.outcomes.iter().find(|o| o.handler == handler)
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    sandbox: Sandbox,
    slots: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, sandbox: Sandbox, max_concurrent: usize) -> Self {
        Self {
            registry,
            sandbox,
            slots: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Run every enabled handler against `message`, waiting for a free slot
    /// first when the concurrency limit is reached.
    pub async fn dispatch(&self, message: Message) -> DispatchReport {
        // The semaphore is never closed.
        let _permit = self.slots.acquire().await.ok();
        self.run(Arc::new(message)).await
    }

    /// Dispatch on a separate task.
    pub fn spawn(&self, message: Message) -> JoinHandle<DispatchReport> {
        let this = self.clone();
        tokio::spawn(async move { this.dispatch(message).await })
    }

    async fn run(&self, message: Arc<Message>) -> DispatchReport {
        let handlers = self.registry.snapshot();
        let mut report = DispatchReport::default();

        for handler in handlers.enabled() {
            let name = handler.definition.name.as_str();

            if !handler.matcher.matches(&message.channel_name) {
                debug!(handler = name, channel = %message.channel_name, "channel not matched");
                report
                    .outcomes
                    .push(HandlerOutcome::gated(name, Disposition::NotEligible));
                continue;
            }

            if let Some(reason) = skip_reason(&handler.definition, &message) {
                debug!(handler = name, reason = %reason, "handler filtered");
                report
                    .outcomes
                    .push(HandlerOutcome::gated(name, Disposition::Filtered(reason)));
                continue;
            }

            let started = Instant::now();
            let invocation = self
                .sandbox
                .invoke(
                    &handler.definition,
                    Arc::clone(&handler.body),
                    Arc::clone(&message),
                )
                .await;
            handler.stats.record(&invocation);

            let result = invocation.result;
            report.handled |= result.is_handled();
            report.outcomes.push(HandlerOutcome {
                handler: name.to_string(),
                result,
                disposition: Disposition::Invoked,
                failure: invocation.failure,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });

            if result.halts() {
                info!(handler = name, channel = %message.channel_name, ts = %message.timestamp, "dispatch stopped");
                report.stopped = true;
                report.state = DispatchState::Stopped;
                return report;
            }
        }

        report.state = DispatchState::Completed;
        if !report.handled {
            debug!(channel = %message.channel_name, ts = %message.timestamp, "no handler acted on message");
        }
        report
    }
}
