//! Time-bounded, failure-contained handler invocation.
//!
//! The body runs on its own task. A returned error, a panic, or a missed
//! deadline all come back as `Skip` plus an [`InvocationFailure`]; nothing
//! escapes to the caller.

use std::{
    any::Any,
    sync::Arc,
    time::Duration,
};

use {
    patchbay_common::Message,
    tokio::time::Instant,
    tracing::{debug, warn},
};

use crate::{
    body::HandlerBody,
    context::{HandlerContext, Services},
    definition::HandlerDefinition,
    error::InvocationFailure,
    result::HandlerResult,
};

/// Outcome of one invocation. Produced exactly once per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub result: HandlerResult,
    pub failure: Option<InvocationFailure>,
    pub elapsed: Duration,
}

impl Invocation {
    fn failed(failure: InvocationFailure, elapsed: Duration) -> Self {
        Self {
            result: HandlerResult::Skip,
            failure: Some(failure),
            elapsed,
        }
    }
}

#[derive(Clone)]
pub struct Sandbox {
    services: Services,
}

impl Sandbox {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub async fn invoke(
        &self,
        definition: &HandlerDefinition,
        body: Arc<dyn HandlerBody>,
        message: Arc<Message>,
    ) -> Invocation {
        let name = definition.name.clone();
        let timeout = definition.timeout();
        let ctx = HandlerContext::new(&name, Arc::clone(&message), &self.services);

        let start = Instant::now();
        let mut task = tokio::spawn(async move { body.handle(&message, &ctx).await });

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Ok(result))) => {
                let elapsed = start.elapsed();
                debug!(handler = %name, %result, elapsed_ms = elapsed.as_millis() as u64, "handler finished");
                Invocation {
                    result,
                    failure: None,
                    elapsed,
                }
            },
            Ok(Ok(Err(e))) => {
                let elapsed = start.elapsed();
                let detail = format!("{e:#}");
                warn!(handler = %name, error = %detail, elapsed_ms = elapsed.as_millis() as u64, "handler failed");
                Invocation::failed(
                    InvocationFailure::Execution {
                        handler: name,
                        detail,
                    },
                    elapsed,
                )
            },
            Ok(Err(join_err)) => {
                let elapsed = start.elapsed();
                let detail = if join_err.is_panic() {
                    format!("panicked: {}", panic_message(join_err.into_panic()))
                } else {
                    "handler task was cancelled".to_string()
                };
                warn!(handler = %name, error = %detail, elapsed_ms = elapsed.as_millis() as u64, "handler failed");
                Invocation::failed(
                    InvocationFailure::Execution {
                        handler: name,
                        detail,
                    },
                    elapsed,
                )
            },
            Err(_) => {
                task.abort();
                let elapsed = start.elapsed();
                let elapsed_ms = elapsed.as_millis() as u64;
                warn!(handler = %name, elapsed_ms, "handler timed out");
                Invocation::failed(
                    InvocationFailure::Timeout {
                        handler: name,
                        elapsed_ms,
                    },
                    elapsed,
                )
            },
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
