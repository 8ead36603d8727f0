use {async_trait::async_trait, patchbay_common::Message};

use crate::{context::HandlerContext, result::HandlerResult};

/// Executable logic of a handler.
///
/// Returning `Err` (or panicking) is contained by the sandbox and recorded
/// as an execution failure; the pipeline treats it as `Skip`.
#[async_trait]
pub trait HandlerBody: Send + Sync {
    async fn handle(&self, message: &Message, ctx: &HandlerContext)
    -> anyhow::Result<HandlerResult>;
}
