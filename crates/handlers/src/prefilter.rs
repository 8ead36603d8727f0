//! Declarative skip rules checked before a handler is invoked.

use {patchbay_common::Message, serde::Serialize};

use crate::definition::HandlerDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Bot,
    Thread,
    DirectMessage,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Bot => "bot",
            Self::Thread => "thread",
            Self::DirectMessage => "direct_message",
        })
    }
}

/// First skip rule that applies, checked as bots, then threads, then DMs.
pub fn skip_reason(definition: &HandlerDefinition, message: &Message) -> Option<SkipReason> {
    if definition.skip_bots && message.is_bot {
        Some(SkipReason::Bot)
    } else if definition.skip_threads && message.is_thread {
        Some(SkipReason::Thread)
    } else if definition.skip_dms && message.is_dm {
        Some(SkipReason::DirectMessage)
    } else {
        None
    }
}

pub fn should_skip(definition: &HandlerDefinition, message: &Message) -> bool {
    skip_reason(definition, message).is_some()
}
