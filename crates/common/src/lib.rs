//! Shared types and error definitions used across all patchbay crates.

pub mod error;
pub mod message;

pub use {
    error::{Error, FromMessage, PatchbayError, Result},
    message::{ChannelType, Message},
};
