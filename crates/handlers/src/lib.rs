//! Chat handler engine: discovery, registry, sandboxed invocation, and the
//! per-message dispatch pipeline.
//!
//! Handlers are loaded from `*.toml` / `*.md` sources in the handlers
//! directory (run as subprocesses) or registered natively as
//! [`HandlerBody`] implementations. Each inbound [`patchbay_common::Message`]
//! is offered to every enabled handler in priority order until one returns
//! [`HandlerResult::Stop`].

pub mod body;
pub mod collaborators;
pub mod console;
pub mod context;
pub mod definition;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod matcher;
pub mod prefilter;
pub mod process;
pub mod recorder;
pub mod registry;
pub mod result;
pub mod sandbox;
pub mod source;
pub mod state;

pub use {
    body::HandlerBody,
    context::{HandlerContext, Services},
    definition::{DefinitionDefaults, HandlerDefinition},
    discovery::{FsHandlerDiscoverer, HandlerDiscoverer},
    dispatch::{DispatchReport, DispatchState, Dispatcher, Disposition, HandlerOutcome},
    error::{Error, LoadError, LoadErrorKind, Result},
    registry::{HandlerRegistry, LoadReport},
    result::HandlerResult,
    sandbox::Sandbox,
    state::{Namespace, StateBridge},
};
