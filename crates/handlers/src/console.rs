//! Handler console output, routed to `tracing` with the handler's name.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use {
    serde::{Deserialize, Serialize},
    tracing::{debug, error, info, warn},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleLine {
    pub handler: String,
    pub level: ConsoleLevel,
    pub text: String,
}

/// Keeps console lines in memory, for simulation and tests.
#[derive(Debug, Clone, Default)]
pub struct ConsoleCapture {
    lines: Arc<Mutex<Vec<ConsoleLine>>>,
}

impl ConsoleCapture {
    pub fn lines(&self) -> Vec<ConsoleLine> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    fn push(&self, line: ConsoleLine) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }
}

/// Leveled logger handed to one handler invocation.
#[derive(Debug, Clone)]
pub struct Console {
    handler: Arc<str>,
    capture: Option<ConsoleCapture>,
}

impl Console {
    pub(crate) fn new(handler: Arc<str>, capture: Option<ConsoleCapture>) -> Self {
        Self { handler, capture }
    }

    pub fn log(&self, message: impl fmt::Display) {
        self.write(ConsoleLevel::Log, message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.write(ConsoleLevel::Info, message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.write(ConsoleLevel::Warn, message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.write(ConsoleLevel::Error, message);
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.write(ConsoleLevel::Debug, message);
    }

    pub fn write(&self, level: ConsoleLevel, message: impl fmt::Display) {
        let text = message.to_string();
        let handler = &*self.handler;
        match level {
            ConsoleLevel::Log | ConsoleLevel::Info => info!(handler, "{text}"),
            ConsoleLevel::Warn => warn!(handler, "{text}"),
            ConsoleLevel::Error => error!(handler, "{text}"),
            ConsoleLevel::Debug => debug!(handler, "{text}"),
        }
        if let Some(capture) = &self.capture {
            capture.push(ConsoleLine {
                handler: handler.to_string(),
                level,
                text,
            });
        }
    }
}
