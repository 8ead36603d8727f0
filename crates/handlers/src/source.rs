//! Handler source parsing.
//!
//! A source is a `.toml` document or a `.md` file with `+++` TOML frontmatter.
//! Two layouts are accepted and normalised to the same [`HandlerDefinition`]:
//!
//! ```text
//! # object dialect                  # flat dialect
//! [handler]                         name = "github-pr"
//! name = "github-pr"                channels = ["*"]
//! channels = ["*"]                  skip_bots = true
//! skipBots = true                   handle = "./github-pr.sh"
//! handle = "./github-pr.sh"
//! ```
//!
//! `handle` is either a shell command string or a table
//! `{ command = "...", env = { KEY = "value" } }`.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use {
    serde::{Deserialize, Serialize},
    toml::Value,
};

use crate::{
    definition::{DefinitionDefaults, HandlerDefinition},
    error::LoadErrorKind,
    matcher::ChannelMatcher,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Toml,
    Markdown,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Some(Self::Toml),
            Some("md") => Some(Self::Markdown),
            _ => None,
        }
    }
}

/// Raw text of one handler source plus where it came from.
#[derive(Debug, Clone)]
pub struct HandlerSource {
    /// File name, used for error reports and as the default handler name.
    pub origin: String,
    /// Working directory for the handler command.
    pub dir: Option<PathBuf>,
    pub format: SourceFormat,
    pub text: String,
}

impl HandlerSource {
    pub fn toml(origin: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            dir: None,
            format: SourceFormat::Toml,
            text: text.into(),
        }
    }

    pub fn markdown(origin: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            dir: None,
            format: SourceFormat::Markdown,
            text: text.into(),
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    fn stem(&self) -> &str {
        Path::new(&self.origin)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.origin)
    }
}

/// Which layout a source used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Object,
    Flat,
}

/// The command a file-backed handler runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: String,
    pub env: HashMap<String, String>,
}

/// A source normalised into a definition plus its body.
#[derive(Debug, Clone)]
pub struct ParsedSource {
    pub definition: HandlerDefinition,
    pub matcher: ChannelMatcher,
    pub dialect: Dialect,
    pub command: CommandSpec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHandler {
    name: Option<String>,
    description: Option<String>,
    channels: Option<Value>,
    priority: Option<i64>,
    enabled: Option<bool>,
    timeout: Option<i64>,
    #[serde(default, alias = "skip_bots")]
    skip_bots: bool,
    #[serde(default, alias = "skip_threads")]
    skip_threads: bool,
    #[serde(default, rename = "skipDMs", alias = "skip_dms", alias = "skipDms")]
    skip_dms: bool,
    handle: Option<Value>,
}

/// Parse and validate one source.
///
/// Returns `Ok(None)` for documentation-only sources (reserved name prefix).
pub fn parse_source(
    source: &HandlerSource,
    defaults: &DefinitionDefaults,
) -> Result<Option<ParsedSource>, LoadErrorKind> {
    let (document, body) = match source.format {
        SourceFormat::Toml => (source.text.as_str(), None),
        SourceFormat::Markdown => {
            let (front, body) = split_frontmatter(&source.text)?;
            (front, Some(body))
        },
    };

    let table: toml::Table = toml::from_str(document).map_err(|e| LoadErrorKind::Parse {
        reason: e.to_string(),
    })?;
    let (dialect, table) = detect_dialect(table)?;
    let raw: RawHandler = Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| LoadErrorKind::Parse {
            reason: e.to_string(),
        })?;

    let RawHandler {
        name,
        description,
        channels,
        priority,
        enabled,
        timeout,
        skip_bots,
        skip_threads,
        skip_dms,
        handle,
    } = raw;

    let name = name.unwrap_or_else(|| source.stem().to_string());
    if defaults.is_reserved(&name) {
        return Ok(None);
    }

    let description = description
        .filter(|d| !d.trim().is_empty())
        .or_else(|| body.map(first_paragraph))
        .unwrap_or_default();

    let priority = match priority {
        None => defaults.priority,
        Some(p) => i32::try_from(p).map_err(|_| LoadErrorKind::InvalidField {
            field: "priority".into(),
            reason: format!("{p} is out of range"),
        })?,
    };
    let timeout_ms = match timeout {
        None => defaults.timeout_ms,
        Some(t) if t > 0 => t.unsigned_abs(),
        Some(t) => {
            return Err(LoadErrorKind::InvalidField {
                field: "timeout".into(),
                reason: format!("{t} must be greater than zero"),
            });
        },
    };

    let definition = HandlerDefinition {
        name,
        description,
        channels: channels.map(parse_channels).transpose()?.unwrap_or_default(),
        priority,
        enabled: enabled.unwrap_or(true),
        timeout_ms,
        skip_bots,
        skip_threads,
        skip_dms,
    };
    let matcher = compile_channels(&definition)?;
    let command = parse_handle(handle)?;

    Ok(Some(ParsedSource {
        definition,
        matcher,
        dialect,
        command,
    }))
}

/// Validate a definition and compile its channel patterns. Shared by file
/// sources and natively registered handlers.
pub fn compile_channels(definition: &HandlerDefinition) -> Result<ChannelMatcher, LoadErrorKind> {
    if definition.name.trim().is_empty() {
        return Err(LoadErrorKind::InvalidField {
            field: "name".into(),
            reason: "must not be empty".into(),
        });
    }
    if definition.timeout_ms == 0 {
        return Err(LoadErrorKind::InvalidField {
            field: "timeout".into(),
            reason: "must be greater than zero".into(),
        });
    }
    ChannelMatcher::compile(&definition.channels).map_err(|e| LoadErrorKind::InvalidChannels {
        reason: e.to_string(),
    })
}

fn parse_channels(value: Value) -> Result<Vec<String>, LoadErrorKind> {
    let found = value.type_str();
    let Value::Array(items) = value else {
        return Err(LoadErrorKind::InvalidChannels {
            reason: format!("expected an array of strings, found {found}"),
        });
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::String(s) if !s.is_empty() => Ok(s),
            Value::String(_) => Err(LoadErrorKind::InvalidChannels {
                reason: format!("entry {i} is empty"),
            }),
            other => Err(LoadErrorKind::InvalidChannels {
                reason: format!("entry {i} is a {}, expected a string", other.type_str()),
            }),
        })
        .collect()
}

fn parse_handle(handle: Option<Value>) -> Result<CommandSpec, LoadErrorKind> {
    let invalid = |reason: &str| LoadErrorKind::InvalidField {
        field: "handle".into(),
        reason: reason.into(),
    };

    match handle {
        None => Err(LoadErrorKind::MissingHandle),
        Some(Value::String(command)) if command.trim().is_empty() => {
            Err(invalid("command must not be empty"))
        },
        Some(Value::String(command)) => Ok(CommandSpec {
            command,
            env: HashMap::new(),
        }),
        Some(Value::Table(mut table)) => {
            let command = match table.remove("command") {
                Some(Value::String(c)) if !c.trim().is_empty() => c,
                Some(_) => return Err(invalid("'command' must be a non-empty string")),
                None => return Err(LoadErrorKind::MissingHandle),
            };
            let env = match table.remove("env") {
                None => HashMap::new(),
                Some(Value::Table(vars)) => vars
                    .into_iter()
                    .map(|(k, v)| match v {
                        Value::String(s) => Ok((k, s)),
                        _ => Err(invalid("'env' values must be strings")),
                    })
                    .collect::<Result<_, _>>()?,
                Some(_) => return Err(invalid("'env' must be a table")),
            };
            Ok(CommandSpec { command, env })
        },
        Some(other) => Err(invalid(&format!(
            "expected a command string or table, found {}",
            other.type_str()
        ))),
    }
}

fn detect_dialect(mut table: toml::Table) -> Result<(Dialect, toml::Table), LoadErrorKind> {
    match table.remove("handler") {
        Some(Value::Table(inner)) => {
            if table.contains_key("handle") {
                return Err(LoadErrorKind::AmbiguousDialect);
            }
            Ok((Dialect::Object, inner))
        },
        Some(other) => {
            // A non-table `handler` key is an ordinary flat field.
            table.insert("handler".into(), other);
            Ok((Dialect::Flat, table))
        },
        None => Ok((Dialect::Flat, table)),
    }
}

/// Split `+++` frontmatter from the markdown body.
fn split_frontmatter(content: &str) -> Result<(&str, &str), LoadErrorKind> {
    let trimmed = content.trim_start();
    let Some(after_first) = trimmed.strip_prefix("+++") else {
        return Err(LoadErrorKind::Parse {
            reason: "markdown handler must start with +++ TOML frontmatter".into(),
        });
    };
    let end = after_first
        .find("\n+++")
        .ok_or_else(|| LoadErrorKind::Parse {
            reason: "missing closing +++ in frontmatter".into(),
        })?;

    let front = after_first[..end].trim();
    let body = after_first.get(end + 4..).unwrap_or_default().trim();
    Ok((front, body))
}

/// First non-heading paragraph of a markdown body.
fn first_paragraph(body: &str) -> String {
    body.split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty() && !p.starts_with('#'))
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}
