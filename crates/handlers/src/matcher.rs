//! Channel-name matching.
//!
//! Pattern forms, all case-sensitive against the channel *name*:
//! - `*` matches every channel
//! - `offtopic-*`, `*-alerts`, `team-*-dev`: a single `*` glob
//! - `/^hiring-\d+$/`: a regular expression
//! - anything else is an exact literal

use {regex::Regex, thiserror::Error};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("channel pattern must be a non-empty string")]
    Empty,

    #[error("pattern '{0}' has more than one '*'")]
    MultipleWildcards(String),

    #[error("pattern '{pattern}' is not a valid regex: {reason}")]
    InvalidRegex { pattern: String, reason: String },
}

#[derive(Debug, Clone)]
enum ChannelPattern {
    Any,
    Exact(String),
    Glob { prefix: String, suffix: String },
    Regex(Regex),
}

impl ChannelPattern {
    fn parse(raw: &str) -> Result<Self, PatternError> {
        if raw.is_empty() {
            return Err(PatternError::Empty);
        }
        if raw == "*" {
            return Ok(Self::Any);
        }
        if raw.len() > 2 && raw.starts_with('/') && raw.ends_with('/') {
            let body = &raw[1..raw.len() - 1];
            return Regex::new(body)
                .map(Self::Regex)
                .map_err(|e| PatternError::InvalidRegex {
                    pattern: raw.to_string(),
                    reason: e.to_string(),
                });
        }
        match raw.split_once('*') {
            None => Ok(Self::Exact(raw.to_string())),
            Some((_, rest)) if rest.contains('*') => {
                Err(PatternError::MultipleWildcards(raw.to_string()))
            },
            Some((prefix, suffix)) => Ok(Self::Glob {
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            }),
        }
    }

    fn matches(&self, channel_name: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(name) => name == channel_name,
            Self::Glob { prefix, suffix } => {
                channel_name.len() >= prefix.len() + suffix.len()
                    && channel_name.starts_with(prefix.as_str())
                    && channel_name.ends_with(suffix.as_str())
            },
            Self::Regex(re) => re.is_match(channel_name),
        }
    }
}

/// A handler's channel patterns, compiled once at load time.
#[derive(Debug, Clone, Default)]
pub struct ChannelMatcher {
    patterns: Vec<ChannelPattern>,
}

impl ChannelMatcher {
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self, PatternError> {
        let patterns = patterns
            .iter()
            .map(|p| ChannelPattern::parse(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// An empty matcher never matches.
    pub fn matches(&self, channel_name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(channel_name))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Uncompiled form of [`ChannelMatcher::matches`]. Invalid patterns never match.
pub fn matches<S: AsRef<str>>(patterns: &[S], channel_name: &str) -> bool {
    patterns.iter().any(|p| {
        ChannelPattern::parse(p.as_ref())
            .map(|pattern| pattern.matches(channel_name))
            .unwrap_or(false)
    })
}
