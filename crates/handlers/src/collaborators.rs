//! External collaborator contracts: chat messaging, outbound HTTP, and text
//! generation. Concrete clients live outside this crate (HTTP excepted, see
//! [`crate::http::ReqwestFetcher`]).

use std::collections::BTreeMap;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::error::CollaboratorError;

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

// ── Messaging ───────────────────────────────────────────────────────────────

/// Options for posting a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageOptions {
    /// Post into this thread instead of the channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unfurl_links: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unfurl_media: Option<bool>,
    /// Also post a thread reply to the channel.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub broadcast: bool,
}

impl MessageOptions {
    pub fn in_thread(thread_timestamp: impl Into<String>) -> Self {
        Self {
            thread_timestamp: Some(thread_timestamp.into()),
            ..Self::default()
        }
    }
}

/// Identity of a message the platform accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedMessage {
    pub channel: String,
    pub timestamp: String,
}

/// Chat-platform client. Every failure comes back as a value.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(
        &self,
        channel: &str,
        text: &str,
        opts: &MessageOptions,
    ) -> CollaboratorResult<PostedMessage>;

    async fn send_ephemeral(
        &self,
        channel: &str,
        user: &str,
        text: &str,
        opts: &MessageOptions,
    ) -> CollaboratorResult<()>;

    async fn add_reaction(&self, channel: &str, timestamp: &str, emoji: &str)
    -> CollaboratorResult<()>;

    async fn remove_reaction(
        &self,
        channel: &str,
        timestamp: &str,
        emoji: &str,
    ) -> CollaboratorResult<()>;

    async fn delete_message(&self, channel: &str, timestamp: &str) -> CollaboratorResult<()>;

    async fn update_message(
        &self,
        channel: &str,
        timestamp: &str,
        text: &str,
    ) -> CollaboratorResult<()>;

    async fn get_user_info(&self, user_id: &str) -> CollaboratorResult<Value>;

    async fn get_channel_info(&self, channel_id: &str) -> CollaboratorResult<Value>;
}

// ── HTTP ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// A JSON string is sent as `text/plain`; any other value as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>, body: Option<Value>) -> Self {
        Self::new("POST", url).with_body(body)
    }

    pub fn put(url: impl Into<String>, body: Option<Value>) -> Self {
        Self::new("PUT", url).with_body(body)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new("DELETE", url)
    }

    pub fn with_body(mut self, body: Option<Value>) -> Self {
        self.body = body;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub ok: bool,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    /// Parsed body when the response declared a JSON content type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
}

#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(&self, request: HttpRequest) -> CollaboratorResult<HttpResponse>;
}

// ── AI ──────────────────────────────────────────────────────────────────────

/// Text-generation backend. An empty string is a valid "no answer".
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> CollaboratorResult<String>;

    async fn summarize(&self, url: &str) -> CollaboratorResult<String>;
}
