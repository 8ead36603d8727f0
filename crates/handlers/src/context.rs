//! The capability object handed to one handler invocation.
//!
//! Collaborator calls run on detached tasks: if the invocation is aborted on
//! timeout, a call already in flight still completes on its own.

use std::{collections::BTreeMap, future::Future, sync::Arc};

use {patchbay_common::Message, serde_json::Value};

use crate::{
    collaborators::{
        CollaboratorResult, HttpFetcher, HttpRequest, HttpResponse, MessageOptions, Messenger,
        PostedMessage, TextGenerator,
    },
    console::{Console, ConsoleCapture},
    error::CollaboratorError,
    state::{StateBridge, StateHandle},
};

/// Shared collaborators every invocation draws from.
#[derive(Clone)]
pub struct Services {
    pub messenger: Arc<dyn Messenger>,
    pub http: Arc<dyn HttpFetcher>,
    pub ai: Option<Arc<dyn TextGenerator>>,
    pub state: Arc<StateBridge>,
    pub console: Option<ConsoleCapture>,
}

impl Services {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        http: Arc<dyn HttpFetcher>,
        state: Arc<StateBridge>,
    ) -> Self {
        Self {
            messenger,
            http,
            ai: None,
            state,
            console: None,
        }
    }

    pub fn with_ai(mut self, ai: Arc<dyn TextGenerator>) -> Self {
        self.ai = Some(ai);
        self
    }

    pub fn with_console_capture(mut self, capture: ConsoleCapture) -> Self {
        self.console = Some(capture);
        self
    }
}

async fn detached<T, F>(service: &'static str, call: F) -> CollaboratorResult<T>
where
    T: Send + 'static,
    F: Future<Output = CollaboratorResult<T>> + Send + 'static,
{
    match tokio::spawn(call).await {
        Ok(result) => result,
        Err(e) => Err(CollaboratorError::new(service, format!("call aborted: {e}"))),
    }
}

#[derive(Clone)]
pub struct HandlerContext {
    handler: Arc<str>,
    message: Arc<Message>,
    messaging: Messaging,
    http: Http,
    ai: Ai,
    state: StateHandle,
    console: Console,
}

impl HandlerContext {
    pub fn new(handler: &str, message: Arc<Message>, services: &Services) -> Self {
        let handler: Arc<str> = Arc::from(handler);
        Self {
            messaging: Messaging {
                client: Arc::clone(&services.messenger),
            },
            http: Http {
                client: Arc::clone(&services.http),
            },
            ai: Ai {
                client: services.ai.clone(),
            },
            state: StateHandle::new(Arc::clone(&services.state), Arc::clone(&handler)),
            console: Console::new(Arc::clone(&handler), services.console.clone()),
            handler,
            message,
        }
    }

    pub fn handler_name(&self) -> &str {
        &self.handler
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Reply in the message's thread (starting one if needed).
    pub async fn reply(&self, text: &str) -> CollaboratorResult<PostedMessage> {
        self.reply_with(text, MessageOptions::default()).await
    }

    pub async fn reply_with(
        &self,
        text: &str,
        mut opts: MessageOptions,
    ) -> CollaboratorResult<PostedMessage> {
        opts.thread_timestamp = Some(self.message.reply_thread_ts().to_string());
        self.messaging
            .send_message(&self.message.channel, text, opts)
            .await
    }

    /// Reply visible only to the message author, in-thread.
    pub async fn reply_ephemeral(&self, text: &str) -> CollaboratorResult<()> {
        self.reply_ephemeral_with(text, MessageOptions::default()).await
    }

    pub async fn reply_ephemeral_with(
        &self,
        text: &str,
        mut opts: MessageOptions,
    ) -> CollaboratorResult<()> {
        opts.thread_timestamp = Some(self.message.reply_thread_ts().to_string());
        self.messaging
            .send_ephemeral(&self.message.channel, &self.message.user, text, opts)
            .await
    }

    pub async fn react(&self, emoji: &str) -> CollaboratorResult<()> {
        self.messaging
            .add_reaction(&self.message.channel, &self.message.timestamp, emoji)
            .await
    }

    pub async fn delete(&self) -> CollaboratorResult<()> {
        self.messaging
            .delete_message(&self.message.channel, &self.message.timestamp)
            .await
    }

    /// Lower-level messaging, addressed explicitly.
    pub fn messaging(&self) -> &Messaging {
        &self.messaging
    }

    pub fn http(&self) -> &Http {
        &self.http
    }

    pub fn ai(&self) -> &Ai {
        &self.ai
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    pub fn console(&self) -> &Console {
        &self.console
    }
}

#[derive(Clone)]
pub struct Messaging {
    client: Arc<dyn Messenger>,
}

impl Messaging {
    pub async fn send_message(
        &self,
        channel: &str,
        text: &str,
        opts: MessageOptions,
    ) -> CollaboratorResult<PostedMessage> {
        let client = Arc::clone(&self.client);
        let (channel, text) = (channel.to_string(), text.to_string());
        detached("messaging", async move {
            client.send_message(&channel, &text, &opts).await
        })
        .await
    }

    pub async fn send_ephemeral(
        &self,
        channel: &str,
        user: &str,
        text: &str,
        opts: MessageOptions,
    ) -> CollaboratorResult<()> {
        let client = Arc::clone(&self.client);
        let (channel, user, text) = (channel.to_string(), user.to_string(), text.to_string());
        detached("messaging", async move {
            client.send_ephemeral(&channel, &user, &text, &opts).await
        })
        .await
    }

    pub async fn add_reaction(
        &self,
        channel: &str,
        timestamp: &str,
        emoji: &str,
    ) -> CollaboratorResult<()> {
        let client = Arc::clone(&self.client);
        let (channel, timestamp, emoji) = (channel.to_string(), timestamp.to_string(), emoji.to_string());
        detached("messaging", async move {
            client.add_reaction(&channel, &timestamp, &emoji).await
        })
        .await
    }

    pub async fn remove_reaction(
        &self,
        channel: &str,
        timestamp: &str,
        emoji: &str,
    ) -> CollaboratorResult<()> {
        let client = Arc::clone(&self.client);
        let (channel, timestamp, emoji) = (channel.to_string(), timestamp.to_string(), emoji.to_string());
        detached("messaging", async move {
            client.remove_reaction(&channel, &timestamp, &emoji).await
        })
        .await
    }

    pub async fn delete_message(&self, channel: &str, timestamp: &str) -> CollaboratorResult<()> {
        let client = Arc::clone(&self.client);
        let (channel, timestamp) = (channel.to_string(), timestamp.to_string());
        detached("messaging", async move {
            client.delete_message(&channel, &timestamp).await
        })
        .await
    }

    pub async fn update_message(
        &self,
        channel: &str,
        timestamp: &str,
        text: &str,
    ) -> CollaboratorResult<()> {
        let client = Arc::clone(&self.client);
        let (channel, timestamp, text) = (channel.to_string(), timestamp.to_string(), text.to_string());
        detached("messaging", async move {
            client.update_message(&channel, &timestamp, &text).await
        })
        .await
    }

    pub async fn get_user_info(&self, user_id: &str) -> CollaboratorResult<Value> {
        let client = Arc::clone(&self.client);
        let user_id = user_id.to_string();
        detached("messaging", async move { client.get_user_info(&user_id).await }).await
    }

    pub async fn get_channel_info(&self, channel_id: &str) -> CollaboratorResult<Value> {
        let client = Arc::clone(&self.client);
        let channel_id = channel_id.to_string();
        detached("messaging", async move {
            client.get_channel_info(&channel_id).await
        })
        .await
    }
}

#[derive(Clone)]
pub struct Http {
    client: Arc<dyn HttpFetcher>,
}

impl Http {
    pub async fn fetch(&self, request: HttpRequest) -> CollaboratorResult<HttpResponse> {
        let client = Arc::clone(&self.client);
        detached("http", async move { client.fetch(request).await }).await
    }

    pub async fn get(
        &self,
        url: &str,
        headers: BTreeMap<String, String>,
    ) -> CollaboratorResult<HttpResponse> {
        self.fetch(HttpRequest::get(url).with_headers(headers)).await
    }

    pub async fn post(
        &self,
        url: &str,
        body: Option<Value>,
        headers: BTreeMap<String, String>,
    ) -> CollaboratorResult<HttpResponse> {
        self.fetch(HttpRequest::post(url, body).with_headers(headers))
            .await
    }

    pub async fn put(
        &self,
        url: &str,
        body: Option<Value>,
        headers: BTreeMap<String, String>,
    ) -> CollaboratorResult<HttpResponse> {
        self.fetch(HttpRequest::put(url, body).with_headers(headers))
            .await
    }

    pub async fn delete(
        &self,
        url: &str,
        headers: BTreeMap<String, String>,
    ) -> CollaboratorResult<HttpResponse> {
        self.fetch(HttpRequest::delete(url).with_headers(headers))
            .await
    }
}

#[derive(Clone)]
pub struct Ai {
    client: Option<Arc<dyn TextGenerator>>,
}

impl Ai {
    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    fn client(&self) -> CollaboratorResult<Arc<dyn TextGenerator>> {
        self.client
            .clone()
            .ok_or_else(|| CollaboratorError::ai("ai service not configured"))
    }

    /// `Ok(None)` when the service had no answer.
    pub async fn generate(&self, prompt: &str) -> CollaboratorResult<Option<String>> {
        let client = self.client()?;
        let prompt = prompt.to_string();
        let text = detached("ai", async move { client.generate(&prompt).await }).await?;
        Ok(non_empty(text))
    }

    pub async fn summarize(&self, url: &str) -> CollaboratorResult<Option<String>> {
        let client = self.client()?;
        let url = url.to_string();
        let text = detached("ai", async move { client.summarize(&url).await }).await?;
        Ok(non_empty(text))
    }
}

fn non_empty(text: String) -> Option<String> {
    (!text.trim().is_empty()).then_some(text)
}
