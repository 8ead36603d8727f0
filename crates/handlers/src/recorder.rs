//! Recording collaborators.
//!
//! Every call is appended to a shared [`CallLog`] and answered with mock
//! data, so a message can be dispatched without touching a real chat
//! platform, network, or model. Used by `patchbay simulate` and by tests.

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    async_trait::async_trait,
    serde::Serialize,
    serde_json::{Value, json},
};

use crate::{
    collaborators::{
        CollaboratorResult, HttpFetcher, HttpRequest, HttpResponse, MessageOptions, Messenger,
        PostedMessage, TextGenerator,
    },
    context::Services,
    error::CollaboratorError,
    state::StateBridge,
};

/// One collaborator call as the handler made it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiCall {
    pub service: &'static str,
    pub method: &'static str,
    pub args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Shared, append-only call log.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<ApiCall>>>,
}

impl CallLog {
    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn push(&self, call: ApiCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }
}

#[derive(Clone, Default)]
struct Failures(Arc<HashSet<&'static str>>);

impl Failures {
    /// Record the call and produce either the mock response or a failure.
    fn answer<T: Serialize>(
        &self,
        log: &CallLog,
        service: &'static str,
        method: &'static str,
        args: Value,
        response: T,
    ) -> CollaboratorResult<T> {
        if self.0.contains(&method) {
            let err = CollaboratorError::new(service, format!("{method} failed (simulated)"));
            log.push(ApiCall {
                service,
                method,
                args,
                response: None,
                error: Some(err.message.clone()),
            });
            return Err(err);
        }
        log.push(ApiCall {
            service,
            method,
            args,
            response: serde_json::to_value(&response).ok().filter(|v| !v.is_null()),
            error: None,
        });
        Ok(response)
    }
}

/// Builds recording services that share one [`CallLog`].
#[derive(Default)]
pub struct Recorder {
    pub log: CallLog,
    failing: HashSet<&'static str>,
    ai_reply: Option<String>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `method` fail with a [`CollaboratorError`].
    pub fn failing(mut self, method: &'static str) -> Self {
        self.failing.insert(method);
        self
    }

    /// Include an AI service that answers every prompt with `reply`.
    pub fn with_ai_reply(mut self, reply: impl Into<String>) -> Self {
        self.ai_reply = Some(reply.into());
        self
    }

    pub fn services(&self, state: Arc<StateBridge>) -> Services {
        let failures = Failures(Arc::new(self.failing.clone()));
        let messenger = RecordingMessenger {
            log: self.log.clone(),
            failures: failures.clone(),
            next_ts: Arc::new(AtomicU64::new(1)),
        };
        let http = RecordingHttp {
            log: self.log.clone(),
            failures: failures.clone(),
        };
        let services = Services::new(Arc::new(messenger), Arc::new(http), state);
        match &self.ai_reply {
            Some(reply) => services.with_ai(Arc::new(RecordingAi {
                log: self.log.clone(),
                failures,
                reply: reply.clone(),
            })),
            None => services,
        }
    }
}

// ── Messaging ───────────────────────────────────────────────────────────────

pub struct RecordingMessenger {
    log: CallLog,
    failures: Failures,
    next_ts: Arc<AtomicU64>,
}

impl RecordingMessenger {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            failures: Failures::default(),
            next_ts: Arc::new(AtomicU64::new(1)),
        }
    }

    fn answer<T: Serialize>(&self, method: &'static str, args: Value, response: T) -> CollaboratorResult<T> {
        self.failures
            .answer(&self.log, "messaging", method, args, response)
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(
        &self,
        channel: &str,
        text: &str,
        opts: &MessageOptions,
    ) -> CollaboratorResult<PostedMessage> {
        let seq = self.next_ts.fetch_add(1, Ordering::Relaxed);
        self.answer(
            "sendMessage",
            json!({ "channel": channel, "text": text, "opts": opts }),
            PostedMessage {
                channel: channel.to_string(),
                timestamp: format!("{seq}.000000"),
            },
        )
    }

    async fn send_ephemeral(
        &self,
        channel: &str,
        user: &str,
        text: &str,
        opts: &MessageOptions,
    ) -> CollaboratorResult<()> {
        self.answer(
            "sendEphemeral",
            json!({ "channel": channel, "user": user, "text": text, "opts": opts }),
            (),
        )
    }

    async fn add_reaction(&self, channel: &str, timestamp: &str, emoji: &str) -> CollaboratorResult<()> {
        self.answer(
            "addReaction",
            json!({ "channel": channel, "timestamp": timestamp, "emoji": emoji }),
            (),
        )
    }

    async fn remove_reaction(
        &self,
        channel: &str,
        timestamp: &str,
        emoji: &str,
    ) -> CollaboratorResult<()> {
        self.answer(
            "removeReaction",
            json!({ "channel": channel, "timestamp": timestamp, "emoji": emoji }),
            (),
        )
    }

    async fn delete_message(&self, channel: &str, timestamp: &str) -> CollaboratorResult<()> {
        self.answer(
            "deleteMessage",
            json!({ "channel": channel, "timestamp": timestamp }),
            (),
        )
    }

    async fn update_message(
        &self,
        channel: &str,
        timestamp: &str,
        text: &str,
    ) -> CollaboratorResult<()> {
        self.answer(
            "updateMessage",
            json!({ "channel": channel, "timestamp": timestamp, "text": text }),
            (),
        )
    }

    async fn get_user_info(&self, user_id: &str) -> CollaboratorResult<Value> {
        self.answer(
            "getUserInfo",
            json!({ "userId": user_id }),
            json!({ "id": user_id, "name": format!("user-{user_id}"), "is_bot": false }),
        )
    }

    async fn get_channel_info(&self, channel_id: &str) -> CollaboratorResult<Value> {
        self.answer(
            "getChannelInfo",
            json!({ "channelId": channel_id }),
            json!({ "id": channel_id, "name": format!("channel-{channel_id}") }),
        )
    }
}

// ── HTTP ────────────────────────────────────────────────────────────────────

/// Answers every request with `200 OK` and an empty JSON object.
pub struct RecordingHttp {
    log: CallLog,
    failures: Failures,
}

impl RecordingHttp {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            failures: Failures::default(),
        }
    }
}

#[async_trait]
impl HttpFetcher for RecordingHttp {
    async fn fetch(&self, request: HttpRequest) -> CollaboratorResult<HttpResponse> {
        let args = serde_json::to_value(&request).unwrap_or(Value::Null);
        let response = HttpResponse {
            status: 200,
            status_text: "OK".into(),
            ok: true,
            headers: [("content-type".to_string(), "application/json".to_string())].into(),
            body: "{}".into(),
            json: Some(json!({})),
        };
        self.failures
            .answer(&self.log, "http", "fetch", args, response)
    }
}

// ── AI ──────────────────────────────────────────────────────────────────────

/// Answers every prompt with a fixed reply.
pub struct RecordingAi {
    log: CallLog,
    failures: Failures,
    reply: String,
}

impl RecordingAi {
    pub fn new(log: CallLog, reply: impl Into<String>) -> Self {
        Self {
            log,
            failures: Failures::default(),
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl TextGenerator for RecordingAi {
    async fn generate(&self, prompt: &str) -> CollaboratorResult<String> {
        self.failures.answer(
            &self.log,
            "ai",
            "generate",
            json!({ "prompt": prompt }),
            self.reply.clone(),
        )
    }

    async fn summarize(&self, url: &str) -> CollaboratorResult<String> {
        self.failures.answer(
            &self.log,
            "ai",
            "summarize",
            json!({ "url": url }),
            self.reply.clone(),
        )
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    use crate::state::StateLimits;

    fn state() -> Arc<StateBridge> {
        Arc::new(StateBridge::in_memory(StateLimits::default()))
    }

    #[tokio::test]
    async fn records_calls_with_responses() {
        let recorder = Recorder::new();
        let services = recorder.services(state());
        let posted = services
            .messenger
            .send_message("C1", "hi", &MessageOptions::default())
            .await
            .unwrap();
        let second = services
            .messenger
            .send_message("C1", "again", &MessageOptions::default())
            .await
            .unwrap();
        assert_ne!(posted.timestamp, second.timestamp);

        let calls = recorder.log.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].service, "messaging");
        assert_eq!(calls[0].response.as_ref().unwrap()["channel"], "C1");
        assert!(calls[0].error.is_none());
    }

    #[tokio::test]
    async fn unit_responses_are_omitted() {
        let recorder = Recorder::new();
        let services = recorder.services(state());
        services.messenger.add_reaction("C1", "1.0", "eyes").await.unwrap();
        assert_eq!(recorder.log.calls()[0].response, None);
    }

    #[tokio::test]
    async fn failing_methods_error_and_others_succeed() {
        let recorder = Recorder::new().failing("fetch");
        let services = recorder.services(state());
        let err = services
            .http
            .fetch(HttpRequest::get("https://example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.service, "http");
        assert!(services.messenger.get_user_info("U1").await.is_ok());
        assert_eq!(recorder.log.count("fetch"), 1);
        assert_eq!(recorder.log.count("getUserInfo"), 1);
    }

    #[tokio::test]
    async fn ai_is_opt_in() {
        assert!(Recorder::new().services(state()).ai.is_none());

        let recorder = Recorder::new().with_ai_reply("short version");
        let services = recorder.services(state());
        let ai = services.ai.as_ref().unwrap();
        assert_eq!(ai.summarize("https://example.com").await.unwrap(), "short version");
        assert_eq!(recorder.log.calls()[0].args["url"], "https://example.com");
    }
}
