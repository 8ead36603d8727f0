//! Handlers implemented as external commands.
//!
//! The command runs under `sh -c` with piped stdio and speaks line-delimited
//! JSON:
//!
//! ```text
//! host  -> child   {"type":"message","message":{...}}
//! child -> host    {"call":"react","args":{"emoji":"eyes"}}
//! host  -> child   {"ok":true,"value":null}
//! child -> host    {"result":"handled"}
//! ```
//!
//! Other stdout lines are console output; stderr lines are logged as
//! warnings. Exiting 0 without a result is `Skip`; a non-zero exit is a
//! failure carrying stderr. The process is killed once it reports a result
//! or when the invocation is aborted. Stdin stays open until the child
//! closes stdout, so a child must not wait for stdin EOF.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::PathBuf,
    process::Stdio,
};

use {
    anyhow::{Context, bail},
    async_trait::async_trait,
    patchbay_common::Message,
    serde::{Deserialize, Serialize},
    serde_json::{Value, json},
    tokio::{
        io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
        process::{ChildStderr, ChildStdin, Command},
    },
    tracing::{debug, warn},
};

use crate::{
    body::HandlerBody,
    collaborators::{HttpRequest, MessageOptions},
    console::ConsoleLevel,
    context::HandlerContext,
    result::HandlerResult,
    state::Namespace,
};

const MAX_STDERR_BYTES: usize = 4096;
/// Longest stdout line accepted from a handler process.
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Options accepted by the `http.*` calls.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HttpOptions {
    pub headers: BTreeMap<String, String>,
    /// Only used by `http.fetch`.
    pub method: Option<String>,
    /// Only used by `http.fetch`.
    pub body: Option<Value>,
}

/// A request from a handler process to the host.
#[derive(Debug, Deserialize)]
#[serde(tag = "call", content = "args", rename_all_fields = "camelCase")]
pub enum HostCall {
    #[serde(rename = "reply")]
    Reply {
        text: String,
        #[serde(default)]
        opts: MessageOptions,
    },
    #[serde(rename = "replyEphemeral")]
    ReplyEphemeral {
        text: String,
        #[serde(default)]
        opts: MessageOptions,
    },
    #[serde(rename = "react")]
    React { emoji: String },
    #[serde(rename = "delete")]
    Delete {},

    #[serde(rename = "slack.sendMessage")]
    SendMessage {
        channel: String,
        text: String,
        #[serde(default)]
        opts: MessageOptions,
    },
    #[serde(rename = "slack.sendEphemeral")]
    SendEphemeral {
        channel: String,
        user: String,
        text: String,
        #[serde(default)]
        opts: MessageOptions,
    },
    #[serde(rename = "slack.addReaction")]
    AddReaction {
        channel: String,
        timestamp: String,
        emoji: String,
    },
    #[serde(rename = "slack.removeReaction")]
    RemoveReaction {
        channel: String,
        timestamp: String,
        emoji: String,
    },
    #[serde(rename = "slack.deleteMessage")]
    DeleteMessage { channel: String, timestamp: String },
    #[serde(rename = "slack.updateMessage")]
    UpdateMessage {
        channel: String,
        timestamp: String,
        text: String,
    },
    #[serde(rename = "slack.getUserInfo")]
    GetUserInfo { user_id: String },
    #[serde(rename = "slack.getChannelInfo")]
    GetChannelInfo { channel_id: String },

    #[serde(rename = "http.get")]
    HttpGet {
        url: String,
        #[serde(default)]
        opts: HttpOptions,
    },
    #[serde(rename = "http.post")]
    HttpPost {
        url: String,
        #[serde(default)]
        body: Option<Value>,
        #[serde(default)]
        opts: HttpOptions,
    },
    #[serde(rename = "http.put")]
    HttpPut {
        url: String,
        #[serde(default)]
        body: Option<Value>,
        #[serde(default)]
        opts: HttpOptions,
    },
    #[serde(rename = "http.delete")]
    HttpDelete {
        url: String,
        #[serde(default)]
        opts: HttpOptions,
    },
    #[serde(rename = "http.fetch")]
    HttpFetch {
        url: String,
        #[serde(default)]
        opts: HttpOptions,
    },

    #[serde(rename = "ai.generate")]
    AiGenerate { prompt: String },
    #[serde(rename = "ai.summarize")]
    AiSummarize { url: String },

    #[serde(rename = "state.get")]
    StateGet { namespace: Namespace, key: String },
    #[serde(rename = "state.set")]
    StateSet {
        namespace: Namespace,
        key: String,
        value: Value,
    },
    #[serde(rename = "state.delete")]
    StateDelete { namespace: Namespace, key: String },
    #[serde(rename = "state.has")]
    StateHas { namespace: Namespace, key: String },
    #[serde(rename = "state.keys")]
    StateKeys { namespace: Namespace },
    #[serde(rename = "state.clear")]
    StateClear { namespace: Namespace },

    #[serde(rename = "console.log")]
    ConsoleLog { message: String },
    #[serde(rename = "console.info")]
    ConsoleInfo { message: String },
    #[serde(rename = "console.warn")]
    ConsoleWarn { message: String },
    #[serde(rename = "console.error")]
    ConsoleError { message: String },
    #[serde(rename = "console.debug")]
    ConsoleDebug { message: String },
}

/// Host answer to one [`HostCall`]. A missing `value` on success means
/// "absent" (e.g. `state.get` of an unset key).
#[derive(Debug, Serialize)]
pub struct CallReply {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CallReply {
    fn value(value: Value) -> Self {
        Self {
            ok: true,
            value: Some(value),
            error: None,
        }
    }

    fn absent() -> Self {
        Self {
            ok: true,
            value: None,
            error: None,
        }
    }

    fn error(error: impl fmt::Display) -> Self {
        Self {
            ok: false,
            value: None,
            error: Some(error.to_string()),
        }
    }

    fn from_result<T: Serialize, E: fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => match serde_json::to_value(value) {
                Ok(value) => Self::value(value),
                Err(e) => Self::error(e),
            },
            Err(e) => Self::error(e),
        }
    }
}

enum ChildLine {
    Result(Value),
    Call(Result<HostCall, serde_json::Error>),
    Output(String),
}

fn parse_line(line: &str) -> ChildLine {
    let Ok(Value::Object(mut obj)) = serde_json::from_str::<Value>(line) else {
        return ChildLine::Output(line.to_string());
    };
    if let Some(result) = obj.remove("result") {
        return ChildLine::Result(result);
    }
    if obj.contains_key("call") {
        obj.entry("args").or_insert_with(|| json!({}));
        return ChildLine::Call(serde_json::from_value(Value::Object(obj)));
    }
    ChildLine::Output(line.to_string())
}

fn http_request(method: &str, url: String, body: Option<Value>, opts: HttpOptions) -> HttpRequest {
    HttpRequest::new(method, url)
        .with_headers(opts.headers)
        .with_body(body)
}

/// Run one host call on behalf of the child.
pub async fn perform(ctx: &HandlerContext, call: HostCall) -> CallReply {
    let messaging = ctx.messaging();
    match call {
        HostCall::Reply { text, opts } => CallReply::from_result(ctx.reply_with(&text, opts).await),
        HostCall::ReplyEphemeral { text, opts } => {
            CallReply::from_result(ctx.reply_ephemeral_with(&text, opts).await)
        },
        HostCall::React { emoji } => CallReply::from_result(ctx.react(&emoji).await),
        HostCall::Delete {} => CallReply::from_result(ctx.delete().await),

        HostCall::SendMessage {
            channel,
            text,
            opts,
        } => CallReply::from_result(messaging.send_message(&channel, &text, opts).await),
        HostCall::SendEphemeral {
            channel,
            user,
            text,
            opts,
        } => CallReply::from_result(
            messaging
                .send_ephemeral(&channel, &user, &text, opts)
                .await,
        ),
        HostCall::AddReaction {
            channel,
            timestamp,
            emoji,
        } => CallReply::from_result(messaging.add_reaction(&channel, &timestamp, &emoji).await),
        HostCall::RemoveReaction {
            channel,
            timestamp,
            emoji,
        } => CallReply::from_result(
            messaging
                .remove_reaction(&channel, &timestamp, &emoji)
                .await,
        ),
        HostCall::DeleteMessage { channel, timestamp } => {
            CallReply::from_result(messaging.delete_message(&channel, &timestamp).await)
        },
        HostCall::UpdateMessage {
            channel,
            timestamp,
            text,
        } => CallReply::from_result(messaging.update_message(&channel, &timestamp, &text).await),
        HostCall::GetUserInfo { user_id } => {
            CallReply::from_result(messaging.get_user_info(&user_id).await)
        },
        HostCall::GetChannelInfo { channel_id } => {
            CallReply::from_result(messaging.get_channel_info(&channel_id).await)
        },

        HostCall::HttpGet { url, opts } => {
            CallReply::from_result(ctx.http().fetch(http_request("GET", url, None, opts)).await)
        },
        HostCall::HttpPost { url, body, opts } => {
            CallReply::from_result(ctx.http().fetch(http_request("POST", url, body, opts)).await)
        },
        HostCall::HttpPut { url, body, opts } => {
            CallReply::from_result(ctx.http().fetch(http_request("PUT", url, body, opts)).await)
        },
        HostCall::HttpDelete { url, opts } => CallReply::from_result(
            ctx.http()
                .fetch(http_request("DELETE", url, None, opts))
                .await,
        ),
        HostCall::HttpFetch { url, mut opts } => {
            let method = opts.method.take().unwrap_or_else(|| "GET".into());
            let body = opts.body.take();
            CallReply::from_result(ctx.http().fetch(http_request(&method, url, body, opts)).await)
        },

        HostCall::AiGenerate { prompt } => CallReply::from_result(ctx.ai().generate(&prompt).await),
        HostCall::AiSummarize { url } => CallReply::from_result(ctx.ai().summarize(&url).await),

        HostCall::StateGet { namespace, key } => {
            match ctx.state().namespace(namespace).get::<Value>(&key).await {
                Ok(Some(value)) => CallReply::value(value),
                Ok(None) => CallReply::absent(),
                Err(e) => CallReply::error(e),
            }
        },
        HostCall::StateSet {
            namespace,
            key,
            value,
        } => CallReply::from_result(ctx.state().namespace(namespace).set(&key, &value).await),
        HostCall::StateDelete { namespace, key } => {
            CallReply::from_result(ctx.state().namespace(namespace).delete(&key).await)
        },
        HostCall::StateHas { namespace, key } => {
            CallReply::from_result(ctx.state().namespace(namespace).has(&key).await)
        },
        HostCall::StateKeys { namespace } => {
            CallReply::from_result(ctx.state().namespace(namespace).keys().await)
        },
        HostCall::StateClear { namespace } => {
            CallReply::from_result(ctx.state().namespace(namespace).clear().await)
        },

        HostCall::ConsoleLog { message } => console(ctx, ConsoleLevel::Log, message),
        HostCall::ConsoleInfo { message } => console(ctx, ConsoleLevel::Info, message),
        HostCall::ConsoleWarn { message } => console(ctx, ConsoleLevel::Warn, message),
        HostCall::ConsoleError { message } => console(ctx, ConsoleLevel::Error, message),
        HostCall::ConsoleDebug { message } => console(ctx, ConsoleLevel::Debug, message),
    }
}

fn console(ctx: &HandlerContext, level: ConsoleLevel, message: String) -> CallReply {
    ctx.console().write(level, message);
    CallReply::value(Value::Null)
}

/// A handler body that runs an external command.
#[derive(Debug, Clone)]
pub struct ProcessHandler {
    name: String,
    command: String,
    env: HashMap<String, String>,
    working_dir: Option<PathBuf>,
    max_line_bytes: usize,
}

impl ProcessHandler {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            env: HashMap::new(),
            working_dir: None,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }

    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    let mut payload = String::with_capacity(line.len() + 1);
    payload.push_str(line);
    payload.push('\n');
    match stdin.write_all(payload.as_bytes()).await {
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(e),
        Ok(()) => match stdin.flush().await {
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
            other => other,
        },
    }
}

async fn drain_stderr(handler: String, stderr: ChildStderr) -> String {
    let mut reader = BufReader::new(stderr);
    let mut line = String::new();
    let mut collected = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                warn!(handler = %handler, stderr = %trimmed, "handler process stderr");
                if collected.len() < MAX_STDERR_BYTES {
                    if !collected.is_empty() {
                        collected.push('\n');
                    }
                    collected.push_str(trimmed);
                }
            },
        }
    }
    collected
}

#[async_trait]
impl HandlerBody for ProcessHandler {
    async fn handle(
        &self,
        message: &Message,
        ctx: &HandlerContext,
    ) -> anyhow::Result<HandlerResult> {
        debug!(handler = %self.name, command = %self.command, "spawning handler process");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .envs(&self.env)
            .env("PATCHBAY_HANDLER", &self.name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn handler command: {}", self.command))?;
        let mut stdin = child.stdin.take().context("failed to capture stdin")?;
        let stdout = child.stdout.take().context("failed to capture stdout")?;
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_stderr(self.name.clone(), stderr)));

        let greeting = json!({ "type": "message", "message": message });
        write_line(&mut stdin, &greeting.to_string()).await?;

        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let cap = self.max_line_bytes;
        loop {
            buf.clear();
            let limit = u64::try_from(cap).unwrap_or(u64::MAX).saturating_add(1);
            if (&mut reader).take(limit).read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            if buf.len() > cap && buf.last() != Some(&b'\n') {
                bail!("handler process wrote a line longer than {cap} bytes");
            }
            let line = String::from_utf8_lossy(&buf);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match parse_line(trimmed) {
                ChildLine::Result(value) => {
                    let result = HandlerResult::from_value(&value);
                    debug!(handler = %self.name, %result, "handler process reported result");
                    return Ok(result);
                },
                ChildLine::Call(Ok(call)) => {
                    let reply = perform(ctx, call).await;
                    write_line(&mut stdin, &serde_json::to_string(&reply)?).await?;
                },
                ChildLine::Call(Err(e)) => {
                    let reply = CallReply::error(format!("invalid call: {e}"));
                    write_line(&mut stdin, &serde_json::to_string(&reply)?).await?;
                },
                ChildLine::Output(text) => ctx.console().info(text),
            }
        }

        drop(stdin);
        let status = child
            .wait()
            .await
            .with_context(|| format!("handler '{}' failed to complete", self.name))?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if status.success() {
            return Ok(HandlerResult::Skip);
        }
        let code = status.code().unwrap_or(-1);
        if stderr.is_empty() {
            bail!("handler process exited with code {code}");
        }
        bail!("handler process exited with code {code}: {stderr}")
    }
}
