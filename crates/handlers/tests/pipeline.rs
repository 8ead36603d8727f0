//! End-to-end dispatch tests against recording collaborators.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    patchbay_common::Message,
    patchbay_config::StateConfig,
    patchbay_handlers::{
        DefinitionDefaults, DispatchState, Dispatcher, Disposition, FsHandlerDiscoverer,
        HandlerBody, HandlerContext, HandlerDefinition, HandlerRegistry, HandlerResult, Namespace,
        Sandbox, StateBridge, error::InvocationFailure, prefilter::SkipReason, recorder::Recorder,
        state::StateLimits,
    },
    regex::Regex,
    serde_json::json,
    tokio::sync::Semaphore,
};

// ── Fixtures ────────────────────────────────────────────────────────────────

/// Reacts with `git-pull-request` when the message links a GitHub PR.
struct GithubPr {
    pattern: Regex,
}

impl GithubPr {
    fn new() -> Self {
        Self {
            pattern: Regex::new(r"https://github\.com/[\w.-]+/[\w.-]+/pull/\d+").unwrap(),
        }
    }
}

#[async_trait]
impl HandlerBody for GithubPr {
    async fn handle(&self, message: &Message, ctx: &HandlerContext) -> anyhow::Result<HandlerResult> {
        if !self.pattern.is_match(&message.text) {
            return Ok(HandlerResult::Skip);
        }
        ctx.react("git-pull-request").await?;
        Ok(HandlerResult::Handled)
    }
}

/// Counts invocations and returns a fixed result.
struct Counting {
    calls: Arc<AtomicUsize>,
    result: HandlerResult,
}

impl Counting {
    fn new(result: HandlerResult) -> (Arc<AtomicUsize>, Arc<Self>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Arc::clone(&calls), Arc::new(Self { calls, result }))
    }
}

#[async_trait]
impl HandlerBody for Counting {
    async fn handle(&self, _: &Message, ctx: &HandlerContext) -> anyhow::Result<HandlerResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ctx.console().info("counted");
        Ok(self.result)
    }
}

fn dispatcher(registry: HandlerRegistry, recorder: &Recorder) -> Dispatcher {
    registry.load_sources(&[]);
    let state = Arc::new(StateBridge::in_memory(StateLimits::default()));
    Dispatcher::new(
        Arc::new(registry),
        Sandbox::new(recorder.services(state)),
        8,
    )
}

fn registry() -> HandlerRegistry {
    HandlerRegistry::new(DefinitionDefaults::default())
}

fn pr_message() -> Message {
    Message::new(
        "C42",
        "general",
        "U7",
        "check https://github.com/acme/widgets/pull/42",
        "1700000000.000100",
    )
}

fn write(dir: &Path, file: &str, text: &str) {
    std::fs::write(dir.join(file), text).unwrap();
}

// ── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn github_pr_link_gets_reaction() {
    let recorder = Recorder::new();
    let d = dispatcher(
        registry().with_native(
            HandlerDefinition::new("github-pr").channels(["*"]),
            Arc::new(GithubPr::new()),
        ),
        &recorder,
    );

    let report = d.dispatch(pr_message()).await;

    let outcome = report.outcome("github-pr").unwrap();
    assert_eq!(outcome.result, HandlerResult::Handled);
    assert_eq!(outcome.disposition, Disposition::Invoked);
    assert!(report.handled);

    let calls = recorder.log.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "addReaction");
    assert_eq!(
        calls[0].args,
        json!({"channel": "C42", "timestamp": "1700000000.000100", "emoji": "git-pull-request"})
    );
}

#[tokio::test]
async fn github_pr_handler_from_directory() {
    let tmp = tempfile::tempdir().unwrap();
    write(
        tmp.path(),
        "github-pr.md",
        r#"+++
[handler]
channels = ["*"]
skipBots = true
handle = "sh ./github-pr.sh"
+++
Reacts to GitHub pull request links.
"#,
    );
    write(
        tmp.path(),
        "github-pr.sh",
        r#"read -r msg
case "$msg" in
  *github.com/*/pull/*)
    echo '{"call":"react","args":{"emoji":"git-pull-request"}}'
    read -r reply
    echo '{"result":"handled"}' ;;
  *) echo '{"result":"skip"}' ;;
esac
"#,
    );
    write(tmp.path(), "_template.toml", "handle = \"exit 1\"\n");

    let defaults = DefinitionDefaults::default();
    let registry = registry().with_discoverer(Arc::new(FsHandlerDiscoverer::new(tmp.path(), &defaults)));
    let load = registry.reload().await.unwrap();
    assert!(load.errors.is_empty(), "{:?}", load.errors);
    assert_eq!(load.skipped, ["_template.toml"]);
    assert_eq!(load.handlers[0].name, "github-pr");
    assert_eq!(load.handlers[0].description, "Reacts to GitHub pull request links.");

    let recorder = Recorder::new();
    let state = Arc::new(StateBridge::in_memory(StateLimits::default()));
    let d = Dispatcher::new(Arc::new(registry), Sandbox::new(recorder.services(state)), 2);

    let report = d.dispatch(pr_message()).await;
    assert_eq!(report.outcome("github-pr").unwrap().result, HandlerResult::Handled);
    assert_eq!(recorder.log.count("addReaction"), 1);
    assert_eq!(recorder.log.calls()[0].args["emoji"], "git-pull-request");
}

#[tokio::test]
async fn channel_mismatch_never_invokes() {
    let recorder = Recorder::new();
    let (calls, body) = Counting::new(HandlerResult::Handled);
    let d = dispatcher(
        registry().with_native(
            HandlerDefinition::new("welcome")
                .channels(["introductions"])
                .skip_bots(true),
            body,
        ),
        &recorder,
    );

    // A bot message: matching runs first, so the reason is the channel, not the bot flag.
    let report = d.dispatch(pr_message().from_bot("B1")).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        report.outcome("welcome").unwrap().disposition,
        Disposition::NotEligible
    );
    assert_eq!(report.invoked().count(), 0);
    assert!(recorder.log.calls().is_empty());
}

#[tokio::test]
async fn skip_bots_filters_without_side_effects() {
    let recorder = Recorder::new();
    let (calls, body) = Counting::new(HandlerResult::Handled);
    let d = dispatcher(
        registry().with_native(
            HandlerDefinition::new("humans-only")
                .channels(["*"])
                .skip_bots(true)
                .skip_threads(true),
            body,
        ),
        &recorder,
    );

    let report = d
        .dispatch(pr_message().from_bot("B1").in_thread("1.0"))
        .await;

    let outcome = report.outcome("humans-only").unwrap();
    assert_eq!(outcome.result, HandlerResult::Skip);
    assert_eq!(outcome.disposition, Disposition::Filtered(SkipReason::Bot));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(recorder.log.calls().is_empty());
}

#[tokio::test]
async fn stop_halts_pipeline() {
    let recorder = Recorder::new();
    let (first_calls, first) = Counting::new(HandlerResult::Handled);
    let (stop_calls, stopper) = Counting::new(HandlerResult::Stop);
    let (late_calls, late) = Counting::new(HandlerResult::Handled);
    let d = dispatcher(
        registry()
            .with_native(HandlerDefinition::new("late").channels(["*"]).priority(300), late)
            .with_native(HandlerDefinition::new("stopper").channels(["gen*"]).priority(200), stopper)
            .with_native(HandlerDefinition::new("first").channels(["*"]).priority(100), first),
        &recorder,
    );

    let report = d.dispatch(pr_message()).await;

    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stop_calls.load(Ordering::SeqCst), 1);
    assert_eq!(late_calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.state, DispatchState::Stopped);
    assert!(report.stopped);
    assert!(report.handled);
    let order: Vec<_> = report.outcomes.iter().map(|o| o.handler.as_str()).collect();
    assert_eq!(order, ["first", "stopper"]);
}

struct Sleeps {
    starts: Arc<AtomicUsize>,
}

#[async_trait]
impl HandlerBody for Sleeps {
    async fn handle(&self, _: &Message, _: &HandlerContext) -> anyhow::Result<HandlerResult> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(HandlerResult::Stop)
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_is_one_skip_and_pipeline_continues() {
    let recorder = Recorder::new();
    let starts = Arc::new(AtomicUsize::new(0));
    let (after_calls, after) = Counting::new(HandlerResult::Handled);
    let d = dispatcher(
        registry()
            .with_native(
                HandlerDefinition::new("slow").channels(["*"]).priority(1).timeout_ms(100),
                Arc::new(Sleeps {
                    starts: Arc::clone(&starts),
                }),
            )
            .with_native(HandlerDefinition::new("after").channels(["*"]).priority(2), after),
        &recorder,
    );

    let report = d.dispatch(pr_message()).await;

    let slow = report.outcome("slow").unwrap();
    assert_eq!(slow.result, HandlerResult::Skip);
    assert!(matches!(slow.failure, Some(InvocationFailure::Timeout { .. })));
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(after_calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.state, DispatchState::Completed);

    let snap = d.registry().snapshot();
    let stats = snap.get("slow").unwrap().stats.snapshot();
    assert_eq!((stats.calls, stats.timeouts), (1, 1));
}

#[tokio::test]
async fn store_round_trip_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let config = StateConfig {
        store_path: Some(tmp.path().join("state.db")),
        ..StateConfig::default()
    };
    let value = json!({"seen": ["U1", "U2"], "count": 2});

    {
        let bridge = StateBridge::open(&config).await.unwrap();
        assert_eq!(
            bridge
                .get::<serde_json::Value>(Namespace::Store, "h1", "k")
                .await
                .unwrap(),
            None
        );
        bridge.set(Namespace::Store, "h1", "k", &value).await.unwrap();
        bridge.set(Namespace::Cache, "h1", "k", &value).await.unwrap();
        bridge.set(Namespace::Store, "h1", "zero", &0).await.unwrap();
    }

    let reopened = StateBridge::open(&config).await.unwrap();
    assert_eq!(
        reopened
            .get::<serde_json::Value>(Namespace::Store, "h1", "k")
            .await
            .unwrap(),
        Some(value)
    );
    assert_eq!(
        reopened.get::<i64>(Namespace::Store, "h1", "zero").await.unwrap(),
        Some(0)
    );
    assert_eq!(
        reopened.get::<i64>(Namespace::Store, "h1", "missing").await.unwrap(),
        None
    );
    assert!(!reopened.has(Namespace::Cache, "h1", "k").await.unwrap());
    assert!(!reopened.has(Namespace::Store, "h2", "k").await.unwrap());
}

#[tokio::test]
async fn loading_directory_is_stable_and_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "b.toml", "name = \"bravo\"\nchannels = [\"*\"]\nhandle = \"true\"\n");
    write(tmp.path(), "a.toml", "name = \"alpha\"\nchannels = [\"*\"]\nhandle = \"true\"\n");
    write(
        tmp.path(),
        "c.md",
        "+++\n[handler]\nname = \"charlie\"\npriority = 50\nchannels = [\"dev-*\"]\nhandle = \"true\"\n+++\n",
    );
    write(tmp.path(), "d.toml", "name = \"alpha\"\nchannels = [\"*\"]\nhandle = \"true\"\n");
    write(tmp.path(), "e.toml", "channels = [\"*\"]\n");

    let defaults = DefinitionDefaults::default();
    let registry = registry().with_discoverer(Arc::new(FsHandlerDiscoverer::new(tmp.path(), &defaults)));
    let first = registry.reload().await.unwrap();
    let second = registry.reload().await.unwrap();

    let names: Vec<_> = first.handlers.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, ["charlie", "alpha", "bravo"]);
    assert_eq!(first.handlers, second.handlers);
    assert_eq!(first.errors, second.errors);
    assert_eq!(first.errors.len(), 2);
    assert!(first.ensure_usable().is_ok());
}

struct Gated {
    gate: Arc<Semaphore>,
    starts: Arc<AtomicUsize>,
}

#[async_trait]
impl HandlerBody for Gated {
    async fn handle(&self, _: &Message, _: &HandlerContext) -> anyhow::Result<HandlerResult> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await?;
        Ok(HandlerResult::Handled)
    }
}

#[tokio::test]
async fn excess_dispatches_queue_instead_of_dropping() {
    let gate = Arc::new(Semaphore::new(0));
    let starts = Arc::new(AtomicUsize::new(0));
    let registry = registry().with_native(
        HandlerDefinition::new("gated").channels(["*"]),
        Arc::new(Gated {
            gate: Arc::clone(&gate),
            starts: Arc::clone(&starts),
        }),
    );
    registry.load_sources(&[]);
    let recorder = Recorder::new();
    let state = Arc::new(StateBridge::in_memory(StateLimits::default()));
    let d = Dispatcher::new(Arc::new(registry), Sandbox::new(recorder.services(state)), 1);

    let first = d.spawn(pr_message());
    let second = d.spawn(pr_message());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(d.available_slots(), 0);
    assert!(!second.is_finished());

    gate.add_permits(2);
    let (a, b) = (first.await.unwrap(), second.await.unwrap());
    assert!(a.handled && b.handled);
    assert_eq!(starts.load(Ordering::SeqCst), 2);
    assert_eq!(d.available_slots(), 1);
}
