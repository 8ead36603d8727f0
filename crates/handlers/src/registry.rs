//! Handler registry: loads sources, validates and normalises them, and holds
//! the live, priority-ordered handler set.

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    serde::Serialize,
    tracing::{debug, info, warn},
};

use crate::{
    body::HandlerBody,
    definition::{DefinitionDefaults, HandlerDefinition},
    discovery::HandlerDiscoverer,
    error::{LoadError, LoadErrorKind},
    matcher::ChannelMatcher,
    process::ProcessHandler,
    sandbox::Invocation,
    source::{Dialect, HandlerSource, compile_channels, parse_source},
};

// ── HandlerStats ────────────────────────────────────────────────────────────

/// Per-handler invocation statistics.
#[derive(Debug, Default)]
pub struct HandlerStats {
    pub call_count: AtomicU64,
    pub failure_count: AtomicU64,
    pub timeout_count: AtomicU64,
    pub total_latency_us: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub calls: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub avg_latency_ms: u64,
}

impl HandlerStats {
    pub fn record(&self, invocation: &Invocation) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(invocation.elapsed.as_micros() as u64, Ordering::Relaxed);
        if let Some(failure) = &invocation.failure {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
            if failure.is_timeout() {
                self.timeout_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn avg_latency(&self) -> Duration {
        let calls = self.call_count.load(Ordering::Relaxed);
        if calls == 0 {
            return Duration::ZERO;
        }
        let total = self.total_latency_us.load(Ordering::Relaxed);
        Duration::from_micros(total / calls)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            calls: self.call_count.load(Ordering::Relaxed),
            failures: self.failure_count.load(Ordering::Relaxed),
            timeouts: self.timeout_count.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency().as_millis() as u64,
        }
    }
}

// ── Registered handlers ─────────────────────────────────────────────────────

/// Where a registered handler came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "dialect", rename_all = "snake_case")]
pub enum HandlerKind {
    Native,
    Source(Dialect),
}

pub struct RegisteredHandler {
    pub definition: HandlerDefinition,
    pub matcher: ChannelMatcher,
    pub body: Arc<dyn HandlerBody>,
    pub origin: String,
    pub kind: HandlerKind,
    pub stats: Arc<HandlerStats>,
}

/// Immutable, priority-ordered handler list. Replaced wholesale on reload.
#[derive(Default)]
pub struct HandlerSet {
    handlers: Vec<Arc<RegisteredHandler>>,
}

impl HandlerSet {
    /// All handlers, disabled included, in dispatch order.
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<RegisteredHandler>> {
        self.handlers.iter()
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Arc<RegisteredHandler>> {
        self.handlers.iter().filter(|h| h.definition.enabled)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<RegisteredHandler>> {
        self.handlers.iter().find(|h| h.definition.name == name)
    }

    pub fn definitions(&self) -> Vec<HandlerDefinition> {
        self.handlers.iter().map(|h| h.definition.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// A handler implemented in Rust.
#[derive(Clone)]
pub struct NativeHandler {
    pub definition: HandlerDefinition,
    pub body: Arc<dyn HandlerBody>,
}

impl NativeHandler {
    pub fn new(definition: HandlerDefinition, body: Arc<dyn HandlerBody>) -> Self {
        Self { definition, body }
    }
}

// ── Loading ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    /// Registered definitions in dispatch order.
    pub handlers: Vec<HandlerDefinition>,
    pub errors: Vec<LoadError>,
    /// Origins of documentation-only sources.
    pub skipped: Vec<String>,
    /// Sources and natives that were not documentation-only.
    pub attempted: usize,
}

impl LoadReport {
    /// Fails when handlers were offered but none could be registered.
    pub fn ensure_usable(&self) -> crate::Result<()> {
        if self.attempted > 0 && self.handlers.is_empty() {
            return Err(crate::Error::message(format!(
                "no handlers could be loaded ({} failed)",
                self.errors.len()
            )));
        }
        Ok(())
    }
}

/// Load natives (first, in registration order) then sources (in discovery
/// order). A failing entry is reported and skipped; the rest still load.
///
/// Names must be unique: the first entry to claim a name keeps it.
pub fn load(
    natives: &[NativeHandler],
    sources: &[HandlerSource],
    defaults: &DefinitionDefaults,
) -> (HandlerSet, LoadReport) {
    let mut handlers: Vec<Arc<RegisteredHandler>> = Vec::new();
    let mut report = LoadReport::default();
    let mut claimed: HashMap<String, String> = HashMap::new();

    let mut admit = |candidate: Result<Option<RegisteredHandler>, LoadErrorKind>,
                     origin: &str,
                     report: &mut LoadReport| {
        let handler = match candidate {
            Ok(Some(handler)) => handler,
            Ok(None) => {
                debug!(origin, "documentation-only handler source skipped");
                report.skipped.push(origin.to_string());
                return;
            },
            Err(kind) => {
                report.attempted += 1;
                report.errors.push(LoadError::new(origin, kind));
                return;
            },
        };
        report.attempted += 1;
        let name = handler.definition.name.clone();
        if let Some(first_origin) = claimed.get(&name) {
            report.errors.push(LoadError::new(origin, LoadErrorKind::DuplicateName {
                name,
                first_origin: first_origin.clone(),
            }));
            return;
        }
        claimed.insert(name, origin.to_string());
        handlers.push(Arc::new(handler));
    };

    for (i, native) in natives.iter().enumerate() {
        let origin = format!("native:{}", native.definition.name);
        let candidate = if defaults.is_reserved(&native.definition.name) {
            Ok(None)
        } else {
            compile_channels(&native.definition).map(|matcher| {
                Some(RegisteredHandler {
                    definition: native.definition.clone(),
                    matcher,
                    body: Arc::clone(&native.body),
                    origin: origin.clone(),
                    kind: HandlerKind::Native,
                    stats: Arc::new(HandlerStats::default()),
                })
            })
        };
        debug!(index = i, origin = %origin, "loading native handler");
        admit(candidate, &origin, &mut report);
    }

    for source in sources {
        let candidate = parse_source(source, defaults).map(|parsed| {
            parsed.map(|parsed| {
                let body = ProcessHandler::new(&parsed.definition.name, parsed.command.command)
                    .with_env(parsed.command.env)
                    .with_working_dir(source.dir.clone());
                RegisteredHandler {
                    definition: parsed.definition,
                    matcher: parsed.matcher,
                    body: Arc::new(body),
                    origin: source.origin.clone(),
                    kind: HandlerKind::Source(parsed.dialect),
                    stats: Arc::new(HandlerStats::default()),
                }
            })
        });
        admit(candidate, &source.origin, &mut report);
    }

    // Stable: equal priorities keep discovery order.
    handlers.sort_by_key(|h| h.definition.priority);
    report.handlers = handlers.iter().map(|h| h.definition.clone()).collect();
    (HandlerSet { handlers }, report)
}

// ── HandlerRegistry ─────────────────────────────────────────────────────────

/// Owns the live handler set and reloads it from the discoverer.
pub struct HandlerRegistry {
    defaults: DefinitionDefaults,
    natives: Vec<NativeHandler>,
    discoverer: Option<Arc<dyn HandlerDiscoverer>>,
    current: RwLock<Arc<HandlerSet>>,
}

impl HandlerRegistry {
    pub fn new(defaults: DefinitionDefaults) -> Self {
        Self {
            defaults,
            natives: Vec::new(),
            discoverer: None,
            current: RwLock::new(Arc::new(HandlerSet::default())),
        }
    }

    pub fn with_discoverer(mut self, discoverer: Arc<dyn HandlerDiscoverer>) -> Self {
        self.discoverer = Some(discoverer);
        self
    }

    /// Takes effect on the next load.
    pub fn with_native(mut self, definition: HandlerDefinition, body: Arc<dyn HandlerBody>) -> Self {
        self.natives.push(NativeHandler::new(definition, body));
        self
    }

    pub fn defaults(&self) -> &DefinitionDefaults {
        &self.defaults
    }

    /// The handler set dispatches should use. In-flight dispatches keep the
    /// snapshot they started with across reloads.
    pub fn snapshot(&self) -> Arc<HandlerSet> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Load natives plus `sources` and swap in the result.
    pub fn load_sources(&self, sources: &[HandlerSource]) -> LoadReport {
        let (set, report) = load(&self.natives, sources, &self.defaults);
        self.install(set, &report);
        report
    }

    /// Re-run discovery and swap in the result.
    pub async fn reload(&self) -> crate::Result<LoadReport> {
        let discovery = match &self.discoverer {
            Some(discoverer) => discoverer.discover().await?,
            None => Default::default(),
        };
        let (set, mut report) = load(&self.natives, &discovery.sources, &self.defaults);
        report.attempted += discovery.errors.len();
        report.errors.extend(discovery.errors);
        report.skipped.extend(discovery.skipped);
        self.install(set, &report);
        Ok(report)
    }

    fn install(&self, set: HandlerSet, report: &LoadReport) {
        for error in &report.errors {
            warn!(origin = %error.origin, error = %error.kind, "handler failed to load");
        }
        info!(
            loaded = set.len(),
            enabled = set.enabled().count(),
            failed = report.errors.len(),
            skipped = report.skipped.len(),
            "handlers loaded"
        );
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(set);
    }
}
