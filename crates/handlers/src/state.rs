//! Per-handler key-value state.
//!
//! Two namespaces: `cache` lives in memory for the life of the process and
//! `store` is durable (SQLite, committed before `set` returns). Every access
//! goes through [`StateBridge`], which owns serialisation and serialises
//! writers to the same `(namespace, handler, key)`.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::Path,
    str::FromStr,
    sync::{Arc, RwLock},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    dashmap::DashMap,
    patchbay_config::StateConfig,
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    serde_json::Value,
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    },
    tokio::sync::Mutex,
    tracing::debug,
};

use crate::error::StateError;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// In-memory, lost on restart.
    Cache,
    /// Durable across restarts.
    Store,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Store => "store",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cache" => Ok(Self::Cache),
            "store" => Ok(Self::Store),
            other => Err(StateError::UnknownNamespace(other.to_string())),
        }
    }
}

/// Raw storage for one namespace. Values are already serialised.
#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn get(&self, handler: &str, key: &str) -> StateResult<Option<String>>;
    async fn set(&self, handler: &str, key: &str, value: String) -> StateResult<()>;
    /// Returns whether the key existed.
    async fn delete(&self, handler: &str, key: &str) -> StateResult<bool>;
    async fn keys(&self, handler: &str) -> StateResult<Vec<String>>;
    async fn clear(&self, handler: &str) -> StateResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateLimits {
    pub per_handler: usize,
    pub total: usize,
}

impl Default for StateLimits {
    fn default() -> Self {
        Self::from_config(&StateConfig::default())
    }
}

impl StateLimits {
    pub fn from_config(config: &StateConfig) -> Self {
        Self {
            per_handler: config.max_bytes_per_handler,
            total: config.max_total_bytes,
        }
    }
}

fn entry_size(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

// ── Memory backend ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStateStore {
    data: RwLock<HashMap<String, BTreeMap<String, String>>>,
    limits: StateLimits,
}

impl MemoryStateStore {
    pub fn new(limits: StateLimits) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            limits,
        }
    }

    fn read(&self) -> StateResult<std::sync::RwLockReadGuard<'_, HashMap<String, BTreeMap<String, String>>>> {
        self.data
            .read()
            .map_err(|_| StateError::Storage("cache lock poisoned".into()))
    }

    fn write(
        &self,
    ) -> StateResult<std::sync::RwLockWriteGuard<'_, HashMap<String, BTreeMap<String, String>>>> {
        self.data
            .write()
            .map_err(|_| StateError::Storage("cache lock poisoned".into()))
    }
}

#[async_trait]
impl StateBackend for MemoryStateStore {
    async fn get(&self, handler: &str, key: &str) -> StateResult<Option<String>> {
        Ok(self.read()?.get(handler).and_then(|m| m.get(key)).cloned())
    }

    async fn set(&self, handler: &str, key: &str, value: String) -> StateResult<()> {
        let mut data = self.write()?;

        let used_by = |entries: &BTreeMap<String, String>| -> usize {
            entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| entry_size(k, v))
                .sum()
        };
        let size = entry_size(key, &value);
        let handler_used = data.get(handler).map(used_by).unwrap_or(0);
        if handler_used + size > self.limits.per_handler {
            return Err(StateError::handler_limit(handler, self.limits.per_handler));
        }
        let total_used: usize = data
            .iter()
            .map(|(h, entries)| {
                if h == handler {
                    handler_used
                } else {
                    entries.iter().map(|(k, v)| entry_size(k, v)).sum()
                }
            })
            .sum();
        if total_used + size > self.limits.total {
            return Err(StateError::total_limit(self.limits.total));
        }

        data.entry(handler.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, handler: &str, key: &str) -> StateResult<bool> {
        let mut data = self.write()?;
        let Some(entries) = data.get_mut(handler) else {
            return Ok(false);
        };
        let existed = entries.remove(key).is_some();
        if entries.is_empty() {
            data.remove(handler);
        }
        Ok(existed)
    }

    async fn keys(&self, handler: &str) -> StateResult<Vec<String>> {
        Ok(self
            .read()?
            .get(handler)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear(&self, handler: &str) -> StateResult<()> {
        self.write()?.remove(handler);
        Ok(())
    }
}

// ── SQLite backend ──────────────────────────────────────────────────────────

/// Durable backend. Each `set` is an upsert committed in its own transaction.
pub struct SqliteStateStore {
    pool: SqlitePool,
    per_handler_limit: usize,
}

impl SqliteStateStore {
    /// Open (or create) the database file in WAL mode with `synchronous=FULL`.
    pub async fn open(path: &Path, per_handler_limit: usize) -> crate::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::init(&pool).await?;
        debug!(path = %path.display(), "opened state store");
        Ok(Self {
            pool,
            per_handler_limit,
        })
    }

    /// Single-connection in-memory database, for tests and dry runs.
    pub async fn in_memory(per_handler_limit: usize) -> crate::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::init(&pool).await?;
        Ok(Self {
            pool,
            per_handler_limit,
        })
    }

    pub async fn init(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS handler_state (
                handler    TEXT    NOT NULL,
                key        TEXT    NOT NULL,
                value      TEXT    NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (handler, key)
            )"#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[async_trait]
impl StateBackend for SqliteStateStore {
    async fn get(&self, handler: &str, key: &str) -> StateResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM handler_state WHERE handler = ? AND key = ?",
        )
        .bind(handler)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn set(&self, handler: &str, key: &str, value: String) -> StateResult<()> {
        // Limit check and upsert in one statement, so the write lock is taken
        // before the read and concurrent writers queue on the busy timeout.
        let limit = i64::try_from(self.per_handler_limit).unwrap_or(i64::MAX);
        let size = i64::try_from(entry_size(key, &value)).unwrap_or(i64::MAX);
        let result = sqlx::query(
            r#"INSERT INTO handler_state (handler, key, value, updated_at)
               SELECT ?1, ?2, ?3, ?4
               WHERE ?5 + (
                   SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
                   FROM handler_state WHERE handler = ?1 AND key != ?2
               ) <= ?6
               ON CONFLICT(handler, key) DO UPDATE SET
                 value = excluded.value,
                 updated_at = excluded.updated_at"#,
        )
        .bind(handler)
        .bind(key)
        .bind(&value)
        .bind(now_secs())
        .bind(size)
        .bind(limit)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StateError::handler_limit(handler, self.per_handler_limit));
        }
        Ok(())
    }

    async fn delete(&self, handler: &str, key: &str) -> StateResult<bool> {
        let result = sqlx::query("DELETE FROM handler_state WHERE handler = ? AND key = ?")
            .bind(handler)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn keys(&self, handler: &str) -> StateResult<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT key FROM handler_state WHERE handler = ? ORDER BY key",
        )
        .bind(handler)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    async fn clear(&self, handler: &str) -> StateResult<()> {
        sqlx::query("DELETE FROM handler_state WHERE handler = ?")
            .bind(handler)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ── Bridge ──────────────────────────────────────────────────────────────────

type LockKey = (Namespace, String, String);

pub struct StateBridge {
    cache: Arc<dyn StateBackend>,
    store: Arc<dyn StateBackend>,
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl StateBridge {
    pub fn new(cache: Arc<dyn StateBackend>, store: Arc<dyn StateBackend>) -> Self {
        Self {
            cache,
            store,
            locks: DashMap::new(),
        }
    }

    /// Both namespaces in memory. `store` is not durable in this mode.
    pub fn in_memory(limits: StateLimits) -> Self {
        Self::new(
            Arc::new(MemoryStateStore::new(limits)),
            Arc::new(MemoryStateStore::new(limits)),
        )
    }

    /// In-memory cache plus the SQLite store at the configured path.
    pub async fn open(config: &StateConfig) -> crate::Result<Self> {
        let limits = StateLimits::from_config(config);
        let store =
            SqliteStateStore::open(&config.resolved_store_path(), limits.per_handler).await?;
        Ok(Self::new(
            Arc::new(MemoryStateStore::new(limits)),
            Arc::new(store),
        ))
    }

    fn backend(&self, namespace: Namespace) -> &dyn StateBackend {
        match namespace {
            Namespace::Cache => self.cache.as_ref(),
            Namespace::Store => self.store.as_ref(),
        }
    }

    /// Serialise writers to one key without blocking unrelated keys.
    async fn locked<T, F>(&self, namespace: Namespace, handler: &str, key: &str, op: F) -> StateResult<T>
    where
        F: Future<Output = StateResult<T>>,
    {
        let lock_key: LockKey = (namespace, handler.to_string(), key.to_string());
        let lock = Arc::clone(&self.locks.entry(lock_key.clone()).or_default());
        let guard = lock.lock_owned().await;
        let result = op.await;
        drop(guard);
        self.locks
            .remove_if(&lock_key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    pub async fn get_value(
        &self,
        namespace: Namespace,
        handler: &str,
        key: &str,
    ) -> StateResult<Option<Value>> {
        self.get(namespace, handler, key).await
    }

    /// `Ok(None)` means the key was never set (or was deleted).
    pub async fn get<T: DeserializeOwned>(
        &self,
        namespace: Namespace,
        handler: &str,
        key: &str,
    ) -> StateResult<Option<T>> {
        match self.backend(namespace).get(handler, key).await? {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        }
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        namespace: Namespace,
        handler: &str,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let raw = serde_json::to_string(value)?;
        self.locked(namespace, handler, key, async {
            self.backend(namespace).set(handler, key, raw).await
        })
        .await
    }

    pub async fn delete(&self, namespace: Namespace, handler: &str, key: &str) -> StateResult<bool> {
        self.locked(namespace, handler, key, async {
            self.backend(namespace).delete(handler, key).await
        })
        .await
    }

    pub async fn has(&self, namespace: Namespace, handler: &str, key: &str) -> StateResult<bool> {
        Ok(self.backend(namespace).get(handler, key).await?.is_some())
    }

    pub async fn keys(&self, namespace: Namespace, handler: &str) -> StateResult<Vec<String>> {
        self.backend(namespace).keys(handler).await
    }

    pub async fn clear(&self, namespace: Namespace, handler: &str) -> StateResult<()> {
        self.backend(namespace).clear(handler).await
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.len()
    }
}

/// State access for one handler. Cannot name any other handler.
#[derive(Clone)]
pub struct StateHandle {
    bridge: Arc<StateBridge>,
    handler: Arc<str>,
}

impl StateHandle {
    pub(crate) fn new(bridge: Arc<StateBridge>, handler: Arc<str>) -> Self {
        Self { bridge, handler }
    }

    pub fn cache(&self) -> ScopedState {
        self.namespace(Namespace::Cache)
    }

    pub fn store(&self) -> ScopedState {
        self.namespace(Namespace::Store)
    }

    pub fn namespace(&self, namespace: Namespace) -> ScopedState {
        ScopedState {
            bridge: Arc::clone(&self.bridge),
            handler: Arc::clone(&self.handler),
            namespace,
        }
    }
}

#[derive(Clone)]
pub struct ScopedState {
    bridge: Arc<StateBridge>,
    handler: Arc<str>,
    namespace: Namespace,
}

impl ScopedState {
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> StateResult<Option<T>> {
        self.bridge.get(self.namespace, &self.handler, key).await
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StateResult<()> {
        self.bridge.set(self.namespace, &self.handler, key, value).await
    }

    pub async fn delete(&self, key: &str) -> StateResult<bool> {
        self.bridge.delete(self.namespace, &self.handler, key).await
    }

    pub async fn has(&self, key: &str) -> StateResult<bool> {
        self.bridge.has(self.namespace, &self.handler, key).await
    }

    pub async fn keys(&self) -> StateResult<Vec<String>> {
        self.bridge.keys(self.namespace, &self.handler).await
    }

    pub async fn clear(&self) -> StateResult<()> {
        self.bridge.clear(self.namespace, &self.handler).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Seen {
        count: u32,
        users: Vec<String>,
    }

    async fn sqlite_bridge() -> StateBridge {
        let store = SqliteStateStore::in_memory(1024).await.unwrap();
        StateBridge::new(
            Arc::new(MemoryStateStore::new(StateLimits::default())),
            Arc::new(store),
        )
    }

    #[tokio::test]
    async fn store_round_trip_and_absent() {
        let bridge = sqlite_bridge().await;
        let value = Seen {
            count: 3,
            users: vec!["U1".into()],
        };
        bridge.set(Namespace::Store, "h1", "k", &value).await.unwrap();

        let got: Option<Seen> = bridge.get(Namespace::Store, "h1", "k").await.unwrap();
        assert_eq!(got, Some(value));

        let missing: Option<u32> = bridge.get(Namespace::Store, "h1", "unset").await.unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn stored_zero_is_distinct_from_absent() {
        let bridge = StateBridge::in_memory(StateLimits::default());
        bridge.set(Namespace::Cache, "h", "n", &0).await.unwrap();
        assert_eq!(bridge.get::<i64>(Namespace::Cache, "h", "n").await.unwrap(), Some(0));
        assert!(bridge.has(Namespace::Cache, "h", "n").await.unwrap());
        assert!(!bridge.has(Namespace::Cache, "h", "other").await.unwrap());
    }

    #[tokio::test]
    async fn handlers_cannot_see_each_other() {
        let bridge = Arc::new(sqlite_bridge().await);
        let a = StateHandle::new(Arc::clone(&bridge), Arc::from("a"));
        let b = StateHandle::new(Arc::clone(&bridge), Arc::from("b"));

        a.store().set("shared", "from-a").await.unwrap();
        assert_eq!(b.store().get::<String>("shared").await.unwrap(), None);
        assert!(b.store().keys().await.unwrap().is_empty());

        b.store().clear().await.unwrap();
        assert_eq!(
            a.store().get::<String>("shared").await.unwrap().as_deref(),
            Some("from-a")
        );
    }

    #[tokio::test]
    async fn namespaces_are_separate() {
        let bridge = Arc::new(sqlite_bridge().await);
        let state = StateHandle::new(bridge, Arc::from("h"));
        state.cache().set("k", &1).await.unwrap();
        assert_eq!(state.store().get::<i32>("k").await.unwrap(), None);
        assert_eq!(state.cache().get::<i32>("k").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn keys_delete_and_clear() {
        for bridge in [StateBridge::in_memory(StateLimits::default()), sqlite_bridge().await] {
            for ns in [Namespace::Cache, Namespace::Store] {
                bridge.set(ns, "h", "b", &json!(2)).await.unwrap();
                bridge.set(ns, "h", "a", &json!(1)).await.unwrap();
                assert_eq!(bridge.keys(ns, "h").await.unwrap(), vec!["a", "b"]);

                assert!(bridge.delete(ns, "h", "a").await.unwrap());
                assert!(!bridge.delete(ns, "h", "a").await.unwrap());

                bridge.clear(ns, "h").await.unwrap();
                assert!(bridge.keys(ns, "h").await.unwrap().is_empty());
            }
        }
    }

    #[tokio::test]
    async fn shape_mismatch_is_serialization_error() {
        let bridge = StateBridge::in_memory(StateLimits::default());
        bridge.set(Namespace::Cache, "h", "k", "text").await.unwrap();
        let err = bridge.get::<u32>(Namespace::Cache, "h", "k").await.unwrap_err();
        assert!(matches!(err, StateError::Serialization(_)));
    }

    #[tokio::test]
    async fn unrepresentable_value_is_serialization_error() {
        let bridge = StateBridge::in_memory(StateLimits::default());
        let mut bad = HashMap::new();
        bad.insert(vec![1u8], 1);
        let err = bridge.set(Namespace::Cache, "h", "k", &bad).await.unwrap_err();
        assert!(matches!(err, StateError::Serialization(_)));
    }

    #[tokio::test]
    async fn cache_limits_are_enforced() {
        let bridge = StateBridge::in_memory(StateLimits {
            per_handler: 16,
            total: 24,
        });
        bridge.set(Namespace::Cache, "a", "k", "12345678").await.unwrap();
        let err = bridge
            .set(Namespace::Cache, "a", "k2", "12345678")
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::LimitExceeded { .. }));

        // Overwriting a key does not count its old value.
        bridge.set(Namespace::Cache, "a", "k", "1234567890").await.unwrap();

        let err = bridge
            .set(Namespace::Cache, "b", "k", "1234567890")
            .await
            .unwrap_err();
        assert_eq!(err, StateError::total_limit(24));
    }

    #[tokio::test]
    async fn store_limit_is_enforced() {
        let bridge = sqlite_bridge().await;
        let big = "x".repeat(2000);
        let err = bridge.set(Namespace::Store, "h", "k", &big).await.unwrap_err();
        assert_eq!(err, StateError::handler_limit("h", 1024));
        assert_eq!(bridge.get::<String>(Namespace::Store, "h", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_writes_to_one_key_leave_last_writer() {
        let bridge = Arc::new(StateBridge::in_memory(StateLimits::default()));
        let mut tasks = Vec::new();
        for i in 0..20 {
            let bridge = Arc::clone(&bridge);
            tasks.push(tokio::spawn(async move {
                bridge.set(Namespace::Cache, "h", "k", &i).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        let last = bridge.get::<i32>(Namespace::Cache, "h", "k").await.unwrap();
        assert!(last.is_some_and(|v| (0..20).contains(&v)));
        assert_eq!(bridge.lock_count(), 0);
    }

    async fn file_bridge(path: &Path) -> StateBridge {
        let store = SqliteStateStore::open(path, 1024 * 1024).await.unwrap();
        StateBridge::new(
            Arc::new(MemoryStateStore::new(StateLimits::default())),
            Arc::new(store),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_store_writes_to_different_keys_all_succeed() {
        let tmp = tempfile::tempdir().unwrap();
        let bridge = Arc::new(file_bridge(&tmp.path().join("state.db")).await);

        let mut tasks = Vec::new();
        for i in 0..200 {
            let bridge = Arc::clone(&bridge);
            tasks.push(tokio::spawn(async move {
                let handler = format!("h{}", i % 10);
                bridge
                    .set(Namespace::Store, &handler, &format!("k{i}"), &i)
                    .await
            }));
        }
        let mut failures = Vec::new();
        for task in tasks {
            if let Err(e) = task.await.unwrap() {
                failures.push(e.to_string());
            }
        }
        assert!(failures.is_empty(), "{failures:?}");

        for i in 0..200 {
            let handler = format!("h{}", i % 10);
            let got: Option<i32> = bridge
                .get(Namespace::Store, &handler, &format!("k{i}"))
                .await
                .unwrap();
            assert_eq!(got, Some(i));
        }
        assert_eq!(bridge.keys(Namespace::Store, "h3").await.unwrap().len(), 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_store_writes_to_one_key_all_commit() {
        let tmp = tempfile::tempdir().unwrap();
        let bridge = Arc::new(file_bridge(&tmp.path().join("state.db")).await);

        let mut tasks = Vec::new();
        for i in 0..50 {
            let bridge = Arc::clone(&bridge);
            tasks.push(tokio::spawn(async move {
                bridge.set(Namespace::Store, "h", "k", &i).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        let last = bridge.get::<i32>(Namespace::Store, "h", "k").await.unwrap();
        assert!(last.is_some_and(|v| (0..50).contains(&v)));
        assert_eq!(bridge.lock_count(), 0);
    }

    #[tokio::test]
    async fn last_completed_store_write_wins_across_connections() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.db");
        let first = file_bridge(&path).await;
        let second = file_bridge(&path).await;

        for i in 0..30 {
            let (writer, reader) = if i % 2 == 0 {
                (&first, &second)
            } else {
                (&second, &first)
            };
            writer.set(Namespace::Store, "h", "k", &i).await.unwrap();
            assert_eq!(reader.get::<i32>(Namespace::Store, "h", "k").await.unwrap(), Some(i));
        }
    }

    #[tokio::test]
    async fn store_limit_counts_replaced_value_once() {
        let bridge = sqlite_bridge().await;
        let value = "x".repeat(600);
        bridge.set(Namespace::Store, "h", "k", &value).await.unwrap();
        bridge.set(Namespace::Store, "h", "k", &value).await.unwrap();

        let err = bridge.set(Namespace::Store, "h", "k2", &value).await.unwrap_err();
        assert_eq!(err, StateError::handler_limit("h", 1024));
        // Other handlers have their own budget.
        bridge.set(Namespace::Store, "other", "k2", &value).await.unwrap();
    }

    #[tokio::test]
    async fn durable_store_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("state.db");

        let store = SqliteStateStore::open(&path, 1024).await.unwrap();
        store.set("h", "k", "\"v\"".into()).await.unwrap();
        drop(store);

        let reopened = SqliteStateStore::open(&path, 1024).await.unwrap();
        assert_eq!(reopened.get("h", "k").await.unwrap().as_deref(), Some("\"v\""));
    }

    #[test]
    fn namespace_parsing() {
        assert_eq!("cache".parse::<Namespace>().unwrap(), Namespace::Cache);
        assert_eq!("store".parse::<Namespace>().unwrap(), Namespace::Store);
        assert!(matches!(
            "global".parse::<Namespace>().unwrap_err(),
            StateError::UnknownNamespace(_)
        ));
    }
}
