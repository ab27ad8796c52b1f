//! Query context
//!
//! A [`QueryContext`] owns the execution surfaces a query can run against
//! and hands out [`Query`] builders. Clones share the same backends.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::adapter::{ContentResolver, HttpContentResolver, LocalStore, SqliteStore};
use super::config::Config;
use super::error::Result;
use super::query::{Query, QueryKind, Target};
use super::record::{RawRow, Record};
use super::runner::{AsyncRunner, CompletionHandle};

#[derive(Clone)]
pub struct QueryContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    name: String,
    local: Option<Arc<dyn LocalStore>>,
    remote: Option<Arc<dyn ContentResolver>>,
    runner: Option<AsyncRunner>,
    completions: Option<CompletionHandle>,
    closed: AtomicBool,
}

pub struct QueryContextBuilder {
    name: String,
    local: Option<Arc<dyn LocalStore>>,
    remote: Option<Arc<dyn ContentResolver>>,
    runner: Option<AsyncRunner>,
    completions: Option<CompletionHandle>,
}

impl QueryContextBuilder {
    pub fn local_store(mut self, store: impl LocalStore + 'static) -> Self {
        self.local = Some(Arc::new(store));
        self
    }

    pub fn shared_local_store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.local = Some(store);
        self
    }

    pub fn resolver(mut self, resolver: impl ContentResolver + 'static) -> Self {
        self.remote = Some(Arc::new(resolver));
        self
    }

    pub fn shared_resolver(mut self, resolver: Arc<dyn ContentResolver>) -> Self {
        self.remote = Some(resolver);
        self
    }

    /// Background work goes through `runner` instead of one thread per call
    pub fn runner(mut self, runner: AsyncRunner) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Where async results are delivered
    pub fn completions(mut self, handle: CompletionHandle) -> Self {
        self.completions = Some(handle);
        self
    }

    pub fn build(self) -> QueryContext {
        QueryContext {
            inner: Arc::new(ContextInner {
                name: self.name,
                local: self.local,
                remote: self.remote,
                runner: self.runner,
                completions: self.completions,
                closed: AtomicBool::new(false),
            }),
        }
    }
}

impl QueryContext {
    pub fn builder(name: &str) -> QueryContextBuilder {
        QueryContextBuilder {
            name: name.to_string(),
            local: None,
            remote: None,
            runner: None,
            completions: None,
        }
    }

    /// Build a context from a project's `airquery.config.json` settings.
    ///
    /// A bounded runner is attached when called inside a tokio runtime.
    /// Queries on such a context are still blocking calls, so from async
    /// code run them through `run_async`/`all_async` or `spawn_blocking`.
    pub fn from_config(config: &Config, project_dir: &Path) -> Result<Self> {
        let mut builder = Self::builder(&project_dir.to_string_lossy());

        if let Some(db_path) = config.database_path(project_dir) {
            tracing::info!(path = %db_path.display(), "Opening local store");
            builder = builder.local_store(SqliteStore::new(&db_path)?);
        }
        if let Some(remote) = &config.remote {
            tracing::info!(base_url = %remote.base_url, "Using remote content provider");
            let resolver =
                HttpContentResolver::with_timeout(&remote.base_url, Duration::from_secs(remote.timeout_secs))?;
            builder = builder.resolver(resolver);
        }
        if let Some(runner) = AsyncRunner::current(config.runner.max_in_flight) {
            builder = builder.runner(runner);
        }

        Ok(builder.build())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// A context sharing this one's backends and runner but with its own
    /// name and lifecycle, and no completion handle
    pub fn isolated(&self, name: &str) -> Self {
        QueryContext {
            inner: Arc::new(ContextInner {
                name: name.to_string(),
                local: self.inner.local.clone(),
                remote: self.inner.remote.clone(),
                runner: self.inner.runner.clone(),
                completions: None,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Deactivate this context. SELECTs then return `None` and writes fail.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(context = %self.inner.name, "Query context closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn has_local_store(&self) -> bool {
        self.local_store().is_some()
    }

    pub fn has_resolver(&self) -> bool {
        self.resolver().is_some()
    }

    pub(crate) fn local_store(&self) -> Option<&Arc<dyn LocalStore>> {
        if self.is_closed() {
            return None;
        }
        self.inner.local.as_ref()
    }

    pub(crate) fn resolver(&self) -> Option<&Arc<dyn ContentResolver>> {
        if self.is_closed() {
            return None;
        }
        self.inner.remote.as_ref()
    }

    pub(crate) fn runner(&self) -> Option<&AsyncRunner> {
        self.inner.runner.as_ref()
    }

    pub(crate) fn completions(&self) -> Option<&CompletionHandle> {
        self.inner.completions.as_ref()
    }

    // ------------------------------------------------------------------
    // Query constructors
    // ------------------------------------------------------------------

    pub fn select<R: Record>(&self, target: impl Into<Target>) -> Result<Query<R>> {
        Query::new(self.clone(), target.into(), QueryKind::Select, true)
    }

    pub fn insert_into<R: Record>(&self, target: impl Into<Target>) -> Result<Query<R>> {
        Query::new(self.clone(), target.into(), QueryKind::Insert, true)
    }

    pub fn update<R: Record>(&self, target: impl Into<Target>) -> Result<Query<R>> {
        Query::new(self.clone(), target.into(), QueryKind::Update, true)
    }

    pub fn delete_from<R: Record>(&self, target: impl Into<Target>) -> Result<Query<R>> {
        Query::new(self.clone(), target.into(), QueryKind::Delete, true)
    }

    /// DELETE without a row type. No table is created and no cascade runs.
    pub fn delete_raw(&self, target: impl Into<Target>) -> Result<Query<RawRow>> {
        Query::new(self.clone(), target.into(), QueryKind::Delete, false)
    }
}

impl std::fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryContext")
            .field("name", &self.inner.name)
            .field("local", &self.inner.local.is_some())
            .field("remote", &self.inner.remote.is_some())
            .field("runner", &self.inner.runner.is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::RemoteConfig;

    #[test]
    fn test_isolated_shares_backends() {
        let ctx = QueryContext::builder("main")
            .local_store(SqliteStore::in_memory().unwrap())
            .build();
        let child = ctx.isolated("[@fk]:pets//owner_id");

        assert_eq!(child.name(), "[@fk]:pets//owner_id");
        assert!(child.has_local_store());
        assert!(!child.has_resolver());
        assert!(child.completions().is_none());

        ctx.close();
        assert!(ctx.is_closed());
        assert!(!child.is_closed());
        assert!(!ctx.has_local_store());
    }

    #[test]
    fn test_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default_for_database(Path::new("data/q.db"));
        let ctx = QueryContext::from_config(&config, dir.path()).unwrap();

        assert!(ctx.has_local_store());
        assert!(ctx.runner().is_none());
        assert!(dir.path().join("data/q.db").exists());
    }

    #[tokio::test]
    async fn test_from_config_inside_runtime_with_remote() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default_for_database(Path::new("q.db"));
        config.remote = Some(RemoteConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 2,
        });

        let ctx = QueryContext::from_config(&config, dir.path()).unwrap();
        assert!(ctx.has_local_store());
        assert!(ctx.has_resolver());
        assert_eq!(ctx.runner().map(AsyncRunner::max_in_flight), Some(4));
    }
}
