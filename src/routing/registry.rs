//! Route registry: declarations, bound functions, and path matching.
//!
//! # Responsibilities
//! - Hold the current declaration and function sets
//! - Refresh them on demand, only when something changed
//! - Publish the function set to the sandbox on every applied refresh
//! - Match request paths against declarations
//!
//! # Design Decisions
//! - Readers load an immutable snapshot (arc-swap); a refresh builds a new
//!   snapshot and swaps it in whole, so a match sees the state before or
//!   after a refresh, never a mix
//! - Refreshes are serialized by an async mutex; callers queued behind a
//!   refresh re-check the epoch and return once it has been applied
//! - Invalidation bumps an epoch; the registry is stale until a refresh
//!   started at or after that epoch completes
//! - A refresh that fails or is cancelled leaves the registry stale and the
//!   previous snapshot in place
//! - Malformed patterns are logged and never match

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use thiserror::Error;

use crate::config::FunctionDeclaration;
use crate::isolate::error::{BootstrapError, ControlError};
use crate::isolate::runtime::FunctionBundle;
use crate::observability::metrics;
use crate::routing::pattern::RoutePattern;
use crate::routing::source::{
    FunctionSource, ImportMap, InternalFunctionSupplier, RegisteredFunction, SourceError,
};

/// Error raised by a registry refresh.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("sandbox unavailable: {0}")]
    Sandbox(#[from] BootstrapError),
    #[error("failed to submit functions to the sandbox: {0}")]
    Control(#[from] ControlError),
}

/// Receives the function set after each applied refresh.
#[async_trait]
pub trait FunctionSink: Send + Sync {
    async fn publish(&self, bundle: &FunctionBundle) -> Result<(), RegistryError>;
}

/// Outcome of matching one path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    /// Bound functions to invoke, in declaration order, without duplicates.
    pub function_names: Vec<String>,
    /// Declared functions with no backing source, without duplicates.
    pub orphaned_declarations: Vec<String>,
}

impl MatchResult {
    pub fn is_empty(&self) -> bool {
        self.function_names.is_empty() && self.orphaned_declarations.is_empty()
    }
}

#[derive(Debug)]
struct CompiledRoute {
    function: String,
    pattern: RoutePattern,
    excluded: Vec<RoutePattern>,
}

impl CompiledRoute {
    fn compile(declaration: &FunctionDeclaration) -> Option<Self> {
        let compile = |source: &str| match RoutePattern::parse(source) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                tracing::warn!(
                    function = %declaration.function,
                    error = %e,
                    "Ignoring edge function declaration with an invalid path"
                );
                None
            }
        };

        let pattern = compile(&declaration.path)?;
        let excluded = declaration
            .excluded_path
            .iter()
            .map(|p| compile(p))
            .collect::<Option<Vec<_>>>()?;

        Some(Self {
            function: declaration.function.clone(),
            pattern,
            excluded,
        })
    }

    fn matches(&self, path: &str) -> bool {
        self.pattern.matches(path) && !self.excluded.iter().any(|p| p.matches(path))
    }
}

/// Immutable view of the registry at one point in time.
#[derive(Debug, Default)]
struct RouteSnapshot {
    generation: u64,
    declarations: Vec<FunctionDeclaration>,
    functions: Vec<RegisteredFunction>,
    import_map: ImportMap,
    routes: Vec<CompiledRoute>,
    bound: HashSet<String>,
}

impl RouteSnapshot {
    fn build(
        generation: u64,
        declarations: Vec<FunctionDeclaration>,
        functions: Vec<RegisteredFunction>,
        import_map: ImportMap,
    ) -> Self {
        let routes = declarations.iter().filter_map(CompiledRoute::compile).collect();
        let bound = functions.iter().map(|f| f.name.clone()).collect();
        Self {
            generation,
            declarations,
            functions,
            import_map,
            routes,
            bound,
        }
    }

    fn same_inputs(&self, other: &RouteSnapshot) -> bool {
        self.declarations == other.declarations
            && self.functions == other.functions
            && self.import_map == other.import_map
    }

    fn match_path(&self, path: &str) -> MatchResult {
        let mut result = MatchResult::default();
        for route in self.routes.iter().filter(|r| r.matches(path)) {
            let target = if self.bound.contains(&route.function) {
                &mut result.function_names
            } else {
                &mut result.orphaned_declarations
            };
            if !target.contains(&route.function) {
                target.push(route.function.clone());
            }
        }
        result
    }
}

/// Declarations and functions known to the dispatcher.
pub struct RouteRegistry {
    declarations: ArcSwap<Vec<FunctionDeclaration>>,
    user_import_map: Option<PathBuf>,
    source: Arc<dyn FunctionSource>,
    internal: Arc<dyn InternalFunctionSupplier>,
    sink: Arc<dyn FunctionSink>,
    snapshot: ArcSwap<RouteSnapshot>,
    /// Bumped on every invalidation.
    epoch: AtomicU64,
    /// Epoch the current snapshot was built for. Stale while behind `epoch`.
    applied: AtomicU64,
    refresh_lock: tokio::sync::Mutex<()>,
    refreshes: AtomicU64,
}

impl RouteRegistry {
    pub fn new(
        declarations: Vec<FunctionDeclaration>,
        user_import_map: Option<PathBuf>,
        source: Arc<dyn FunctionSource>,
        internal: Arc<dyn InternalFunctionSupplier>,
        sink: Arc<dyn FunctionSink>,
    ) -> Self {
        Self {
            declarations: ArcSwap::from_pointee(declarations),
            user_import_map,
            source,
            internal,
            sink,
            snapshot: ArcSwap::from_pointee(RouteSnapshot::default()),
            epoch: AtomicU64::new(1),
            applied: AtomicU64::new(0),
            refresh_lock: tokio::sync::Mutex::new(()),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Bring the registry up to date. Does nothing unless something changed
    /// since the last applied refresh.
    ///
    /// Callers arriving while a refresh is running wait for it and then see
    /// its snapshot. The registry stays stale until a refresh completes, so a
    /// failed or cancelled refresh is retried by the next caller, and an
    /// invalidation that lands mid-refresh is never lost.
    pub async fn initialize(&self) -> Result<(), RegistryError> {
        if !self.is_stale() {
            return Ok(());
        }

        let _lock = self.refresh_lock.lock().await;
        let target = self.epoch.load(Ordering::Acquire);
        if self.applied.load(Ordering::Acquire) >= target {
            return Ok(());
        }

        self.refresh().await?;
        self.applied.store(target, Ordering::Release);
        Ok(())
    }

    async fn refresh(&self) -> Result<(), RegistryError> {
        let mut functions = self.source.discover().await?;
        let internal = self.internal.internal_functions().await?;

        let mut names: HashSet<String> = functions.iter().map(|f| f.name.clone()).collect();
        for function in internal.functions {
            if names.insert(function.name.clone()) {
                functions.push(function);
            } else {
                tracing::debug!(function = %function.name, "User edge function shadows internal function");
            }
        }

        let mut import_map = ImportMap::default();
        for path in self.user_import_map.iter().chain(internal.import_map.iter()) {
            import_map.merge(ImportMap::load(path).await?);
        }

        let mut declarations = self.declarations.load_full().as_ref().clone();
        declarations.extend(internal.declarations);

        let current = self.snapshot.load_full();
        let next = RouteSnapshot::build(current.generation + 1, declarations, functions, import_map);
        if current.generation > 0 && current.same_inputs(&next) {
            tracing::debug!("Edge functions unchanged, skipping refresh");
            return Ok(());
        }

        self.sink
            .publish(&FunctionBundle {
                functions: next.functions.clone(),
                import_map: next.import_map.clone(),
            })
            .await?;

        tracing::info!(
            generation = next.generation,
            declarations = next.declarations.len(),
            functions = next.functions.len(),
            "Edge function routes updated"
        );
        metrics::record_refresh(next.functions.len());
        self.snapshot.store(Arc::new(next));
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Match a request path against the current snapshot.
    pub fn match_url_path(&self, path: &str) -> MatchResult {
        self.snapshot.load().match_path(path)
    }

    /// Replace the configured declarations. Takes effect on the next
    /// `initialize()`.
    pub fn update_declarations(&self, declarations: Vec<FunctionDeclaration>) {
        if **self.declarations.load() == declarations {
            return;
        }
        self.declarations.store(Arc::new(declarations));
        self.invalidate();
    }

    /// Mark the registry stale (e.g. function files changed on disk).
    pub fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_stale(&self) -> bool {
        self.applied.load(Ordering::Acquire) < self.epoch.load(Ordering::Acquire)
    }

    /// Number of configured (non-internal) declarations.
    pub fn declaration_count(&self) -> usize {
        self.declarations.load().len()
    }

    /// Number of applied refreshes.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Names of the functions in the current snapshot.
    pub fn function_names(&self) -> Vec<String> {
        self.snapshot
            .load()
            .functions
            .iter()
            .map(|f| f.name.clone())
            .collect()
    }
}
