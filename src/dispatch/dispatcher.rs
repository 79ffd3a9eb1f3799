//! Per-request edge dispatch decision.
//!
//! # Responsibilities
//! - Skip requests that already passed through edge dispatch
//! - Skip everything when no edge functions are configured
//! - Wait for the sandbox and the registry before matching
//! - Tag routed requests and hand back the sandbox address
//!
//! # Design Decisions
//! - Every failure degrades to "serve from origin"; dispatch never errors
//! - No retries and no timeouts at this layer
//! - The tag lives in the request's own extensions, never in shared state

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::Request;

use crate::dispatch::tag::{has_passthrough_marker, RouteTag};
use crate::isolate::IsolateBootstrapper;
use crate::observability::metrics::{self, DispatchOutcome};
use crate::routing::RouteRegistry;

/// Decides, per request, whether edge functions handle it.
pub struct Dispatcher {
    registry: Arc<RouteRegistry>,
    bootstrapper: Arc<IsolateBootstrapper>,
    pass_host: String,
    declarations: AtomicUsize,
    internal_functions: usize,
}

impl Dispatcher {
    /// `pass_host` is the `host:port` of the main server. `declarations` and
    /// `internal_functions` decide whether edge dispatch is enabled at all.
    pub fn new(
        registry: Arc<RouteRegistry>,
        bootstrapper: Arc<IsolateBootstrapper>,
        pass_host: impl Into<String>,
        declarations: usize,
        internal_functions: usize,
    ) -> Self {
        Self {
            registry,
            bootstrapper,
            pass_host: pass_host.into(),
            declarations: AtomicUsize::new(declarations),
            internal_functions,
        }
    }

    pub fn has_edge_functions(&self) -> bool {
        self.declarations.load(Ordering::Relaxed) > 0 || self.internal_functions > 0
    }

    /// Apply a new configured declaration count after a config reload.
    pub fn reconfigure(&self, declarations: usize) {
        self.declarations.store(declarations, Ordering::Relaxed);
    }

    /// Route `request` to the sandbox, or return `None` to serve it from the
    /// origin. A routed request carries a [`RouteTag`] in its extensions.
    pub async fn dispatch<B>(&self, request: &mut Request<B>) -> Option<SocketAddr> {
        if has_passthrough_marker(request.headers()) {
            metrics::record_dispatch(DispatchOutcome::Passthrough);
            return None;
        }
        if !self.has_edge_functions() {
            metrics::record_dispatch(DispatchOutcome::Disabled);
            return None;
        }

        let handle = match self.bootstrapper.ensure_started().await {
            Ok(handle) => handle,
            Err(e) => {
                // Already reported when startup failed.
                tracing::debug!(error = %e, "Edge functions unavailable, passing through");
                metrics::record_dispatch(DispatchOutcome::Unavailable);
                return None;
            }
        };

        if let Err(e) = self.registry.initialize().await {
            tracing::error!(error = %e, "Failed to refresh edge functions");
            metrics::record_dispatch(DispatchOutcome::RefreshFailed);
            return None;
        }

        let path = request.uri().path();
        let matched = self.registry.match_url_path(path);

        for function in &matched.orphaned_declarations {
            tracing::warn!(
                function = %function,
                path = %path,
                "Edge function is declared for this path but no such function exists"
            );
        }
        if !matched.orphaned_declarations.is_empty() {
            metrics::record_orphaned(matched.orphaned_declarations.len());
        }

        if matched.function_names.is_empty() {
            metrics::record_dispatch(DispatchOutcome::Unmatched);
            return None;
        }

        let tag = RouteTag::new(matched.function_names, self.pass_host.clone());
        tracing::debug!(
            request_id = %tag.request_id(),
            functions = %tag.functions_header(),
            path = %path,
            sandbox = %handle.address(),
            "Dispatching request to edge functions"
        );
        request.extensions_mut().insert(tag);
        metrics::record_dispatch(DispatchOutcome::Routed);

        Some(handle.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use axum::body::Body;

    use crate::config::FunctionDeclaration;
    use crate::dispatch::tag::{PASSTHROUGH_VALUE, X_PASSTHROUGH};
    use crate::isolate::{
        BootstrapError, BootstrapOptions, ControlError, FunctionBundle, IsolateRuntime,
        IsolateServer, ServeOptions, SubmitReport,
    };
    use crate::net::PortAllocator;
    use crate::routing::{
        FunctionSource, InternalDirectory, RegisteredFunction, SourceError,
    };

    /// Collects formatted log output for assertions.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
            let writer = self.clone();
            tracing_subscriber::fmt()
                .with_writer(move || writer.clone())
                .with_ansi(false)
                .with_max_level(tracing::Level::WARN)
                .finish()
        }

        fn warnings(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .lines()
                .filter(|line| line.contains("WARN"))
                .map(str::to_string)
                .collect()
        }
    }

    struct FixedPort;

    impl PortAllocator for FixedPort {
        fn free_port(&self) -> io::Result<u16> {
            Ok(7001)
        }
    }

    #[derive(Default)]
    struct CountingRuntime {
        serves: AtomicUsize,
        fail: bool,
    }

    struct NullServer;

    #[async_trait]
    impl IsolateServer for NullServer {
        async fn submit(&self, _bundle: &FunctionBundle) -> Result<SubmitReport, ControlError> {
            Ok(SubmitReport::default())
        }
    }

    #[async_trait]
    impl IsolateRuntime for CountingRuntime {
        async fn serve(
            &self,
            _options: ServeOptions,
        ) -> Result<Box<dyn IsolateServer>, BootstrapError> {
            self.serves.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BootstrapError::Spawn("no such file".into()));
            }
            Ok(Box::new(NullServer))
        }
    }

    #[derive(Default)]
    struct CountingSource {
        discoveries: AtomicUsize,
    }

    #[async_trait]
    impl FunctionSource for CountingSource {
        async fn discover(&self) -> Result<Vec<RegisteredFunction>, SourceError> {
            self.discoveries.fetch_add(1, Ordering::SeqCst);
            Ok(vec![RegisteredFunction::new("f1", "/fns/f1.ts")])
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        runtime: Arc<CountingRuntime>,
        source: Arc<CountingSource>,
    }

    fn harness(declarations: Vec<FunctionDeclaration>, fail: bool) -> Harness {
        let runtime = Arc::new(CountingRuntime {
            fail,
            ..Default::default()
        });
        let source = Arc::new(CountingSource::default());
        let bootstrapper = Arc::new(IsolateBootstrapper::new(
            runtime.clone(),
            Arc::new(FixedPort),
            BootstrapOptions::default(),
        ));
        let count = declarations.len();
        let registry = Arc::new(RouteRegistry::new(
            declarations,
            None,
            source.clone(),
            Arc::new(InternalDirectory::new(None)),
            bootstrapper.clone(),
        ));
        Harness {
            dispatcher: Dispatcher::new(registry, bootstrapper, "127.0.0.1:8888", count, 0),
            runtime,
            source,
        }
    }

    fn request(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_passthrough_short_circuits() {
        let h = harness(vec![FunctionDeclaration::new("f1", "/*")], false);
        let mut req = request("/api/hello");
        req.headers_mut()
            .insert(X_PASSTHROUGH, PASSTHROUGH_VALUE.parse().unwrap());

        assert_eq!(h.dispatcher.dispatch(&mut req).await, None);
        assert!(req.extensions().get::<RouteTag>().is_none());
        assert_eq!(h.runtime.serves.load(Ordering::SeqCst), 0);
        assert_eq!(h.source.discoveries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_edge_functions_never_bootstraps() {
        let h = harness(Vec::new(), false);
        assert!(!h.dispatcher.has_edge_functions());

        let mut req = request("/anything");
        assert_eq!(h.dispatcher.dispatch(&mut req).await, None);
        assert_eq!(h.runtime.serves.load(Ordering::SeqCst), 0);
        assert_eq!(h.source.discoveries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_routes_and_tags_request() {
        let h = harness(vec![FunctionDeclaration::new("f1", "/api/*")], false);

        let mut req = request("/api/hello?x=1");
        let addr = h.dispatcher.dispatch(&mut req).await;
        assert_eq!(addr, Some("127.0.0.1:7001".parse().unwrap()));

        let tag = req.extensions().get::<RouteTag>().unwrap();
        assert_eq!(tag.functions(), ["f1".to_string()]);
        assert_eq!(tag.pass_host(), "127.0.0.1:8888");

        let mut other = request("/static/app.js");
        assert_eq!(h.dispatcher.dispatch(&mut other).await, None);
        assert!(other.extensions().get::<RouteTag>().is_none());
        assert_eq!(h.source.discoveries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_orphaned_only_match_passes_through() {
        let h = harness(vec![FunctionDeclaration::new("ghost", "/api/*")], false);

        let mut req = request("/api/hello");
        assert_eq!(h.dispatcher.dispatch(&mut req).await, None);
        assert!(req.extensions().get::<RouteTag>().is_none());
    }

    #[tokio::test]
    async fn test_orphaned_declaration_logs_warning() {
        let logs = LogBuffer::default();
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        let h = harness(vec![FunctionDeclaration::new("ghost", "/api/*")], false);

        let mut req = request("/api/hello");
        assert_eq!(h.dispatcher.dispatch(&mut req).await, None);

        let warnings = logs.warnings();
        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert!(warnings[0].contains("ghost"));
        assert!(warnings[0].contains("/api/hello"));
    }

    #[tokio::test]
    async fn test_orphan_warns_while_bound_function_dispatches() {
        let logs = LogBuffer::default();
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        let h = harness(
            vec![
                FunctionDeclaration::new("ghost", "/api/*"),
                FunctionDeclaration::new("f1", "/api/*"),
            ],
            false,
        );

        let mut req = request("/api/hello");
        assert_eq!(
            h.dispatcher.dispatch(&mut req).await,
            Some("127.0.0.1:7001".parse().unwrap())
        );
        let tag = req.extensions().get::<RouteTag>().unwrap();
        assert_eq!(tag.functions(), ["f1".to_string()]);

        let warnings = logs.warnings();
        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert!(warnings[0].contains("ghost"));
        assert!(!warnings[0].contains("f1"));
    }

    #[tokio::test]
    async fn test_bootstrap_failure_degrades() {
        let h = harness(vec![FunctionDeclaration::new("f1", "/*")], true);

        for _ in 0..3 {
            let mut req = request("/api");
            assert_eq!(h.dispatcher.dispatch(&mut req).await, None);
        }
        assert_eq!(h.runtime.serves.load(Ordering::SeqCst), 1);
        assert_eq!(h.source.discoveries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reconfigure_toggles_dispatch() {
        let h = harness(vec![FunctionDeclaration::new("f1", "/*")], false);
        h.dispatcher.reconfigure(0);
        assert!(!h.dispatcher.has_edge_functions());

        let mut req = request("/x");
        assert_eq!(h.dispatcher.dispatch(&mut req).await, None);
        assert_eq!(h.runtime.serves.load(Ordering::SeqCst), 0);

        h.dispatcher.reconfigure(1);
        assert!(h.dispatcher.dispatch(&mut req).await.is_some());
    }
}
