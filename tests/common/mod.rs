//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{http::HeaderMap, Router};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use edge_dispatch::config::FunctionDeclaration;
use edge_dispatch::dispatch::{X_EDGE_FUNCTIONS, X_EDGE_PASS_HOST, X_PASSTHROUGH, X_REQUEST_ID};
use edge_dispatch::isolate::{
    BootstrapError, ControlError, ErrorFormatters, FunctionBundle, IsolateRuntime, IsolateServer,
    LogProgress, ServeOptions, SubmitReport,
};
use edge_dispatch::lifecycle::EdgeServices;
use edge_dispatch::net::LocalPortAllocator;
use edge_dispatch::routing::{
    FunctionSource, InternalFunctionSupplier, InternalFunctions, RegisteredFunction, SourceError,
};

/// Start a mock origin on an ephemeral port that answers every request with
/// a fixed body.
pub async fn start_mock_origin(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 8192];
                        let _ = socket.read(&mut buf).await;
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.len(),
                            response
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string()
}

/// Body returned by the fake sandbox:
/// `edge functions=<..> pass_host=<..> passthrough=<..> request_id=<..>`.
async fn echo_routing_headers(headers: HeaderMap) -> String {
    format!(
        "edge functions={} pass_host={} passthrough={} request_id={}",
        header(&headers, X_EDGE_FUNCTIONS.as_str()),
        header(&headers, X_EDGE_PASS_HOST.as_str()),
        header(&headers, X_PASSTHROUGH.as_str()),
        header(&headers, X_REQUEST_ID.as_str()),
    )
}

/// Isolate runtime that serves an in-process axum app echoing the routing
/// headers it receives.
#[derive(Default)]
pub struct FakeRuntime {
    pub serves: AtomicUsize,
    pub submitted: Arc<Mutex<Vec<FunctionBundle>>>,
    pub fail: bool,
    /// When set, `serve` waits for a notification before binding.
    pub gate: Option<Arc<Notify>>,
    /// Options of the last `serve` call.
    pub options: Mutex<Option<ServeOptions>>,
}

impl FakeRuntime {
    pub fn serve_count(&self) -> usize {
        self.serves.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<FunctionBundle> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn last_options(&self) -> Option<ServeOptions> {
        self.options.lock().unwrap().clone()
    }
}

struct FakeServer {
    submitted: Arc<Mutex<Vec<FunctionBundle>>>,
}

#[async_trait]
impl IsolateServer for FakeServer {
    async fn submit(&self, bundle: &FunctionBundle) -> Result<SubmitReport, ControlError> {
        self.submitted.lock().unwrap().push(bundle.clone());
        Ok(SubmitReport {
            loaded: bundle.functions.iter().map(|f| f.name.clone()).collect(),
            failures: Vec::new(),
        })
    }
}

#[async_trait]
impl IsolateRuntime for FakeRuntime {
    async fn serve(&self, options: ServeOptions) -> Result<Box<dyn IsolateServer>, BootstrapError> {
        self.serves.fetch_add(1, Ordering::SeqCst);
        *self.options.lock().unwrap() = Some(options.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(BootstrapError::Exited("exit status: 1".into()));
        }

        let listener = TcpListener::bind(SocketAddr::new(options.host, options.port))
            .await
            .map_err(|e| BootstrapError::Spawn(e.to_string()))?;
        let app = Router::new().fallback(echo_routing_headers);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Box::new(FakeServer {
            submitted: self.submitted.clone(),
        }))
    }
}

/// Function source with a mutable function list and a discovery counter.
#[derive(Default)]
pub struct CountingSource {
    functions: Mutex<Vec<RegisteredFunction>>,
    discoveries: AtomicUsize,
    delay: Option<Duration>,
}

impl CountingSource {
    pub fn with(names: &[&str]) -> Self {
        let source = Self::default();
        source.set(names);
        source
    }

    /// Make every discovery take `delay`.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set(&self, names: &[&str]) {
        *self.functions.lock().unwrap() = names
            .iter()
            .map(|n| RegisteredFunction::new(*n, format!("/user/{n}.ts")))
            .collect();
    }

    pub fn discoveries(&self) -> usize {
        self.discoveries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FunctionSource for CountingSource {
    async fn discover(&self) -> Result<Vec<RegisteredFunction>, SourceError> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.functions.lock().unwrap().clone())
    }
}

/// Internal supplier returning a fixed set.
#[derive(Default)]
pub struct StaticInternal(pub InternalFunctions);

impl StaticInternal {
    /// One internal function `name` declared on `path`.
    pub fn single(name: &str, path: &str) -> Self {
        Self(InternalFunctions {
            functions: vec![RegisteredFunction::new(name, format!("/internal/{name}.ts"))],
            declarations: vec![FunctionDeclaration::new(name, path)],
            ..Default::default()
        })
    }
}

#[async_trait]
impl InternalFunctionSupplier for StaticInternal {
    async fn internal_functions(&self) -> Result<InternalFunctions, SourceError> {
        Ok(self.0.clone())
    }
}

/// Services backed by the fakes above and a real local port allocator.
pub fn services(
    runtime: Arc<FakeRuntime>,
    source: Arc<CountingSource>,
    internal: StaticInternal,
) -> EdgeServices {
    EdgeServices {
        runtime,
        ports: Arc::new(LocalPortAllocator::default()),
        source,
        internal: Arc::new(internal),
        progress: Arc::new(LogProgress),
        formatters: ErrorFormatters::default(),
    }
}
