//! HTTP server setup and request forwarding.
//!
//! # Responsibilities
//! - Create the Axum router with a catch-all proxy handler
//! - Wire up middleware (tracing, timeout)
//! - Ask the dispatcher where each request goes
//! - Forward to the sandbox or the origin, with routing headers injected
//! - Serve until the shutdown broadcast fires

use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{
        uri::{Authority, PathAndQuery, Scheme},
        Request, StatusCode, Uri, Version,
    },
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::DispatchConfig;
use crate::dispatch::{inject_route_headers, Dispatcher};
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub client: Client<HttpConnector, Body>,
    pub origin: SocketAddr,
}

/// HTTP server in front of the origin and the edge functions sandbox.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &DispatchConfig, dispatcher: Arc<Dispatcher>) -> io::Result<Self> {
        let origin: SocketAddr = config.origin.address.parse().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid origin address {}: {e}", config.origin.address),
            )
        })?;

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let state = AppState {
            dispatcher,
            client,
            origin,
        };

        Ok(Self {
            router: Self::build_router(config, state),
        })
    }

    #[allow(deprecated)]
    fn build_router(config: &DispatchConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// The configured router, for serving on a custom listener or in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Accept connections on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Dispatch, then forward to the sandbox or the origin.
async fn proxy_handler(State(state): State<AppState>, mut request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let method = request.method().to_string();

    let (upstream, kind) = match state.dispatcher.dispatch(&mut request).await {
        Some(sandbox) => (sandbox, "edge"),
        None => (state.origin, "origin"),
    };

    let mut uri_parts = request.uri().clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    if let Ok(authority) = Authority::from_str(&upstream.to_string()) {
        uri_parts.authority = Some(authority);
    }
    match Uri::from_parts(uri_parts) {
        Ok(uri) => *request.uri_mut() = uri,
        Err(e) => {
            tracing::error!(error = %e, upstream = %upstream, "Failed to build upstream URI");
            metrics::record_request(&method, 502, kind, start_time);
            return (StatusCode::BAD_GATEWAY, "Invalid upstream URI").into_response();
        }
    }
    *request.version_mut() = Version::HTTP_11;

    let request_id = inject_route_headers(&mut request).map(|tag| tag.request_id());

    tracing::debug!(
        request_id = ?request_id,
        method = %method,
        uri = %request.uri(),
        kind,
        "Forwarding request"
    );

    match state.client.request(request).await {
        Ok(response) => {
            metrics::record_request(&method, response.status().as_u16(), kind, start_time);
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(
                request_id = ?request_id,
                upstream = %upstream,
                kind,
                error = %e,
                "Upstream error"
            );
            metrics::record_request(&method, 502, kind, start_time);
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}
