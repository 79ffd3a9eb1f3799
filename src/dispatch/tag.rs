//! Request-scoped route tag and the header protocol spoken with the sandbox.
//!
//! The tag is stored in the request's own extensions when the dispatcher
//! picks the sandbox, and taken back out by [`inject_route_headers`] when the
//! outgoing request is built. Taking it is what makes injection happen once.

use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};
use uuid::Uuid;

/// Marks a request that must not be dispatched to edge functions again.
pub const X_PASSTHROUGH: HeaderName = HeaderName::from_static("x-passthrough");
/// Comma-joined names of the functions the sandbox should run.
pub const X_EDGE_FUNCTIONS: HeaderName = HeaderName::from_static("x-edge-functions");
/// `host:port` of the main server, where the sandbox sends pass-through calls.
pub const X_EDGE_PASS_HOST: HeaderName = HeaderName::from_static("x-edge-pass-host");
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

pub const PASSTHROUGH_VALUE: &str = "1";

/// Routing decision attached to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTag {
    functions: Vec<String>,
    pass_host: String,
    request_id: Uuid,
}

impl RouteTag {
    /// New tag with a fresh request id.
    pub fn new(functions: Vec<String>, pass_host: impl Into<String>) -> Self {
        Self {
            functions,
            pass_host: pass_host.into(),
            request_id: Uuid::new_v4(),
        }
    }

    pub fn functions(&self) -> &[String] {
        &self.functions
    }

    pub fn pass_host(&self) -> &str {
        &self.pass_host
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn functions_header(&self) -> String {
        self.functions.join(",")
    }

    /// The four headers, in a fixed order.
    pub fn header_pairs(&self) -> [(HeaderName, String); 4] {
        [
            (X_EDGE_FUNCTIONS, self.functions_header()),
            (X_EDGE_PASS_HOST, self.pass_host.clone()),
            (X_PASSTHROUGH, PASSTHROUGH_VALUE.to_string()),
            (X_REQUEST_ID, self.request_id.to_string()),
        ]
    }
}

/// True if the request already went through edge dispatch once.
pub fn has_passthrough_marker(headers: &HeaderMap) -> bool {
    headers.contains_key(X_PASSTHROUGH)
}

/// Move the request's route tag, if any, into its headers.
///
/// Existing values of the four headers are overwritten. Returns the tag that
/// was applied.
pub fn inject_route_headers<B>(request: &mut Request<B>) -> Option<RouteTag> {
    let tag = request.extensions_mut().remove::<RouteTag>()?;

    let headers = request.headers_mut();
    for (name, value) in tag.header_pairs() {
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(name, value);
            }
            Err(_) => tracing::warn!(
                header = %name,
                value = %value,
                request_id = %tag.request_id,
                "Dropping edge routing header with an invalid value"
            ),
        }
    }

    Some(tag)
}
