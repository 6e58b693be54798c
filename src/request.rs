//! Inbound request abstraction (`spec.md` §1: the embedded HTTP server is an
//! external collaborator; the core only needs a "request context" seam).

use reqwest::header::HeaderMap;

/// What a handler needs from the inbound request: method, headers, and a
/// sink for the response. A real host (an axum/hyper handler, say) implements
/// this over its own request/response types; `OwnedRequestContext` is the
/// buffered, host-agnostic implementation this crate uses for its CLI and
/// tests.
pub trait RequestContext: Send + Sync {
    fn method(&self) -> &str;
    fn headers(&self) -> &HeaderMap;

    /// Write response status, headers, and full body. A host implementation
    /// streams this to its socket; write errors matching `broken pipe` /
    /// `connection reset by peer` are the caller's cue to treat cancellation
    /// as success (`spec.md` §5, `ClientDisconnect`).
    fn respond(&mut self, status: u16, headers: HeaderMap, body: Vec<u8>);
}

/// A fully in-memory `RequestContext`, used by the CLI's `fetch` subcommand
/// and by tests. Captures the response instead of writing it anywhere.
#[derive(Debug, Default)]
pub struct OwnedRequestContext {
    method: String,
    headers: HeaderMap,
    pub response: Option<OwnedResponse>,
}

#[derive(Debug, Clone)]
pub struct OwnedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl OwnedRequestContext {
    pub fn new(method: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method: method.into(),
            headers,
            response: None,
        }
    }

    pub fn get(headers: HeaderMap) -> Self {
        Self::new("GET", headers)
    }
}

impl RequestContext for OwnedRequestContext {
    fn method(&self) -> &str {
        &self.method
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn respond(&mut self, status: u16, headers: HeaderMap, body: Vec<u8>) {
        self.response = Some(OwnedResponse { status, headers, body });
    }
}

/// Returns `true` for the write-error text patterns `spec.md` §5 calls out as
/// a swallowed `ClientDisconnect` rather than a real failure.
pub fn is_client_disconnect(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("broken pipe") || lower.contains("connection reset")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_context_captures_response() {
        let mut ctx = OwnedRequestContext::get(HeaderMap::new());
        ctx.respond(200, HeaderMap::new(), b"hello".to_vec());
        assert_eq!(ctx.response.unwrap().body, b"hello");
    }

    #[test]
    fn recognises_disconnect_patterns() {
        assert!(is_client_disconnect("write: broken pipe"));
        assert!(is_client_disconnect("Connection reset by peer"));
        assert!(!is_client_disconnect("disk full"));
    }
}
