//! HTTP transport seam for the remote endpoint.
//!
//! The call layer talks to a [`Transport`] rather than to `reqwest`
//! directly, so the production client and in-memory test transports are
//! interchangeable.

use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use reqwest::redirect::Policy;
use reqwest::Client;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A fully built request to the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub method: HttpMethod,
    pub url: String,
    /// JSON body for POST requests.
    pub body: Option<Value>,
    /// Ask intermediaries not to serve a cached reply.
    pub no_cache: bool,
}

impl RemoteRequest {
    /// The `action` this request selects, from the query string or the body.
    pub fn action(&self) -> Option<String> {
        if let Some(action) = self
            .body
            .as_ref()
            .and_then(|b| b.get("action"))
            .and_then(Value::as_str)
        {
            return Some(action.to_string());
        }
        self.query_param("action")
    }

    /// Decoded value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let (_, query) = self.url.split_once('?')?;
        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == name).then(|| percent_decode(value))
        })
    }
}

/// Status and body text of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The endpoint could not be reached.
    #[error("Cannot reach endpoint: {0}")]
    Connect(String),

    /// The request did not complete within its time limit.
    #[error("Request timeout")]
    Timeout,

    /// Any other network failure.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = TransportResult<RawResponse>> + Send + 'a>>;

/// Sends requests to the remote endpoint.
pub trait Transport: Send + Sync {
    fn send(&self, request: RemoteRequest) -> TransportFuture<'_>;
}

/// Send through `transport`, cancelling the in-flight request after
/// `timeout` when one is given.
pub async fn send_with_timeout(
    transport: &dyn Transport,
    request: RemoteRequest,
    timeout: Option<Duration>,
) -> TransportResult<RawResponse> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        },
        None => transport.send(request).await,
    }
}

// ---------------------------------------------------------------------------
// Percent encoding
// ---------------------------------------------------------------------------

/// Percent-encode everything outside the RFC 3986 unreserved set.
pub(crate) fn percent_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for b in input.bytes() {
        let is_unreserved =
            b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' || b == b'~';
        if is_unreserved {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{b:02X}"));
        }
    }
    encoded
}

pub(crate) fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let decoded = match bytes.get(i..i + 3) {
            Some([b'%', hi, lo]) => std::str::from_utf8(&[*hi, *lo])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok()),
            _ => None,
        };
        match decoded {
            Some(b) => {
                out.push(b);
                i += 3;
            }
            None => {
                out.push(if bytes[i] == b'+' { b' ' } else { bytes[i] });
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ---------------------------------------------------------------------------
// reqwest transport
// ---------------------------------------------------------------------------

/// Production transport backed by `reqwest`. Redirects are followed.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, String> {
        let client = Client::builder()
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;
        Ok(Self { client })
    }
}

/// Convert a `reqwest::Error` into a transport error.
fn classify_error(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout;
    }
    if err.is_connect() {
        return TransportError::Connect(err.to_string());
    }
    if err.is_builder() {
        return TransportError::Other(format!("Invalid endpoint URL: {err}"));
    }
    TransportError::Other(format!("Network error: {err}"))
}

impl Transport for HttpTransport {
    fn send(&self, request: RemoteRequest) -> TransportFuture<'_> {
        Box::pin(async move {
            let mut builder = match request.method {
                HttpMethod::Get => self.client.get(&request.url),
                HttpMethod::Post => self.client.post(&request.url),
            };
            if request.no_cache {
                builder = builder.header(CACHE_CONTROL, "no-cache");
            }
            if let Some(body) = &request.body {
                builder = builder.header(CONTENT_TYPE, "application/json").json(body);
            }

            let resp = builder.send().await.map_err(|e| classify_error(&e))?;
            let status = resp.status().as_u16();
            let body = resp.text().await.map_err(|e| classify_error(&e))?;
            Ok(RawResponse { status, body })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_encode_keeps_unreserved() {
        assert_eq!(percent_encode("Pencil-2B_x.y~"), "Pencil-2B_x.y~");
        assert_eq!(percent_encode("ann@x.com"), "ann%40x.com");
        assert_eq!(percent_encode("a b&c=d"), "a%20b%26c%3Dd");
        assert_eq!(percent_encode("é"), "%C3%A9");
    }

    #[test]
    fn test_percent_decode_reverses_encode() {
        for input in ["ann@x.com", "a b&c=d", "é ü", "100%"] {
            assert_eq!(percent_decode(&percent_encode(input)), input);
        }
        assert_eq!(percent_decode("bad%zz"), "bad%zz");
    }

    #[test]
    fn test_request_action_from_query_and_body() {
        let get = RemoteRequest {
            method: HttpMethod::Get,
            url: "https://x.test/exec?action=addItem&name=Red%20Pen".into(),
            body: None,
            no_cache: true,
        };
        assert_eq!(get.action().as_deref(), Some("addItem"));
        assert_eq!(get.query_param("name").as_deref(), Some("Red Pen"));
        assert_eq!(get.query_param("missing"), None);

        let post = RemoteRequest {
            method: HttpMethod::Post,
            url: "https://x.test/exec".into(),
            body: Some(serde_json::json!({ "action": "deleteItem" })),
            no_cache: false,
        };
        assert_eq!(post.action().as_deref(), Some("deleteItem"));
    }

    #[test]
    fn test_raw_response_success_range() {
        let ok = RawResponse { status: 204, body: String::new() };
        let redirect = RawResponse { status: 302, body: String::new() };
        assert!(ok.is_success());
        assert!(!redirect.is_success());
    }
}
