//! In-memory collaborators shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::indicator::{Indicator, ShowOptions};
use crate::transport::{
    RawResponse, RemoteRequest, Transport, TransportError, TransportFuture, TransportResult,
};

pub(crate) const ENDPOINT: &str = "https://sheets.example.test/macros/s/abc/exec";

#[derive(Clone)]
pub(crate) enum MockReply {
    Respond { status: u16, body: String },
    Fail(TransportError),
    /// Never completes; only a timeout ends the call.
    Hang,
    /// Waits for the gate before responding.
    Gated { gate: Arc<Notify>, status: u16, body: String },
}

impl MockReply {
    pub(crate) fn json(body: serde_json::Value) -> Self {
        Self::Respond {
            status: 200,
            body: body.to_string(),
        }
    }

    pub(crate) fn text(status: u16, body: &str) -> Self {
        Self::Respond {
            status,
            body: body.to_string(),
        }
    }

    async fn resolve(self) -> TransportResult<RawResponse> {
        match self {
            Self::Respond { status, body } => Ok(RawResponse { status, body }),
            Self::Fail(err) => Err(err),
            Self::Hang => std::future::pending().await,
            Self::Gated { gate, status, body } => {
                gate.notified().await;
                Ok(RawResponse { status, body })
            }
        }
    }
}

/// Scripted transport that records every request it sees.
pub(crate) struct MockTransport {
    script: Mutex<VecDeque<MockReply>>,
    fallback: Mutex<MockReply>,
    requests: Mutex<Vec<RemoteRequest>>,
}

impl MockTransport {
    /// Replies `{"success":true}` unless scripted otherwise.
    pub(crate) fn new() -> Arc<Self> {
        Self::with_fallback(MockReply::json(serde_json::json!({ "success": true })))
    }

    pub(crate) fn with_fallback(fallback: MockReply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn failing() -> Arc<Self> {
        Self::with_fallback(MockReply::Fail(TransportError::Connect(
            "connection refused".into(),
        )))
    }

    /// Queue a reply for the next unscripted request.
    pub(crate) fn push(&self, reply: MockReply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub(crate) fn set_fallback(&self, reply: MockReply) {
        *self.fallback.lock().unwrap() = reply;
    }

    pub(crate) fn requests(&self) -> Vec<RemoteRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn actions(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(RemoteRequest::action)
            .collect()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: RemoteRequest) -> TransportFuture<'_> {
        self.requests.lock().unwrap().push(request);
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone());
        Box::pin(reply.resolve())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum IndicatorEvent {
    Show(String, ShowOptions),
    Hide,
    Toast(String),
}

#[derive(Default)]
pub(crate) struct RecordingIndicator {
    events: Mutex<Vec<IndicatorEvent>>,
}

impl RecordingIndicator {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn events(&self) -> Vec<IndicatorEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn toasts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                IndicatorEvent::Toast(message) => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl Indicator for RecordingIndicator {
    fn show(&self, message: &str, options: ShowOptions) {
        self.events
            .lock()
            .unwrap()
            .push(IndicatorEvent::Show(message.to_string(), options));
    }

    fn hide(&self) {
        self.events.lock().unwrap().push(IndicatorEvent::Hide);
    }

    fn toast(&self, message: &str, _duration: Duration) {
        self.events
            .lock()
            .unwrap()
            .push(IndicatorEvent::Toast(message.to_string()));
    }
}
