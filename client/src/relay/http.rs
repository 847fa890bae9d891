//! Production relay transport over reqwest.
//!
//! Status mapping: 404 → `NotFound`, 401/403 → `Unauthorized`,
//! 410 → `ConversationBurned`, 5xx → `ServerError`; connect/TLS/timeout
//! failures → `Network`; unparseable bodies → `Decode`.
//!
//! The event stream is plain server-sent events: `event:` names one of
//! `connected`, `message`, `delivered`, `burn`, `ping`, `error`; `data:`
//! carries the JSON payload where the event has one.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::relay::api::{
    AckRequest, BurnRequest, BurnStatusResponse, DeliveredPayload, ErrorPayload, PollResponse,
    RegisterRequest, RelayEvent, RelayMessage, SubmitRequest, SubmitResponse,
};
use crate::relay::{EventStream, RelayTransport};

/// reqwest-backed [`RelayTransport`].
#[derive(Clone, Default)]
pub struct HttpRelay {
    http: reqwest::Client,
}

impl HttpRelay {
    /// Create a transport with a default client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport over an existing client (custom TLS, proxies).
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

fn status_error(status: StatusCode) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Unauthorized,
        StatusCode::GONE => Error::ConversationBurned,
        s if s.is_server_error() => Error::ServerError { status: s.as_u16() },
        s => Error::ServerError { status: s.as_u16() },
    }
}

fn network(err: reqwest::Error) -> Error {
    Error::Network(err.to_string())
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(status_error(status));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| Error::Decode(e.to_string()))
}

fn check_status(response: &reqwest::Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(status_error(status))
    }
}

#[async_trait]
impl RelayTransport for HttpRelay {
    async fn register(&self, base_url: &str, request: &RegisterRequest) -> Result<()> {
        let response = self
            .http
            .post(format!("{base_url}/v1/conversations"))
            .json(request)
            .send()
            .await
            .map_err(network)?;

        // 409 means another device (or a previous run) already registered.
        if response.status() == StatusCode::CONFLICT {
            return Ok(());
        }
        check_status(&response)
    }

    async fn submit(
        &self,
        base_url: &str,
        auth_token: &str,
        request: &SubmitRequest,
    ) -> Result<SubmitResponse> {
        let response = self
            .http
            .post(format!("{base_url}/v1/messages"))
            .bearer_auth(auth_token)
            .json(request)
            .send()
            .await
            .map_err(network)?;
        read_json(response).await
    }

    async fn poll(
        &self,
        base_url: &str,
        auth_token: &str,
        conversation_id: &str,
        cursor: Option<&str>,
    ) -> Result<PollResponse> {
        let mut query: Vec<(&str, &str)> = vec![("conversation_id", conversation_id)];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }
        let response = self
            .http
            .get(format!("{base_url}/v1/messages"))
            .bearer_auth(auth_token)
            .query(&query)
            .send()
            .await
            .map_err(network)?;
        read_json(response).await
    }

    async fn ack(&self, base_url: &str, auth_token: &str, request: &AckRequest) -> Result<()> {
        let response = self
            .http
            .post(format!("{base_url}/v1/acks"))
            .bearer_auth(auth_token)
            .json(request)
            .send()
            .await
            .map_err(network)?;
        check_status(&response)
    }

    async fn burn_status(
        &self,
        base_url: &str,
        auth_token: &str,
        conversation_id: &str,
    ) -> Result<bool> {
        let response = self
            .http
            .get(format!("{base_url}/v1/burn"))
            .bearer_auth(auth_token)
            .query(&[("conversation_id", conversation_id)])
            .send()
            .await
            .map_err(network)?;
        let body: BurnStatusResponse = read_json(response).await?;
        Ok(body.burned)
    }

    async fn burn(&self, base_url: &str, request: &BurnRequest) -> Result<()> {
        let response = self
            .http
            .post(format!("{base_url}/v1/burn"))
            .json(request)
            .send()
            .await
            .map_err(network)?;
        check_status(&response)
    }

    async fn subscribe(
        &self,
        base_url: &str,
        auth_token: &str,
        conversation_id: &str,
    ) -> Result<EventStream> {
        let response = self
            .http
            .get(format!("{base_url}/v1/stream"))
            .bearer_auth(auth_token)
            .query(&[("conversation_id", conversation_id)])
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(network)?;
        check_status(&response)?;

        struct StreamState {
            inner: futures::stream::BoxStream<'static, reqwest::Result<bytes::Bytes>>,
            parser: SseParser,
            queue: VecDeque<RelayEvent>,
        }

        let state = StreamState {
            inner: response.bytes_stream().boxed(),
            parser: SseParser::new(),
            queue: VecDeque::new(),
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(event) = state.queue.pop_front() {
                    return Some((event, state));
                }
                match state.inner.next().await {
                    Some(Ok(chunk)) => state.queue.extend(state.parser.push(&chunk)),
                    Some(Err(e)) => {
                        state.queue.push_back(RelayEvent::Error(e.to_string()));
                    }
                    None => return None,
                }
            }
        });

        Ok(stream.boxed())
    }
}

/// Incremental server-sent-events parser.
///
/// Minimal subset: `event:` and `data:` fields, events separated by a
/// blank line, comment lines (leading `:`) ignored. Multi-line `data:` is
/// concatenated with newlines per the SSE spec.
struct SseParser {
    buffer: String,
    event_name: Option<String>,
    data: String,
}

impl SseParser {
    fn new() -> Self {
        Self {
            buffer: String::new(),
            event_name: None,
            data: String::new(),
        }
    }

    /// Feed raw bytes; returns every event completed by this chunk.
    fn push(&mut self, chunk: &[u8]) -> Vec<RelayEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
            } else if let Some(name) = line.strip_prefix("event:") {
                self.event_name = Some(name.trim().to_string());
            } else if let Some(data) = line.strip_prefix("data:") {
                if !self.data.is_empty() {
                    self.data.push('\n');
                }
                self.data.push_str(data.trim_start());
            }
            // Comments and unknown fields (id:, retry:) are ignored.
        }
        events
    }

    fn dispatch(&mut self) -> Option<RelayEvent> {
        let name = self.event_name.take();
        let data = std::mem::take(&mut self.data);
        if name.is_none() && data.is_empty() {
            return None;
        }
        parse_event(name.as_deref().unwrap_or("message"), &data)
    }
}

/// Map one SSE event to a [`RelayEvent`]. Unknown event names are ignored
/// so future relay versions stay compatible.
fn parse_event(name: &str, data: &str) -> Option<RelayEvent> {
    match name {
        "connected" => Some(RelayEvent::Connected),
        "ping" => Some(RelayEvent::Ping),
        "burn" => Some(RelayEvent::BurnSignal),
        "message" => match serde_json::from_str::<RelayMessage>(data) {
            Ok(message) => Some(RelayEvent::MessageReceived(message)),
            Err(e) => Some(RelayEvent::Error(format!("bad message event: {e}"))),
        },
        "delivered" => match serde_json::from_str::<DeliveredPayload>(data) {
            Ok(payload) => Some(RelayEvent::DeliveryConfirmed(payload.blob_ids)),
            Err(e) => Some(RelayEvent::Error(format!("bad delivered event: {e}"))),
        },
        "error" => match serde_json::from_str::<ErrorPayload>(data) {
            Ok(payload) => Some(RelayEvent::Error(payload.message)),
            Err(_) => Some(RelayEvent::Error(data.to_string())),
        },
        _ => None,
    }
}
