//! Relay client: the only component that talks to the untrusted server.
//!
//! [`RelayTransport`] is the HTTP capability port; [`HttpRelay`] is the
//! production implementation, tests inject fakes. [`RelayClient`] binds a
//! transport to one conversation's endpoint and tokens, applies the unary
//! timeout, and enforces the one-subscription-per-conversation rule.
//! [`subscription`] drives reconnection with backoff and the polling
//! fallback.

pub mod api;
pub mod http;
pub mod subscription;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::{Error, Result};
pub use api::{
    AckRequest, BurnRequest, PollResponse, RegisterRequest, RelayEvent, RelayMessage,
    SubmitRequest, SubmitResponse,
};
pub use http::HttpRelay;

/// A live event stream from the relay.
pub type EventStream = BoxStream<'static, RelayEvent>;

/// Default timeout for unary relay calls.
pub const DEFAULT_UNARY_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP capability port for the relay API.
///
/// Implementations translate transport failures into the relay error
/// taxonomy; they do not retry (the subscription task and the orchestrator
/// own retry policy).
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// `POST /v1/conversations`. A 409 means "already registered" and is
    /// success.
    async fn register(&self, base_url: &str, request: &RegisterRequest) -> Result<()>;

    /// `POST /v1/messages`.
    async fn submit(
        &self,
        base_url: &str,
        auth_token: &str,
        request: &SubmitRequest,
    ) -> Result<SubmitResponse>;

    /// `GET /v1/messages`.
    async fn poll(
        &self,
        base_url: &str,
        auth_token: &str,
        conversation_id: &str,
        cursor: Option<&str>,
    ) -> Result<PollResponse>;

    /// `POST /v1/acks`.
    async fn ack(&self, base_url: &str, auth_token: &str, request: &AckRequest) -> Result<()>;

    /// `GET /v1/burn`.
    async fn burn_status(
        &self,
        base_url: &str,
        auth_token: &str,
        conversation_id: &str,
    ) -> Result<bool>;

    /// `POST /v1/burn`. Authorized by the burn token in the body.
    async fn burn(&self, base_url: &str, request: &BurnRequest) -> Result<()>;

    /// `GET /v1/stream`, server-sent events. No timeout applies.
    async fn subscribe(
        &self,
        base_url: &str,
        auth_token: &str,
        conversation_id: &str,
    ) -> Result<EventStream>;
}

/// A transport bound to one conversation.
#[derive(Clone)]
pub struct RelayClient {
    transport: Arc<dyn RelayTransport>,
    base_url: String,
    conversation_id: String,
    auth_token: String,
    unary_timeout: Duration,
    subscription_active: Arc<AtomicBool>,
}

impl RelayClient {
    /// Bind `transport` to a conversation endpoint.
    pub fn new(
        transport: Arc<dyn RelayTransport>,
        base_url: String,
        conversation_id: String,
        auth_token: String,
    ) -> Self {
        Self {
            transport,
            base_url,
            conversation_id,
            auth_token,
            unary_timeout: DEFAULT_UNARY_TIMEOUT,
            subscription_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Override the unary timeout.
    pub fn with_unary_timeout(mut self, timeout: Duration) -> Self {
        self.unary_timeout = timeout;
        self
    }

    /// The conversation this client serves.
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    async fn timed<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        tokio::time::timeout(self.unary_timeout, fut)
            .await
            .map_err(|_| Error::Network("request timed out".into()))?
    }

    /// Register the conversation; idempotent.
    pub async fn register(&self, auth_token_hash: String, burn_token_hash: String) -> Result<()> {
        let request = RegisterRequest {
            id: self.conversation_id.clone(),
            auth_token_hash,
            burn_token_hash,
        };
        self.timed(self.transport.register(&self.base_url, &request))
            .await
    }

    /// Submit a ciphertext blob.
    pub async fn submit(
        &self,
        ciphertext: &[u8],
        sequence: u64,
        ttl_seconds: u32,
    ) -> Result<SubmitResponse> {
        use base64::Engine;
        let request = SubmitRequest {
            conversation_id: self.conversation_id.clone(),
            ciphertext: base64::engine::general_purpose::STANDARD.encode(ciphertext),
            sequence,
            ttl_seconds,
        };
        self.timed(self.transport.submit(&self.base_url, &self.auth_token, &request))
            .await
    }

    /// Poll for messages after `cursor`.
    pub async fn poll(&self, cursor: Option<&str>) -> Result<PollResponse> {
        self.timed(self.transport.poll(
            &self.base_url,
            &self.auth_token,
            &self.conversation_id,
            cursor,
        ))
        .await
    }

    /// Acknowledge delivered blobs.
    pub async fn ack(&self, blob_ids: Vec<uuid::Uuid>) -> Result<()> {
        let request = AckRequest {
            conversation_id: self.conversation_id.clone(),
            blob_ids,
        };
        self.timed(self.transport.ack(&self.base_url, &self.auth_token, &request))
            .await
    }

    /// Check the burn flag.
    pub async fn burn_status(&self) -> Result<bool> {
        self.timed(self.transport.burn_status(
            &self.base_url,
            &self.auth_token,
            &self.conversation_id,
        ))
        .await
    }

    /// Signal a burn. Requires the cleartext burn token.
    pub async fn burn(&self, burn_token: String) -> Result<()> {
        let request = BurnRequest {
            conversation_id: self.conversation_id.clone(),
            burn_token,
        };
        self.timed(self.transport.burn(&self.base_url, &request)).await
    }

    /// Claim the single subscription slot for this conversation.
    ///
    /// The subscription task holds the guard for its whole lifetime,
    /// reconnects included; the slot frees when the task ends.
    pub(crate) fn acquire_subscription_slot(&self) -> Result<SubscriptionGuard> {
        if self
            .subscription_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::InvalidState(
                "a subscription is already active for this conversation",
            ));
        }
        Ok(SubscriptionGuard {
            flag: self.subscription_active.clone(),
        })
    }

    /// One subscribe attempt against the transport. No timeout applies;
    /// only the subscription task (which holds the slot guard) calls this.
    pub(crate) async fn open_stream(&self) -> Result<EventStream> {
        self.transport
            .subscribe(&self.base_url, &self.auth_token, &self.conversation_id)
            .await
    }

    /// Whether a subscription task currently holds the slot.
    pub fn subscription_active(&self) -> bool {
        self.subscription_active.load(Ordering::Acquire)
    }
}

/// Frees the single-subscription slot on drop.
pub(crate) struct SubscriptionGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Tokens stay out of logs.
        f.debug_struct("RelayClient")
            .field("base_url", &self.base_url)
            .field("conversation_id", &self.conversation_id)
            .finish()
    }
}
