//! Client call pipeline.
//!
//! A [`Pipeline`] runs one [`Call`] through three phases:
//!
//! 1. **Send gates** ([`SendGate`]) decide whether the call goes to the
//!    transport at all. Any gate returning `false` suppresses the send. A
//!    gate that [allows fallback](SendGate::allows_fallback) only skips the
//!    send on the expectation that a validator supplies the response; if
//!    none does, the call is sent after all.
//! 2. **Send** hands the [`Request`] to the [`Transport`].
//! 3. **Validation** runs the [`ResponseValidator`] chain in order. A
//!    validator may replace the response, inspect it, or fail the call.
//!
//! Hooks for one call run sequentially; independent calls may execute
//! concurrently on the same pipeline.
//!
//! ```rust,ignore
//! let mut pipeline = Pipeline::new(Arc::new(HttpTransport::new("https://api.example.com")?));
//! let cache = muninn::cache::add_caching(&mut pipeline);
//!
//! let out = pipeline.call("inventory", "ListItems", &json!({"page": 1})).await?;
//! if out.context.is_cache_hit() { /* ... */ }
//! ```

pub mod body;
#[cfg(feature = "http-transport")]
pub mod transport;

pub use body::{Body, BodyStream};
#[cfg(feature = "http-transport")]
pub use transport::HttpTransport;

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::fingerprint::Fingerprint;
use crate::telemetry;
use crate::{MuninnError, Result};

// ============================================================================
// Request / Response
// ============================================================================

/// The outbound half of a call: what to invoke and with which params.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub service: String,
    pub operation: String,
    pub params: Value,
}

impl Request {
    pub fn new(service: impl Into<String>, operation: impl Into<String>, params: Value) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            params,
        }
    }

    /// Cache key for this request.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::build(&self.service, &self.operation, &self.params)
    }
}

/// A response: status, headers and a single-consumption body.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Body) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// A 200 response with no headers over the given bytes.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, HeaderMap::new(), Body::from_bytes(body))
    }

    /// Read the whole body.
    pub async fn bytes(self) -> Result<Bytes> {
        self.body.collect().await
    }

    /// Read the whole body as UTF-8 text (lossy).
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read the whole body and deserialize it as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

// ============================================================================
// Call context
// ============================================================================

/// Lifecycle of a single call.
///
/// `Pending → {WillSend, SkipSend} → Validated → {ServedFromCache, StoredFresh}`
///
/// Calls that never touch a cache end in `Validated`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallState {
    #[default]
    Pending,
    WillSend,
    SkipSend,
    Validated,
    ServedFromCache,
    StoredFresh,
}

/// Connection timing for one call.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    started_at: Instant,
    connection_start: Option<Instant>,
    completed_at: Option<Instant>,
}

impl Timing {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            connection_start: None,
            completed_at: None,
        }
    }

    /// When the call entered the pipeline.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// When the connection for this call started.
    ///
    /// For cache hits this is the moment the cached response was served.
    pub fn connection_start(&self) -> Option<Instant> {
        self.connection_start
    }

    pub fn set_connection_start(&mut self, at: Instant) {
        self.connection_start = Some(at);
    }

    /// When the call left the pipeline.
    pub fn completed_at(&self) -> Option<Instant> {
        self.completed_at
    }

    /// Time from connection start to completion, when both are known.
    pub fn connection_elapsed(&self) -> Option<std::time::Duration> {
        Some(self.completed_at?.saturating_duration_since(self.connection_start?))
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-call execution context returned alongside the response.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    state: CallState,
    cache_hit: bool,
    timing: Timing,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn set_state(&mut self, state: CallState) {
        self.state = state;
    }

    /// Whether this call's response was served from a response cache.
    pub fn is_cache_hit(&self) -> bool {
        self.cache_hit
    }

    /// Flag the call as served from cache. There is no way to clear it.
    pub(crate) fn mark_cache_hit(&mut self) {
        self.cache_hit = true;
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn timing_mut(&mut self) -> &mut Timing {
        &mut self.timing
    }
}

/// A call in flight: request, context and (once sent) the response.
#[derive(Debug)]
pub struct Call {
    pub request: Request,
    pub context: CallContext,
    pub response: Option<Response>,
}

impl Call {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            context: CallContext::new(),
            response: None,
        }
    }
}

/// The result of a successful call.
#[derive(Debug)]
pub struct CallOutput {
    pub response: Response,
    pub context: CallContext,
}

// ============================================================================
// Hook traits
// ============================================================================

/// Sends requests over the wire.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logging/debugging.
    fn name(&self) -> &str;

    async fn send(&self, request: &Request) -> Result<Response>;
}

/// Decides, before sending, whether a call should reach the transport.
#[async_trait]
pub trait SendGate: Send + Sync {
    /// Return `false` to suppress the network call.
    async fn should_send(&self, request: &Request) -> bool;

    /// Whether the pipeline may still send when this gate's veto leaves
    /// no response after validation. A hard veto (the default) ends the
    /// call with [`MuninnError::NoResponse`].
    fn allows_fallback(&self) -> bool {
        false
    }
}

/// Runs after a response is available (or the send was skipped).
///
/// Validators run in chain order and may replace `call.response`.
#[async_trait]
pub trait ResponseValidator: Send + Sync {
    async fn validate(&self, call: &mut Call) -> Result<()>;
}

/// Rejects non-2xx responses with [`MuninnError::Api`].
///
/// Installed at the back of every pipeline's validation chain.
pub struct StatusValidator;

#[async_trait]
impl ResponseValidator for StatusValidator {
    async fn validate(&self, call: &mut Call) -> Result<()> {
        let Some(response) = call.response.as_ref() else {
            return Ok(());
        };
        if response.status.is_success() {
            return Ok(());
        }
        let status = response.status.as_u16();
        let message = match call.response.take() {
            Some(response) => response
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {e}>")),
            None => String::new(),
        };
        Err(MuninnError::Api { status, message })
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Executes calls through send gates, a transport and a validation chain.
pub struct Pipeline {
    transport: Arc<dyn Transport>,
    send_gates: Vec<Arc<dyn SendGate>>,
    validators: VecDeque<Arc<dyn ResponseValidator>>,
}

impl Pipeline {
    /// Create a pipeline over `transport` with [`StatusValidator`] installed.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let mut validators: VecDeque<Arc<dyn ResponseValidator>> = VecDeque::new();
        validators.push_back(Arc::new(StatusValidator));
        Self {
            transport,
            send_gates: Vec::new(),
            validators,
        }
    }

    pub fn push_send_gate(&mut self, gate: Arc<dyn SendGate>) {
        self.send_gates.push(gate);
    }

    /// Run `validator` before every validator already installed.
    pub fn push_front_validator(&mut self, validator: Arc<dyn ResponseValidator>) {
        self.validators.push_front(validator);
    }

    /// Run `validator` after every validator already installed.
    pub fn push_back_validator(&mut self, validator: Arc<dyn ResponseValidator>) {
        self.validators.push_back(validator);
    }

    /// Build a request from serializable params and execute it.
    pub async fn call<P: Serialize + ?Sized>(
        &self,
        service: &str,
        operation: &str,
        params: &P,
    ) -> Result<CallOutput> {
        let request = Request::new(service, operation, serde_json::to_value(params)?);
        self.execute(Call::new(request)).await
    }

    /// Run a call through gates, transport and validators.
    pub async fn execute(&self, call: Call) -> Result<CallOutput> {
        let service = call.request.service.clone();
        let operation = call.request.operation.clone();

        let result = self.run(call).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(telemetry::CALLS_TOTAL,
            "service" => service,
            "operation" => operation,
            "status" => status,
        )
        .increment(1);

        result
    }

    async fn run(&self, mut call: Call) -> Result<CallOutput> {
        let mut send = true;
        let mut fallback = true;
        // Every gate is consulted so a hard veto holds regardless of order.
        for gate in &self.send_gates {
            if !gate.should_send(&call.request).await {
                send = false;
                fallback &= gate.allows_fallback();
            }
        }

        if send {
            call.context.set_state(CallState::WillSend);
            self.send(&mut call).await?;
        } else {
            call.context.set_state(CallState::SkipSend);
        }

        self.validate(&mut call).await?;

        if call.response.is_none() && !send && fallback {
            // The entry that justified skipping the send is gone.
            debug!(
                service = %call.request.service,
                operation = %call.request.operation,
                "skipped send left no response, sending"
            );
            call.context.set_state(CallState::WillSend);
            self.send(&mut call).await?;
            self.validate(&mut call).await?;
        }

        let response = call.response.take().ok_or(MuninnError::NoResponse)?;
        call.context.timing_mut().completed_at = Some(Instant::now());
        Ok(CallOutput {
            response,
            context: call.context,
        })
    }

    async fn send(&self, call: &mut Call) -> Result<()> {
        call.context.timing_mut().set_connection_start(Instant::now());
        debug!(
            transport = self.transport.name(),
            service = %call.request.service,
            operation = %call.request.operation,
            "sending call"
        );
        call.response = Some(self.transport.send(&call.request).await?);
        Ok(())
    }

    async fn validate(&self, call: &mut Call) -> Result<()> {
        call.context.set_state(CallState::Validated);
        for validator in &self.validators {
            validator.validate(call).await?;
        }
        Ok(())
    }
}
