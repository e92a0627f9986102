//! Pipeline hooks that serve and populate the response cache.
//!
//! Two hooks share one [`ResponseCache`]:
//!
//! - [`CacheGate`] runs before send. A fresh entry for the call's
//!   fingerprint suppresses the network call.
//! - [`CacheHandler`] runs first in the validation chain. It looks the
//!   fingerprint up again: a fresh entry replaces the call's response with a
//!   replay of the snapshot; otherwise a successful real response is
//!   captured and stored.
//!
//! The second lookup means an entry that expired, or was populated by a
//! concurrent call, between the two phases is honoured as of validation
//! time. Two concurrent misses for the same fingerprint both reach the
//! transport and both store; the later store wins.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::ResponseCache;
use super::snapshot::ResponseSnapshot;
use crate::Result;
use crate::pipeline::{Call, CallState, Request, ResponseValidator, SendGate};
use crate::telemetry;

/// Pre-send hook: skip the transport when a fresh entry exists.
pub struct CacheGate {
    cache: Arc<ResponseCache>,
}

impl CacheGate {
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl SendGate for CacheGate {
    async fn should_send(&self, request: &Request) -> bool {
        let fresh = self
            .cache
            .get(&request.fingerprint())
            .await
            .is_some_and(|entry| entry.is_fresh());
        !fresh
    }

    // The entry may vanish before the handler runs.
    fn allows_fallback(&self) -> bool {
        true
    }
}

/// Post-validate hook: serve a fresh entry, or capture and store the
/// response.
pub struct CacheHandler {
    cache: Arc<ResponseCache>,
    ttl: Duration,
}

impl CacheHandler {
    pub fn new(cache: Arc<ResponseCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }
}

#[async_trait]
impl ResponseValidator for CacheHandler {
    async fn validate(&self, call: &mut Call) -> Result<()> {
        let key = call.request.fingerprint();
        let service = call.request.service.clone();
        let operation = call.request.operation.clone();

        if let Some(entry) = self.cache.get(&key).await.filter(|e| e.is_fresh()) {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL,
                "service" => service.clone(),
                "operation" => operation.clone(),
            )
            .increment(1);
            debug!(%service, %operation, age_ms = entry.age().as_millis() as u64, "serving cached response");

            call.response = Some(entry.value().replay());
            call.context.mark_cache_hit();
            // No connection was made; report one starting now.
            call.context
                .timing_mut()
                .set_connection_start(Instant::now());
            call.context.set_state(CallState::ServedFromCache);
            return Ok(());
        }

        let Some(response) = call.response.take() else {
            // Send was skipped for an entry that has since gone; the
            // pipeline sends for real and validates again.
            return Ok(());
        };

        metrics::counter!(telemetry::CACHE_MISSES_TOTAL,
            "service" => service.clone(),
            "operation" => operation.clone(),
        )
        .increment(1);

        if !response.status.is_success() {
            call.response = Some(response);
            return Ok(());
        }

        let (response, snapshot) = ResponseSnapshot::capture(response).await;
        call.response = Some(response);

        match snapshot {
            Ok(snapshot) => {
                self.cache.set(key, snapshot, self.ttl).await;
                metrics::counter!(telemetry::CACHE_STORES_TOTAL,
                    "service" => service.clone(),
                    "operation" => operation.clone(),
                )
                .increment(1);
                debug!(%service, %operation, ttl_ms = self.ttl.as_millis() as u64, "stored response");
                call.context.set_state(CallState::StoredFresh);
            }
            Err(e) => {
                metrics::counter!(telemetry::SNAPSHOT_FAILURES_TOTAL,
                    "service" => service.clone(),
                    "operation" => operation.clone(),
                )
                .increment(1);
                warn!(%service, %operation, error = %e, "response not cached");
            }
        }

        Ok(())
    }
}
