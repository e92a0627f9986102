//! End-to-end tests for response caching on a [`Pipeline`].
//!
//! Uses a counting mock transport; TTL scenarios run on paused tokio time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde_json::json;
use tokio::sync::Barrier;

use muninn::cache::{self, CacheConfig, ResponseCache};
use muninn::pipeline::{Request, SendGate};
use muninn::{Body, CallState, Fingerprint, MuninnError, Pipeline, Response, Result, Transport};

// ============================================================================
// Mock transport
// ============================================================================

/// Answers `"{service}.{operation}#{n}"` in two chunks, where `n` counts sends.
struct CountingTransport {
    sends: AtomicU32,
    status: StatusCode,
    /// When set, every send waits here before answering.
    barrier: Option<Barrier>,
}

impl CountingTransport {
    fn new() -> Arc<Self> {
        Self::build(StatusCode::OK, None)
    }

    fn with_status(status: StatusCode) -> Arc<Self> {
        Self::build(status, None)
    }

    fn with_barrier(parties: usize) -> Arc<Self> {
        Self::build(StatusCode::OK, Some(Barrier::new(parties)))
    }

    fn build(status: StatusCode, barrier: Option<Barrier>) -> Arc<Self> {
        Arc::new(Self {
            sends: AtomicU32::new(0),
            status,
            barrier,
        })
    }

    fn sends(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for CountingTransport {
    fn name(&self) -> &str {
        "counting"
    }

    async fn send(&self, request: &Request) -> Result<Response> {
        let n = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        let head = format!("{}.{}", request.service, request.operation);
        let chunks = vec![Ok(Bytes::from(head)), Ok(Bytes::from(format!("#{n}")))];
        Ok(Response::new(
            self.status,
            HeaderMap::new(),
            Body::from_stream(futures_util::stream::iter(chunks)),
        ))
    }
}

/// Streams a prefix and then fails, like a connection reset mid-body.
struct BrokenBodyTransport {
    sends: AtomicU32,
}

#[async_trait]
impl Transport for BrokenBodyTransport {
    fn name(&self) -> &str {
        "broken-body"
    }

    async fn send(&self, _request: &Request) -> Result<Response> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let chunks = vec![
            Ok(Bytes::from("par")),
            Err(MuninnError::Stream("connection reset".into())),
        ];
        Ok(Response::new(
            StatusCode::OK,
            HeaderMap::new(),
            Body::from_stream(futures_util::stream::iter(chunks)),
        ))
    }
}

struct UnreachableTransport;

#[async_trait]
impl Transport for UnreachableTransport {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn send(&self, _request: &Request) -> Result<Response> {
        Err(MuninnError::Http("connection refused".into()))
    }
}

/// Vetoes every send outright.
struct DenyAll;

#[async_trait]
impl SendGate for DenyAll {
    async fn should_send(&self, _request: &Request) -> bool {
        false
    }
}

/// Skips the send expecting a validator to answer, like a cache gate whose
/// entry is evicted before the handler looks it up.
struct Vanished;

#[async_trait]
impl SendGate for Vanished {
    async fn should_send(&self, _request: &Request) -> bool {
        false
    }

    fn allows_fallback(&self) -> bool {
        true
    }
}

fn cached_pipeline(transport: Arc<dyn Transport>) -> (Pipeline, Arc<ResponseCache>) {
    let mut pipeline = Pipeline::new(transport);
    let cache = cache::add_caching(&mut pipeline);
    (pipeline, cache)
}

// ============================================================================
// Hit / miss lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn hit_within_ttl_and_miss_after_expiry() {
    let transport = CountingTransport::new();
    let (pipeline, cache) = cached_pipeline(transport.clone());
    let params = json!({"a": 1});

    // A: miss, stored.
    let a = pipeline.call("X", "Y", &params).await.unwrap();
    assert!(!a.context.is_cache_hit());
    assert_eq!(a.context.state(), CallState::StoredFresh);
    assert_eq!(a.response.text().await.unwrap(), "X.Y#1");
    assert_eq!(transport.sends(), 1);

    // B, 2s later: served from cache.
    tokio::time::advance(Duration::from_secs(2)).await;
    let b = pipeline.call("X", "Y", &params).await.unwrap();
    assert!(b.context.is_cache_hit());
    assert!(cache::is_cache_hit(&b.context));
    assert_eq!(b.context.state(), CallState::ServedFromCache);
    assert_eq!(b.response.text().await.unwrap(), "X.Y#1");
    assert_eq!(transport.sends(), 1);

    // C, 11s after A: expired, real call, entry replaced.
    tokio::time::advance(Duration::from_secs(9)).await;
    let c = pipeline.call("X", "Y", &params).await.unwrap();
    assert!(!c.context.is_cache_hit());
    assert_eq!(c.context.state(), CallState::StoredFresh);
    assert_eq!(c.response.text().await.unwrap(), "X.Y#2");
    assert_eq!(transport.sends(), 2);

    let entry = cache
        .get(&Fingerprint::build("X", "Y", &params))
        .await
        .expect("entry stored");
    assert!(entry.is_fresh());
    assert_eq!(entry.value().body, Bytes::from("X.Y#2"));
}

#[tokio::test(start_paused = true)]
async fn entry_is_fresh_at_exactly_ttl() {
    let transport = CountingTransport::new();
    let (pipeline, _cache) = cached_pipeline(transport.clone());

    pipeline.call("s", "o", &()).await.unwrap();
    tokio::time::advance(cache::DEFAULT_TTL).await;

    let out = pipeline.call("s", "o", &()).await.unwrap();
    assert!(out.context.is_cache_hit());
    assert_eq!(transport.sends(), 1);
}

#[tokio::test(start_paused = true)]
async fn configured_ttl_is_honoured() {
    let transport = CountingTransport::new();
    let mut pipeline = Pipeline::new(transport.clone());
    cache::add_caching_with(&mut pipeline, &CacheConfig::new().ttl(Duration::from_secs(1)));

    pipeline.call("s", "o", &()).await.unwrap();
    tokio::time::advance(Duration::from_millis(1_500)).await;

    let out = pipeline.call("s", "o", &()).await.unwrap();
    assert!(!out.context.is_cache_hit());
    assert_eq!(transport.sends(), 2);
}

#[tokio::test]
async fn field_order_does_not_affect_hits() {
    let transport = CountingTransport::new();
    let (pipeline, _cache) = cached_pipeline(transport.clone());

    let first: serde_json::Value =
        serde_json::from_str(r#"{"table":"users","key":{"id":1,"region":"eu"}}"#).unwrap();
    let second: serde_json::Value =
        serde_json::from_str(r#"{"key":{"region":"eu","id":1},"table":"users"}"#).unwrap();

    pipeline.call("db", "GetItem", &first).await.unwrap();
    let out = pipeline.call("db", "GetItem", &second).await.unwrap();
    assert!(out.context.is_cache_hit());
    assert_eq!(transport.sends(), 1);
}

#[tokio::test]
async fn different_keys_do_not_share_entries() {
    let transport = CountingTransport::new();
    let (pipeline, _cache) = cached_pipeline(transport.clone());

    pipeline.call("db", "GetItem", &json!({"id": 1})).await.unwrap();
    let other_params = pipeline.call("db", "GetItem", &json!({"id": 2})).await.unwrap();
    let other_op = pipeline.call("db", "PutItem", &json!({"id": 1})).await.unwrap();
    let other_service = pipeline.call("queue", "GetItem", &json!({"id": 1})).await.unwrap();

    assert!(!other_params.context.is_cache_hit());
    assert!(!other_op.context.is_cache_hit());
    assert!(!other_service.context.is_cache_hit());
    assert_eq!(transport.sends(), 4);
}

// ============================================================================
// Body ownership
// ============================================================================

#[tokio::test]
async fn populating_caller_reads_full_body() {
    let transport = CountingTransport::new();
    let (pipeline, cache) = cached_pipeline(transport);

    let out = pipeline.call("s", "o", &json!({"k": "v"})).await.unwrap();
    assert_eq!(out.response.bytes().await.unwrap(), Bytes::from("s.o#1"));

    let entry = cache
        .get(&Fingerprint::build("s", "o", &json!({"k": "v"})))
        .await
        .unwrap();
    assert_eq!(entry.value().body, Bytes::from("s.o#1"));
}

#[tokio::test]
async fn concurrent_hits_read_independently() {
    let transport = CountingTransport::new();
    let (pipeline, _cache) = cached_pipeline(transport.clone());

    let first = pipeline.call("s", "o", &()).await.unwrap();

    let (hit_a, hit_b) = tokio::join!(
        pipeline.call("s", "o", &()),
        pipeline.call("s", "o", &()),
    );
    let (hit_a, hit_b) = (hit_a.unwrap(), hit_b.unwrap());
    assert!(hit_a.context.is_cache_hit());
    assert!(hit_b.context.is_cache_hit());

    // Read the later hit first; the earlier ones are unaffected.
    assert_eq!(hit_b.response.text().await.unwrap(), "s.o#1");
    assert_eq!(hit_a.response.text().await.unwrap(), "s.o#1");
    assert_eq!(first.response.text().await.unwrap(), "s.o#1");
    assert_eq!(transport.sends(), 1);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn concurrent_misses_both_send() {
    // Both calls park in the transport until the other arrives, so neither
    // can see the other's entry. No single-flight: both reach the network.
    let transport = CountingTransport::with_barrier(2);
    let (pipeline, cache) = cached_pipeline(transport.clone());

    let params = json!({"q": 1});
    let (a, b) = tokio::join!(
        pipeline.call("s", "o", &params),
        pipeline.call("s", "o", &params),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(transport.sends(), 2);
    // The later call may pick up the earlier one's entry at validation time,
    // but the first to finish necessarily stored its own response.
    assert!(!(a.context.is_cache_hit() && b.context.is_cache_hit()));

    // Whichever stored last wins; either body is acceptable.
    let entry = cache
        .get(&Fingerprint::build("s", "o", &params))
        .await
        .unwrap();
    let body = entry.value().body.clone();
    assert!(body == Bytes::from("s.o#1") || body == Bytes::from("s.o#2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_calls_on_distinct_keys() {
    let transport = CountingTransport::new();
    let (pipeline, _cache) = cached_pipeline(transport.clone());
    let pipeline = Arc::new(pipeline);

    let mut handles = Vec::new();
    for i in 0..16 {
        let pipeline = Arc::clone(&pipeline);
        handles.push(tokio::spawn(async move {
            pipeline.call("s", "o", &json!({"i": i % 4})).await
        }));
    }
    for h in handles {
        let out = h.await.expect("task panicked").expect("call failed");
        let text = out.response.text().await.unwrap();
        assert!(text.starts_with("s.o#"));
    }

    // Every key was fetched at least once; nothing beyond one call per task.
    let sends = transport.sends();
    assert!((4..=16).contains(&sends), "unexpected send count {sends}");
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn error_status_is_returned_and_not_cached() {
    let transport = CountingTransport::with_status(StatusCode::INTERNAL_SERVER_ERROR);
    let (pipeline, cache) = cached_pipeline(transport.clone());

    let err = pipeline.call("s", "o", &()).await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert!(cache.get(&Fingerprint::build("s", "o", &())).await.is_none());

    pipeline.call("s", "o", &()).await.unwrap_err();
    assert_eq!(transport.sends(), 2);
}

#[tokio::test]
async fn broken_body_reaches_caller_and_is_not_cached() {
    let transport = Arc::new(BrokenBodyTransport {
        sends: AtomicU32::new(0),
    });
    let (pipeline, cache) = cached_pipeline(transport.clone());

    let out = pipeline.call("s", "o", &()).await.expect("call itself succeeds");
    assert!(!out.context.is_cache_hit());
    assert_ne!(out.context.state(), CallState::StoredFresh);
    assert!(matches!(
        out.response.bytes().await,
        Err(MuninnError::Stream(_))
    ));
    assert!(cache.get(&Fingerprint::build("s", "o", &())).await.is_none());

    pipeline.call("s", "o", &()).await.unwrap();
    assert_eq!(transport.sends.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn transport_error_propagates_unchanged() {
    let (pipeline, cache) = cached_pipeline(Arc::new(UnreachableTransport));

    let err = pipeline.call("s", "o", &()).await.unwrap_err();
    assert!(matches!(err, MuninnError::Http(ref msg) if msg == "connection refused"));
    assert!(cache.is_empty());
}

#[tokio::test]
async fn skipped_send_without_entry_falls_back_to_transport() {
    let transport = CountingTransport::new();
    let (mut pipeline, cache) = cached_pipeline(transport.clone());
    pipeline.push_send_gate(Arc::new(Vanished));

    let out = pipeline.call("s", "o", &()).await.unwrap();
    assert!(!out.context.is_cache_hit());
    assert_eq!(out.context.state(), CallState::StoredFresh);
    assert_eq!(out.response.text().await.unwrap(), "s.o#1");
    assert_eq!(transport.sends(), 1);
    assert!(cache.get(&Fingerprint::build("s", "o", &())).await.is_some());
}

#[tokio::test]
async fn other_gate_veto_is_not_overridden_by_caching() {
    let transport = CountingTransport::new();
    let (mut pipeline, cache) = cached_pipeline(transport.clone());
    pipeline.push_send_gate(Arc::new(DenyAll));

    let err = pipeline.call("s", "o", &()).await.unwrap_err();
    assert!(matches!(err, MuninnError::NoResponse), "got {err:?}");
    assert_eq!(transport.sends(), 0);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn vetoed_call_is_still_served_from_fresh_entry() {
    let transport = CountingTransport::new();
    let (mut pipeline, cache) = cached_pipeline(transport.clone());

    let first = pipeline.call("s", "o", &()).await.unwrap();
    assert_eq!(first.response.text().await.unwrap(), "s.o#1");

    pipeline.push_send_gate(Arc::new(DenyAll));
    let hit = pipeline.call("s", "o", &()).await.unwrap();
    assert!(hit.context.is_cache_hit());
    assert_eq!(hit.response.text().await.unwrap(), "s.o#1");
    assert_eq!(transport.sends(), 1);
    assert!(cache.get(&Fingerprint::build("s", "o", &())).await.is_some());
}

// ============================================================================
// Cache-hit signal and timing
// ============================================================================

#[tokio::test]
async fn pipeline_without_caching_never_reports_hits() {
    let transport = CountingTransport::new();
    let pipeline = Pipeline::new(transport.clone());

    for _ in 0..2 {
        let out = pipeline.call("s", "o", &()).await.unwrap();
        assert!(!cache::is_cache_hit(&out.context));
        assert_eq!(out.context.state(), CallState::Validated);
    }
    assert_eq!(transport.sends(), 2);
}

#[tokio::test(start_paused = true)]
async fn cache_hit_reports_connection_start_at_serve_time() {
    let transport = CountingTransport::new();
    let (pipeline, _cache) = cached_pipeline(transport);

    pipeline.call("s", "o", &()).await.unwrap();
    tokio::time::advance(Duration::from_secs(3)).await;

    let out = pipeline.call("s", "o", &()).await.unwrap();
    let timing = out.context.timing();
    let connection_start = timing.connection_start().expect("connection start set");
    assert!(connection_start >= timing.started_at());
    assert_eq!(timing.connection_elapsed(), Some(Duration::ZERO));
}
