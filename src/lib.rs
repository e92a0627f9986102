//! Muninn - short-lived response cache for client call pipelines
//!
//! Muninn attaches to a [`Pipeline`] and answers repeated calls (same
//! service, operation and params) from memory for a short window, 10
//! seconds by default. Every call reports whether it was served from cache.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use muninn::cache::{self, CacheConfig};
//! use muninn::{HttpTransport, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> muninn::Result<()> {
//!     let transport = HttpTransport::new("https://api.example.com")?;
//!     let mut pipeline = Pipeline::new(Arc::new(transport));
//!     let _cache = cache::add_caching_with(&mut pipeline, &CacheConfig::default());
//!
//!     let params = serde_json::json!({"table": "users", "id": 42});
//!     let first = pipeline.call("store", "GetItem", &params).await?;
//!     let second = pipeline.call("store", "GetItem", &params).await?;
//!
//!     assert!(!first.context.is_cache_hit());
//!     assert!(cache::is_cache_hit(&second.context));
//!     println!("{}", second.response.text().await?);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;
pub mod fingerprint;
pub mod pipeline;
pub mod telemetry;

// Re-export main types at crate root
pub use cache::{CacheConfig, ResponseCache, add_caching, is_cache_hit};
pub use error::{MuninnError, Result};
pub use fingerprint::Fingerprint;
#[cfg(feature = "http-transport")]
pub use pipeline::HttpTransport;
pub use pipeline::{
    Body, Call, CallContext, CallOutput, CallState, Pipeline, Request, Response, Transport,
};
