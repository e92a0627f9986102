//! HTTP transport backed by reqwest.
//!
//! Each call is a `POST {base_url}/{service}/{operation}` with the params as
//! the JSON body. The response body is handed to the pipeline as a live
//! byte stream; nothing is buffered here.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;

use super::{Body, Request, Response, Transport};
use crate::{MuninnError, Result};

/// Request timeout used by [`HttpTransport::new`].
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// [`Transport`] that sends calls over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for `base_url` with a 60 second request timeout.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| MuninnError::Configuration(e.to_string()))?;
        Ok(Self::with_client(http, base_url))
    }

    /// Create a transport over a preconfigured client.
    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url_for(&self, request: &Request) -> String {
        format!(
            "{}/{}/{}",
            self.base_url, request.service, request.operation
        )
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, request: &Request) -> Result<Response> {
        let response = self
            .http
            .post(self.url_for(request))
            .json(&request.params)
            .send()
            .await
            .map_err(|e| MuninnError::Http(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| MuninnError::Stream(e.to_string())));

        Ok(Response::new(status, headers, Body::from_stream(stream)))
    }
}
