//! reqwest-backed transport for the load generator.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bankload_core::{HttpExecutor, HttpRequest, HttpResponse, Method, TransportError};
use reqwest::Client;

/// Sends requests relative to a base URL over one pooled client.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl ReqwestExecutor {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(512)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = self.url(&request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let start = Instant::now();
        let response = builder.send().await.map_err(|e| self.classify(&url, e))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| self.classify(&url, e))?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
            latency: start.elapsed(),
        })
    }
}

impl ReqwestExecutor {
    fn classify(&self, url: &str, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if error.is_builder() {
            TransportError::InvalidRequest(error.to_string())
        } else {
            TransportError::ConnectionFailed {
                endpoint: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}
