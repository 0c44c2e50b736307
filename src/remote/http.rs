//! HTTP Fetcher
//!
//! reqwest-backed remote collaborator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{FetchError, FetchRequest, Fetcher};
use crate::models::{DataType, Method};

// == HTTP Fetcher ==
/// Fetches resources over HTTP.
///
/// Connectivity can be reported through a shared flag so the cache skips
/// the network entirely while the host is known to be offline.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    online: Arc<AtomicBool>,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Shares an externally maintained connectivity flag.
    pub fn with_online_flag(mut self, online: Arc<AtomicBool>) -> Self {
        self.online = online;
        self
    }

    /// Marks the host online or offline.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn build(&self, request: &FetchRequest) -> Result<reqwest::RequestBuilder, FetchError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);

        if let Some(data) = &request.data {
            builder = match request.method {
                Method::Get => builder.query(&query_pairs(data)?),
                _ => builder.json(data),
            };
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(username) = &request.username {
            builder = builder.basic_auth(username, request.password.as_deref());
        }

        Ok(builder)
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Value, FetchError> {
        debug!("{} {}", request.method.as_str(), request.url);

        let response = self.build(request)?.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        match request.data_type {
            DataType::Json => {
                serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))
            }
            DataType::Text => Ok(Value::String(body)),
        }
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

fn transport_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(err.to_string())
    }
}

/// Flattens a JSON object into query pairs; strings are sent unquoted.
fn query_pairs(data: &Value) -> Result<Vec<(String, String)>, FetchError> {
    let object = data.as_object().ok_or_else(|| {
        FetchError::Transport("GET request data must be a JSON object".to_string())
    })?;

    Ok(object
        .iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (name.clone(), value)
        })
        .collect())
}
