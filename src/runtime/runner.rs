//! Component runner seam
//!
//! Action nodes hand their resolved config to a [`ComponentRunner`] keyed by the node's
//! component key. The built-in runner ships `echo` and `http-request`; embedders plug their
//! own integrations in through the trait.

use crate::runtime::support::retry_with_backoff;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;

/// External operation invoked by action nodes
#[async_trait]
pub trait ComponentRunner: Send + Sync {
    /// Run `component_key` with fully resolved props on behalf of `user_id`.
    async fn run(&self, component_key: &str, props: Value, user_id: Option<&str>) -> Result<Value>;
}

/// Runner for the components bundled with the engine
#[derive(Debug, Clone)]
pub struct BuiltinComponentRunner {
    client: reqwest::Client,
    retry_attempts: u32,
    retry_base_delay: Duration,
}

impl Default for BuiltinComponentRunner {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(250))
    }
}

impl BuiltinComponentRunner {
    pub fn new(retry_attempts: u32, retry_base_delay: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            retry_attempts,
            retry_base_delay,
        }
    }

    /// Execute an outbound HTTP request, retrying transport failures and 5xx answers.
    async fn http_request(&self, props: &Value) -> Result<Value> {
        let url = props
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("http-request missing 'url' parameter"))?;
        let method = props
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let method = match method.as_str() {
            "GET" | "POST" | "PUT" | "DELETE" | "PATCH" => reqwest::Method::from_bytes(method.as_bytes())?,
            other => bail!("Unsupported HTTP method: {}", other),
        };
        let headers = props
            .get("headers")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let query = props
            .get("query")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let body = props.get("body").filter(|b| !b.is_null()).cloned();

        tracing::debug!("🌍 HTTP Request: {} {}", method, url);

        let response = retry_with_backoff(self.retry_attempts, self.retry_base_delay, || {
            let request = self.build_request(method.clone(), url, &headers, &query, body.as_ref());
            async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| anyhow!("HTTP request failed: {}", e))?;
                if response.status().is_server_error() {
                    bail!("HTTP request failed with status {}", response.status());
                }
                Ok::<_, anyhow::Error>(response)
            }
        })
        .await?;

        let status = response.status();
        let headers_map: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body: {}", e))?;
        let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        if !status.is_success() {
            bail!("HTTP request to {} returned status {}", url, status);
        }

        tracing::info!("✅ HTTP request completed: {} {} (status: {})", method, url, status);

        Ok(json!({
            "status": status.as_u16(),
            "headers": headers_map,
            "data": data,
            "success": true,
        }))
    }

    fn build_request(
        &self,
        method: reqwest::Method,
        url: &str,
        headers: &Map<String, Value>,
        query: &Map<String, Value>,
        body: Option<&Value>,
    ) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url);

        for (key, value) in headers {
            if let Some(header_value) = value.as_str() {
                builder = builder.header(key.as_str(), header_value);
            }
        }

        if !query.is_empty() {
            let pairs: Vec<(String, String)> = query
                .iter()
                .map(|(k, v)| (k.clone(), v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())))
                .collect();
            builder = builder.query(&pairs);
        }

        match body {
            Some(Value::String(text)) => builder.header("Content-Type", "text/plain").body(text.clone()),
            Some(json_body) => builder.json(json_body),
            None => builder,
        }
    }
}

#[async_trait]
impl ComponentRunner for BuiltinComponentRunner {
    async fn run(&self, component_key: &str, props: Value, user_id: Option<&str>) -> Result<Value> {
        tracing::debug!(component = component_key, user_id = ?user_id, "Running built-in component");
        match component_key {
            "echo" => Ok(props),
            "http-request" => self.http_request(&props).await,
            other => bail!("Unknown component '{}'", other),
        }
    }
}
