use std::time::{Duration, Instant};

use reqwest::{Method, Url};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::diagnostics::{DiagnosticEntry, DiagnosticKind, DiagnosticLog};
use crate::utils::truncate_chars;

pub const EXCERPT_LIMIT: usize = 2000;

pub const TRANSPORT_HINT: &str = "No response received (network, DNS, TLS or CORS failure). \
Check that the URL uses HTTPS and the host is reachable.";

const SECRET_PARAMS: &[&str] = &["key", "api_key", "apikey", "token", "access_token"];

pub fn hint_for_status(status: u16) -> &'static str {
    match status {
        0 => "Network blocked or CORS preflight failed",
        401 => "Auth/Key issue",
        404 => "Endpoint path mismatch",
        415 => "Content-Type not accepted (expect application/json)",
        429 => "Rate limited",
        _ => "See response_text",
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Request to {url} failed: {message} ({hint})")]
    Transport {
        url: String,
        message: String,
        hint: &'static str,
    },

    #[error("HTTP {status}: {status_text} - {hint}\n{body_excerpt}")]
    Http {
        url: String,
        status: u16,
        status_text: String,
        hint: &'static str,
        body_excerpt: String,
    },
}

impl RequestError {
    pub fn hint(&self) -> &'static str {
        match self {
            RequestError::Transport { hint, .. } | RequestError::Http { hint, .. } => hint,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Http { status, .. } => Some(*status),
            RequestError::Transport { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    pub fn parse(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => ResponseBody::Json(value),
            Err(_) => ResponseBody::Text(text),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Text(_) => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            ResponseBody::Json(value) => value,
            ResponseBody::Text(text) => Value::String(text),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RequestSpec {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    // Query included, secret params masked.
    pub fn display_url(&self) -> String {
        let parsed = if self.query.is_empty() {
            Url::parse(&self.url)
        } else {
            Url::parse_with_params(&self.url, &self.query)
        };
        let Ok(mut url) = parsed else {
            return self.url.clone();
        };
        if url.query().is_none() {
            return url.to_string();
        }
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| {
                let v = if SECRET_PARAMS.contains(&k.as_ref()) {
                    "***".to_string()
                } else {
                    v.into_owned()
                };
                (k.into_owned(), v)
            })
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs);
        url.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct DiagnosticClient {
    http: reqwest::Client,
    log: DiagnosticLog,
}

impl DiagnosticClient {
    pub fn new(log: DiagnosticLog) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(8)
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self::with_client(http, log))
    }

    pub fn with_client(http: reqwest::Client, log: DiagnosticLog) -> Self {
        Self { http, log }
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.log
    }

    pub async fn perform(
        &self,
        spec: RequestSpec,
        context: Value,
    ) -> Result<ResponseBody, RequestError> {
        let display_url = spec.display_url();
        let started = Instant::now();
        debug!(method = %spec.method, url = %display_url, "sending request");

        let mut req = self
            .http
            .request(spec.method, spec.url.as_str())
            .query(&spec.query);
        for (name, value) in &spec.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &spec.body {
            req = req.json(body);
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(err) => {
                let message = err.to_string();
                self.log.record(
                    DiagnosticEntry::new(DiagnosticKind::FetchError, context)
                        .with_url(display_url.clone())
                        .with_duration_ms(elapsed_ms(started))
                        .with_error(message.clone())
                        .with_hint(TRANSPORT_HINT),
                );
                return Err(RequestError::Transport {
                    url: display_url,
                    message,
                    hint: TRANSPORT_HINT,
                });
            }
        };

        let status = resp.status();
        let status_text = status.canonical_reason().unwrap_or("").to_string();
        // A body that cannot be read is treated as empty.
        let text = resp.text().await.unwrap_or_default();
        let duration_ms = elapsed_ms(started);

        if !status.is_success() {
            let hint = hint_for_status(status.as_u16());
            let body_excerpt = truncate_chars(&text, EXCERPT_LIMIT).to_string();
            self.log.record(
                DiagnosticEntry::new(DiagnosticKind::HttpError, context)
                    .with_url(display_url.clone())
                    .with_status(status.as_u16(), status_text.clone())
                    .with_duration_ms(duration_ms)
                    .with_response_text(body_excerpt.clone())
                    .with_hint(hint),
            );
            return Err(RequestError::Http {
                url: display_url,
                status: status.as_u16(),
                status_text,
                hint,
                body_excerpt,
            });
        }

        self.log.record(
            DiagnosticEntry::new(DiagnosticKind::Response, context)
                .with_url(display_url)
                .with_status(status.as_u16(), status_text)
                .with_duration_ms(duration_ms),
        );
        Ok(ResponseBody::parse(text))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
