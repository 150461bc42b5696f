use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::Result;

/// Query parameter the search pages are paginated by.
pub const PAGE_PARAM: &str = "Page";

const TRANSIENT_STATUSES: [u16; 3] = [502, 503, 504];

pub struct RawResponse {
    pub status: u16,
    /// Only read for status 200; empty otherwise.
    pub body: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("timed out")]
    Timeout,
    /// Response arrived but its body could not be read as text.
    #[error("unreadable body: {0}")]
    Payload(String),
}

/// One HTTP GET. Kept behind a trait so the retry policy can be driven
/// without a network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, query: &[(&'static str, String)]) -> std::result::Result<RawResponse, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, query: &[(&'static str, String)]) -> std::result::Result<RawResponse, TransportError> {
        let res = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Connect(e.to_string())
                }
            })?;

        let status = res.status().as_u16();
        if status != 200 {
            return Ok(RawResponse { status, body: String::new() });
        }

        let body = res.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Payload(e.to_string())
            }
        })?;
        Ok(RawResponse { status, body })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound on requests while the upstream keeps answering 502/503/504.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Extra requests allowed after connection errors or timeouts.
    pub connection_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            connection_retries: 1,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failures`-th transient status (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(failures.saturating_sub(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Page(String),
    /// Non-retryable status; dropped like a removed listing.
    Rejected(u16),
    /// Transient failures outlasted the retry budget.
    Exhausted { attempts: u32 },
    Undecodable,
}

impl FetchOutcome {
    pub fn into_page(self) -> Option<String> {
        match self {
            FetchOutcome::Page(body) => Some(body),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub query: Vec<(&'static str, String)>,
}

impl FetchRequest {
    pub fn plain(url: impl Into<String>) -> Self {
        Self { url: url.into(), query: Vec::new() }
    }

    pub fn page(url: impl Into<String>, page: u32) -> Self {
        Self {
            url: url.into(),
            query: vec![(PAGE_PARAM, page.to_string())],
        }
    }
}

pub struct PageFetcher<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: Transport> PageFetcher<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub async fn fetch(&self, url: &str, query: &[(&'static str, String)]) -> FetchOutcome {
        let mut attempts = 0u32;
        let mut transient = 0u32;
        let mut connection = 0u32;

        loop {
            attempts += 1;
            match self.transport.get(url, query).await {
                Ok(res) if res.status == 200 => return FetchOutcome::Page(res.body),
                Ok(res) if TRANSIENT_STATUSES.contains(&res.status) => {
                    transient += 1;
                    if transient >= self.policy.max_attempts {
                        warn!("Giving up on {} after {} attempts (last status {})", url, attempts, res.status);
                        return FetchOutcome::Exhausted { attempts };
                    }
                    let backoff = self.policy.backoff(transient);
                    warn!(
                        "Status {} from {} (attempt {}/{}), backing off {:.1}s",
                        res.status,
                        url,
                        transient,
                        self.policy.max_attempts,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                }
                Ok(res) => return FetchOutcome::Rejected(res.status),
                Err(TransportError::Payload(e)) => {
                    debug!("Undecodable body from {}: {}", url, e);
                    return FetchOutcome::Undecodable;
                }
                Err(e) => {
                    if connection >= self.policy.connection_retries {
                        warn!("Giving up on {} after {} attempts: {}", url, attempts, e);
                        return FetchOutcome::Exhausted { attempts };
                    }
                    connection += 1;
                    warn!("Request to {} failed ({}), retrying", url, e);
                    tokio::time::sleep(self.policy.base_delay).await;
                }
            }
        }
    }

    /// Issue every request at once and keep the bodies that came back.
    /// Failed requests are dropped without being reported to the caller.
    pub async fn fetch_all(&self, requests: &[FetchRequest]) -> Vec<String> {
        let outcomes = join_all(requests.iter().map(|r| self.fetch(&r.url, &r.query))).await;

        for (req, outcome) in requests.iter().zip(&outcomes) {
            match outcome {
                FetchOutcome::Page(_) => {}
                FetchOutcome::Rejected(status) => debug!("Dropped {}: status {}", req.url, status),
                FetchOutcome::Exhausted { attempts } => {
                    debug!("Dropped {}: gave up after {} attempts", req.url, attempts)
                }
                FetchOutcome::Undecodable => debug!("Dropped {}: undecodable body", req.url),
            }
        }

        outcomes.into_iter().filter_map(FetchOutcome::into_page).collect()
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use super::*;

    pub type Scripted = std::result::Result<RawResponse, TransportError>;

    pub fn ok(body: &str) -> Scripted {
        Ok(RawResponse { status: 200, body: body.to_string() })
    }

    pub fn status(code: u16) -> Scripted {
        Ok(RawResponse { status: code, body: String::new() })
    }

    /// Replays queued responses per URL (query included as `url?k=v`).
    /// An exhausted or unknown queue answers 404.
    #[derive(Default)]
    pub struct ScriptedTransport {
        queues: Mutex<HashMap<String, VecDeque<Scripted>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn push(&self, key: &str, response: Scripted) {
            self.queues
                .lock()
                .unwrap()
                .entry(key.to_string())
                .or_default()
                .push_back(response);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    pub fn request_key(url: &str, query: &[(&'static str, String)]) -> String {
        if query.is_empty() {
            return url.to_string();
        }
        let qs: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("{}?{}", url, qs.join("&"))
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, url: &str, query: &[(&'static str, String)]) -> Scripted {
            let key = request_key(url, query);
            self.calls.lock().unwrap().push(key.clone());
            self.queues
                .lock()
                .unwrap()
                .get_mut(&key)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| status(404))
        }
    }

    pub fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(1),
            connection_retries: 1,
        }
    }
}
