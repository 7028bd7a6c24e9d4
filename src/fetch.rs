//! Bounded-retry HTTP fetch with exponential backoff and jitter.
//!
//! Only transport failures (connect/timeout/reset, including a body cut off
//! mid-read) and HTTP 408/429/500/502/503/504 are retried; anything else is
//! returned to the caller on the first attempt.
//! Pacing between work items is the caller's job, see [`RequestPacer`].
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::{thread_rng, Rng};
use reqwest::{Client, Request, Response, StatusCode};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument, warn};

use crate::error::FetchError;

const JITTER_RATIO: f64 = 0.10;

#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryOptions {
    /// `min(max_delay, initial_delay * 2^attempt)` before jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Apply ±10% jitter to a delay.
pub fn jittered(delay: Duration) -> Duration {
    let factor = thread_rng().gen_range((1.0 - JITTER_RATIO)..=(1.0 + JITTER_RATIO));
    delay.mul_f64(factor)
}

pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
}

/// HTTP client with explicit request and connect timeouts; nothing in the
/// pipeline may block indefinitely on a source site.
pub fn build_client(timeout: Duration, connect_timeout: Duration) -> anyhow::Result<Client> {
    Ok(Client::builder()
        .timeout(timeout)
        .connect_timeout(connect_timeout)
        .user_agent(concat!("asp-catalog/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Send `request`, retrying transient failures up to `opts.max_retries` times.
///
/// A request that always fails transiently is attempted exactly
/// `max_retries + 1` times before [`FetchError::RetriesExhausted`] is returned.
#[instrument(skip(client, request, opts), fields(url = %request.url()))]
pub async fn fetch_with_retry(
    client: &Client,
    request: Request,
    opts: &RetryOptions,
) -> Result<Response, FetchError> {
    let request = &request;
    with_retries(opts, move || send_once(client, request)).await
}

/// GET `url` and return the body bytes. A body cut off mid-read counts
/// against the same retry budget as a failed response.
#[instrument(skip(client, opts))]
pub async fn fetch_bytes(client: &Client, url: &str, opts: &RetryOptions) -> Result<Bytes, FetchError> {
    let request = client.get(url).build()?;
    let request = &request;
    with_retries(opts, move || async move {
        let resp = send_once(client, request).await?;
        resp.bytes().await.map_err(|source| FetchError::Body {
            url: url.to_string(),
            source,
        })
    })
    .await
}

async fn send_once(client: &Client, request: &Request) -> Result<Response, FetchError> {
    let this_try = request.try_clone().ok_or_else(|| {
        FetchError::InvalidRequest(format!("{} has a streaming body", request.url()))
    })?;
    let resp = client.execute(this_try).await?;
    let status = resp.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(FetchError::Status {
            status,
            url: request.url().to_string(),
        });
    }
    Ok(resp)
}

async fn with_retries<T, F, Fut>(opts: &RetryOptions, mut attempt_once: F) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt: u32 = 0;
    loop {
        let err = match attempt_once().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt, "fetch succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_transient() {
            return Err(err);
        }
        if attempt >= opts.max_retries {
            warn!(attempts = attempt + 1, error = %err, "fetch retries exhausted");
            return Err(FetchError::RetriesExhausted {
                attempts: attempt + 1,
                last: Box::new(err),
            });
        }
        let delay = jittered(opts.backoff_delay(attempt));
        warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "transient fetch failure; backing off");
        sleep(delay).await;
        attempt += 1;
    }
}

/// Fixed-interval politeness throttle shared by the requests of one process.
#[derive(Clone)]
pub struct RequestPacer {
    interval: Duration,
    next_allowed: Option<Arc<Mutex<Instant>>>,
}

impl RequestPacer {
    pub fn new(interval: Duration) -> Self {
        let next_allowed = (!interval.is_zero()).then(|| Arc::new(Mutex::new(Instant::now())));
        Self {
            interval,
            next_allowed,
        }
    }

    pub async fn wait(&self) {
        let Some(state) = &self.next_allowed else {
            return;
        };
        let mut next_allowed = state.lock().await;
        let now = Instant::now();
        let wait_until = if now >= *next_allowed { now } else { *next_allowed };
        let sleep_duration = wait_until.saturating_duration_since(now);
        *next_allowed = wait_until + self.interval;
        drop(next_allowed);

        if !sleep_duration.is_zero() {
            sleep(sleep_duration).await;
        }
    }
}
