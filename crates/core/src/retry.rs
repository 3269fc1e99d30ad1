use crate::error::RemoteError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded exponential backoff for remote model calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based): base, 2×base, 4×base, …
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    let value = response.headers().get(reqwest::header::RETRY_AFTER)?;
    let secs = value.to_str().ok()?.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs))
}

/// Sends a request built by `f`, retrying transport errors, 429 and 5xx
/// responses up to `policy.max_retries` times. Other 4xx responses fail
/// immediately. A successful response is returned for the caller to decode.
pub(crate) async fn send_with_retry<F, Fut>(
    backend: &str,
    policy: &RetryPolicy,
    mut f: F,
) -> Result<reqwest::Response, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0;
    loop {
        let last_attempt = attempt >= policy.max_retries;

        let response = match f().await {
            Ok(response) => response,
            Err(error) if !last_attempt => {
                let delay = policy.backoff(attempt);
                warn!(backend, attempt = attempt + 1, error = %error, delay_ms = delay.as_millis() as u64, "request failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
            Err(error) => return Err(RemoteError::Http(error)),
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retryable =
            status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error();

        if !retryable || last_attempt {
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(RemoteError::RateLimited(backend.to_string()));
            }
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                backend: backend.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let delay = retry_after(&response)
            .unwrap_or_else(|| policy.backoff(attempt))
            .min(policy.max_delay);
        warn!(
            backend,
            status = status.as_u16(),
            attempt = attempt + 1,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            "remote call rejected, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
