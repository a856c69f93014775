use http::StatusCode;
use reqwest::{blocking::Response, Result};
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::thread::sleep;
use std::time::Duration;

/// Strategy to use if retrying.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RetryStrategy {
    /// The first request by the client will not be retried, but subsequent requests will.
    /// This allows fast failure if the client cannot reach the API endpoint at all, but
    /// helps to mitigate failure in long-running operations spanning multiple requests.
    Automatic,
    /// Always attempt to retry requests.
    Always,
}

/// Configuration for retrying the byte download of a datum from its signed URL.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Strategy for when to retry after a failure
    pub strategy: RetryStrategy,
    /// Maximum number of retries to attempt.
    pub max_retry_count: u8,
    /// Amount of time to wait for first retry.
    pub base_wait: Duration,
    /// Amount of time to scale retry waits. The wait before retry N is an exponential backoff
    /// using the formula `wait = base_wait * (backoff_factor ^ N)`.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Always,
            max_retry_count: 5,
            base_wait: Duration::from_secs(1),
            backoff_factor: 2.0,
        }
    }
}

/// Fixed-delay handling of rate-limited responses from the registry endpoints.
///
/// Unlike [`RetryConfig`], which backs off exponentially and gives up, this policy
/// re-sends the identical request after a constant wait. `max_retries: None` retries
/// indefinitely, matching the registry's guidance to wait and try again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Amount of time to wait before re-sending a rate-limited request.
    pub wait: Duration,
    /// Maximum number of retries to attempt, or `None` for no cap.
    pub max_retries: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(5),
            max_retries: None,
        }
    }
}

/// Re-send `send_request` until it returns something other than 429.
///
/// When the retry cap is exhausted the last rate-limited response is returned
/// as-is, so the caller reports it like any other failure status.
pub(crate) fn with_rate_limit(
    config: &RateLimitConfig,
    send_request: impl Fn() -> Result<Response>,
) -> Result<Response> {
    let mut retries: u32 = 0;
    loop {
        let response = send_request()?;
        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }
        if let Some(max_retries) = config.max_retries {
            if retries >= max_retries {
                return Ok(response);
            }
        }
        retries += 1;
        log::warn!(
            "{} for {} - retrying after {:?}.",
            response.status(),
            response.url(),
            config.wait
        );
        sleep(config.wait);
    }
}

#[derive(Debug)]
pub(crate) struct Retrier {
    config: RetryConfig,
    is_first_request: AtomicBool,
}

impl Retrier {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            is_first_request: AtomicBool::new(true),
        }
    }

    fn should_retry(status: StatusCode) -> bool {
        matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
    }

    pub fn with_retries(&self, send_request: impl Fn() -> Result<Response>) -> Result<Response> {
        if self.is_first_request.swap(false, SeqCst)
            && self.config.strategy == RetryStrategy::Automatic
        {
            return send_request();
        }

        for i_retry in 0..self.config.max_retry_count {
            macro_rules! warn_and_sleep {
                ($src:expr) => {{
                    let wait_factor = self.config.backoff_factor.powi(i_retry.into());
                    let duration = self.config.base_wait.mul_f64(wait_factor);
                    log::warn!("{} - retrying after {:?}.", $src, duration);
                    sleep(duration)
                }};
            }

            match send_request() {
                Ok(response) if Self::should_retry(response.status()) => {
                    warn_and_sleep!(format!("{} for {}", response.status(), response.url()))
                }
                Err(error) if error.is_timeout() || error.is_connect() || error.is_request() => {
                    warn_and_sleep!(error)
                }
                // If anything else, just return it immediately
                result => return result,
            }
        }

        // On last retry don't handle the error, just propagate all errors.
        send_request()
    }
}

#[cfg(test)]
mod tests {
    use super::{with_rate_limit, RateLimitConfig, Retrier, RetryConfig, RetryStrategy};
    use mockito::{mock, server_url};
    use reqwest::blocking::get;
    use std::time::Duration;

    #[test]
    fn test_always_retry() {
        let mut handler = Retrier::new(RetryConfig {
            strategy: RetryStrategy::Always,
            max_retry_count: 5,
            base_wait: Duration::from_secs(0),
            backoff_factor: 0.0,
        });

        // Does not attempt to retry on success
        let ok = mock("GET", "/retry-always").expect(1).create();
        assert!(
            handler
                .with_retries(|| get(format!("{}/retry-always", server_url())))
                .unwrap()
                .status()
                == 200
        );
        ok.assert();

        // Retries up to N times on a retryable status.
        for i_retry in 0..4 {
            let err = mock("GET", "/retry-always-503")
                .with_status(503)
                .expect((i_retry + 1).into())
                .create();
            handler.config.max_retry_count = i_retry;
            assert!(
                handler
                    .with_retries(|| get(format!("{}/retry-always-503", server_url())))
                    .unwrap()
                    .status()
                    == 503
            );
            err.assert();
        }
    }

    #[test]
    fn test_automatic_retry() {
        let handler = Retrier::new(RetryConfig {
            strategy: RetryStrategy::Automatic,
            max_retry_count: 5,
            base_wait: Duration::from_secs(0),
            backoff_factor: 0.0,
        });

        // Does not attempt to retry on failure of first request
        let err = mock("GET", "/retry-auto")
            .with_status(502)
            .expect(1)
            .create();
        assert!(
            handler
                .with_retries(|| get(format!("{}/retry-auto", server_url())))
                .unwrap()
                .status()
                == 502
        );
        err.assert();
    }

    #[test]
    fn test_non_retryable_status_returned_immediately() {
        let handler = Retrier::new(RetryConfig {
            strategy: RetryStrategy::Always,
            max_retry_count: 5,
            base_wait: Duration::from_secs(0),
            backoff_factor: 0.0,
        });

        let err = mock("GET", "/retry-404")
            .with_status(404)
            .expect(1)
            .create();
        assert!(
            handler
                .with_retries(|| get(format!("{}/retry-404", server_url())))
                .unwrap()
                .status()
                == 404
        );
        err.assert();
    }

    #[test]
    fn test_rate_limit_success_passes_through() {
        let config = RateLimitConfig {
            wait: Duration::from_secs(0),
            max_retries: Some(3),
        };

        let ok = mock("GET", "/rate-limit-ok").expect(1).create();
        assert!(
            with_rate_limit(&config, || get(format!("{}/rate-limit-ok", server_url())))
                .unwrap()
                .status()
                == 200
        );
        ok.assert();
    }

    #[test]
    fn test_rate_limit_retries_same_request_until_cap() {
        let config = RateLimitConfig {
            wait: Duration::from_secs(0),
            max_retries: Some(2),
        };

        // Initial attempt plus two retries of the identical request.
        let limited = mock("GET", "/rate-limit-429")
            .with_status(429)
            .expect(3)
            .create();
        assert!(with_rate_limit(&config, || get(format!(
            "{}/rate-limit-429",
            server_url()
        )))
        .unwrap()
        .status()
            == 429);
        limited.assert();
    }
}
