//! Exponential-backoff connection logic for the adapter's TCP channels.
//!
//! Both channels reconnect through [`connect_with_backoff`]: delays grow
//! by a multiplier and are clamped to a maximum, and the loop stops on
//! cancellation or after an optional attempt cap.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the second connection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Attempt to connect with exponential backoff.
///
/// Returns `Some(stream)` once a connection succeeds, or `None` if the
/// cancellation token fires first or `max_attempts` is exhausted
/// (`None` for `max_attempts` keeps retrying until cancelled).
pub async fn connect_with_backoff(
    addr: &str,
    config: &BackoffConfig,
    max_attempts: Option<u32>,
    cancel: &CancellationToken,
) -> Option<TcpStream> {
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(addr, "Connect cancelled");
                return None;
            }
            result = TcpStream::connect(addr) => {
                match result {
                    Ok(stream) => {
                        tracing::info!(addr, attempt, "Connected to backend");
                        return Some(stream);
                    }
                    Err(e) => {
                        tracing::warn!(addr, attempt, error = %e, "Connection attempt failed");
                    }
                }
            }
        }

        if max_attempts.is_some_and(|max| attempt >= max) {
            tracing::warn!(addr, attempt, "Giving up after max connection attempts");
            return None;
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}
