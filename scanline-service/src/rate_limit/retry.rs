use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use tracing::{debug, warn};

use super::RequestPacer;
use crate::config::OcrConfig;
use crate::error::{ProviderError, RetryHint};

/// One `<number><unit>` component of a Go-style duration such as `1m30s`
static DURATION_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)(ms|h|m|s)").unwrap());

/// "Please try again in 850ms" / "try again in 1.5s"
static TRY_AGAIN_IN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)try again in\s*(\d+(?:\.\d+)?\s*(?:ms|s))").unwrap());

/// Backoff policy for rate-limited provider calls.
///
/// The wait after a rate-limit response is taken from the first source that
/// is present: `retry-after-ms`, `retry-after`, `x-ratelimit-reset-tokens`,
/// a "try again in" phrase in the error message, and finally exponential
/// backoff from `base_delay` capped at `max_delay`. Jitter is added on top.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: Duration,
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        jitter: Duration,
    ) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter,
        }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_retry_delay_ms),
            Duration::from_millis(config.max_retry_delay_ms),
            Duration::from_millis(config.retry_jitter_ms),
        )
    }

    /// Retries allowed after the first call
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `attempt` (1-based), without jitter
    pub fn base_delay_for(&self, attempt: u32, hint: &RetryHint, message: &str) -> Duration {
        hint.retry_after_ms
            .or(hint.retry_after)
            .or(hint.reset_tokens)
            .or_else(|| parse_message_delay(message))
            .unwrap_or_else(|| self.exponential(attempt))
    }

    /// Delay before retry number `attempt`, with jitter
    pub fn delay_for(&self, attempt: u32, hint: &RetryHint, message: &str) -> Duration {
        let base = self.base_delay_for(attempt, hint, message);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    fn exponential(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Parse a provider duration string: `850ms`, `2s`, `1.5s`, `1m30s`, `6m0s`.
///
/// Returns `None` unless the whole string is made of duration components.
pub fn parse_duration_hint(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let mut total_ms = 0f64;
    let mut consumed = 0;
    for caps in DURATION_PART.captures_iter(value) {
        let whole = caps.get(0)?;
        if whole.start() != consumed {
            return None;
        }
        consumed = whole.end();

        let amount: f64 = caps[1].parse().ok()?;
        let unit_ms = match &caps[2] {
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            _ => return None,
        };
        total_ms += amount * unit_ms;
    }

    if consumed != value.len() {
        return None;
    }
    Some(Duration::from_millis(total_ms.round() as u64))
}

fn parse_message_delay(message: &str) -> Option<Duration> {
    let caps = TRY_AGAIN_IN.captures(message)?;
    let compact: String = caps[1].split_whitespace().collect();
    parse_duration_hint(&compact)
}

/// Run `call` through the pacer, retrying only rate-limit errors.
///
/// Every attempt, retries included, waits for a pacer slot. After
/// `max_retries` retries the last rate-limit error is wrapped in
/// [`ProviderError::RetriesExhausted`]. Any other error is returned as is.
pub async fn call_with_retry<T, F, Fut>(
    pacer: &RequestPacer,
    policy: &RetryPolicy,
    label: &str,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut retries = 0u32;
    loop {
        pacer.acquire().await;

        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let ProviderError::RateLimited { hint, message, .. } = &err else {
            debug!(label, error = %err, "Provider call failed without rate limiting");
            return Err(err);
        };

        if retries >= policy.max_retries() {
            warn!(label, attempts = retries + 1, "Rate-limit retries exhausted");
            return Err(ProviderError::RetriesExhausted {
                attempts: retries + 1,
                last: Box::new(err),
            });
        }

        retries += 1;
        let delay = policy.delay_for(retries, hint, message);
        warn!(
            label,
            attempt = retries,
            delay_ms = delay.as_millis() as u64,
            "Rate limited by provider, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(
            8,
            Duration::from_millis(1000),
            Duration::from_secs(30),
            Duration::ZERO,
        )
    }

    fn rate_limited(message: &str, hint: RetryHint) -> ProviderError {
        ProviderError::RateLimited {
            status: 429,
            code: Some("rate_limit_exceeded".to_string()),
            message: message.to_string(),
            hint,
        }
    }

    #[test]
    fn test_parse_duration_hint_forms() {
        assert_eq!(parse_duration_hint("850ms"), Some(Duration::from_millis(850)));
        assert_eq!(parse_duration_hint("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration_hint("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration_hint("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration_hint("6m0s"), Some(Duration::from_secs(360)));
        assert_eq!(parse_duration_hint(""), None);
        assert_eq!(parse_duration_hint("soon"), None);
        assert_eq!(parse_duration_hint("2s later"), None);
    }

    #[test]
    fn test_header_precedence() {
        let policy = policy();
        let all = RetryHint {
            retry_after_ms: Some(Duration::from_millis(120)),
            retry_after: Some(Duration::from_secs(3)),
            reset_tokens: Some(Duration::from_secs(7)),
        };
        let msg = "Please try again in 9s";
        assert_eq!(policy.base_delay_for(1, &all, msg), Duration::from_millis(120));

        let no_ms = RetryHint {
            retry_after_ms: None,
            ..all.clone()
        };
        assert_eq!(policy.base_delay_for(1, &no_ms, msg), Duration::from_secs(3));

        let reset_only = RetryHint {
            reset_tokens: Some(Duration::from_secs(7)),
            ..RetryHint::default()
        };
        assert_eq!(policy.base_delay_for(1, &reset_only, msg), Duration::from_secs(7));
    }

    #[test]
    fn test_message_then_exponential_fallback() {
        let policy = policy();
        let none = RetryHint::default();
        assert_eq!(
            policy.base_delay_for(1, &none, "Rate limit reached. Please try again in 850ms."),
            Duration::from_millis(850)
        );
        assert_eq!(
            policy.base_delay_for(1, &none, "Try again in 1.5 s"),
            Duration::from_millis(1500)
        );
        assert_eq!(policy.base_delay_for(1, &none, "slow down"), Duration::from_secs(1));
        assert_eq!(policy.base_delay_for(3, &none, "slow down"), Duration::from_secs(4));
        assert_eq!(policy.base_delay_for(6, &none, "slow down"), Duration::from_secs(30));
        assert_eq!(policy.base_delay_for(40, &none, "slow down"), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::new(
            8,
            Duration::from_millis(1000),
            Duration::from_secs(30),
            Duration::from_millis(250),
        );
        for _ in 0..50 {
            let delay = policy.delay_for(1, &RetryHint::default(), "");
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1250));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_call_retried_until_success() {
        let pacer = RequestPacer::new(Duration::ZERO);
        let calls = AtomicU32::new(0);

        let result = call_with_retry(&pacer, &policy(), "page 1", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(rate_limited(
                        "busy",
                        RetryHint {
                            retry_after_ms: Some(Duration::from_millis(10)),
                            ..RetryHint::default()
                        },
                    ))
                } else {
                    Ok("text")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, "text");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let pacer = RequestPacer::new(Duration::ZERO);
        let policy = RetryPolicy::new(
            2,
            Duration::from_millis(10),
            Duration::from_millis(40),
            Duration::ZERO,
        );
        let calls = AtomicU32::new(0);

        let err = call_with_retry(&pacer, &policy, "batch", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(rate_limited("busy", RetryHint::default())) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            err,
            ProviderError::RetriesExhausted { attempts: 3, ref last } if last.is_rate_limited()
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_not_retried() {
        let pacer = RequestPacer::new(Duration::ZERO);
        let calls = AtomicU32::new(0);

        let err = call_with_retry(&pacer, &policy(), "page 2", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(ProviderError::Request {
                    status: 500,
                    message: "boom".to_string(),
                })
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, ProviderError::Request { status: 500, .. }));
    }
}
