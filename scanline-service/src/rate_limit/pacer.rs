use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Time source for the pacer; swapped out in tests
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep_until(&self, deadline: Instant);
}

/// Clock backed by the tokio timer (honours `tokio::time::pause`)
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

/// Spaces outbound requests at least `min_gap` apart.
///
/// Callers queue on a fair mutex, so dispatch order is arrival order. The
/// lock is held across the sleep: while one caller waits for its slot the
/// rest wait behind it.
pub struct RequestPacer {
    min_gap: Duration,
    next_allowed: Mutex<Option<Instant>>,
    clock: Arc<dyn Clock>,
}

impl RequestPacer {
    pub fn new(min_gap: Duration) -> Self {
        Self::with_clock(min_gap, Arc::new(TokioClock))
    }

    pub fn with_clock(min_gap: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_gap,
            next_allowed: Mutex::new(None),
            clock,
        }
    }

    pub fn min_gap(&self) -> Duration {
        self.min_gap
    }

    /// Wait for the next free slot and return the instant the request may go out
    pub async fn acquire(&self) -> Instant {
        let mut next_allowed = self.next_allowed.lock().await;

        if let Some(next) = *next_allowed
            && next > self.clock.now()
        {
            trace!(wait_ms = (next - self.clock.now()).as_millis() as u64, "Pacing request");
            self.clock.sleep_until(next).await;
        }

        let dispatch = self.clock.now();
        *next_allowed = Some(dispatch + self.min_gap);
        dispatch
    }
}
