//! Outbound request pacing and rate-limit retries for the vision provider.
//!
//! Every model call goes through one shared [`RequestPacer`], so the whole
//! process stays under the provider's tokens-per-minute budget no matter how
//! many pages or batches are in flight. [`RetryPolicy`] decides how long to
//! wait after a rate-limit response and gives up after a fixed number of tries.

mod pacer;
mod retry;

pub use pacer::{Clock, RequestPacer, TokioClock};
pub use retry::{RetryPolicy, call_with_retry, parse_duration_hint};
