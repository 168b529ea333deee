//! Deadline-bounded polling.
//!
//! # Design Decisions
//! - Fixed interval between attempts, no backoff
//! - Every wait has an overall deadline; callers map `Elapsed` to their own error

use std::future::Future;
use std::time::Duration;

use tokio::time::{self, Instant};

/// The deadline passed before the condition held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed {
    pub attempts: u32,
    pub waited: Duration,
}

/// Evaluate `check` every `interval` until it returns `true` or `deadline` passes.
///
/// The first attempt runs immediately. Returns the number of attempts on success.
pub async fn poll_until<F, Fut>(interval: Duration, deadline: Duration, mut check: F) -> Result<u32, Elapsed>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let remaining = deadline.saturating_sub(started.elapsed());
        if let Ok(true) = time::timeout(remaining.max(Duration::from_millis(1)), check()).await {
            return Ok(attempts);
        }

        if started.elapsed() + interval > deadline {
            return Err(Elapsed {
                attempts,
                waited: started.elapsed(),
            });
        }
        time::sleep(interval).await;
    }
}
