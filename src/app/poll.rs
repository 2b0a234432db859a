use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Satisfied,
    TimedOut,
}

/// Samples `predicate` every `interval` until it holds or `timeout` elapses.
///
/// `None` waits forever. `on_wait` runs before each sleep, for progress logging.
pub async fn poll_until<P, F, W>(
    interval: Duration,
    timeout: Option<Duration>,
    mut predicate: P,
    mut on_wait: W,
) -> PollOutcome
where
    P: FnMut() -> F,
    F: Future<Output = bool>,
    W: FnMut(),
{
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    loop {
        if predicate().await {
            return PollOutcome::Satisfied;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return PollOutcome::TimedOut;
            }
        }
        on_wait();
        tokio::time::sleep(interval).await;
    }
}
