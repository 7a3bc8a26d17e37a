//! Caller-side polling.
//!
//! Issuance operations never wait for the CA or for DNS propagation. A driver that wants to
//! wait (for authorizations to become valid, for the order to become ready, for a certificate)
//! loops over the relevant operation with [`poll_until`].

use crate::error::{IssuanceError, IssueResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub factor: u32,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            factor: 2,
            max_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(10 * 60),
        }
    }
}

impl Backoff {
    /// The delays between attempts: `initial`, multiplied by `factor` each time, capped at
    /// `max_interval`.
    pub fn intervals(&self) -> impl Iterator<Item = Duration> + use<> {
        let factor = self.factor.max(1);
        let max_interval = self.max_interval;
        std::iter::successors(Some(self.initial.min(max_interval)), move |previous| {
            Some(previous.saturating_mul(factor).min(max_interval))
        })
    }
}

/// Run `poll_once` until it returns `Some`, sleeping per `backoff` between attempts.
///
/// Errors from `poll_once` end the loop immediately; the caller decides whether they are
/// retryable. Fails with [`IssuanceError::TimedOut`] once `backoff.timeout` has elapsed.
pub async fn poll_until<T, F, Fut>(backoff: Backoff, mut poll_once: F) -> IssueResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = IssueResult<Option<T>>>,
{
    let deadline = Instant::now() + backoff.timeout;
    let mut intervals = backoff.intervals();
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        if let Some(value) = poll_once().await? {
            debug!("Polling finished after {attempt} attempt(s)");
            return Ok(value);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(IssuanceError::TimedOut(backoff.timeout));
        }
        let delay = intervals
            .next()
            .unwrap_or(backoff.max_interval)
            .min(deadline - now);
        debug!("Attempt {attempt} not done yet, retrying in {delay:?}");
        tokio::time::sleep(delay).await;
    }
}
