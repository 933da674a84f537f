//! Deadline enforcement for guarded work
//!
//! The guarded operation runs as its own task. The guard races it against the
//! deadline; on expiry it cancels the operation's token and returns
//! [`Error::Timeout`] without waiting for the task to notice.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Runs operations against an absolute deadline
#[derive(Debug, Clone, Copy)]
pub struct DeadlineGuard {
    timeout: Duration,
}

impl DeadlineGuard {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Deadline for work that arrived at `arrival`
    pub fn deadline_from(&self, arrival: Instant) -> Instant {
        arrival + self.timeout
    }

    /// Run `op` with a deadline of now + timeout
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.run_until(self.deadline_from(Instant::now()), op).await
    }

    /// Run `op` until `deadline`
    ///
    /// `op` receives a token that is cancelled when the deadline passes; it is
    /// expected to check it at safe points and wind down.
    pub async fn run_until<T, F, Fut>(&self, deadline: Instant, op: F) -> Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let token = CancellationToken::new();
        let mut task = tokio::spawn(op(token.clone()));

        tokio::select! {
            biased;
            joined = &mut task => match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(Error::engine("guarded operation panicked")),
                Err(e) => Err(Error::engine(format!("guarded operation aborted: {e}"))),
            },
            _ = tokio::time::sleep_until(deadline) => {
                token.cancel();
                tracing::warn!("operation abandoned after {:?}", self.timeout);
                Err(Error::Timeout { timeout: self.timeout })
            }
        }
    }
}

impl Default for DeadlineGuard {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}
