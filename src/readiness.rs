//! Bounded polling primitive used for every readiness check.
//!
//! The budget is measured from a single start timestamp taken on entry.
//! Sleeps yield to the runtime so concurrent requests keep making progress.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};

use crate::driver::PollPolicy;
use crate::error::ProvisionError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of a wait that did not succeed.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum WaitError<E> {
    /// The budget elapsed before the probe succeeded.
    #[error("timed out after {after:?}")]
    TimedOut {
        /// Budget that elapsed.
        after: Duration,
    },
    /// The probe itself failed; polling stops immediately.
    #[error("{0}")]
    Failed(E),
}

impl<E: Into<ProvisionError>> WaitError<E> {
    /// Converts into a [`ProvisionError`], naming the stage on timeout.
    pub fn into_provision_error(self, stage: &str, name: &str) -> ProvisionError {
        match self {
            Self::TimedOut { after } => ProvisionError::Timeout {
                stage: stage.to_owned(),
                name: name.to_owned(),
                after,
            },
            Self::Failed(err) => err.into(),
        }
    }
}

impl From<Infallible> for ProvisionError {
    fn from(value: Infallible) -> Self {
        match value {}
    }
}

/// Polls `probe` until it yields a value or `policy.timeout` elapses.
///
/// # Errors
///
/// Returns [`WaitError::TimedOut`] when the budget elapses and
/// [`WaitError::Failed`] as soon as the probe returns an error.
pub async fn wait_for<T, E, F, Fut>(policy: PollPolicy, mut probe: F) -> Result<T, WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let started = Instant::now();
    loop {
        if started.elapsed() >= policy.timeout {
            return Err(WaitError::TimedOut {
                after: policy.timeout,
            });
        }

        if let Some(value) = probe().await.map_err(WaitError::Failed)? {
            return Ok(value);
        }

        let remaining = policy.timeout.saturating_sub(started.elapsed());
        sleep(policy.interval.min(remaining)).await;
    }
}

/// Polls `predicate` until it returns `true` or `policy.timeout` elapses.
///
/// # Errors
///
/// See [`wait_for`].
pub async fn wait_until<E, F, Fut>(policy: PollPolicy, mut predicate: F) -> Result<(), WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    wait_for(policy, move || {
        let check = predicate();
        async move { check.await.map(|ready| ready.then_some(())) }
    })
    .await
}

/// Attempts one TCP connection to `addr`.
///
/// Refused, unreachable, and in-progress connections all count as "not yet".
pub async fn service_reachable(addr: SocketAddr) -> bool {
    matches!(
        timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Waits until `addr` accepts TCP connections.
///
/// # Errors
///
/// Returns [`WaitError::TimedOut`] when the port never answers in time.
pub async fn wait_for_service(
    addr: SocketAddr,
    policy: PollPolicy,
) -> Result<(), WaitError<Infallible>> {
    wait_until(policy, move || async move {
        Ok::<bool, Infallible>(service_reachable(addr).await)
    })
    .await
}
