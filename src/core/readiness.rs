//! Readiness waiting
//!
//! The provider applies firewall changes asynchronously and reports
//! `in process` while a change is rolling out. Every mutation first waits here
//! until the firewall is ready again.
//!
//! The wait is a plain poll loop on [`tokio::time`]: fetch, inspect, sleep.
//! Dropping the returned future cancels it between polls or mid-request.

use crate::core::error::{Error, ErrorContext, Result, classify};
use crate::core::firewall::{FirewallConfig, FirewallStatus};
use crate::robot::Transport;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default delay between two polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default upper bound for one wait.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// The two states a firewall can be in from the writer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Processing,
}

impl From<FirewallStatus> for Readiness {
    fn from(status: FirewallStatus) -> Self {
        match status {
            FirewallStatus::InProcess => Readiness::Processing,
            FirewallStatus::Active | FirewallStatus::Disabled => Readiness::Ready,
        }
    }
}

/// Polls a server's firewall until it leaves the processing state.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessWaiter {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ReadinessWaiter {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ReadinessWaiter {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    /// Returns the firewall configuration once it is ready.
    ///
    /// The configuration returned is the one fetched by the successful poll,
    /// so callers do not need to read it again.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` if the firewall is still processing after
    /// `self.timeout`; no write has happened in that case. Any failed fetch is
    /// classified and returned immediately without retry.
    pub async fn wait_until_ready<T>(&self, transport: &T, server: &str) -> Result<FirewallConfig>
    where
        T: Transport + ?Sized,
    {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let ctx = ErrorContext::server(server);
        let mut polls = 0u32;

        loop {
            polls += 1;
            let config = transport
                .get_firewall(server)
                .await
                .map_err(|e| classify(e, &ctx))?;

            match Readiness::from(config.status) {
                Readiness::Ready => {
                    if polls > 1 {
                        info!(
                            server,
                            polls,
                            waited_secs = started.elapsed().as_secs(),
                            "Firewall ready"
                        );
                    }
                    return Ok(config);
                }
                Readiness::Processing => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(server, polls, "Firewall still in process, giving up");
                        return Err(Error::Timeout {
                            server: server.to_string(),
                            waited: now - started,
                        });
                    }
                    debug!(server, polls, "Firewall in process, polling again");
                    let next = (now + self.poll_interval).min(deadline);
                    tokio::time::sleep_until(next).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::firewall::RuleLists;
    use crate::robot::memory::{Call, active_firewall};
    use crate::robot::MemoryTransport;

    fn waiter() -> ReadinessWaiter {
        ReadinessWaiter::new(Duration::from_secs(5), Duration::from_secs(30))
    }

    fn transport() -> MemoryTransport {
        MemoryTransport::new().with_firewall("42", active_firewall(42, RuleLists::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_returns_after_single_fetch() {
        let t = transport();
        let config = waiter().wait_until_ready(&t, "42").await.unwrap();
        assert_eq!(config.status, FirewallStatus::Active);
        assert_eq!(t.calls(), vec![Call::GetFirewall("42".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_ready() {
        let t = transport();
        t.script_statuses("42", [FirewallStatus::InProcess; 3]);

        let started = Instant::now();
        let config = waiter().wait_until_ready(&t, "42").await.unwrap();
        assert_eq!(config.status, FirewallStatus::Active);
        assert_eq!(t.calls().len(), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_with_retryable_error() {
        let t = transport();
        t.script_statuses("42", [FirewallStatus::InProcess; 100]);

        let err = waiter().wait_until_ready(&t, "42").await.unwrap_err();
        assert!(err.is_retryable());
        match err {
            Error::Timeout { server, waited } => {
                assert_eq!(server, "42");
                assert_eq!(waited, Duration::from_secs(30));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(t.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_is_not_retried() {
        let t = MemoryTransport::new();
        let err = waiter().wait_until_ready(&t, "missing").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert_eq!(t.calls().len(), 1);
    }

    #[test]
    fn test_disabled_counts_as_ready() {
        assert_eq!(Readiness::from(FirewallStatus::Disabled), Readiness::Ready);
        assert_eq!(Readiness::from(FirewallStatus::InProcess), Readiness::Processing);
    }
}
