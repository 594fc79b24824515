//! Periodic session validity check.
//!
//! The watchdog wakes on a fixed interval, loads the session record and
//! forces a sign-out once the 24h window has closed. Anonymous state (no
//! record at all) is left alone.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::ApiClient;

/// Default time between checks
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Result of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// No check has run yet
    Pending,
    /// No session record
    Anonymous,
    Valid,
    /// The session had expired and credentials were erased
    Expired,
}

/// Run one check against the client's session store.
pub async fn check_session(api: &ApiClient) -> CheckOutcome {
    let session = match api.sessions().load() {
        Ok(Some(session)) => session,
        Ok(None) => return CheckOutcome::Anonymous,
        Err(e) => {
            warn!(error = %e, "Failed to load session during periodic check");
            return CheckOutcome::Anonymous;
        }
    };

    if session.is_valid_at(Utc::now()) {
        debug!(minutes_left = session.minutes_until_expiry(), "Session still valid");
        return CheckOutcome::Valid;
    }

    info!(uid = %session.uid, "Session expired during periodic check, signing out");
    api.force_sign_out().await;
    CheckOutcome::Expired
}

/// Handle to a spawned watchdog task. Dropping it stops the task.
pub struct SessionWatchdog {
    shutdown_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<CheckOutcome>,
    handle: Option<JoinHandle<()>>,
}

impl SessionWatchdog {
    /// Spawn the check loop on the current tokio runtime
    pub fn spawn(api: ApiClient, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(CheckOutcome::Pending);

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("Session watchdog shutting down");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let outcome = check_session(&api).await;
                        state_tx.send_replace(outcome);
                    }
                }
            }
        });

        info!(interval_secs = interval.as_secs_f64(), "Session watchdog started");
        Self {
            shutdown_tx,
            state_rx,
            handle: Some(handle),
        }
    }

    /// Outcome of the most recent check
    pub fn last_outcome(&self) -> CheckOutcome {
        *self.state_rx.borrow()
    }

    /// Subscribe to check outcomes
    pub fn subscribe(&self) -> watch::Receiver<CheckOutcome> {
        self.state_rx.clone()
    }

    /// Stop the loop and wait for the task to finish
    pub async fn shutdown(mut self) {
        self.shutdown_tx.send(true).ok();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Session watchdog task failed");
            }
        }
    }
}

impl Drop for SessionWatchdog {
    fn drop(&mut self) {
        self.shutdown_tx.send(true).ok();
    }
}
