//! Single-flight token refresh with bounded retries.
//!
//! At most one refresh exchange runs at a time. Callers that arrive while one
//! is running await the same result. The exchange runs on its own task, so a
//! caller going away (an aborted watcher, a dropped request) never strands
//! the others.

use crate::auth_fsm::{RefreshConfig, RefreshMachine, RefreshMachineInput};
use crate::backend::AuthBackend;
use crate::profile::IssuedTokens;
use crate::{AuthError, AuthResult};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use session_storage::{SessionId, TokenStore, UserProfile};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

type SharedRefresh = Shared<BoxFuture<'static, bool>>;

struct InFlight {
    id: u64,
    future: SharedRefresh,
}

struct Inner {
    store: Arc<TokenStore>,
    backend: Arc<dyn AuthBackend>,
    config: RefreshConfig,
    fsm: Mutex<RefreshMachine>,
    in_flight: Mutex<Option<InFlight>>,
    next_flight: AtomicU64,
}

/// Coordinates refresh-token exchanges for one [`TokenStore`].
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<TokenStore>,
        backend: Arc<dyn AuthBackend>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                backend,
                config,
                fsm: Mutex::new(RefreshMachine::new()),
                in_flight: Mutex::new(None),
                next_flight: AtomicU64::new(1),
            }),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    /// Renew the stored token pair.
    ///
    /// Returns `true` when new tokens were stored for the session that was
    /// current when the refresh began. Never clears the session.
    pub async fn refresh(&self) -> bool {
        let future = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(flight) => {
                    debug!(flight = flight.id, "Joining in-flight token refresh");
                    flight.future.clone()
                }
                None => {
                    let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                    let future = self.start_flight(id);
                    *slot = Some(InFlight {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };
        future.await
    }

    fn start_flight(&self, id: u64) -> SharedRefresh {
        let worker = self.inner.clone();
        let handle = tokio::spawn(async move {
            let refreshed = worker.run().await;
            worker.finish(id);
            refreshed
        });

        let inner = self.inner.clone();
        async move {
            let refreshed = handle.await.unwrap_or_else(|e| {
                warn!(flight = id, error = %e, "Token refresh task ended abnormally");
                false
            });
            inner.finish(id);
            refreshed
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    async fn run(&self) -> bool {
        let Some(session_id) = self.store.current_session() else {
            debug!("No current session, skipping token refresh");
            return false;
        };
        let Some(refresh_token) = self.store.refresh_token() else {
            warn!(session_id = %session_id, "No refresh token stored, skipping token refresh");
            return false;
        };

        self.transition(&RefreshMachineInput::Begin);
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let delay = self.config.delay_before_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
                self.transition(&RefreshMachineInput::Retry);
            }

            match self.attempt(&refresh_token).await {
                Ok((issued, profile)) => return self.commit(session_id, issued, profile, attempt),
                Err(e) => warn!(
                    session_id = %session_id,
                    attempt,
                    max_attempts,
                    transient = e.is_transient(),
                    error = %e,
                    "Token refresh attempt failed"
                ),
            }
        }

        let err = AuthError::RefreshExhausted(max_attempts);
        warn!(session_id = %session_id, error = %err, "Giving up on token refresh");
        self.settle(&RefreshMachineInput::Fail);
        false
    }

    async fn attempt(&self, refresh_token: &str) -> AuthResult<(IssuedTokens, UserProfile)> {
        let payload = self.backend.refresh_token(refresh_token).await?;
        let issued = IssuedTokens::from_payload(payload)?;
        let profile = issued.profile_or(self.store.profile())?;
        Ok((issued, profile))
    }

    fn commit(
        &self,
        session_id: SessionId,
        issued: IssuedTokens,
        profile: UserProfile,
        attempt: u32,
    ) -> bool {
        match self.store.replace_if_current(
            session_id,
            &issued.access_token,
            &issued.refresh_token,
            &profile,
        ) {
            Ok(true) => {
                info!(
                    session_id = %session_id,
                    attempt,
                    expires_at = issued.claims.expires_at_unix_secs,
                    "Token refreshed"
                );
                self.settle(&RefreshMachineInput::Succeed);
                true
            }
            Ok(false) => {
                info!(
                    session_id = %session_id,
                    "Session changed while refreshing, discarding new tokens"
                );
                self.settle(&RefreshMachineInput::Fail);
                false
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to store refreshed tokens");
                self.settle(&RefreshMachineInput::Fail);
                false
            }
        }
    }

    /// Record the outcome and return to idle.
    fn settle(&self, outcome: &RefreshMachineInput) {
        self.transition(outcome);
        self.transition(&RefreshMachineInput::Reset);
    }

    fn transition(&self, input: &RefreshMachineInput) {
        let mut fsm = self.fsm.lock();
        if fsm.consume(input).is_err() {
            warn!(
                input = ?input,
                state = ?fsm.state(),
                "Ignoring invalid refresh state transition"
            );
        }
    }

    fn finish(&self, id: u64) {
        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|flight| flight.id == id) {
            *slot = None;
        }
    }
}
