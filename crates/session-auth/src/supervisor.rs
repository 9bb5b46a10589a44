//! Session supervision: login, logout, restore, and the background watchers
//! that keep an authenticated session alive.
//!
//! While authenticated the supervisor runs three watchers:
//! - **expiry watch**: reads the ground-truth remaining time, renews in the
//!   background inside the refresh window, and forces logout once the token
//!   is gone and renewal fails
//! - **proactive renewal**: renews whenever the token is within the
//!   proactive window
//! - **countdown**: publishes the debounced remaining time to subscribers
//!
//! Observers read [`SessionSnapshot`] through a `watch` channel and react to
//! [`SessionEvent`]s on a `broadcast` channel.

use crate::auth_fsm::{RefreshConfig, SessionMachine, SessionMachineInput, SessionState};
use crate::backend::AuthBackend;
use crate::clock::{Clock, SystemClock};
use crate::profile::IssuedTokens;
use crate::refresh::RefreshCoordinator;
use crate::session_clock::{self, SessionClock};
use crate::token_codec;
use crate::{AuthError, AuthResult};
use parking_lot::Mutex;
use serde::Serialize;
use session_storage::{StoreChange, StoredSession, TokenStore, UserProfile};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storefront_config::SessionTimings;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Capacity of the session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// What observers see of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub user: Option<UserProfile>,
    pub is_authenticated: bool,
    pub is_admin: bool,
    /// A login or restore is in progress.
    pub loading: bool,
    /// Short user-facing message from the last failure.
    pub error: Option<String>,
    /// Debounced time to expiry; `None` without a session.
    pub session_time_remaining_ms: Option<i64>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::LoggedOut,
            user: None,
            is_authenticated: false,
            is_admin: false,
            loading: false,
            error: None,
            session_time_remaining_ms: None,
        }
    }
}

/// Notifications broadcast by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged {
        old_state: SessionState,
        new_state: SessionState,
    },
    /// Tokens or profile were written.
    SessionUpdated,
    /// Tokens and profile were removed.
    SessionCleared,
    RefreshFinished { success: bool },
    /// The session ended without the user asking.
    ForcedLogout { reason: String },
    /// Navigate to the deep link saved before login.
    NavigateTo { path: String },
}

struct SupervisorInner {
    store: Arc<TokenStore>,
    backend: Arc<dyn AuthBackend>,
    refresher: RefreshCoordinator,
    clock: Arc<dyn Clock>,
    timings: SessionTimings,
    fsm: Mutex<SessionMachine>,
    session_clock: Mutex<SessionClock>,
    snapshot: watch::Sender<SessionSnapshot>,
    event_tx: broadcast::Sender<SessionEvent>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
    /// Set while a watcher-started background refresh is running.
    watch_refresh_in_flight: AtomicBool,
    redirect_after_login: Mutex<Option<String>>,
}

/// Owns the session lifecycle for one client.
#[derive(Clone)]
pub struct SessionSupervisor {
    inner: Arc<SupervisorInner>,
}

impl SessionSupervisor {
    /// Create a supervisor on the system clock.
    pub fn new(
        store: Arc<TokenStore>,
        backend: Arc<dyn AuthBackend>,
        timings: SessionTimings,
    ) -> Self {
        Self::with_clock(store, backend, timings, Arc::new(SystemClock))
    }

    /// Create a supervisor reading wall-clock time from `clock`.
    pub fn with_clock(
        store: Arc<TokenStore>,
        backend: Arc<dyn AuthBackend>,
        timings: SessionTimings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (snapshot, _) = watch::channel(SessionSnapshot::default());

        let store_events = event_tx.clone();
        store.set_change_callback(Arc::new(move |change: &StoreChange| {
            let event = match change {
                StoreChange::Saved { .. } | StoreChange::Refreshed { .. } => {
                    SessionEvent::SessionUpdated
                }
                StoreChange::Cleared => SessionEvent::SessionCleared,
            };
            let _ = store_events.send(event);
        }));

        let refresher = RefreshCoordinator::new(
            store.clone(),
            backend.clone(),
            RefreshConfig::from(&timings),
        );

        Self {
            inner: Arc::new(SupervisorInner {
                store,
                backend,
                refresher,
                clock,
                session_clock: Mutex::new(SessionClock::new(timings.debounce_ms)),
                timings,
                fsm: Mutex::new(SessionMachine::new()),
                snapshot,
                event_tx,
                watchers: Mutex::new(Vec::new()),
                watch_refresh_in_flight: AtomicBool::new(false),
                redirect_after_login: Mutex::new(None),
            }),
        }
    }

    // ==========================================
    // Observation
    // ==========================================

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Follow snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Follow session events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Authenticated state backed by a complete stored session.
    pub fn is_authenticated(&self) -> bool {
        self.inner.is_authenticated()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.refresher.is_refreshing()
    }

    /// Remember where to send the user once login succeeds.
    pub fn set_redirect_after_login(&self, path: impl Into<String>) {
        *self.inner.redirect_after_login.lock() = Some(path.into());
    }

    // ==========================================
    // Lifecycle
    // ==========================================

    /// Recover whatever session storage holds.
    ///
    /// Inconsistent storage is cleared. A complete session with a live token
    /// is adopted directly; one whose token is expired goes through a single
    /// refresh and is cleared if that fails.
    pub async fn start(&self) -> AuthResult<SessionState> {
        self.inner.start().await
    }

    /// Exchange a sign-in credential for a session.
    pub async fn login(&self, credential: &str, remember_me: bool) -> AuthResult<UserProfile> {
        self.inner.login(credential, remember_me).await
    }

    /// Clear the session and stop the watchers.
    pub fn logout(&self) -> AuthResult<()> {
        self.inner.logout()
    }

    /// Renew the token pair. Concurrent calls share one exchange.
    pub async fn refresh_token(&self) -> bool {
        self.inner.refresh_token().await
    }

    /// Stop the watchers without touching the stored session.
    pub fn dispose(&self) {
        self.inner.stop_watchers();
        debug!("Session supervisor disposed");
    }

    #[cfg(test)]
    pub(crate) fn watcher_count(&self) -> usize {
        self.inner
            .watchers
            .lock()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl SupervisorInner {
    fn state(&self) -> SessionState {
        SessionState::from(self.fsm.lock().state())
    }

    fn is_authenticated(&self) -> bool {
        self.state().is_authenticated()
            && self.store.stored_session() == StoredSession::Complete
    }

    fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    fn remaining_ms(&self) -> Option<i64> {
        session_clock::remaining_ms(self.store.access_token().as_deref(), self.now_ms())
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    // ==========================================
    // State transitions
    // ==========================================

    fn transition(&self, input: &SessionMachineInput) -> AuthResult<SessionState> {
        let mut fsm = self.fsm.lock();
        let (old_state, new_state) = consume(&mut fsm, input)?;
        drop(fsm);

        self.announce(old_state, new_state);
        Ok(new_state)
    }

    /// Enter `Authenticating` for a login, refusing while one is running or
    /// a session is active.
    fn begin_login(&self) -> AuthResult<()> {
        let mut fsm = self.fsm.lock();
        match SessionState::from(fsm.state()) {
            SessionState::Authenticating => return Err(AuthError::LoginInProgress),
            SessionState::Authenticated => return Err(AuthError::AlreadyAuthenticated),
            SessionState::LoggedOut => {}
        }
        let (old_state, new_state) = consume(&mut fsm, &SessionMachineInput::LoginAttempt)?;
        drop(fsm);

        self.announce(old_state, new_state);
        Ok(())
    }

    fn announce(&self, old_state: SessionState, new_state: SessionState) {
        if old_state == new_state {
            return;
        }
        debug!(old_state = ?old_state, new_state = ?new_state, "Session state transition");
        self.sync_snapshot();
        self.emit(SessionEvent::StateChanged {
            old_state,
            new_state,
        });
    }

    /// Rebuild the snapshot from the FSM and storage.
    fn sync_snapshot(&self) {
        let state = self.state();
        let authenticated = state.is_authenticated();
        let user = if authenticated {
            self.store.profile()
        } else {
            None
        };
        let is_authenticated = authenticated && self.store.stored_session() == StoredSession::Complete;

        let remaining = {
            let remaining = if authenticated {
                self.remaining_ms()
            } else {
                None
            };
            let mut clock = self.session_clock.lock();
            clock.offer(remaining);
            clock.current()
        };

        self.snapshot.send_modify(|snapshot| {
            snapshot.state = state;
            snapshot.is_admin = user.as_ref().is_some_and(UserProfile::is_admin);
            snapshot.user = user;
            snapshot.is_authenticated = is_authenticated;
            snapshot.session_time_remaining_ms = remaining;
        });
    }

    fn set_progress(&self, loading: bool, error: Option<String>) {
        self.snapshot.send_modify(|snapshot| {
            snapshot.loading = loading;
            snapshot.error = error;
        });
    }

    // ==========================================
    // Lifecycle
    // ==========================================

    async fn start(self: &Arc<Self>) -> AuthResult<SessionState> {
        if self.store.heal_if_inconsistent()? {
            info!("Cleared inconsistent stored session");
        }

        let state = self.state();
        if state != SessionState::LoggedOut {
            debug!(state = ?state, "Supervisor already started");
            return Ok(state);
        }

        let Some(session_id) = self.store.adopt_existing() else {
            info!("No stored session");
            self.sync_snapshot();
            return Ok(SessionState::LoggedOut);
        };

        let token = self.store.access_token().unwrap_or_default();
        let grace_ms = i64::try_from(self.timings.expiry_grace_ms).unwrap_or(i64::MAX);
        if !token_codec::is_expired(&token, grace_ms, self.now_ms()) {
            info!(session_id = %session_id, "Restored stored session");
            self.transition(&SessionMachineInput::SessionRestored)?;
            self.start_watchers();
            return Ok(SessionState::Authenticated);
        }

        info!(session_id = %session_id, "Stored token expired, restoring through refresh");
        self.transition(&SessionMachineInput::RestoreAttempt)?;
        self.set_progress(true, None);

        let refreshed = self.refresher.refresh().await;
        self.emit(SessionEvent::RefreshFinished { success: refreshed });

        if refreshed {
            self.set_progress(false, None);
            self.transition(&SessionMachineInput::LoginSucceeded)?;
            self.start_watchers();
            Ok(SessionState::Authenticated)
        } else {
            warn!(session_id = %session_id, "Could not restore stored session, clearing");
            self.store.clear()?;
            self.set_progress(false, None);
            self.transition(&SessionMachineInput::LoginFailed)?;
            Ok(SessionState::LoggedOut)
        }
    }

    async fn login(
        self: &Arc<Self>,
        credential: &str,
        remember_me: bool,
    ) -> AuthResult<UserProfile> {
        let credential = credential.trim();
        if credential.is_empty() || credential.chars().any(char::is_whitespace) {
            let err = AuthError::InvalidCredential("credential is empty or malformed".to_string());
            self.set_progress(false, Some(err.user_message().to_string()));
            return Err(err);
        }

        self.begin_login()?;
        self.set_progress(true, None);

        match self.exchange(credential, remember_me).await {
            Ok(profile) => {
                self.set_progress(false, None);
                self.transition(&SessionMachineInput::LoginSucceeded)?;
                self.start_watchers();
                info!(remember_me, admin = profile.is_admin(), "Logged in");

                if let Some(path) = self.redirect_after_login.lock().take() {
                    self.emit(SessionEvent::NavigateTo { path });
                }
                Ok(profile)
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                if let Err(clear_err) = self.store.clear() {
                    warn!(error = %clear_err, "Failed to clear partial session after login failure");
                }
                self.set_progress(false, Some(e.user_message().to_string()));
                self.transition(&SessionMachineInput::LoginFailed)?;
                Err(e)
            }
        }
    }

    async fn exchange(&self, credential: &str, remember_me: bool) -> AuthResult<UserProfile> {
        let payload = self.backend.google_login(credential, remember_me).await?;
        let issued = IssuedTokens::from_payload(payload)?;
        let profile = issued.profile_or(None)?;
        self.store.save(
            &issued.access_token,
            &issued.refresh_token,
            &profile,
            remember_me,
        )?;
        Ok(profile)
    }

    fn logout(&self) -> AuthResult<()> {
        self.stop_watchers();
        self.store.clear()?;
        self.session_clock.lock().reset();

        if self.state().is_authenticated() {
            self.transition(&SessionMachineInput::LogoutRequested)?;
        } else {
            self.sync_snapshot();
        }
        self.set_progress(false, None);
        info!("Logged out");
        Ok(())
    }

    /// End the session after renewal failed for an expired token.
    fn force_logout(&self, reason: &str) {
        if !self.state().is_authenticated() {
            return;
        }
        warn!(reason, "Forcing logout");

        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear session during forced logout");
        }
        if let Err(e) = self.transition(&SessionMachineInput::SessionLost) {
            warn!(error = %e, "Forced logout transition failed");
        }
        let message = AuthError::RefreshExhausted(self.timings.refresh_max_attempts).user_message();
        self.set_progress(false, Some(message.to_string()));
        self.emit(SessionEvent::ForcedLogout {
            reason: reason.to_string(),
        });
        // Last: this may cancel the calling watcher at its next await.
        self.stop_watchers();
    }

    async fn refresh_token(&self) -> bool {
        let refreshed = self.refresher.refresh().await;
        self.emit(SessionEvent::RefreshFinished { success: refreshed });

        if refreshed && self.state().is_authenticated() {
            if let Err(e) = self.transition(&SessionMachineInput::RefreshSucceeded) {
                warn!(error = %e, "Refresh transition failed");
            }
            self.sync_snapshot();
        }
        refreshed
    }

    // ==========================================
    // Watchers
    // ==========================================

    fn start_watchers(self: &Arc<Self>) {
        // Held while spawning so a watcher that forces logout right away
        // stops this generation rather than the previous one.
        let mut watchers = self.watchers.lock();
        for handle in watchers.drain(..) {
            handle.abort();
        }

        let expiry = spawn_watcher(
            self,
            "expiry",
            self.timings.expiry_watch_interval(),
            true,
            |inner| async move { inner.run_expiry_check().await },
        );
        let proactive = spawn_watcher(
            self,
            "proactive",
            self.timings.proactive_interval(),
            false,
            |inner| async move { inner.run_proactive_check().await },
        );
        let countdown = spawn_watcher(
            self,
            "countdown",
            self.timings.countdown_tick(),
            true,
            |inner| async move { inner.tick_countdown() },
        );

        watchers.extend([expiry, proactive, countdown]);
        debug!("Session watchers started");
    }

    fn stop_watchers(&self) {
        let handles: Vec<_> = self.watchers.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            handle.abort();
        }
        self.watch_refresh_in_flight.store(false, Ordering::SeqCst);
        debug!("Session watchers stopped");
    }

    async fn run_expiry_check(self: &Arc<Self>) {
        if !self.state().is_authenticated() {
            return;
        }

        let window_min = secs_to_ms(self.timings.refresh_window_min_secs);
        let window_max = secs_to_ms(self.timings.refresh_window_max_secs);

        match self.remaining_ms() {
            Some(remaining) if remaining > 0 => {
                if remaining > window_min && remaining <= window_max {
                    debug!(remaining_ms = remaining, "Token inside refresh window");
                    self.spawn_background_refresh();
                }
            }
            remaining => {
                info!(remaining_ms = ?remaining, "Token expired, refreshing before forcing logout");
                if !self.refresh_token().await {
                    self.force_logout("session expired and could not be renewed");
                }
            }
        }
    }

    async fn run_proactive_check(self: &Arc<Self>) {
        if !self.state().is_authenticated() {
            return;
        }
        let window = secs_to_ms(self.timings.proactive_window_secs);
        if let Some(remaining) = self.remaining_ms() {
            if remaining <= window {
                debug!(remaining_ms = remaining, "Renewing token proactively");
                self.spawn_background_refresh();
            }
        }
    }

    fn tick_countdown(&self) {
        if !self.state().is_authenticated() {
            return;
        }
        let remaining = self.remaining_ms();
        let published = {
            let mut clock = self.session_clock.lock();
            clock.offer(remaining).then(|| clock.current())
        };
        if let Some(remaining) = published {
            self.snapshot.send_modify(|snapshot| {
                snapshot.session_time_remaining_ms = remaining;
            });
        }
    }

    /// Start a refresh nobody waits for, unless a watcher already has one
    /// running.
    fn spawn_background_refresh(self: &Arc<Self>) {
        if self.watch_refresh_in_flight.swap(true, Ordering::SeqCst) {
            debug!("Background refresh already running");
            return;
        }
        let inner = self.clone();
        tokio::spawn(async move {
            inner.refresh_token().await;
            inner.watch_refresh_in_flight.store(false, Ordering::SeqCst);
        });
    }
}

fn consume(
    fsm: &mut SessionMachine,
    input: &SessionMachineInput,
) -> AuthResult<(SessionState, SessionState)> {
    let old_state = SessionState::from(fsm.state());
    fsm.consume(input).map_err(|_| {
        AuthError::InvalidStateTransition(format!(
            "Cannot apply {:?} in state {:?}",
            input,
            fsm.state()
        ))
    })?;
    Ok((old_state, SessionState::from(fsm.state())))
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

/// Run `check` every `period` until aborted or the supervisor is dropped.
fn spawn_watcher<F, Fut>(
    inner: &Arc<SupervisorInner>,
    name: &'static str,
    period: Duration,
    immediate: bool,
    check: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<SupervisorInner>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        let first = if immediate {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut ticker = tokio::time::interval_at(first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            check(inner).await;
        }
        debug!(watcher = name, "Session watcher exited");
    })
}
