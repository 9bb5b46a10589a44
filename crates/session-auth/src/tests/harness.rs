//! Test harness for session scenarios.
//!
//! Provides:
//! - TokioClock: wall clock that advances with tokio's (paused) clock
//! - ScriptedBackend: an AuthBackend answering from a reply script
//! - Harness: store, backend, and supervisor wired together

use crate::backend::{ApiRole, ApiUser, AuthBackend, AuthPayload};
use crate::{BackendError, Clock, SessionEvent, SessionSupervisor};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use parking_lot::Mutex;
use serde_json::{json, Value};
use session_storage::{MemoryStorage, SessionId, TokenStore, UserProfile, UserRole};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storefront_config::SessionTimings;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Wall-clock start for every test: 2023-11-14T22:13:20Z.
pub const BASE_MS: i64 = 1_700_000_000_000;

/// Wall clock pinned to [`BASE_MS`] at creation, advancing with tokio time.
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now_secs(&self) -> i64 {
        self.now_ms() / 1000
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> i64 {
        BASE_MS + self.origin.elapsed().as_millis() as i64
    }
}

/// JWT-shaped token with the given expiry and optional role claim.
pub fn make_token(exp_secs: i64, role: Option<Value>) -> String {
    let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let mut claims = json!({ "exp": exp_secs, "sub": "42" });
    if let Some(role) = role {
        claims["role"] = role;
    }
    let payload = general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.signature", header, payload)
}

pub fn api_user(role: Option<ApiRole>) -> ApiUser {
    ApiUser {
        first_name: Some("Grace".to_string()),
        last_name: Some("Hopper".to_string()),
        email: Some("grace@example.com".to_string()),
        role,
        photo: None,
    }
}

pub fn profile() -> UserProfile {
    UserProfile {
        display_name: "Grace Hopper".to_string(),
        email: "grace@example.com".to_string(),
        avatar_url: None,
        role: UserRole::User,
    }
}

/// One scripted backend answer.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Fresh token pair and user; the token lives `lifetime_secs` from the
    /// moment of the call.
    Issue { lifetime_secs: i64 },
    /// Like `Issue`, with an explicit role on the user object.
    IssueWithRole { lifetime_secs: i64, role: ApiRole },
    /// Token pair without a user object.
    IssueWithoutUser { lifetime_secs: i64 },
    /// Token pair whose user lacks an email.
    IncompleteUser { lifetime_secs: i64 },
    /// Success status, undecodable token.
    Malformed,
    /// Success status, body without a `token` field.
    MissingToken,
    Fail(BackendError),
}

/// AuthBackend that answers from queued replies, then from a default.
pub struct ScriptedBackend {
    clock: Arc<TokioClock>,
    login_replies: Mutex<VecDeque<Reply>>,
    refresh_replies: Mutex<VecDeque<Reply>>,
    default_login: Mutex<Reply>,
    default_refresh: Mutex<Reply>,
    login_delay: Mutex<Duration>,
    refresh_delay: Mutex<Duration>,
    login_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    refresh_call_times: Mutex<Vec<Instant>>,
    refresh_tokens_seen: Mutex<Vec<String>>,
    issued: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(clock: Arc<TokioClock>) -> Self {
        Self {
            clock,
            login_replies: Mutex::new(VecDeque::new()),
            refresh_replies: Mutex::new(VecDeque::new()),
            default_login: Mutex::new(Reply::Issue {
                lifetime_secs: 3600,
            }),
            default_refresh: Mutex::new(Reply::Issue {
                lifetime_secs: 3600,
            }),
            login_delay: Mutex::new(Duration::ZERO),
            refresh_delay: Mutex::new(Duration::ZERO),
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            refresh_call_times: Mutex::new(Vec::new()),
            refresh_tokens_seen: Mutex::new(Vec::new()),
            issued: AtomicUsize::new(0),
        }
    }

    pub fn queue_login(&self, reply: Reply) {
        self.login_replies.lock().push_back(reply);
    }

    pub fn queue_refresh(&self, reply: Reply) {
        self.refresh_replies.lock().push_back(reply);
    }

    pub fn set_default_refresh(&self, reply: Reply) {
        *self.default_refresh.lock() = reply;
    }

    pub fn set_login_delay(&self, delay: Duration) {
        *self.login_delay.lock() = delay;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock() = delay;
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_call_times(&self) -> Vec<Instant> {
        self.refresh_call_times.lock().clone()
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.refresh_tokens_seen.lock().clone()
    }

    fn answer(&self, reply: Reply) -> Result<AuthPayload, BackendError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.clock.now_secs();
        let pair = |lifetime_secs: i64, role: Option<Value>| AuthPayload {
            token: Some(make_token(now + lifetime_secs, role)),
            refresh_token: Some(format!("refresh-{}", n)),
            token_expires: Some((now + lifetime_secs) * 1000),
            user: None,
        };

        match reply {
            Reply::Issue { lifetime_secs } => Ok(AuthPayload {
                user: Some(api_user(None)),
                ..pair(lifetime_secs, None)
            }),
            Reply::IssueWithRole {
                lifetime_secs,
                role,
            } => Ok(AuthPayload {
                user: Some(api_user(Some(role.clone()))),
                ..pair(
                    lifetime_secs,
                    Some(json!({ "id": role.id, "name": role.name })),
                )
            }),
            Reply::IssueWithoutUser { lifetime_secs } => Ok(pair(lifetime_secs, None)),
            Reply::IncompleteUser { lifetime_secs } => Ok(AuthPayload {
                user: Some(ApiUser {
                    email: None,
                    ..api_user(None)
                }),
                ..pair(lifetime_secs, None)
            }),
            Reply::Malformed => Ok(AuthPayload {
                token: Some("not-a-token".to_string()),
                refresh_token: Some(format!("refresh-{}", n)),
                token_expires: None,
                user: None,
            }),
            Reply::MissingToken => Ok(AuthPayload {
                token: None,
                refresh_token: Some(format!("refresh-{}", n)),
                token_expires: None,
                user: Some(api_user(None)),
            }),
            Reply::Fail(err) => Err(err),
        }
    }
}

#[async_trait]
impl AuthBackend for ScriptedBackend {
    async fn google_login(
        &self,
        _id_token: &str,
        _remember_me: bool,
    ) -> Result<AuthPayload, BackendError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.login_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let reply = self
            .login_replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_login.lock().clone());
        self.answer(reply)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<AuthPayload, BackendError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_call_times.lock().push(Instant::now());
        self.refresh_tokens_seen.lock().push(refresh_token.to_string());
        let delay = *self.refresh_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let reply = self
            .refresh_replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_refresh.lock().clone());
        self.answer(reply)
    }
}

/// Store, scripted backend, and supervisor over in-memory tiers.
pub struct Harness {
    pub clock: Arc<TokioClock>,
    pub backend: Arc<ScriptedBackend>,
    pub durable: Arc<MemoryStorage>,
    pub ephemeral: Arc<MemoryStorage>,
    pub store: Arc<TokenStore>,
    pub supervisor: SessionSupervisor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timings(SessionTimings::default())
    }

    pub fn with_timings(timings: SessionTimings) -> Self {
        let clock = Arc::new(TokioClock::new());
        let backend = Arc::new(ScriptedBackend::new(clock.clone()));
        Self::assemble(
            clock,
            backend,
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryStorage::new()),
            timings,
        )
    }

    fn assemble(
        clock: Arc<TokioClock>,
        backend: Arc<ScriptedBackend>,
        durable: Arc<MemoryStorage>,
        ephemeral: Arc<MemoryStorage>,
        timings: SessionTimings,
    ) -> Self {
        let store = Arc::new(TokenStore::new(durable.clone(), ephemeral.clone()));
        let supervisor =
            SessionSupervisor::with_clock(store.clone(), backend.clone(), timings, clock.clone());
        Self {
            clock,
            backend,
            durable,
            ephemeral,
            store,
            supervisor,
        }
    }

    /// A new process over the same durable tier and a fresh session tier,
    /// as after the browser is closed and reopened.
    pub fn reopen(&self) -> Self {
        self.supervisor.dispose();
        Self::assemble(
            self.clock.clone(),
            self.backend.clone(),
            self.durable.clone(),
            Arc::new(MemoryStorage::new()),
            SessionTimings::default(),
        )
    }

    /// Token expiring `lifetime_secs` from now.
    pub fn token_expiring_in(&self, lifetime_secs: i64) -> String {
        make_token(self.clock.now_secs() + lifetime_secs, None)
    }

    /// Write a session straight into the store, as a previous run would have.
    pub fn seed_session(&self, lifetime_secs: i64, remember_me: bool) -> SessionId {
        self.store
            .save(
                &self.token_expiring_in(lifetime_secs),
                "seed-refresh",
                &profile(),
                remember_me,
            )
            .unwrap()
    }
}

/// Everything currently queued on an event receiver.
pub fn drain_events(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
