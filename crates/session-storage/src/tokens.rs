//! Two-tier token store.
//!
//! The access token, refresh token, and profile always live together in one
//! tier: the durable tier when the user asked to be remembered, the
//! session-scoped tier otherwise. Every write clears both tiers first so a
//! stale copy can never shadow the new one.
//!
//! Reads prefer the session-scoped tier and fall back to the durable tier.
//! Storage failures and malformed JSON on the read path are logged and
//! reported as "absent"; they never reach callers.

use crate::{SessionStorage, StorageKeys, StorageResult, UserProfile};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// In-memory identity of the session currently held by the store.
///
/// Assigned when a session is saved after login or adopted from storage at
/// start-up, kept across refreshes, and dropped on clear. A refresh that
/// started under one identity can only write back while that identity is
/// still current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Change notification emitted after every successful mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// A new session was written.
    Saved {
        session_id: SessionId,
        remember_me: bool,
    },
    /// The current session's tokens were replaced in place.
    Refreshed { session_id: SessionId },
    /// Tokens and profile were removed from both tiers.
    Cleared,
}

/// Callback type for store change notifications.
pub type StoreChangeCallback = Arc<dyn Fn(&StoreChange) + Send + Sync>;

/// Shape of whatever the tiers currently hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredSession {
    /// Neither token nor profile.
    Empty,
    /// Token without profile or profile without token.
    Partial,
    /// Token and profile.
    Complete,
}

/// Persists the session across a durable and a session-scoped tier.
pub struct TokenStore {
    durable: Arc<dyn SessionStorage>,
    ephemeral: Arc<dyn SessionStorage>,
    /// Current identity; also serialises writers against `clear`.
    session: Mutex<Option<SessionId>>,
    on_change: Mutex<Option<StoreChangeCallback>>,
}

impl TokenStore {
    pub fn new(durable: Arc<dyn SessionStorage>, ephemeral: Arc<dyn SessionStorage>) -> Self {
        Self {
            durable,
            ephemeral,
            session: Mutex::new(None),
            on_change: Mutex::new(None),
        }
    }

    /// Register the callback notified after each save, refresh, and clear.
    pub fn set_change_callback(&self, callback: StoreChangeCallback) {
        *self.on_change.lock() = Some(callback);
    }

    // ==========================================
    // Writes
    // ==========================================

    /// Persist a new session in the tier selected by `remember_me`.
    pub fn save(
        &self,
        access_token: &str,
        refresh_token: &str,
        profile: &UserProfile,
        remember_me: bool,
    ) -> StorageResult<SessionId> {
        let mut session = self.session.lock();

        if let Err(e) = self.write_session(access_token, refresh_token, profile, remember_me) {
            *session = None;
            self.discard_after_failed_write();
            return Err(e);
        }

        let session_id = SessionId::new();
        *session = Some(session_id);
        drop(session);

        info!(session_id = %session_id, remember_me, "Session saved");
        self.notify(StoreChange::Saved {
            session_id,
            remember_me,
        });
        Ok(session_id)
    }

    /// Replace the tokens of session `expected` in place, keeping its
    /// `remember_me` tier.
    ///
    /// Returns `Ok(false)` without writing when `expected` is no longer the
    /// current session (it was cleared or replaced by a new login).
    pub fn replace_if_current(
        &self,
        expected: SessionId,
        access_token: &str,
        refresh_token: &str,
        profile: &UserProfile,
    ) -> StorageResult<bool> {
        let mut session = self.session.lock();
        if *session != Some(expected) {
            debug!(
                session_id = %expected,
                "Skipping token replacement for a session that is no longer current"
            );
            return Ok(false);
        }

        let remember_me = self.remember_me();
        if let Err(e) = self.write_session(access_token, refresh_token, profile, remember_me) {
            *session = None;
            self.discard_after_failed_write();
            return Err(e);
        }
        drop(session);

        self.notify(StoreChange::Refreshed {
            session_id: expected,
        });
        Ok(true)
    }

    /// Remove tokens and profile from both tiers and forget `remember_me`.
    pub fn clear(&self) -> StorageResult<()> {
        let mut session = self.session.lock();
        *session = None;
        self.clear_tiers()?;
        self.durable.delete(StorageKeys::REMEMBER_ME)?;
        drop(session);

        info!("Session cleared");
        self.notify(StoreChange::Cleared);
        Ok(())
    }

    /// Assign an identity to a complete session found in storage.
    ///
    /// Returns the current identity, or `None` when storage holds no
    /// complete session.
    pub fn adopt_existing(&self) -> Option<SessionId> {
        if self.stored_session() != StoredSession::Complete {
            return None;
        }
        let mut session = self.session.lock();
        let session_id = *session.get_or_insert_with(SessionId::new);
        debug!(session_id = %session_id, "Adopted stored session");
        Some(session_id)
    }

    /// Clear storage that holds a token without a profile or vice versa.
    ///
    /// Returns `true` when something was cleared.
    pub fn heal_if_inconsistent(&self) -> StorageResult<bool> {
        if self.stored_session() != StoredSession::Partial {
            return Ok(false);
        }
        warn!("Stored session is inconsistent (token and profile out of sync), clearing");
        self.clear()?;
        Ok(true)
    }

    fn write_session(
        &self,
        access_token: &str,
        refresh_token: &str,
        profile: &UserProfile,
        remember_me: bool,
    ) -> StorageResult<()> {
        let profile_json = serde_json::to_string(profile)
            .map_err(|e| crate::StorageError::Encoding(e.to_string()))?;

        self.clear_tiers()?;
        self.tier(remember_me).set_many(&[
            (StorageKeys::ACCESS_TOKEN, access_token),
            (StorageKeys::REFRESH_TOKEN, refresh_token),
            (StorageKeys::USER_PROFILE, profile_json.as_str()),
        ])?;
        self.durable.set(
            StorageKeys::REMEMBER_ME,
            if remember_me { "true" } else { "false" },
        )
    }

    fn clear_tiers(&self) -> StorageResult<()> {
        self.ephemeral.delete_many(&StorageKeys::SESSION_KEYS)?;
        self.durable.delete_many(&StorageKeys::SESSION_KEYS)
    }

    fn discard_after_failed_write(&self) {
        if let Err(e) = self.clear_tiers() {
            warn!(error = %e, "Failed to discard partially written session");
        }
    }

    fn tier(&self, remember_me: bool) -> &dyn SessionStorage {
        if remember_me {
            self.durable.as_ref()
        } else {
            self.ephemeral.as_ref()
        }
    }

    fn notify(&self, change: StoreChange) {
        let callback = self.on_change.lock().clone();
        if let Some(callback) = callback {
            callback(&change);
        }
    }

    // ==========================================
    // Reads
    // ==========================================

    pub fn access_token(&self) -> Option<String> {
        self.read(StorageKeys::ACCESS_TOKEN)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read(StorageKeys::REFRESH_TOKEN)
    }

    /// The cached profile; `None` when absent or not valid JSON.
    pub fn profile(&self) -> Option<UserProfile> {
        let raw = self.read(StorageKeys::USER_PROFILE)?;
        match serde_json::from_str(&raw) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!(error = %e, "Stored profile is malformed, treating as absent");
                None
            }
        }
    }

    /// The durable "remember me" preference; `false` when unset.
    pub fn remember_me(&self) -> bool {
        matches!(
            self.durable.get(StorageKeys::REMEMBER_ME),
            Ok(Some(value)) if value == "true"
        )
    }

    pub fn current_session(&self) -> Option<SessionId> {
        *self.session.lock()
    }

    pub fn stored_session(&self) -> StoredSession {
        match (self.access_token().is_some(), self.profile().is_some()) {
            (true, true) => StoredSession::Complete,
            (false, false) => StoredSession::Empty,
            _ => StoredSession::Partial,
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        for (tier, storage) in [("session", &self.ephemeral), ("durable", &self.durable)] {
            match storage.get(key) {
                Ok(Some(value)) => return Some(value),
                Ok(None) => {}
                Err(e) => warn!(tier, key, error = %e, "Session storage read failed"),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStorage, UserRole};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Tiers {
        durable: Arc<MemoryStorage>,
        ephemeral: Arc<MemoryStorage>,
        store: TokenStore,
    }

    fn tiers() -> Tiers {
        let durable = Arc::new(MemoryStorage::new());
        let ephemeral = Arc::new(MemoryStorage::new());
        let store = TokenStore::new(durable.clone(), ephemeral.clone());
        Tiers {
            durable,
            ephemeral,
            store,
        }
    }

    fn profile() -> UserProfile {
        UserProfile {
            display_name: "Grace Hopper".to_string(),
            email: "grace@example.com".to_string(),
            avatar_url: None,
            role: UserRole::User,
        }
    }

    /// Memory tier whose writes can be made to fail.
    #[derive(Default)]
    struct BrokenWrites {
        inner: MemoryStorage,
        failing: AtomicBool,
    }

    impl BrokenWrites {
        fn check(&self) -> StorageResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(crate::StorageError::Io(std::io::Error::other("disk full")));
            }
            Ok(())
        }
    }

    impl SessionStorage for BrokenWrites {
        fn set(&self, key: &str, value: &str) -> StorageResult<()> {
            self.check()?;
            self.inner.set(key, value)
        }

        fn get(&self, key: &str) -> StorageResult<Option<String>> {
            self.inner.get(key)
        }

        fn delete(&self, key: &str) -> StorageResult<bool> {
            self.inner.delete(key)
        }
    }

    fn has_session_keys(storage: &MemoryStorage) -> bool {
        StorageKeys::SESSION_KEYS
            .iter()
            .any(|key| storage.has(key).unwrap())
    }

    #[test]
    fn test_save_remembered_uses_durable_tier_only() {
        let t = tiers();
        t.store.save("access", "refresh", &profile(), true).unwrap();

        assert!(has_session_keys(&t.durable));
        assert!(!has_session_keys(&t.ephemeral));
        assert_eq!(t.store.access_token(), Some("access".to_string()));
        assert_eq!(t.store.refresh_token(), Some("refresh".to_string()));
        assert_eq!(t.store.profile(), Some(profile()));
        assert!(t.store.remember_me());
    }

    #[test]
    fn test_save_not_remembered_uses_session_tier_only() {
        let t = tiers();
        t.store.save("access", "refresh", &profile(), false).unwrap();

        assert!(has_session_keys(&t.ephemeral));
        assert!(!has_session_keys(&t.durable));
        assert!(!t.store.remember_me());
        assert_eq!(
            t.durable.get(StorageKeys::REMEMBER_ME).unwrap(),
            Some("false".to_string())
        );
    }

    #[test]
    fn test_switching_tiers_leaves_no_stale_copy() {
        let t = tiers();
        t.store.save("old", "old-refresh", &profile(), true).unwrap();
        t.store.save("new", "new-refresh", &profile(), false).unwrap();

        assert!(!has_session_keys(&t.durable));
        assert_eq!(t.store.access_token(), Some("new".to_string()));

        t.store.save("newest", "r", &profile(), true).unwrap();
        assert!(!has_session_keys(&t.ephemeral));
        assert_eq!(t.store.access_token(), Some("newest".to_string()));
    }

    #[test]
    fn test_session_tier_wins_over_durable_tier() {
        let t = tiers();
        t.durable.set(StorageKeys::ACCESS_TOKEN, "durable").unwrap();
        t.ephemeral.set(StorageKeys::ACCESS_TOKEN, "ephemeral").unwrap();

        assert_eq!(t.store.access_token(), Some("ephemeral".to_string()));
    }

    #[test]
    fn test_clear_removes_everything() {
        let t = tiers();
        t.store.save("access", "refresh", &profile(), true).unwrap();
        t.store.clear().unwrap();

        assert!(t.durable.is_empty());
        assert!(t.ephemeral.is_empty());
        assert_eq!(t.store.current_session(), None);
        assert_eq!(t.store.stored_session(), StoredSession::Empty);
    }

    #[test]
    fn test_malformed_profile_reads_as_absent() {
        let t = tiers();
        t.ephemeral.set(StorageKeys::ACCESS_TOKEN, "access").unwrap();
        t.ephemeral
            .set(StorageKeys::USER_PROFILE, "{\"displayName\":")
            .unwrap();

        assert_eq!(t.store.profile(), None);
        assert_eq!(t.store.stored_session(), StoredSession::Partial);
    }

    #[test]
    fn test_heal_clears_token_without_profile() {
        let t = tiers();
        t.durable.set(StorageKeys::ACCESS_TOKEN, "orphan").unwrap();

        assert!(t.store.heal_if_inconsistent().unwrap());
        assert_eq!(t.store.access_token(), None);
        assert!(!t.store.heal_if_inconsistent().unwrap());
    }

    #[test]
    fn test_heal_clears_profile_without_token() {
        let t = tiers();
        t.ephemeral
            .set(
                StorageKeys::USER_PROFILE,
                &serde_json::to_string(&profile()).unwrap(),
            )
            .unwrap();

        assert!(t.store.heal_if_inconsistent().unwrap());
        assert_eq!(t.store.profile(), None);
    }

    #[test]
    fn test_replace_if_current_keeps_tier_and_identity() {
        let t = tiers();
        let id = t.store.save("access", "refresh", &profile(), false).unwrap();

        let replaced = t
            .store
            .replace_if_current(id, "access-2", "refresh-2", &profile())
            .unwrap();

        assert!(replaced);
        assert_eq!(t.store.current_session(), Some(id));
        assert_eq!(
            t.ephemeral.get(StorageKeys::ACCESS_TOKEN).unwrap(),
            Some("access-2".to_string())
        );
        assert!(!has_session_keys(&t.durable));
    }

    #[test]
    fn test_failed_replace_forgets_session() {
        let durable = Arc::new(BrokenWrites::default());
        let ephemeral = Arc::new(MemoryStorage::new());
        let store = TokenStore::new(durable.clone(), ephemeral.clone());
        let id = store.save("access", "refresh", &profile(), true).unwrap();

        durable.failing.store(true, Ordering::SeqCst);
        let result = store.replace_if_current(id, "access-2", "refresh-2", &profile());

        assert!(result.is_err());
        assert_eq!(store.current_session(), None);
        assert_eq!(store.stored_session(), StoredSession::Empty);
        assert!(!store
            .replace_if_current(id, "access-3", "refresh-3", &profile())
            .unwrap());
    }

    #[test]
    fn test_replace_after_clear_is_discarded() {
        let t = tiers();
        let id = t.store.save("access", "refresh", &profile(), true).unwrap();
        t.store.clear().unwrap();

        let replaced = t
            .store
            .replace_if_current(id, "late", "late-refresh", &profile())
            .unwrap();

        assert!(!replaced);
        assert_eq!(t.store.access_token(), None);
    }

    #[test]
    fn test_replace_after_new_login_is_discarded() {
        let t = tiers();
        let first = t.store.save("first", "r1", &profile(), true).unwrap();
        let second = t.store.save("second", "r2", &profile(), true).unwrap();
        assert_ne!(first, second);

        assert!(!t
            .store
            .replace_if_current(first, "late", "late", &profile())
            .unwrap());
        assert_eq!(t.store.access_token(), Some("second".to_string()));
    }

    #[test]
    fn test_adopt_existing() {
        let t = tiers();
        assert_eq!(t.store.adopt_existing(), None);

        // Written by an earlier process: no identity in memory yet.
        let earlier = TokenStore::new(t.durable.clone(), t.ephemeral.clone());
        earlier.save("access", "refresh", &profile(), true).unwrap();

        let adopted = t.store.adopt_existing().unwrap();
        assert_eq!(t.store.current_session(), Some(adopted));
        assert_eq!(t.store.adopt_existing(), Some(adopted));
    }

    #[test]
    fn test_change_callback_sees_each_mutation() {
        let t = tiers();
        let saved = Arc::new(AtomicUsize::new(0));
        let refreshed = Arc::new(AtomicUsize::new(0));
        let cleared = Arc::new(AtomicUsize::new(0));

        let (s, r, c) = (saved.clone(), refreshed.clone(), cleared.clone());
        t.store.set_change_callback(Arc::new(move |change| {
            let counter = match change {
                StoreChange::Saved { .. } => &s,
                StoreChange::Refreshed { .. } => &r,
                StoreChange::Cleared => &c,
            };
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let id = t.store.save("a", "r", &profile(), true).unwrap();
        t.store.replace_if_current(id, "b", "r2", &profile()).unwrap();
        t.store.clear().unwrap();

        assert_eq!(saved.load(Ordering::SeqCst), 1);
        assert_eq!(refreshed.load(Ordering::SeqCst), 1);
        assert_eq!(cleared.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_browser_session_end_loses_unremembered_session() {
        let durable = Arc::new(MemoryStorage::new());
        let first_ephemeral = Arc::new(MemoryStorage::new());
        TokenStore::new(durable.clone(), first_ephemeral.clone())
            .save("access", "refresh", &profile(), false)
            .unwrap();

        let reopened = TokenStore::new(durable, Arc::new(MemoryStorage::new()));
        assert_eq!(reopened.access_token(), None);
        assert_eq!(reopened.stored_session(), StoredSession::Empty);
    }
}
