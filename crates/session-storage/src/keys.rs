//! Storage key constants.

/// Keys written by the token store.
pub struct StorageKeys;

impl StorageKeys {
    /// Access token
    pub const ACCESS_TOKEN: &'static str = "token";

    /// Refresh token
    pub const REFRESH_TOKEN: &'static str = "refreshToken";

    /// User profile (JSON)
    pub const USER_PROFILE: &'static str = "user";

    /// "Remember me" preference, durable tier only ("true" / "false")
    pub const REMEMBER_ME: &'static str = "rememberMe";

    /// Keys that live together in whichever tier holds the session.
    pub const SESSION_KEYS: [&'static str; 3] = [
        Self::ACCESS_TOKEN,
        Self::REFRESH_TOKEN,
        Self::USER_PROFILE,
    ];
}
