//! Turning backend payloads into what the session stores.

use crate::backend::{ApiUser, AuthPayload};
use crate::token_codec::{self, RoleClaim, TokenClaims};
use crate::{AuthError, AuthResult};
use session_storage::{UserProfile, UserRole};

/// Token pair from a login or refresh response that passed validation.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub claims: TokenClaims,
    pub user: Option<ApiUser>,
}

impl IssuedTokens {
    /// A response is usable when its token decodes and its refresh token is
    /// non-empty.
    pub fn from_payload(payload: AuthPayload) -> AuthResult<Self> {
        let access_token = payload
            .token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AuthError::MalformedResponse("response has no token".to_string()))?;
        let refresh_token = payload
            .refresh_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                AuthError::MalformedResponse("response has no refresh token".to_string())
            })?;
        let claims = token_codec::decode(&access_token)?;

        Ok(Self {
            access_token,
            refresh_token,
            claims,
            user: payload.user,
        })
    }

    /// Profile for this session: built from the response user when present,
    /// otherwise `fallback`.
    pub fn profile_or(&self, fallback: Option<UserProfile>) -> AuthResult<UserProfile> {
        match (&self.user, fallback) {
            (Some(user), fallback) => match normalize_user(user, self.claims.role.as_ref()) {
                Ok(profile) => Ok(profile),
                Err(e) => fallback.ok_or(e),
            },
            (None, Some(profile)) => Ok(profile),
            (None, None) => Err(AuthError::IncompleteProfile(
                "response has no user".to_string(),
            )),
        }
    }
}

/// Build the cached profile from the backend user.
///
/// The user object's role wins; the token's role claim is used when the
/// user carries none.
pub fn normalize_user(user: &ApiUser, token_role: Option<&RoleClaim>) -> AuthResult<UserProfile> {
    let display_name = [user.first_name.as_deref(), user.last_name.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if display_name.is_empty() {
        return Err(AuthError::IncompleteProfile(
            "user has no display name".to_string(),
        ));
    }

    let email = user
        .email
        .as_deref()
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .ok_or_else(|| AuthError::IncompleteProfile("user has no email".to_string()))?
        .to_string();

    let user_role = user.role.as_ref().map(|role| RoleClaim {
        id: role.id,
        name: role.name.clone(),
    });
    let role = match user_role.as_ref().or(token_role) {
        Some(role) if token_codec::is_admin(Some(role)) => UserRole::Admin,
        _ => UserRole::User,
    };

    let avatar_url = user
        .photo
        .as_ref()
        .and_then(|photo| photo.path.clone())
        .filter(|path| !path.trim().is_empty());

    Ok(UserProfile {
        display_name,
        email,
        avatar_url,
        role,
    })
}
