//! Auth backend client.
//!
//! The backend is an external collaborator with two endpoints: Google
//! sign-in and refresh-token exchange. Both answer with the same payload.

use crate::BackendError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Role object on the backend user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRole {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiPhoto {
    #[serde(default)]
    pub path: Option<String>,
}

/// User object returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiUser {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<ApiRole>,
    #[serde(default)]
    pub photo: Option<ApiPhoto>,
}

/// Login and refresh response.
///
/// Every field is optional on the wire; callers decide what a usable
/// response is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_expires: Option<i64>,
    #[serde(default)]
    pub user: Option<ApiUser>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleLoginRequest<'a> {
    id_token: &'a str,
    remember_me: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Credential exchanges the session layer needs from the backend.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Exchange a Google identity credential for a session.
    async fn google_login(
        &self,
        id_token: &str,
        remember_me: bool,
    ) -> Result<AuthPayload, BackendError>;

    /// Exchange a refresh token for a new token pair.
    async fn refresh_token(&self, refresh_token: &str) -> Result<AuthPayload, BackendError>;
}

/// [`AuthBackend`] over HTTP.
pub struct HttpAuthBackend {
    client: Client,
    api_url: Url,
}

impl HttpAuthBackend {
    pub fn new(api_url: Url, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(Self { client, api_url })
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url.as_str().trim_end_matches('/'), path)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<AuthPayload, BackendError> {
        let url = self.endpoint(path);
        debug!(url = %url, "Calling auth backend");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Auth backend request failed");
                BackendError::Network(e.to_string())
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BackendError::Rejected {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            warn!(url = %url, status = %status, "Auth backend returned an error status");
            return Err(BackendError::Status {
                status: status.as_u16(),
            });
        }

        response
            .json::<AuthPayload>()
            .await
            .map_err(|e| BackendError::InvalidBody(e.to_string()))
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn google_login(
        &self,
        id_token: &str,
        remember_me: bool,
    ) -> Result<AuthPayload, BackendError> {
        self.post(
            "auth/google-login",
            &GoogleLoginRequest {
                id_token,
                remember_me,
            },
        )
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<AuthPayload, BackendError> {
        self.post("auth/refresh-token", &RefreshRequest { refresh_token })
            .await
    }
}
