//! Session directory: the request/response service that lists and creates
//! sessions and returns stored transcripts.
//!
//! The session client only needs [`SessionDirectory`]; [`HttpDirectory`] is the
//! HTTP implementation, which also exposes the credential endpoints used by
//! front ends to obtain a token.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{AuthToken, Message, Session};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory service is unavailable")]
    Unavailable,

    #[error("not authorized; log in again")]
    Unauthorized,

    #[error("directory returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Other(#[from] reqwest::Error),
}

impl DirectoryError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Other(err)
        }
    }
}

/// The calls the session client makes against the directory service.
pub trait SessionDirectory: Send + Sync + 'static {
    fn list_sessions(
        &self,
        token: &AuthToken,
    ) -> impl Future<Output = Result<Vec<Session>, DirectoryError>> + Send;

    fn create_session(
        &self,
        token: &AuthToken,
    ) -> impl Future<Output = Result<Session, DirectoryError>> + Send;

    fn get_messages(
        &self,
        session_id: &str,
        token: &AuthToken,
    ) -> impl Future<Output = Result<Vec<Message>, DirectoryError>> + Send;
}

#[derive(Debug, Serialize)]
struct SignupRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// HTTP client for the directory and credential endpoints.
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    base_url: String,
    http: reqwest::Client,
}

impl HttpDirectory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `POST /auth/signup` with a JSON body.
    pub async fn signup(&self, email: &str, password: &str) -> Result<AuthToken, DirectoryError> {
        let resp = self
            .http
            .post(self.url("/auth/signup"))
            .json(&SignupRequest { email, password })
            .send()
            .await
            .map_err(DirectoryError::from_reqwest)?;
        let body: TokenResponse = read_json(resp).await?;
        Ok(AuthToken::new(body.access_token))
    }

    /// `POST /auth/login` with an OAuth2-style form (`username`, `password`).
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthToken, DirectoryError> {
        let resp = self
            .http
            .post(self.url("/auth/login"))
            .form(&[("username", email), ("password", password)])
            .send()
            .await
            .map_err(DirectoryError::from_reqwest)?;
        let body: TokenResponse = read_json(resp).await?;
        Ok(AuthToken::new(body.access_token))
    }
}

impl SessionDirectory for HttpDirectory {
    async fn list_sessions(&self, token: &AuthToken) -> Result<Vec<Session>, DirectoryError> {
        let resp = self
            .http
            .get(self.url("/sessions"))
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(DirectoryError::from_reqwest)?;
        read_json(resp).await
    }

    async fn create_session(&self, token: &AuthToken) -> Result<Session, DirectoryError> {
        let resp = self
            .http
            .post(self.url("/sessions"))
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(DirectoryError::from_reqwest)?;
        read_json(resp).await
    }

    async fn get_messages(
        &self,
        session_id: &str,
        token: &AuthToken,
    ) -> Result<Vec<Message>, DirectoryError> {
        debug!(session_id, "fetching session history");
        let resp = self
            .http
            .get(self.url(&format!("/sessions/{session_id}/messages")))
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(DirectoryError::from_reqwest)?;
        read_json(resp).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, DirectoryError> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(DirectoryError::Unauthorized);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(DirectoryError::Status {
            status: status.as_u16(),
            body,
        });
    }
    resp.json().await.map_err(DirectoryError::from_reqwest)
}
