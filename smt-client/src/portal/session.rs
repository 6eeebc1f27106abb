use std::fmt;

use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::{
    endpoints::{self, AuthResponse, DashboardResponse},
    PortalError,
};

/// Portal login. Both fields are required and non-empty.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self, PortalError> {
        let username = username.into();
        let password = password.into();
        if username.trim().is_empty() || password.is_empty() {
            return Err(PortalError::Auth("username and password must be non-empty".to_string()));
        }
        Ok(Self { username, password })
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// An authenticated portal session plus the account identifiers it resolved.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
    pub esiid: String,
    pub meter_number: String,
}

impl Session {
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("esiid", &self.esiid)
            .field("meter_number", &self.meter_number)
            .finish_non_exhaustive()
    }
}

/// Owns the credentials and the single live session.
///
/// The mutex is held while a session is established so concurrent callers
/// never log in twice; data requests run on a cloned [`Session`] outside it.
pub struct SessionHolder {
    http: Client,
    base_url: String,
    credentials: Credentials,
    current: Mutex<Option<Session>>,
}

impl SessionHolder {
    pub fn new(http: Client, base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            current: Mutex::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Current session, logging in first if there is none.
    pub async fn get_session(&self) -> Result<Session, PortalError> {
        let mut guard = self.current.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }

        let session = self.login().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    /// Drop `stale` if it is still the live session. A session another caller
    /// already replaced is left alone.
    pub async fn invalidate(&self, stale: &Session) {
        let mut guard = self.current.lock().await;
        if guard.as_ref() == Some(stale) {
            *guard = None;
        }
    }

    /// POST to an authenticated endpoint. A 401 answer re-authenticates once
    /// and repeats the request with the new session; a second 401 is a
    /// [`PortalError::Auth`].
    pub async fn authed_post<F>(&self, path: &str, referer: &str, body: F) -> Result<Response, PortalError>
    where
        F: Fn(&Session) -> Value,
    {
        let session = self.get_session().await?;
        let rsp = self.send(&session, path, referer, &body(&session)).await?;
        if rsp.status() != StatusCode::UNAUTHORIZED {
            return Ok(rsp);
        }

        tracing::warn!(path, "portal token expired, re-authenticating");
        self.invalidate(&session).await;
        let session = self.get_session().await?;
        let rsp = self.send(&session, path, referer, &body(&session)).await?;
        if rsp.status() == StatusCode::UNAUTHORIZED {
            self.invalidate(&session).await;
            return Err(PortalError::Auth(format!("{path} rejected a fresh session")));
        }
        Ok(rsp)
    }

    async fn send(
        &self,
        session: &Session,
        path: &str,
        referer: &str,
        body: &Value,
    ) -> Result<Response, PortalError> {
        let rsp = self
            .http
            .post(format!("{}{path}", self.base_url))
            .headers(endpoints::browser_headers(&self.base_url, referer))
            .bearer_auth(session.token())
            .json(body)
            .send()
            .await?;
        Ok(rsp)
    }

    async fn login(&self) -> Result<Session, PortalError> {
        tracing::info!(user = self.credentials.username(), "authenticating with portal");

        let rsp = self
            .http
            .post(format!("{}{}", self.base_url, endpoints::AUTHENTICATE))
            .headers(endpoints::browser_headers(&self.base_url, "/home"))
            .json(&json!({
                "username": self.credentials.username,
                "password": self.credentials.password,
                "rememberMe": "true",
            }))
            .send()
            .await
            .map_err(|e| PortalError::Auth(format!("authenticate request failed: {e}")))?;

        let status = rsp.status();
        if !status.is_success() {
            return Err(PortalError::Auth(format!("authenticate returned HTTP {status}")));
        }

        let token = rsp
            .json::<AuthResponse>()
            .await
            .map_err(|e| PortalError::Auth(format!("invalid authenticate response: {e}")))?
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PortalError::Auth("authenticate response carried no token".to_string()))?;

        let (esiid, meter_number) = self.meter_numbers(&token).await?;
        tracing::info!("portal session established");
        tracing::debug!(%esiid, %meter_number, "resolved account meter");

        Ok(Session {
            token,
            esiid,
            meter_number,
        })
    }

    /// ESIID and meter number of the account's default meter.
    async fn meter_numbers(&self, token: &str) -> Result<(String, String), PortalError> {
        let rsp = self
            .http
            .post(format!("{}{}", self.base_url, endpoints::DASHBOARD))
            .headers(endpoints::browser_headers(&self.base_url, "/dashboard/"))
            .bearer_auth(token)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| PortalError::Auth(format!("dashboard request failed: {e}")))?;

        let status = rsp.status();
        if !status.is_success() {
            return Err(PortalError::Auth(format!("dashboard returned HTTP {status}")));
        }

        let details = rsp
            .json::<DashboardResponse>()
            .await
            .map_err(|e| PortalError::Auth(format!("invalid dashboard response: {e}")))?
            .data
            .and_then(|d| d.default_meter_details)
            .ok_or_else(|| PortalError::Auth("dashboard response has no default meter".to_string()))?;

        Ok((details.esiid, details.meter_number))
    }
}
