//! Backend API client that signs requests with the session's access token.
//!
//! The refresh trigger is a `401` on a signed request: the client performs one
//! ticketed refresh and retries once. A refresh the backend rejects ends the
//! session; a refresh that fails on the network leaves it alone.

use crate::models::session::{AccessToken, SessionPhase, User};
use crate::services::session_manager::{RefreshTicket, SessionManager};
use reqwest::{Client, ClientBuilder, Method, Response, StatusCode, header};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("not authenticated")]
    Unauthorized,
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl BackendError {
    fn from_status(status: StatusCode, message: String) -> Self {
        if status == StatusCode::UNAUTHORIZED {
            Self::Unauthorized
        } else {
            Self::Status {
                status: status.as_u16(),
                message,
            }
        }
    }

    /// The backend explicitly refused (as opposed to being unreachable).
    fn is_rejection(&self) -> bool {
        match self {
            Self::Unauthorized => true,
            Self::Status { status, .. } => (400..500).contains(status),
            _ => false,
        }
    }
}

/// Successful result of a login, registration or verification exchange.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub user: User,
    pub access_token: AccessToken,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshPayload {
    access_token: AccessToken,
    #[serde(default)]
    user: Option<User>,
}

/// Backend auth endpoints, relative to the base URL.
#[derive(Debug, Clone)]
pub struct AuthPaths {
    pub login: String,
    pub refresh: String,
    pub logout: String,
    pub me: String,
}

impl Default for AuthPaths {
    fn default() -> Self {
        Self {
            login: "/auth/login".into(),
            refresh: "/auth/refresh".into(),
            logout: "/auth/logout".into(),
            me: "/auth/me".into(),
        }
    }
}

#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
    session: SessionManager,
    paths: AuthPaths,
}

impl BackendClient {
    pub fn builder() -> BackendClientBuilder {
        BackendClientBuilder::default()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Exchange credentials for a session.
    pub async fn login<C: Serialize + ?Sized>(
        &self,
        credentials: &C,
    ) -> Result<User, BackendError> {
        let response = self
            .http
            .post(self.url(&self.paths.login))
            .json(credentials)
            .send()
            .await?;
        let AuthPayload { user, access_token } = parse(response).await?;
        self.establish(user.clone(), access_token);
        Ok(user)
    }

    /// Accept an auth payload obtained elsewhere (registration, e-mail
    /// verification, ...).
    pub fn establish(&self, user: User, access_token: AccessToken) {
        info!("signed in as {}", user.id);
        self.session.set_auth(user, access_token);
    }

    /// Resolve the start-up `Resolving` phase, using whatever refresh
    /// credential the backend left in the cookie jar.
    pub async fn bootstrap(&self) -> Result<SessionPhase, BackendError> {
        let outcome = match self.post_refresh(None).await {
            Ok(payload) => match payload.user {
                Some(user) => Ok((user, payload.access_token)),
                None => self
                    .fetch_me(&payload.access_token)
                    .await
                    .map(|user| (user, payload.access_token)),
            },
            Err(err) => Err(err),
        };

        match outcome {
            Ok((user, token)) => {
                self.establish(user, token);
                Ok(SessionPhase::Authenticated)
            }
            Err(BackendError::Unauthorized) => {
                debug!("no session to restore");
                self.session.set_loading(false);
                Ok(SessionPhase::Unauthenticated)
            }
            Err(err) => {
                warn!("session bootstrap failed: {}", err);
                self.session.set_loading(false);
                Err(err)
            }
        }
    }

    /// Refresh the access token for the current login.
    ///
    /// Returns `Ok(false)` when the session changed while the refresh was in
    /// flight and the new token was discarded.
    pub async fn refresh(&self) -> Result<bool, BackendError> {
        let ticket = self
            .session
            .begin_refresh()
            .ok_or(BackendError::Unauthorized)?;
        self.refresh_for(ticket).await
    }

    async fn refresh_for(&self, ticket: RefreshTicket) -> Result<bool, BackendError> {
        let token = self.session.access_token();
        let payload = self.post_refresh(token.as_ref()).await?;
        Ok(self.session.complete_refresh(ticket, payload.access_token))
    }

    /// End the session. The backend call is best-effort; the local session
    /// is always cleared.
    pub async fn logout(&self) {
        if let Some(token) = self.session.access_token() {
            let result = self
                .http
                .post(self.url(&self.paths.logout))
                .bearer_auth(token.as_str())
                .send()
                .await;
            if let Err(err) = result {
                debug!("backend logout failed: {}", err);
            }
        }
        self.session.logout();
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        self.send_json::<(), T>(Method::GET, path, None).await
    }

    /// Send a signed request; on `401` refresh once and retry.
    pub async fn send_json<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, BackendError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        // Ticket for the login that signs this request.
        let ticket = self.session.begin_refresh();
        let response = self.send_signed(method.clone(), path, body).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return parse(response).await;
        }
        let Some(ticket) = ticket else {
            debug!("{} {} returned 401 without a session", method, path);
            return Err(BackendError::Unauthorized);
        };

        debug!("{} {} returned 401, refreshing token", method, path);
        match self.refresh_for(ticket).await {
            Ok(true) => {
                let retry = self.send_signed(method, path, body).await?;
                if retry.status() == StatusCode::UNAUTHORIZED {
                    warn!("request still unauthorized after refresh, signing out");
                    self.session.logout_if_current(ticket);
                    return Err(BackendError::Unauthorized);
                }
                parse(retry).await
            }
            Ok(false) => Err(BackendError::Unauthorized),
            Err(err) if err.is_rejection() => {
                if self.session.logout_if_current(ticket) {
                    info!("token refresh rejected, signed out");
                }
                Err(BackendError::Unauthorized)
            }
            Err(err) => Err(err),
        }
    }

    async fn send_signed<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, BackendError> {
        let mut request = self.http.request(method, self.url(path));
        if let Some(token) = self.session.access_token() {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token.as_str()));
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn post_refresh(
        &self,
        token: Option<&AccessToken>,
    ) -> Result<RefreshPayload, BackendError> {
        let mut request = self.http.post(self.url(&self.paths.refresh));
        if let Some(token) = token {
            request = request.bearer_auth(token.as_str());
        }
        parse(request.send().await?).await
    }

    async fn fetch_me(&self, token: &AccessToken) -> Result<User, BackendError> {
        let response = self
            .http
            .get(self.url(&self.paths.me))
            .bearer_auth(token.as_str())
            .send()
            .await?;
        parse(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let status = response.status();
    if status.is_success() {
        Ok(response.json().await?)
    } else {
        let message = response.text().await.unwrap_or_else(|_| status.to_string());
        Err(BackendError::from_status(status, message))
    }
}

#[derive(Default)]
pub struct BackendClientBuilder {
    base_url: Option<String>,
    session: Option<SessionManager>,
    paths: Option<AuthPaths>,
    timeout: Option<Duration>,
}

impl BackendClientBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Share an existing session; a fresh one is created otherwise.
    pub fn session(mut self, session: SessionManager) -> Self {
        self.session = Some(session);
        self
    }

    pub fn paths(mut self, paths: AuthPaths) -> Self {
        self.paths = Some(paths);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<BackendClient, BackendError> {
        let base_url = self
            .base_url
            .ok_or_else(|| BackendError::Configuration("base_url is required".into()))?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let mut builder = ClientBuilder::new()
            .cookie_store(true)
            .user_agent(concat!("marketplace-core/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(BackendClient {
            http: builder.build()?,
            base_url,
            session: self.session.unwrap_or_default(),
            paths: self.paths.unwrap_or_default(),
        })
    }
}
