//! API client for communicating with the alumni directory REST API.
//!
//! Every outbound request goes through [`ApiClient::send`], which attaches
//! the stored credential and, on a 401, refreshes the credential once and
//! replays the request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::{Credential, CredentialStore, SessionCookieJar};
use crate::config::{AuthMode, Config};
use crate::models::{AuthGrant, BearerAuthResponse, CookieAuthResponse, RefreshRequest};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

pub const LOGIN_PATH: &str = "auth/login";
pub const REFRESH_PATH: &str = "auth/refresh";
pub const LOGOUT_PATH: &str = "auth/logout";
pub const REGISTER_PATH: &str = "auth/register";

/// Connection settings for an [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: Url,
    pub mode: AuthMode,
    pub request_timeout: Duration,
    pub refresh_timeout: Duration,
}

impl ClientSettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: config.base_url()?,
            mode: config.auth_mode,
            request_timeout: config.request_timeout(),
            refresh_timeout: config.refresh_timeout(),
        })
    }

    /// Settings with default timeouts for the given base URL.
    pub fn new(base_url: &str, mode: AuthMode) -> anyhow::Result<Self> {
        let config = Config {
            api_url: base_url.to_string(),
            auth_mode: mode,
            ..Config::default()
        };
        Self::from_config(&config)
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }
}

/// Immutable description of an outbound request, replayable as many times
/// as needed.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    headers: HeaderMap,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn query<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn has_authorization(&self) -> bool {
        self.headers.contains_key(header::AUTHORIZATION)
    }
}

/// One dispatch of an [`ApiRequest`]. A retried attempt is never refreshed
/// and replayed again.
#[derive(Debug, Clone, Copy)]
pub struct RequestAttempt<'a> {
    original: &'a ApiRequest,
    retried: bool,
}

impl<'a> RequestAttempt<'a> {
    pub fn first(original: &'a ApiRequest) -> Self {
        Self {
            original,
            retried: false,
        }
    }

    pub fn retry(self) -> Self {
        Self {
            original: self.original,
            retried: true,
        }
    }

    pub fn original(&self) -> &'a ApiRequest {
        self.original
    }

    pub fn is_retry(&self) -> bool {
        self.retried
    }
}

struct CredentialState {
    store: Arc<dyn CredentialStore>,
    /// Bumped on every credential write; lets a request that hit 401 tell
    /// whether someone else already refreshed since it was sent.
    generation: AtomicU64,
    /// Bumped whenever a refresh call finishes, successful or not. Requests
    /// queued behind a failed refresh see it move and give up instead of
    /// trying again with the same credential.
    refresh_epoch: AtomicU64,
    refresh_lock: Mutex<()>,
}

/// Credential state a request was dispatched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Observed {
    generation: u64,
    refresh_epoch: u64,
}

/// API client for the alumni directory.
/// Clone is cheap - reqwest::Client and the credential state are shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    mode: AuthMode,
    refresh_timeout: Duration,
    state: Arc<CredentialState>,
}

impl ApiClient {
    /// Create a new API client from the application config
    pub fn new(config: &Config, store: Arc<dyn CredentialStore>) -> anyhow::Result<Self> {
        Self::with_settings(ClientSettings::from_config(config)?, store)
    }

    pub fn with_settings(
        settings: ClientSettings,
        store: Arc<dyn CredentialStore>,
    ) -> anyhow::Result<Self> {
        let mut builder = Client::builder().timeout(settings.request_timeout);
        if settings.mode == AuthMode::Cookie {
            let jar = SessionCookieJar::new(store.clone(), &settings.base_url);
            builder = builder.cookie_provider(Arc::new(jar));
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.base_url,
            mode: settings.mode,
            refresh_timeout: settings.refresh_timeout,
            state: Arc::new(CredentialState {
                store,
                generation: AtomicU64::new(0),
                refresh_epoch: AtomicU64::new(0),
                refresh_lock: Mutex::new(()),
            }),
        })
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.state.store
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidPath(format!("{path}: {e}")))
    }

    fn generation(&self) -> u64 {
        self.state.generation.load(Ordering::Acquire)
    }

    fn observe(&self) -> Observed {
        Observed {
            generation: self.generation(),
            refresh_epoch: self.state.refresh_epoch.load(Ordering::Acquire),
        }
    }

    // ===== Credential Writes =====

    pub(crate) fn replace_credential(&self, credential: &Credential) -> Result<(), ApiError> {
        self.state.store.set(credential)?;
        self.state.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    pub(crate) fn clear_credential(&self) -> Result<(), ApiError> {
        let result = self.state.store.clear();
        self.state.generation.fetch_add(1, Ordering::AcqRel);
        result.map_err(ApiError::from)
    }

    fn auth_headers(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        if self.mode == AuthMode::Bearer {
            let token = self.state.store.get()?.and_then(|c| c.access_token);
            if let Some(token) = token {
                let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
                value.set_sensitive(true);
                headers.insert(header::AUTHORIZATION, value);
            }
        }
        Ok(headers)
    }

    // ===== Dispatch =====

    async fn dispatch(&self, attempt: RequestAttempt<'_>) -> Result<Response, ApiError> {
        let request = attempt.original();
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path)?)
            .headers(request.headers.clone());
        if !request.has_authorization() {
            builder = builder.headers(self.auth_headers()?);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        debug!(
            method = %request.method,
            path = %request.path,
            retried = attempt.is_retry(),
            "Sending request"
        );
        Ok(builder.send().await?)
    }

    /// Send a request, refreshing the credential and replaying the request
    /// once if the server answers 401. Non-2xx responses become
    /// [`ApiError::Http`].
    pub async fn send(&self, request: &ApiRequest) -> Result<Response, ApiError> {
        let mut attempt = RequestAttempt::first(request);
        loop {
            let seen = self.observe();
            let response = self.dispatch(attempt).await?;
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let body = response.text().await.unwrap_or_default();
            // A caller-supplied Authorization header would be replayed as is,
            // so refreshing cannot help those requests.
            if status != StatusCode::UNAUTHORIZED
                || attempt.is_retry()
                || request.has_authorization()
            {
                return Err(ApiError::from_status(status, &body));
            }

            debug!(path = %request.path, "Unauthorized, refreshing credentials");
            if let Err(e) = self.refresh_after(seen).await {
                warn!(path = %request.path, error = %e, "Silent refresh failed");
                return Err(ApiError::from_status(status, &body));
            }
            attempt = attempt.retry();
        }
    }

    /// Send a request exactly once: no refresh, no replay. Used by the auth
    /// endpoints themselves, where a 401 means bad credentials.
    pub async fn send_once(&self, request: &ApiRequest) -> Result<Response, ApiError> {
        self.dispatch(RequestAttempt::first(request)).await
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        Self::read_json(response).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(&ApiRequest::get(path)).await
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(&ApiRequest::put(path).json(body)?).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(&ApiRequest::post(path).json(body)?).await
    }

    pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let url = response.url().path().to_string();
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("{url}: {e}")))
    }

    // ===== Refresh =====

    /// Refresh unless another request already tried since `seen` was
    /// taken. Concurrent 401s queue on the lock and share the outcome of one
    /// refresh: a new credential means retry, a failed attempt means give up.
    async fn refresh_after(&self, seen: Observed) -> Result<(), ApiError> {
        let _guard = self.state.refresh_lock.lock().await;
        let now = self.observe();
        if now.generation != seen.generation {
            debug!("Credentials changed while waiting, skipping refresh");
            return Ok(());
        }
        if now.refresh_epoch != seen.refresh_epoch {
            debug!("Refresh already failed for this credential");
            return Err(ApiError::SessionExpired);
        }
        self.refresh_locked().await.map(|_| ())
    }

    /// Obtain a new credential from the refresh endpoint and store it.
    pub async fn refresh(&self) -> Result<AuthGrant, ApiError> {
        let _guard = self.state.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<AuthGrant, ApiError> {
        let result = match tokio::time::timeout(self.refresh_timeout, self.request_refresh()).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_ms = self.refresh_timeout.as_millis() as u64,
                    "Refresh timed out"
                );
                Err(ApiError::SessionExpired)
            }
        };
        self.state.refresh_epoch.fetch_add(1, Ordering::AcqRel);
        result
    }

    async fn request_refresh(&self) -> Result<AuthGrant, ApiError> {
        let current = self.state.store.get()?;
        let url = self.url(REFRESH_PATH)?;

        let response = match self.mode {
            AuthMode::Bearer => {
                let refresh_token = current
                    .as_ref()
                    .and_then(|c| c.refresh_token.clone())
                    .ok_or(ApiError::SessionExpired)?;
                self.client
                    .post(url)
                    .json(&RefreshRequest { refresh_token })
                    .send()
                    .await?
            }
            AuthMode::Cookie => self.client.get(url).send().await?,
        };

        let status = response.status();
        if !status.is_success() {
            debug!(%status, "Refresh rejected");
            return Err(ApiError::SessionExpired);
        }

        let previous_user = current.as_ref().and_then(|c| c.user_id);
        let grant = match self.mode {
            AuthMode::Bearer => {
                let payload: BearerAuthResponse = Self::read_json(response).await?;
                let user_id = payload.user_id().or(previous_user);
                let refresh_token = payload
                    .refresh_token
                    .or_else(|| current.and_then(|c| c.refresh_token));
                let credential = Credential::bearer(payload.access_token.clone(), refresh_token)
                    .with_user_id(user_id);
                self.replace_credential(&credential)?;
                AuthGrant {
                    token: Some(payload.access_token),
                    user_id,
                }
            }
            AuthMode::Cookie => {
                let payload: CookieAuthResponse = Self::read_json(response).await?;
                self.mark_cookie_session(Some(payload.user.id))?;
                AuthGrant {
                    token: None,
                    user_id: Some(payload.user.id),
                }
            }
        };

        info!(user_id = ?grant.user_id, "Credentials refreshed");
        Ok(grant)
    }

    /// Record the user-id marker next to the cookies the jar already stored.
    pub(crate) fn mark_cookie_session(&self, user_id: Option<i64>) -> Result<(), ApiError> {
        let mut credential = self.state.store.get()?.unwrap_or_else(Credential::empty);
        credential.user_id = user_id;
        credential.issued_at = chrono::Utc::now();
        self.replace_credential(&credential)
    }
}
