use reqwest::{Response, StatusCode};
use tracing::{debug, info, warn};

use crate::api::client::{ApiRequest, LOGIN_PATH, LOGOUT_PATH, REGISTER_PATH};
use crate::api::{ApiClient, ApiError};
use crate::config::AuthMode;
use crate::models::{
    parse_field_errors, AuthGrant, BearerAuthResponse, CookieAuthResponse, LoginRequest,
    LogoutResponse, RegisterProfile,
};

use super::credentials::Credential;
use super::session::SessionState;

/// Login, refresh, logout and registration, keeping the session state in
/// step with the credential store.
#[derive(Clone)]
pub struct AuthService {
    client: ApiClient,
    session: SessionState,
}

impl AuthService {
    pub fn new(client: ApiClient, session: SessionState) -> Self {
        Self { client, session }
    }

    /// Service with the session restored from the client's store.
    pub fn restore(client: ApiClient) -> Self {
        let session = SessionState::restore(client.store().as_ref(), client.mode());
        Self::new(client, session)
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Authenticate with email and password.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthGrant, ApiError> {
        self.session.begin();
        let result = self.try_login(email, password).await;
        self.settle(result)
    }

    async fn try_login(&self, email: &str, password: &str) -> Result<AuthGrant, ApiError> {
        let request = ApiRequest::post(LOGIN_PATH).json(&LoginRequest { email, password })?;
        let response = self.client.send_once(&request).await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            debug!(%status, "Login rejected");
            return Err(ApiError::InvalidCredentials);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }
        self.establish(response).await
    }

    /// Exchange the rotation token (or session cookie) for a new credential.
    pub async fn refresh(&self) -> Result<AuthGrant, ApiError> {
        self.session.begin();
        let result = self.client.refresh().await;
        if matches!(result, Err(ApiError::SessionExpired)) {
            // The stored credential can no longer be renewed
            if let Err(e) = self.client.clear_credential() {
                warn!(error = %e, "Failed to clear expired credential");
            }
        }
        self.settle(result)
    }

    /// Tell the server we are leaving, then drop the local credential no
    /// matter how that went. Returns the server's message, if any.
    pub async fn logout(&self) -> Result<Option<String>, ApiError> {
        let message = match self.client.send_once(&ApiRequest::post(LOGOUT_PATH)).await {
            Ok(response) if response.status().is_success() => {
                ApiClient::read_json::<LogoutResponse>(response)
                    .await
                    .ok()
                    .and_then(|r| r.message)
            }
            Ok(response) => {
                warn!(status = %response.status(), "Server rejected logout");
                None
            }
            Err(e) => {
                warn!(error = %e, "Logout request failed");
                None
            }
        };

        let cleared = self.client.clear_credential();
        self.session.end();
        cleared?;
        info!("Logged out");
        Ok(message)
    }

    /// Create an account. A successful registration signs the user in.
    pub async fn register(&self, profile: &RegisterProfile) -> Result<AuthGrant, ApiError> {
        let missing = profile.missing_fields();
        if !missing.is_empty() {
            return Err(ApiError::Validation(missing));
        }

        self.session.begin();
        let result = self.try_register(profile).await;
        self.settle(result)
    }

    async fn try_register(&self, profile: &RegisterProfile) -> Result<AuthGrant, ApiError> {
        let request = ApiRequest::post(REGISTER_PATH).json(profile)?;
        let response = self.client.send_once(&request).await?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST
            || status == StatusCode::UNPROCESSABLE_ENTITY
            || status == StatusCode::CONFLICT
        {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Validation(parse_field_errors(&body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }
        self.establish(response).await
    }

    /// Store the credential carried by a login/register response.
    async fn establish(&self, response: Response) -> Result<AuthGrant, ApiError> {
        match self.client.mode() {
            AuthMode::Bearer => {
                let payload: BearerAuthResponse = ApiClient::read_json(response).await?;
                let user_id = payload.user_id();
                let credential =
                    Credential::bearer(payload.access_token.clone(), payload.refresh_token)
                        .with_user_id(user_id);
                self.client.replace_credential(&credential)?;
                Ok(AuthGrant {
                    token: Some(payload.access_token),
                    user_id,
                })
            }
            AuthMode::Cookie => {
                let payload: CookieAuthResponse = ApiClient::read_json(response).await?;
                self.client.mark_cookie_session(Some(payload.user.id))?;
                Ok(AuthGrant {
                    token: None,
                    user_id: Some(payload.user.id),
                })
            }
        }
    }

    fn settle(&self, result: Result<AuthGrant, ApiError>) -> Result<AuthGrant, ApiError> {
        match &result {
            Ok(grant) => self.session.succeed(grant.user_id),
            Err(e) => {
                debug!(error = %e, "Authentication did not succeed");
                self.session.fail();
            }
        }
        result
    }

    /// Whether a usable credential is stored. Local only: the server may
    /// still reject it.
    pub fn is_authenticated(&self) -> bool {
        match self.client.store().get() {
            Ok(Some(credential)) => credential.is_usable(self.client.mode()),
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Failed to read stored credential");
                false
            }
        }
    }

    /// User id remembered for the current credential.
    pub fn user_id(&self) -> Option<i64> {
        self.client
            .store()
            .get()
            .ok()
            .flatten()
            .and_then(|c| c.user_id)
    }
}
