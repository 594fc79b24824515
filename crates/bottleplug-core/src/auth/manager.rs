//! Sign-in, sign-out and start-up restore flows.
//!
//! `AuthManager` ties the identity provider, the backend auth endpoints and
//! the `SessionManager` together. Sign-out is best-effort towards the
//! network and the provider, but always erases local credentials.

use reqwest::header::{self, HeaderValue};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, ApiRequest};
use crate::models::{BackendUser, LoginResponse};
use crate::navigation::DEFAULT_LANDING_PATH;

use super::{SessionManager, TokenPair};

const LOGIN_PATH: &str = "/auth/users/login/";
const PASSWORD_LOGIN_PATH: &str = "/auth/users/test-login/";
const LOGOUT_PATH: &str = "/auth/users/logout/";
const PROFILE_PATH: &str = "/auth/users/profile/";

/// Session subject for backend-only sign-ins, which have no provider uid
pub const BACKEND_ONLY_UID: &str = "backend-only";

pub struct AuthManager {
    api: ApiClient,
    device_id: String,
}

impl AuthManager {
    pub fn new(api: ApiClient, device_id: impl Into<String>) -> Self {
        Self {
            api,
            device_id: device_id.into(),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn sessions(&self) -> &SessionManager {
        self.api.sessions()
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// True while the local session window is open
    pub fn is_authenticated(&self) -> bool {
        self.sessions().is_session_valid()
    }

    /// Exchange the identity provider's token for backend tokens.
    pub async fn sign_in_with_identity(&self) -> Result<BackendUser, ApiError> {
        let id_token = self
            .api
            .identity()
            .id_token()
            .await?
            .ok_or(ApiError::NotAuthenticated)?;

        let request = ApiRequest::post(LOGIN_PATH)
            .json(json!({
                "id_token": id_token,
                "platform": self.api.platform(),
                "device_id": self.device_id,
                "app_version": self.api.app_version(),
            }))
            .public();
        let login: LoginResponse = self.api.execute(&request).await?.into_json()?;

        self.sessions().cache_id_token(&id_token, None)?;
        let uid = login
            .user
            .id
            .clone()
            .or_else(|| login.user.email.clone())
            .unwrap_or_default();
        self.complete_sign_in(login, &uid, false)
    }

    /// Backend-only sign-in with email and password.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<BackendUser, ApiError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(ApiError::validation("Email and password are required"));
        }

        let request = ApiRequest::post(PASSWORD_LOGIN_PATH)
            .json(json!({ "email": email, "password": password }))
            .public();
        let mut login: LoginResponse = self.api.execute(&request).await?.into_json()?;
        if login.user.email.is_none() {
            login.user.email = Some(email.to_string());
        }
        self.complete_sign_in(login, BACKEND_ONLY_UID, true)
    }

    fn complete_sign_in(
        &self,
        login: LoginResponse,
        uid: &str,
        backend_only: bool,
    ) -> Result<BackendUser, ApiError> {
        let sessions = self.sessions();
        sessions.store_tokens(&TokenPair {
            access: login.access_token,
            refresh: login.refresh_token.filter(|r| !r.is_empty()),
        })?;
        if let Some(ref session_id) = login.session_id {
            sessions.store_session_id(session_id)?;
        }
        sessions.start_session(uid, login.user.email.as_deref(), backend_only)?;

        info!(
            user = %login.user.display_name(),
            new_user = login.is_new_user,
            backend_only,
            "Signed in"
        );
        Ok(login.user)
    }

    /// Sign out everywhere we can, then erase local credentials.
    pub async fn sign_out(&self) -> Result<(), ApiError> {
        let sessions = self.sessions();

        match sessions.access_token() {
            Ok(Some(access)) => self.notify_logout(&access).await,
            Ok(None) => debug!("No access token, skipping backend logout"),
            Err(e) => warn!(error = %e, "Failed to read access token for logout"),
        }

        if let Err(e) = self.api.identity().sign_out().await {
            warn!(error = %e, "Identity provider sign-out failed");
        }

        sessions.clear_session()?;
        info!("Signed out");
        Ok(())
    }

    async fn notify_logout(&self, access: &str) {
        let session_id = self.sessions().session_id().ok().flatten();
        let mut request = ApiRequest::post(LOGOUT_PATH)
            .json(json!({ "session_id": session_id }))
            .public();
        if let Ok(bearer) = HeaderValue::from_str(&format!("Bearer {}", access)) {
            request = request.header(header::AUTHORIZATION, bearer);
        }
        if let Err(e) = self.api.execute(&request).await {
            warn!(error = %e.technical_message(), "Backend logout failed");
        }
    }

    /// Start-up restore.
    ///
    /// Returns the user when a valid session, a stored access token and a
    /// successful profile check line up. Otherwise credentials are cleared
    /// and `Ok(None)` is returned. Network failures and timeouts keep the
    /// stored credentials and are returned as errors.
    pub async fn restore_session(&self) -> Result<Option<BackendUser>, ApiError> {
        let sessions = self.sessions();

        let Some(session) = sessions.check_existing_session()? else {
            sessions.clear_session()?;
            return Ok(None);
        };
        let Some(access) = sessions.access_token()? else {
            info!("Session record without access token, clearing");
            sessions.clear_session()?;
            return Ok(None);
        };

        let mut request = ApiRequest::get(PROFILE_PATH).public();
        if let Ok(bearer) = HeaderValue::from_str(&format!("Bearer {}", access)) {
            request = request.header(header::AUTHORIZATION, bearer);
        }

        match self.api.execute(&request).await {
            Ok(response) => {
                let user = response.into_json::<BackendUser>().unwrap_or_else(|e| {
                    debug!(error = %e, "Profile body unreadable, using session record");
                    BackendUser {
                        email: session.email.clone(),
                        ..Default::default()
                    }
                });
                info!(
                    uid = %session.uid,
                    minutes_left = session.minutes_until_expiry(),
                    "Session restored"
                );
                Ok(Some(user))
            }
            Err(e @ (ApiError::Network(_) | ApiError::Timeout)) => Err(e),
            Err(e) => {
                info!(error = %e.technical_message(), "Stored session rejected, clearing");
                sessions.clear_session()?;
                Ok(None)
            }
        }
    }

    /// Whether the stored credentials are still accepted by the backend
    pub async fn check_token_validity(&self) -> bool {
        if !self.is_authenticated() {
            return false;
        }
        match self.api.execute(&ApiRequest::get(PROFILE_PATH)).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e.technical_message(), "Token validity check failed");
                false
            }
        }
    }

    pub async fn refresh_profile(&self) -> Result<BackendUser, ApiError> {
        self.api.fetch_profile().await
    }

    /// Where to go after sign-in: the saved destination or the dashboard
    pub fn redirect_after_auth(&self) -> String {
        self.api
            .navigator()
            .take_intended_destination()
            .unwrap_or_else(|| DEFAULT_LANDING_PATH.to_string())
    }
}
