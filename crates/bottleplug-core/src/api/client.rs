//! API client for communicating with the bottleplug REST API.
//!
//! This module provides the `ApiClient` struct that wraps every backend
//! call: it resolves the URL, picks a bearer token, sends the request and
//! recovers from a 401 with a single refresh-token exchange.

use std::sync::Arc;

use chrono::Utc;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::auth::{IdentityProvider, NoIdentity, SessionManager, TokenPair};
use crate::config::ClientConfig;
use crate::navigation::{Navigator, SignInRedirector};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Refresh-token exchange endpoint, relative to the API base URL
pub const REFRESH_PATH: &str = "/auth/users/refresh/";

/// Cheap endpoint used to check connectivity
const CONNECTIVITY_PATH: &str = "/products/categories/";

const PLATFORM_HEADER: &str = "x-platform";
const APP_VERSION_HEADER: &str = "x-app-version";

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(alias = "access_token")]
    access: String,
    #[serde(default, alias = "refresh_token")]
    refresh: Option<String>,
}

// ============================================================================
// Requests
// ============================================================================

/// One field of a multipart form.
#[derive(Debug, Clone, PartialEq)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: Option<String>,
        bytes: Vec<u8>,
    },
}

impl FormPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        FormPart::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn file(name: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        FormPart::File {
            name: name.into(),
            file_name: file_name.into(),
            mime: None,
            bytes,
        }
    }

    pub fn with_mime(self, mime: impl Into<String>) -> Self {
        match self {
            FormPart::File {
                name,
                file_name,
                bytes,
                ..
            } => FormPart::File {
                name,
                file_name,
                mime: Some(mime.into()),
                bytes,
            },
            text => text,
        }
    }
}

/// Request payload kept in a form that can be sent more than once.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Multipart(Vec<FormPart>),
}

impl RequestBody {
    /// Build a fresh multipart form; `reqwest::multipart::Form` is consumed on send
    fn to_form(parts: &[FormPart]) -> Result<Form, ApiError> {
        let mut form = Form::new();
        for part in parts {
            form = match part {
                FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
                FormPart::File {
                    name,
                    file_name,
                    mime,
                    bytes,
                } => {
                    let mut file = Part::bytes(bytes.clone()).file_name(file_name.clone());
                    if let Some(mime) = mime {
                        file = file.mime_str(mime).map_err(|e| {
                            ApiError::validation(format!("Invalid MIME type '{}': {}", mime, e))
                        })?;
                    }
                    form.part(name.clone(), file)
                }
            };
        }
        Ok(form)
    }
}

/// A backend call described independently of any one attempt to send it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: RequestBody,
    public: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            public: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn multipart(mut self, parts: Vec<FormPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set a header, replacing the default of the same name
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Send without a bearer token and without refresh handling
    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn is_public(&self) -> bool {
        self.public
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Successful response, parsed by content type.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    /// JSON body, or the raw text as a JSON string for non-JSON responses
    pub body: Value,
    pub is_json: bool,
}

impl ApiResponse {
    /// Deserialize a JSON body into `T`. An empty non-JSON body reads as null.
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        let body = if self.is_json {
            self.body
        } else {
            let text = self.body.as_str().unwrap_or_default();
            if !text.trim().is_empty() {
                return Err(ApiError::Parse(format!(
                    "expected a JSON response, got text ({} bytes)",
                    text.len()
                )));
            }
            Value::Null
        };
        serde_json::from_value(body).map_err(|e| ApiError::Parse(e.to_string()))
    }

    /// Raw text of a non-JSON response
    pub fn text(&self) -> Option<&str> {
        if self.is_json {
            None
        } else {
            self.body.as_str()
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// API client for the bottleplug backend.
/// Clone is cheap - reqwest::Client and the injected services are shared.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    platform: String,
    app_version: String,
    anonymous_token: Option<String>,
    sessions: SessionManager,
    identity: Arc<dyn IdentityProvider>,
    navigator: Arc<dyn Navigator>,
}

pub struct ApiClientBuilder {
    config: ClientConfig,
    sessions: SessionManager,
    identity: Arc<dyn IdentityProvider>,
    navigator: Arc<dyn Navigator>,
}

impl ApiClientBuilder {
    pub fn identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn build(self) -> Result<ApiClient, ApiError> {
        let http = Client::builder()
            .timeout(self.config.timeout())
            .build()
            .map_err(|e| ApiError::Configuration(e.to_string()))?;

        // Reject header values up front so sends cannot fail on them
        for value in [self.config.platform(), self.config.app_version.as_str()] {
            HeaderValue::from_str(value).map_err(|_| {
                ApiError::Configuration(format!("'{}' is not a valid header value", value))
            })?;
        }

        Ok(ApiClient {
            http,
            base_url: self.config.api_base_url(),
            platform: self.config.platform().to_string(),
            app_version: self.config.app_version.clone(),
            anonymous_token: self.config.anonymous_token.clone().filter(|t| !t.is_empty()),
            sessions: self.sessions,
            identity: self.identity,
            navigator: self.navigator,
        })
    }
}

impl ApiClient {
    pub fn builder(config: ClientConfig, sessions: SessionManager) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            sessions,
            identity: Arc::new(NoIdentity),
            navigator: Arc::new(SignInRedirector::default()),
        }
    }

    /// Create a client with no identity provider and an in-memory navigator
    pub fn new(config: ClientConfig, sessions: SessionManager) -> Result<Self, ApiError> {
        Self::builder(config, sessions).build()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn app_version(&self) -> &str {
        &self.app_version
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    /// Absolute URL for a path relative to the base URL; absolute URLs pass through
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Whether `url` lies under the API base URL
    pub fn is_api_url(&self, url: &str) -> bool {
        url.strip_prefix(self.base_url.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(['/', '?']))
    }

    // ===== Request pipeline =====

    /// Execute a request against the base URL
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = self.url_for(&request.path);
        self.execute_url(&url, request).await
    }

    /// Execute a request against an absolute URL.
    ///
    /// Credentials are only attached to URLs under the base URL; anything
    /// else is sent as a public request.
    pub async fn execute_url(&self, url: &str, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        if request.public || !self.is_api_url(url) {
            if !request.public {
                debug!(url, "Sending without credentials to a foreign URL");
            }
            let response = self.send(url, request, None).await?;
            return Self::read_response(response).await;
        }

        if self.session_expired_without_refresh()? {
            info!("Session expired and no refresh token stored");
            self.force_sign_out().await;
            return Err(ApiError::SessionExpired);
        }

        let token = self.bearer_token().await?;
        let response = self.send(url, request, Some(&token)).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::read_response(response).await;
        }

        debug!(url = %url, "Got 401, attempting token refresh");
        let Some(access) = self.try_refresh().await else {
            self.force_sign_out().await;
            return Err(ApiError::SessionExpired);
        };

        let retry = self.send(url, request, Some(&access)).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            warn!(url = %url, "Request still unauthorized after refresh");
            self.force_sign_out().await;
            return Err(ApiError::SessionExpired);
        }
        Self::read_response(retry).await
    }

    /// Stored session is past its window and cannot be recovered
    fn session_expired_without_refresh(&self) -> Result<bool, ApiError> {
        let Some(session) = self.sessions.load()? else {
            return Ok(false);
        };
        if session.is_valid_at(Utc::now()) {
            return Ok(false);
        }
        Ok(self.sessions.refresh_token()?.is_none())
    }

    /// Pick the bearer token for an authenticated call.
    ///
    /// Order: live identity token (cached ID token if the provider fails),
    /// stored access token, configured anonymous token.
    pub async fn bearer_token(&self) -> Result<String, ApiError> {
        match self.identity.id_token().await {
            Ok(Some(token)) => {
                if self.sessions.cached_id_token()?.as_deref() != Some(token.as_str()) {
                    self.sessions.cache_id_token(&token, None)?;
                }
                return Ok(token);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Identity provider failed to produce a token");
                if let Some(cached) = self.sessions.cached_id_token()? {
                    debug!("Using cached identity token");
                    return Ok(cached);
                }
            }
        }

        if let Some(access) = self.sessions.access_token()? {
            return Ok(access);
        }
        if let Some(ref anonymous) = self.anonymous_token {
            debug!("Using anonymous token");
            return Ok(anonymous.clone());
        }
        Err(ApiError::NotAuthenticated)
    }

    async fn send(
        &self,
        url: &str,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(PLATFORM_HEADER),
            header_value(&self.platform)?,
        );
        headers.insert(
            HeaderName::from_static(APP_VERSION_HEADER),
            header_value(&self.app_version)?,
        );
        if let Some(token) = token {
            let mut bearer = header_value(&format!("Bearer {}", token))?;
            bearer.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, bearer);
        }
        if matches!(request.body, RequestBody::Json(_)) {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        for (name, value) in &request.headers {
            headers.insert(name.clone(), value.clone());
        }

        let mut builder = self.http.request(request.method.clone(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match &request.body {
            RequestBody::Empty => builder.headers(headers),
            RequestBody::Json(value) => builder.headers(headers).body(serde_json::to_vec(value)?),
            RequestBody::Multipart(parts) => {
                // The HTTP layer sets the content type with its boundary
                headers.remove(header::CONTENT_TYPE);
                builder.headers(headers).multipart(RequestBody::to_form(parts)?)
            }
        };

        debug!(method = %request.method, url = %url, "Sending request");
        let response = builder.send().await.map_err(|e| {
            warn!(method = %request.method, url = %url, error = %e, "Request failed");
            ApiError::from(e)
        })?;
        debug!(url = %url, status = response.status().as_u16(), "Received response");
        Ok(response)
    }

    /// Turn a response into `ApiResponse`, or `ApiError::Http` for non-2xx
    async fn read_response(response: reqwest::Response) -> Result<ApiResponse, ApiError> {
        let status = response.status();
        let is_json = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);
        let text = response.text().await?;

        if !status.is_success() {
            let err = ApiError::from_response(status, &text);
            debug!(error = %err.technical_message(), "API error response");
            return Err(err);
        }

        let body = if !is_json {
            Value::String(text)
        } else if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Parse(e.to_string()))?
        };

        Ok(ApiResponse {
            status,
            body,
            is_json,
        })
    }

    /// Exchange the stored refresh token once. Returns the new access token.
    async fn try_refresh(&self) -> Option<String> {
        let refresh = match self.sessions.refresh_token() {
            Ok(Some(refresh)) => refresh,
            Ok(None) => {
                debug!("No refresh token stored");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read refresh token");
                return None;
            }
        };

        let request = ApiRequest::post(REFRESH_PATH)
            .json(json!({ "refresh": refresh }))
            .public();
        let parsed = match self.send(&self.url_for(REFRESH_PATH), &request, None).await {
            Ok(response) => match Self::read_response(response).await {
                Ok(response) => response.into_json::<RefreshResponse>(),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        match parsed {
            Ok(tokens) if !tokens.access.is_empty() => {
                let pair = TokenPair {
                    access: tokens.access,
                    refresh: tokens.refresh.filter(|r| !r.is_empty()),
                };
                if let Err(e) = self.sessions.store_tokens(&pair) {
                    warn!(error = %e, "Failed to store refreshed tokens");
                    return None;
                }
                info!(rotated = pair.refresh.is_some(), "Access token refreshed");
                Some(pair.access)
            }
            Ok(_) => {
                warn!("Refresh response carried an empty access token");
                None
            }
            Err(e) => {
                warn!(error = %e.technical_message(), "Token refresh failed");
                None
            }
        }
    }

    /// Erase all credentials, sign out of the identity provider and
    /// redirect to sign-in. Never fails.
    pub async fn force_sign_out(&self) {
        if let Err(e) = self.sessions.clear_session() {
            warn!(error = %e, "Failed to clear credentials");
        }
        if let Err(e) = self.identity.sign_out().await {
            warn!(error = %e, "Identity provider sign-out failed");
        }
        self.navigator.redirect_to_sign_in();
    }

    // ===== Convenience methods =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(&ApiRequest::get(path)).await?.into_json()
    }

    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let request = query
            .iter()
            .fold(ApiRequest::get(path), |req, (k, v)| req.query(*k, *v));
        self.execute(&request).await?.into_json()
    }

    /// Fetch an absolute URL, e.g. a pagination `next` link.
    /// Only URLs under the base URL carry credentials.
    pub async fn get_url<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        self.execute_url(url, &ApiRequest::get(url)).await?.into_json()
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = ApiRequest::post(path).json(serde_json::to_value(body)?);
        self.execute(&request).await?.into_json()
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = ApiRequest::patch(path).json(serde_json::to_value(body)?);
        self.execute(&request).await?.into_json()
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.execute(&ApiRequest::delete(path)).await
    }

    /// POST a multipart form
    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        parts: Vec<FormPart>,
    ) -> Result<T, ApiError> {
        self.execute(&ApiRequest::post(path).multipart(parts))
            .await?
            .into_json()
    }

    /// Unauthenticated check; the backend is reachable if it answers 200 or 401
    pub async fn test_connection(&self) -> bool {
        let request = ApiRequest::get(CONNECTIVITY_PATH).public();
        match self.send(&self.url_for(CONNECTIVITY_PATH), &request, None).await {
            Ok(response) => {
                let status = response.status();
                debug!(status = status.as_u16(), "Connection check answered");
                status == StatusCode::OK || status == StatusCode::UNAUTHORIZED
            }
            Err(e) => {
                warn!(error = %e.technical_message(), "Connection check failed");
                false
            }
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value)
        .map_err(|_| ApiError::Configuration("invalid header value".to_string()))
}
