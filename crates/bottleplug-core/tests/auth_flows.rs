//! Sign-in, sign-out, restore and identity-token precedence flows.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bottleplug_core::auth::session::{
    ACCESS_TOKEN_KEY, CREDENTIAL_KEYS, ID_TOKEN_KEY, REFRESH_TOKEN_KEY, SESSION_ID_KEY, SESSION_KEY,
};
use bottleplug_core::auth::{IdentityError, IdentityProvider, StaticIdentity};
use bottleplug_core::navigation::Navigator;
use bottleplug_core::storage::{FileStore, MemoryStore};
use bottleplug_core::{ApiClient, ApiError, AuthManager, KeyValueStore, SessionManager, SignInRedirector};

use common::{api_path, config_for, sign_in, write_session};

struct Fixture {
    auth: AuthManager,
    store: Arc<MemoryStore>,
    navigator: Arc<SignInRedirector>,
}

fn fixture(server: &MockServer, identity: Arc<dyn IdentityProvider>) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let navigator = Arc::new(SignInRedirector::default());
    let api = ApiClient::builder(config_for(server), SessionManager::new(store.clone()))
        .identity(identity)
        .navigator(navigator.clone())
        .build()
        .unwrap();
    Fixture {
        auth: AuthManager::new(api, "device_test"),
        store,
        navigator,
    }
}

/// Provider that is signed in but cannot currently mint tokens
struct FlakyIdentity;

#[async_trait]
impl IdentityProvider for FlakyIdentity {
    async fn id_token(&self) -> Result<Option<String>, IdentityError> {
        Err(IdentityError::Unavailable("offline".to_string()))
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        Err(IdentityError::Unavailable("offline".to_string()))
    }
}

#[tokio::test]
async fn test_identity_sign_in_stores_tokens_and_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/users/login/")))
        .and(body_json(json!({
            "id_token": "idp-token",
            "platform": "web",
            "device_id": "device_test",
            "app_version": "1.0.0",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": {"id": 42, "email": "ada@example.com", "first_name": "Ada"},
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "session_id": 9001,
            "is_new_user": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let f = fixture(&server, Arc::new(StaticIdentity::new(Some("idp-token".to_string()))));
    let user = f.auth.sign_in_with_identity().await.unwrap();

    assert_eq!(user.display_name(), "Ada");
    assert_eq!(f.store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("access-1"));
    assert_eq!(f.store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("refresh-1"));
    assert_eq!(f.store.get(SESSION_ID_KEY).unwrap().as_deref(), Some("9001"));
    assert_eq!(f.store.get(ID_TOKEN_KEY).unwrap().as_deref(), Some("idp-token"));

    let session = f.auth.sessions().load().unwrap().unwrap();
    assert_eq!(session.uid, "42");
    assert!(!session.backend_only);
    assert!(f.auth.is_authenticated());

    // The login call itself carries no bearer token
    let received = server.received_requests().await.unwrap();
    assert!(!received[0].headers.contains_key("authorization"));
}

#[tokio::test]
async fn test_password_sign_in_is_backend_only() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/users/test-login/")))
        .and(body_json(json!({"email": "ops@example.com", "password": "hunter2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": {"id": 3, "user_type": "admin"},
            "access": "access-ops"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let f = fixture(&server, Arc::new(StaticIdentity::default()));
    let user = f
        .auth
        .sign_in_with_password(" ops@example.com ", "hunter2")
        .await
        .unwrap();

    assert!(user.is_admin());
    assert_eq!(user.email.as_deref(), Some("ops@example.com"));
    assert_eq!(f.store.get(REFRESH_TOKEN_KEY).unwrap(), None);

    let session = f.auth.sessions().load().unwrap().unwrap();
    assert!(session.backend_only);
    assert_eq!(session.email.as_deref(), Some("ops@example.com"));
}

#[tokio::test]
async fn test_rejected_password_sign_in_stores_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/users/test-login/")))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "Invalid credentials"})))
        .mount(&server)
        .await;

    let f = fixture(&server, Arc::new(StaticIdentity::default()));
    let err = f
        .auth
        .sign_in_with_password("ops@example.com", "wrong")
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Http { ref message, .. } if message == "Invalid credentials"));
    assert!(f.store.is_empty());
    // A public 401 never triggers the forced sign-out path
    assert_eq!(f.navigator.redirect_count(), 0);
}

#[tokio::test]
async fn test_sign_out_clears_everything_even_when_logout_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/users/logout/")))
        .and(header("authorization", "Bearer access-1"))
        .and(body_json(json!({"session_id": "s-1"})))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let f = fixture(&server, Arc::new(FlakyIdentity));
    sign_in(&f.store, "access-1", Some("refresh-1"));
    f.store.set(SESSION_ID_KEY, "s-1").unwrap();
    f.store.set(ID_TOKEN_KEY, "idp").unwrap();
    f.store.set("user_session_start", "1700000000000").unwrap();

    f.auth.sign_out().await.unwrap();

    for key in CREDENTIAL_KEYS {
        assert_eq!(f.store.get(key).unwrap(), None, "{} should be cleared", key);
    }
    assert!(!f.auth.is_authenticated());
}

#[tokio::test]
async fn test_sign_out_when_signed_out_skips_backend() {
    let server = MockServer::start().await;
    let f = fixture(&server, Arc::new(StaticIdentity::default()));

    f.auth.sign_out().await.unwrap();
    assert!(server.received_requests().await.unwrap().is_empty());
    assert!(f.store.is_empty());
}

#[tokio::test]
async fn test_restore_session_with_accepted_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(api_path("/auth/users/profile/")))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1, "full_name": "Ada Lovelace"})))
        .expect(1)
        .mount(&server)
        .await;

    let f = fixture(&server, Arc::new(StaticIdentity::default()));
    sign_in(&f.store, "access-1", Some("refresh-1"));

    let user = f.auth.restore_session().await.unwrap().unwrap();
    assert_eq!(user.display_name(), "Ada Lovelace");
    assert!(f.store.get(SESSION_KEY).unwrap().is_some());
}

#[tokio::test]
async fn test_restore_session_with_rejected_token_clears() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(api_path("/auth/users/profile/")))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    // Restore does not go through the refresh path
    Mock::given(method("POST"))
        .and(path(api_path("/auth/users/refresh/")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "x"})))
        .expect(0)
        .mount(&server)
        .await;

    let f = fixture(&server, Arc::new(StaticIdentity::default()));
    sign_in(&f.store, "access-1", Some("refresh-1"));

    assert!(f.auth.restore_session().await.unwrap().is_none());
    assert!(f.store.is_empty());
}

#[tokio::test]
async fn test_restore_session_keeps_credentials_when_offline() {
    // Nothing listens on the discard port
    let store = Arc::new(MemoryStore::new());
    let api = ApiClient::new(
        bottleplug_core::ClientConfig::new("http://127.0.0.1:9/api/v1"),
        SessionManager::new(store.clone()),
    )
    .unwrap();
    let auth = AuthManager::new(api, "device_test");
    sign_in(&store, "access-1", Some("refresh-1"));

    let err = auth.restore_session().await.unwrap_err();
    assert!(matches!(err, ApiError::Network(_) | ApiError::Timeout));
    assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("access-1"));
}

#[tokio::test]
async fn test_restore_expired_session_clears_without_request() {
    let server = MockServer::start().await;
    let f = fixture(&server, Arc::new(StaticIdentity::default()));
    write_session(&f.store, Duration::hours(25));
    f.store.set(ACCESS_TOKEN_KEY, "old").unwrap();
    f.store.set(REFRESH_TOKEN_KEY, "old-refresh").unwrap();

    assert!(f.auth.restore_session().await.unwrap().is_none());
    assert!(f.store.is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_live_identity_token_takes_precedence() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(api_path("/orders/cart/my_cart/")))
        .and(header("authorization", "Bearer idp-live"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(1)
        .mount(&server)
        .await;

    let f = fixture(&server, Arc::new(StaticIdentity::new(Some("idp-live".to_string()))));
    sign_in(&f.store, "backend-access", None);

    assert!(f.auth.api().fetch_cart().await.unwrap().is_empty());
    assert_eq!(f.store.get(ID_TOKEN_KEY).unwrap().as_deref(), Some("idp-live"));
}

#[tokio::test]
async fn test_cached_identity_token_used_when_provider_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(api_path("/notifications/")))
        .and(header("authorization", "Bearer idp-cached"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let f = fixture(&server, Arc::new(FlakyIdentity));
    sign_in(&f.store, "backend-access", None);
    f.store.set(ID_TOKEN_KEY, "idp-cached").unwrap();

    assert!(f.auth.api().fetch_notifications().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_forced_sign_out_remembers_destination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(api_path("/orders/orders/7/")))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let f = fixture(&server, Arc::new(StaticIdentity::default()));
    sign_in(&f.store, "stale", None);
    f.navigator.set_location("/orders/7");

    assert!(f.auth.api().fetch_order("7").await.is_err());
    assert_eq!(f.navigator.location().as_deref(), Some("/"));
    assert_eq!(f.navigator.take_intended_destination().as_deref(), Some("/orders/7"));
}

#[tokio::test]
async fn test_file_store_survives_reopen() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(api_path("/auth/users/test-login/")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": {"id": 3},
            "access_token": "access-file",
            "refresh_token": "refresh-file"
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("credentials.json");

    {
        let store = Arc::new(FileStore::open(&file).unwrap());
        let api = ApiClient::new(config_for(&server), SessionManager::new(store)).unwrap();
        AuthManager::new(api, "device_test")
            .sign_in_with_password("ops@example.com", "pw")
            .await
            .unwrap();
    }

    let sessions = SessionManager::new(Arc::new(FileStore::open(&file).unwrap()));
    assert!(sessions.is_session_valid());
    assert_eq!(sessions.access_token().unwrap().as_deref(), Some("access-file"));
    assert_eq!(sessions.refresh_token().unwrap().as_deref(), Some("refresh-file"));
}
