//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use wiremock::MockServer;

use bottleplug_core::auth::session::{Session, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SESSION_KEY};
use bottleplug_core::storage::MemoryStore;
use bottleplug_core::{ApiClient, ClientConfig, KeyValueStore, SessionManager, SignInRedirector};

pub const API_PREFIX: &str = "/api/v1";

/// Path on the mock server for an API path
pub fn api_path(path: &str) -> String {
    format!("{}{}", API_PREFIX, path)
}

pub struct Harness {
    pub api: ApiClient,
    pub store: Arc<MemoryStore>,
    pub navigator: Arc<SignInRedirector>,
}

pub fn config_for(server: &MockServer) -> ClientConfig {
    ClientConfig::new(format!("{}{}", server.uri(), API_PREFIX))
}

pub fn harness(server: &MockServer) -> Harness {
    harness_with(config_for(server))
}

pub fn harness_with(config: ClientConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let navigator = Arc::new(SignInRedirector::default());
    let api = ApiClient::builder(config, SessionManager::new(store.clone()))
        .navigator(navigator.clone())
        .build()
        .unwrap();
    Harness {
        api,
        store,
        navigator,
    }
}

/// Write a session record that started `age` ago
pub fn write_session(store: &MemoryStore, age: Duration) {
    let mut session = Session::new("uid-1", Some("ada@example.com".to_string()), false);
    session.started_at = Utc::now() - age;
    store
        .set(SESSION_KEY, &serde_json::to_string(&session).unwrap())
        .unwrap();
}

/// Signed-in state: one hour into the session with both tokens stored
pub fn sign_in(store: &MemoryStore, access: &str, refresh: Option<&str>) {
    write_session(store, Duration::hours(1));
    store.set(ACCESS_TOKEN_KEY, access).unwrap();
    if let Some(refresh) = refresh {
        store.set(REFRESH_TOKEN_KEY, refresh).unwrap();
    }
}
