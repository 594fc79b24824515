//! Core library for the bottleplug storefront and dashboard clients.
//!
//! This crate provides:
//! - `ApiClient`: authenticated REST client with one-shot token refresh
//! - `SessionManager`: local session bookkeeping with a fixed 24h window
//! - `AuthManager`: sign-in, sign-out and session restoration flows
//! - `SessionWatchdog`: periodic check that forces sign-out on expiry
//! - `NotificationSocket`: realtime notifications with bounded reconnects
//!
//! Tokens and session markers live in a pluggable `KeyValueStore`.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod navigation;
pub mod realtime;
pub mod storage;
pub mod utils;
pub mod watchdog;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, FormPart, RequestBody};
pub use auth::{AuthManager, IdentityProvider, Session, SessionManager, TokenPair};
pub use config::ClientConfig;
pub use navigation::{Navigator, SignInRedirector};
pub use storage::{KeyValueStore, StorageError};
pub use watchdog::SessionWatchdog;
