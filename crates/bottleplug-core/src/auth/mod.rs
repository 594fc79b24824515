//! Authentication module for managing sessions, tokens and sign-in flows.
//!
//! This module provides:
//! - `SessionManager`: the 24h session record and backend token storage
//! - `IdentityProvider`: source of live tokens from the identity provider
//! - `AuthManager`: sign-in, sign-out and start-up restore against the backend
//!
//! The session window is independent of token expiry: a session older than
//! 24 hours is expired even if its tokens would still be accepted.

pub mod identity;
pub mod manager;
pub mod session;

pub use identity::{IdentityError, IdentityProvider, NoIdentity, StaticIdentity};
pub use manager::AuthManager;
pub use session::{Session, SessionManager, TokenPair};
