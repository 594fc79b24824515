//! Sign-in redirects and the intended-destination slot.
//!
//! When credentials are erased the client redirects to the sign-in entry
//! point. The location the user was on is kept in a session-scoped storage
//! slot so the post-login navigation can return there.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::storage::{KeyValueStore, MemoryStore};

/// Session-scoped storage key for the post-login destination
pub const INTENDED_DESTINATION_KEY: &str = "intendedDestination";

/// Default sign-in entry point
pub const SIGN_IN_PATH: &str = "/";

/// Where to go after sign-in when no destination was saved
pub const DEFAULT_LANDING_PATH: &str = "/dashboard";

/// Navigation hook invoked by the API layer.
pub trait Navigator: Send + Sync {
    /// Send the user to the sign-in entry point, remembering where they were
    fn redirect_to_sign_in(&self);

    /// Take (and clear) the saved post-login destination
    fn take_intended_destination(&self) -> Option<String>;
}

/// Paths that never count as a destination worth returning to
fn is_entry_path(path: &str, sign_in_path: &str) -> bool {
    path.is_empty() || path == "/" || path == "/login" || path == sign_in_path
}

/// Navigator that tracks the current location and records redirects.
pub struct SignInRedirector {
    session_storage: Arc<dyn KeyValueStore>,
    sign_in_path: String,
    location: RwLock<Option<String>>,
    redirects: AtomicUsize,
}

impl Default for SignInRedirector {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }
}

impl SignInRedirector {
    pub fn new(session_storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            session_storage,
            sign_in_path: SIGN_IN_PATH.to_string(),
            location: RwLock::new(None),
            redirects: AtomicUsize::new(0),
        }
    }

    pub fn with_sign_in_path(mut self, path: impl Into<String>) -> Self {
        self.sign_in_path = path.into();
        self
    }

    pub fn sign_in_path(&self) -> &str {
        &self.sign_in_path
    }

    /// Record the location the application is currently showing
    pub fn set_location(&self, path: impl Into<String>) {
        *self.location.write().unwrap_or_else(PoisonError::into_inner) = Some(path.into());
    }

    pub fn location(&self) -> Option<String> {
        self.location
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of forced sign-in redirects performed so far
    pub fn redirect_count(&self) -> usize {
        self.redirects.load(Ordering::SeqCst)
    }

    /// Peek at the saved destination without clearing it
    pub fn intended_destination(&self) -> Option<String> {
        match self.session_storage.get(INTENDED_DESTINATION_KEY) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Failed to read intended destination");
                None
            }
        }
    }

    /// Save an explicit destination, e.g. from a route guard
    pub fn set_intended_destination(&self, path: &str) {
        if is_entry_path(path, &self.sign_in_path) {
            return;
        }
        if let Err(e) = self.session_storage.set(INTENDED_DESTINATION_KEY, path) {
            warn!(error = %e, "Failed to save intended destination");
        }
    }
}

impl Navigator for SignInRedirector {
    fn redirect_to_sign_in(&self) {
        if let Some(current) = self.location() {
            self.set_intended_destination(&current);
        }
        self.redirects.fetch_add(1, Ordering::SeqCst);
        *self.location.write().unwrap_or_else(PoisonError::into_inner) =
            Some(self.sign_in_path.clone());
        warn!(sign_in = %self.sign_in_path, "Credentials cleared, redirecting to sign-in");
    }

    fn take_intended_destination(&self) -> Option<String> {
        let destination = self.intended_destination()?;
        if let Err(e) = self.session_storage.remove(INTENDED_DESTINATION_KEY) {
            debug!(error = %e, "Failed to clear intended destination");
        }
        if is_entry_path(&destination, &self.sign_in_path) {
            None
        } else {
            Some(destination)
        }
    }
}
