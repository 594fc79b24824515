//! REST API client module for the bottleplug backend.
//!
//! This module provides the `ApiClient` for communicating with the
//! storefront/dashboard API, plus typed wrappers for its endpoints.
//!
//! Requests carry a bearer token chosen from the identity provider, the
//! stored backend access token or the anonymous token. A 401 is recovered
//! with a single refresh-token exchange before the session is torn down.

pub mod client;
pub mod endpoints;
pub mod error;

pub use client::{ApiClient, ApiClientBuilder, ApiRequest, ApiResponse, FormPart, RequestBody};
pub use endpoints::ImageUpload;
pub use error::ApiError;
