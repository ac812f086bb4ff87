//! REST API client module for the alumni directory.
//!
//! This module provides the `ApiClient` every request goes through, and
//! `UserService` for the directory endpoints.
//!
//! The API authenticates either with bearer access tokens or with httpOnly
//! session cookies, selected by `AuthMode`.

pub mod client;
pub mod error;
pub mod users;

pub use client::{ApiClient, ApiRequest, ClientSettings, RequestAttempt};
pub use error::ApiError;
pub use users::UserService;
