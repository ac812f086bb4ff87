//! Core library for the alumni directory client.
//!
//! - [`api`]: HTTP client with credential attachment and silent
//!   refresh-and-retry, plus the directory endpoints
//! - [`auth`]: credential storage, auth service, session state, route guard
//! - [`config`]: on-disk configuration and environment overrides
//! - [`models`]: wire types

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, UserService};
pub use auth::{AuthService, RouteGuard, SessionState};
pub use config::{AuthMode, Config, StoreBackend};
