//! Authentication module for managing sessions and credentials.
//!
//! This module provides:
//! - `CredentialStore`: durable credential storage (OS keychain, file, memory)
//! - `SessionCookieJar`: persisted cookie jar for session-cookie deployments
//! - `AuthService`: login, refresh, logout, registration
//! - `SessionState`: observable anonymous/authenticating/authenticated state
//! - `RouteGuard`: allow, wait, or redirect protected views

pub mod cookies;
pub mod credentials;
pub mod guard;
pub mod service;
pub mod session;

pub use cookies::SessionCookieJar;
pub use credentials::{
    Credential, CredentialStore, FileStore, KeyringStore, MemoryStore, StoreError,
};
pub use guard::{GuardDecision, RouteGuard, LOGIN_ROUTE};
pub use service::AuthService;
pub use session::{SessionPhase, SessionSnapshot, SessionState};
