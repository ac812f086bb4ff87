//! Data models for the alumni directory API.
//!
//! - `User`, `UpdateUser`, `UsersQuery`, `UsersPage`: directory entries and
//!   listing filters
//! - Auth wire types: one response contract per deployment mode
//!   (`BearerAuthResponse`, `CookieAuthResponse`), plus `RegisterProfile`
//!   and per-field validation errors

pub mod auth;
pub mod user;

pub use auth::{
    parse_field_errors, AuthGrant, BearerAuthResponse, CookieAuthResponse, FieldError,
    LoginRequest, LogoutResponse, RefreshRequest, RegisterProfile, UserRef,
};
pub use user::{UpdateUser, User, UsersPage, UsersQuery, DEFAULT_PAGE_SIZE};
