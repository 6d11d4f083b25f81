//! Authentication for the realtime hub.
//!
//! The hub never acquires tokens itself. It reads the current token from a
//! [`TokenSource`] on every connection attempt, validates its structure and
//! expiry locally, and records server-side rejections in a shared
//! [`AuthFailureFlag`] so that every hub in the process stops retrying until
//! a fresh token shows up.

pub mod failure_flag;
pub mod provider;
pub mod token;

pub use failure_flag::AuthFailureFlag;
pub use provider::{ArcTokenSource, RotatingTokenSource, StaticTokenSource, TokenSource};
pub use token::{inspect_token, validate_token, TokenClaims};
