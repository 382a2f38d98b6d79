//! Bearer credential lifecycle for authenticated sites.
//!
//! This module provides the [`TokenManager`], which owns the single bearer
//! credential for one site, refreshes it before or upon expiry, and
//! serializes concurrent refreshes so that N callers discovering an
//! expired token at once produce exactly one refresh call.
//!
//! The credential is the only piece of cross-job mutable state in the
//! engine; every read and write goes through the manager's async mutex.

mod token;

pub use token::{AuthConfig, AuthError, TokenManager};
