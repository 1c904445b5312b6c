//! Discord OAuth2 authorization code flow.
pub mod authorize;
pub mod callback;
