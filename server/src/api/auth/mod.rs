//! API key authentication

mod keys;
pub mod middleware;

pub use keys::ApiKeySet;
pub use middleware::require_auth;
