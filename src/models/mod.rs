//! Data Models Module
//!
//! Users, linked identities, tokens, verification codes and the request and
//! response payloads of the HTTP API.

pub mod auth;
pub mod identity;
pub mod oauth;
pub mod requests;
pub mod user;
pub mod verification;

// Re-export commonly used types
pub use auth::*;
pub use identity::*;
pub use requests::*;
pub use user::*;
pub use verification::*;
