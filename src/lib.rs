// Skylink: a Skype client library
pub mod credentials;
pub mod models;
pub mod skype;

// Re-export main types for convenience
pub use models::*;
pub use skype::{ClientConfig, SkypeClient, SkypeError, SkypeResult};
