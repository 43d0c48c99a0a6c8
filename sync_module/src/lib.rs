pub mod adapters;
pub mod config;
pub mod driver;
pub mod error;
pub mod google_auth;

mod oauth_flow;

pub use config::SyncConfig;
pub use driver::{Driver, IntentFailure, RunMode, SyncReport};
pub use error::{AuthError, ConfigError, SyncError};
