#![forbid(unsafe_code)]

//! Configuration loading and validation for OmniCloud hub and site servers.
//!
//! Settings come from a key=value file (default `/etc/omnicloud/auth.config`)
//! with uppercased environment variables taking precedence over file values.

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{DEFAULT_CONFIG_PATH, load_settings};
pub use model::{DatabaseSettings, ServerMode, Settings, SiteSettings, TransferLimits};
