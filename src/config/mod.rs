//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)        CLI arguments
//!     → loader.rs (parse & deserialize)
//!     → overrides applied by main
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ConnectionConfig, IdentityConfig, ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig, TargetConfig,
    TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
