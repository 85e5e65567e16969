//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → DispatchConfig (validated, immutable)
//!     → thresholds handed to breaker/monitor/queue at construction
//!     → preferences.rs (snapshot read once per batch)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of the shared preferences snapshot
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Only preferences hot-reload; thresholds are fixed for the process lifetime

pub mod loader;
pub mod preferences;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use preferences::{PreferenceSource, SharedPreferences};
pub use schema::{
    ArchivePreferences, BackendConfig, BreakerConfig, DispatchConfig, MementoConfig,
    ObservabilityConfig, QueueConfig, RetryConfig, SubmitMethod, TimeMapProvider, TrafficConfig,
};
