//! Process assembly: configuration, validation, and the `Registry` that
//! wires the node store, mesh coordinator, optional Redis accelerator, and
//! sync handler together for one running server (spec.md §9).

pub mod config;
pub mod config_validate;
pub mod http;
pub mod rate_limit;
pub mod registry;

pub use config::Config;
pub use config_validate::{validate_config, ConfigValidationErrors};
pub use registry::{Registry, RegistryError};
