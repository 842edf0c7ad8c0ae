#![forbid(unsafe_code)]
#![warn(
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! File- and environment-backed worker configuration.
//!
//! Layout: `model.rs` (typed configuration), `defaults.rs` (default values),
//! `validate.rs` (validation and normalisation), `loader.rs` (JSON file plus
//! `FERRY_*` environment overrides).

mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{apply_env_overrides, load_config, load_from_process_env};
pub use model::{
    CostConfig, DriveMappingConfig, LocationConfig, LogFormatSetting, LoggingSettings,
    ProbeConfig, WorkerConfig,
};
pub use validate::{normalize_drive_letters, validate};
