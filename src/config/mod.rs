//! Configuration module for Heron.
//!
//! Loads named dataset bindings from TOML, with environment variable
//! expansion, and turns them into `ExternalValue`s.

mod settings;

pub use settings::{expand_env_vars, DatasetSettings, Settings, SettingsError};
