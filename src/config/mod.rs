//! Configuration module for camb-pipes
//!
//! This module handles two kinds of configuration:
//! - The executable's parameters: default set, parsing, merging, and
//!   the parameter-file text format ([`params`], [`defaults`])
//! - How runs are supervised: deadlines, pipe location ([`settings`])
//!
//! # Example
//!
//! ```ignore
//! use camb_pipes::config::{ConfigStore, DefaultsSource};
//! use camb_pipes::ParameterSet;
//!
//! let store = ConfigStore::load(&DefaultsSource::Embedded)?;
//! let params = store.merge(&ParameterSet::from([("get_scalar_cls", "T")]));
//! ```

pub mod defaults;
pub mod params;
pub mod settings;

pub use defaults::{DefaultsSource, EMBEDDED_DEFAULTS};
pub use params::{merge, parse_params, to_param_file, validate_params, ConfigStore, END_SENTINEL};
pub use settings::{settings_path, RunnerSettings};
