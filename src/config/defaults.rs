//! Default parameter sources
//!
//! The embedded default is the stock CAMB parameter file. Callers can swap
//! it for inline text or a file on disk.

use crate::error::{CambError, Result};
use std::path::PathBuf;

/// Stock parameter file used when no other defaults are given
pub const EMBEDDED_DEFAULTS: &str = include_str!("defaults.ini");

/// Where the default parameter set comes from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DefaultsSource {
    /// The built-in [`EMBEDDED_DEFAULTS`]
    #[default]
    Embedded,
    /// Parameter text given directly
    Inline(String),
    /// A parameter file on disk
    Path(PathBuf),
}

impl DefaultsSource {
    /// Treat `input` as a path if such a file exists, otherwise as inline text
    pub fn detect(input: impl Into<String>) -> Self {
        let input = input.into();
        let path = PathBuf::from(&input);
        if !input.contains('\n') && path.is_file() {
            DefaultsSource::Path(path)
        } else {
            DefaultsSource::Inline(input)
        }
    }

    /// Read the source text
    pub fn read(&self) -> Result<String> {
        match self {
            DefaultsSource::Embedded => Ok(EMBEDDED_DEFAULTS.to_string()),
            DefaultsSource::Inline(text) => Ok(text.clone()),
            DefaultsSource::Path(path) => std::fs::read_to_string(path).map_err(|e| {
                CambError::Config(format!("Failed to read defaults {:?}: {}", path, e))
            }),
        }
    }

    /// Short human-readable description for logs and error context
    pub fn describe(&self) -> String {
        match self {
            DefaultsSource::Embedded => "embedded defaults".to_string(),
            DefaultsSource::Inline(_) => "inline defaults".to_string(),
            DefaultsSource::Path(path) => format!("defaults file {:?}", path),
        }
    }
}
