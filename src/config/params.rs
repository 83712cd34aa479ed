//! Parameter text handling
//!
//! Parses and writes the flat `key = value` format shared by the default
//! configuration and the parameter file fed to the executable, and merges
//! caller overrides over the defaults.
//!
//! # Format
//!
//! ```text
//! # comment
//! get_scalar_cls = T
//! l_max_scalar   = 2200
//! END
//! ```
//!
//! `key: value` is accepted as well. A line holding only `END` stops
//! parsing, so a serialized parameter file reads back unchanged.

use crate::backend::plan::RESERVED_OUTPUT_KEYS;
use crate::config::defaults::DefaultsSource;
use crate::error::{CambError, Result, ResultExt};
use crate::types::ParameterSet;

/// Terminator line of a parameter file
pub const END_SENTINEL: &str = "END";

/// Parse `key = value` text into a parameter set
pub fn parse_params(text: &str) -> Result<ParameterSet> {
    let mut params = ParameterSet::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line == END_SENTINEL {
            break;
        }

        let split_at = line.find(['=', ':']).ok_or_else(|| CambError::Parse {
            line: index + 1,
            message: format!("expected 'key = value', found {:?}", line),
        })?;
        let key = line[..split_at].trim_end();
        let value = line[split_at + 1..].trim_start();

        if key.is_empty() {
            return Err(CambError::Parse {
                line: index + 1,
                message: "empty key".to_string(),
            });
        }

        if let Some(previous) = params.insert(key, value) {
            tracing::debug!("Parameter {} repeated on line {}, replacing {:?}", key, index + 1, previous);
        }
    }

    Ok(params)
}

/// Right-biased union: every key in `overrides` wins
pub fn merge(defaults: &ParameterSet, overrides: &ParameterSet) -> ParameterSet {
    let mut merged = defaults.clone();
    merged.extend(overrides.iter());
    merged
}

fn check_key(key: &str) -> std::result::Result<(), &'static str> {
    if key.is_empty() {
        Err("empty key")
    } else if key.trim() != key {
        Err("key has surrounding whitespace")
    } else if key.contains(['\n', '\r']) {
        Err("key contains a line break")
    } else if key.contains(['=', ':']) {
        Err("key contains a separator")
    } else if key.starts_with(['#', ';']) {
        Err("key starts a comment")
    } else if key == END_SENTINEL {
        Err("key is the END terminator")
    } else {
        Ok(())
    }
}

/// Check that every entry serializes to exactly one line that parses back
/// to the same key
pub fn validate_params(params: &ParameterSet) -> Result<()> {
    for (key, value) in params.iter() {
        check_key(key).map_err(|reason| {
            CambError::Config(format!("invalid parameter key {:?}: {}", key, reason))
        })?;
        if value.contains(['\n', '\r']) {
            return Err(CambError::Config(format!(
                "value of parameter {} contains a line break",
                key
            )));
        }
    }
    Ok(())
}

/// Serialize to parameter-file text: one `key = value` line per entry,
/// then `END` and a trailing newline
///
/// Entries are written verbatim; run [`validate_params`] first on
/// anything that did not come out of [`parse_params`].
pub fn to_param_file(params: &ParameterSet) -> String {
    let mut out = String::new();
    for (key, value) in params.iter() {
        out.push_str(key);
        out.push_str(" = ");
        out.push_str(value);
        out.push('\n');
    }
    out.push_str(END_SENTINEL);
    out.push('\n');
    out
}

/// Holds the default parameter set and builds per-run parameter sets
#[derive(Debug, Clone)]
pub struct ConfigStore {
    defaults: ParameterSet,
}

impl ConfigStore {
    /// Load defaults from a source
    pub fn load(source: &DefaultsSource) -> Result<Self> {
        let text = source.read()?;
        let defaults = parse_params(&text).context(source.describe())?;
        tracing::debug!("Loaded {} default parameters from {}", defaults.len(), source.describe());
        Ok(Self { defaults })
    }

    /// Wrap an already-parsed default set
    pub fn from_params(defaults: ParameterSet) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &ParameterSet {
        &self.defaults
    }

    /// Merge caller overrides over the defaults
    ///
    /// Output-path keys are removed from the result whichever side they came
    /// from; the orchestrator alone decides where outputs go.
    pub fn merge(&self, overrides: &ParameterSet) -> ParameterSet {
        let mut merged = merge(&self.defaults, overrides);
        for key in RESERVED_OUTPUT_KEYS {
            if overrides.contains_key(key) {
                tracing::warn!("Ignoring caller-supplied output key {}", key);
            }
            merged.remove(key);
        }
        merged
    }
}
