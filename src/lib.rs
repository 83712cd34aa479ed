//! # camb-pipes: run a file-driven solver without touching disk
//!
//! Wraps an external executable that reads one `key = value` parameter
//! file and writes a variable set of numeric text tables. Every one of
//! those files is replaced by a named pipe (FIFO), so the parameters and
//! the outputs only ever live in memory.
//!
//! ## Architecture
//!
//! - **Config**: default parameters, override merging, the parameter-file
//!   format, and runner settings
//! - **Backend**: output planning, FIFO lifecycle, writer/reader threads,
//!   child process supervision, and the orchestrator tying them together
//! - **Analysis**: decoding output tables and finite-difference derivatives
//!
//! ## Example
//!
//! ```ignore
//! use camb_pipes::{CambRunner, ParameterSet};
//!
//! let camb = CambRunner::configure("/opt/camb/camb", None)?;
//! let result = camb.invoke(&ParameterSet::from([("get_scalar_cls", "T")]))?;
//! let cls = result.get("scalar").expect("scalar output");
//!
//! let d = camb.derivative("ombh2", &ParameterSet::from([("get_scalar_cls", "T")]), 0.001)?;
//! ```

pub mod analysis;
pub mod backend;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use analysis::{DecodeError, DerivativeResult};
pub use backend::{PipeOrchestrator, ProcessLauncher, SystemLauncher};
pub use config::{ConfigStore, DefaultsSource, RunnerSettings};
pub use error::{CambError, Result};
pub use types::{ChannelWarning, ParameterSet, RunResult, Table};

use std::path::Path;

/// A configured executable: defaults plus an orchestrator
#[derive(Debug)]
pub struct CambRunner<L = SystemLauncher> {
    store: ConfigStore,
    orchestrator: PipeOrchestrator<L>,
}

impl CambRunner<SystemLauncher> {
    /// Prepare `executable` with the given defaults (embedded defaults if `None`)
    pub fn configure(executable: impl AsRef<Path>, defaults: Option<DefaultsSource>) -> Result<Self> {
        Self::configure_with(executable, defaults, RunnerSettings::default())
    }

    /// Like [`CambRunner::configure`] with explicit runner settings
    pub fn configure_with(
        executable: impl AsRef<Path>,
        defaults: Option<DefaultsSource>,
        settings: RunnerSettings,
    ) -> Result<Self> {
        let store = ConfigStore::load(&defaults.unwrap_or_default())?;
        let orchestrator = PipeOrchestrator::new(executable, settings)?;
        Ok(Self::from_parts(store, orchestrator))
    }
}

impl<L: ProcessLauncher> CambRunner<L> {
    pub fn from_parts(store: ConfigStore, orchestrator: PipeOrchestrator<L>) -> Self {
        Self {
            store,
            orchestrator,
        }
    }

    pub fn defaults(&self) -> &ParameterSet {
        self.store.defaults()
    }

    pub fn orchestrator(&self) -> &PipeOrchestrator<L> {
        &self.orchestrator
    }

    /// Run once with `overrides` merged over the defaults
    pub fn invoke(&self, overrides: &ParameterSet) -> Result<RunResult> {
        let params = self.store.merge(overrides);
        self.orchestrator.run(&params)
    }

    /// Centered finite difference of every output with respect to `key`
    ///
    /// `key` may come from the defaults or from `overrides`.
    pub fn derivative(&self, key: &str, overrides: &ParameterSet, step: f64) -> Result<DerivativeResult> {
        let params = self.store.merge(overrides);
        analysis::derivative::derivative(key, &params, step, |p| self.orchestrator.run(p))
    }
}

/// Prepare an executable; see [`CambRunner::configure`]
pub fn configure(executable: impl AsRef<Path>, defaults: Option<DefaultsSource>) -> Result<CambRunner> {
    CambRunner::configure(executable, defaults)
}
