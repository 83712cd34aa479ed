//! Shell-script stand-ins for the real executable
//!
//! Each stub receives the parameter pipe as `$1`. The prelude reads it in
//! full and defines `param KEY`, which prints the value of `KEY`.

use super::test_timeout;
use camb_pipes::{CambRunner, DefaultsSource, RunnerSettings};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const PRELUDE: &str = r#"#!/bin/sh
params=$(cat "$1")
param() {
    printf '%s\n' "$params" | grep "^$1 = " | sed "s/^$1 = //"
}
"#;

/// Write `output` to the pipe behind `KEY` if it is set
pub const WRITE_HELPER: &str = r#"
emit() {
    target=$(param "$1")
    if [ -n "$target" ]; then
        printf "$2" > "$target"
    fi
}
"#;

/// A stub executable plus a private pipe directory
pub struct StubCamb {
    bin_dir: TempDir,
    fifo_dir: TempDir,
    executable: PathBuf,
}

impl StubCamb {
    /// Stub whose body runs after the parameters have been read
    pub fn new(body: &str) -> Self {
        Self::from_script(&format!("{}{}{}", PRELUDE, WRITE_HELPER, body))
    }

    /// Stub with a complete script, no prelude
    pub fn from_script(script: &str) -> Self {
        let bin_dir = tempfile::tempdir().unwrap();
        let fifo_dir = tempfile::tempdir().unwrap();
        let executable = bin_dir.path().join("camb");

        std::fs::write(&executable, script).unwrap();
        std::fs::set_permissions(&executable, std::fs::Permissions::from_mode(0o755)).unwrap();

        Self {
            bin_dir,
            fifo_dir,
            executable,
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn settings(&self) -> RunnerSettings {
        RunnerSettings::new()
            .with_fifo_dir(self.fifo_dir.path())
            .with_timeout(test_timeout())
    }

    pub fn runner(&self) -> CambRunner {
        self.runner_with(self.settings())
    }

    pub fn runner_with(&self, settings: RunnerSettings) -> CambRunner {
        CambRunner::configure_with(&self.executable, Some(DefaultsSource::Embedded), settings).unwrap()
    }

    /// Entries left in the pipe directory
    pub fn leftover_pipes(&self) -> usize {
        std::fs::read_dir(self.fifo_dir.path()).unwrap().count()
    }
}
