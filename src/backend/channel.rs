//! Ephemeral named pipes
//!
//! Every run gets a private directory holding one FIFO for the parameter
//! file and one per planned output. [`ChannelSet`] owns them: paths are
//! unlinked exactly once, either by an explicit [`ChannelSet::cleanup`] or
//! when the set is dropped, whichever comes first.

use crate::backend::plan::OutputPlan;
use crate::error::{CambError, Result};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Prefix of per-run pipe directories
pub const RUN_DIR_PREFIX: &str = "camb-pipes-";

/// Which end of the pipe this process uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We write, the executable reads (the parameter file)
    Write,
    /// The executable writes, we read (output tables)
    Read,
}

/// One named pipe
#[derive(Debug)]
pub struct Channel {
    name: String,
    path: PathBuf,
    direction: Direction,
    unlinked: bool,
}

impl Channel {
    fn create(dir: &Path, file_name: &str, name: &str, direction: Direction) -> Result<Self> {
        let path = dir.join(file_name);
        nix::unistd::mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR)
            .map_err(|errno| CambError::channel(&path, errno.into()))?;
        tracing::trace!("Created fifo {:?}", path);

        Ok(Self {
            name: name.to_string(),
            path,
            direction,
            unlinked: false,
        })
    }

    /// Logical name: `param` or the result name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Briefly open the executable's end without blocking, then close it
    ///
    /// This wakes a task stuck opening our end. Returns `Ok(false)` when
    /// there was nobody to wake yet: a non-blocking write open fails with
    /// `ENXIO` until a reader is waiting.
    pub fn poke(&self) -> std::io::Result<bool> {
        let mut options = OpenOptions::new();
        match self.direction {
            Direction::Read => options.write(true),
            Direction::Write => options.read(true),
        };
        options.custom_flags(OFlag::O_NONBLOCK.bits());

        match options.open(&self.path) {
            Ok(_file) => Ok(true),
            Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn unlink(&mut self) -> std::io::Result<()> {
        if self.unlinked {
            return Ok(());
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        self.unlinked = true;
        Ok(())
    }
}

/// All pipes of one run
#[derive(Debug)]
pub struct ChannelSet {
    dir: Option<TempDir>,
    dir_path: PathBuf,
    param: Channel,
    outputs: Vec<Channel>,
}

impl ChannelSet {
    /// Create the parameter pipe and one pipe per planned output
    ///
    /// `parent` defaults to the system temp directory. On failure, pipes
    /// created so far are removed before returning.
    pub fn create(plan: &OutputPlan, parent: Option<&Path>) -> Result<Self> {
        let parent = parent
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        let dir = tempfile::Builder::new()
            .prefix(RUN_DIR_PREFIX)
            .tempdir_in(&parent)
            .map_err(|e| CambError::channel(&parent, e))?;
        let dir_path = dir.path().to_path_buf();

        let param = Channel::create(&dir_path, "param", "param", Direction::Write)?;
        let mut set = Self {
            dir: Some(dir),
            dir_path,
            param,
            outputs: Vec::with_capacity(plan.len()),
        };

        for (index, planned) in plan.channels().iter().enumerate() {
            let file_name = format!("{:02}_{}", index, planned.result_name);
            let channel =
                Channel::create(&set.dir_path, &file_name, planned.result_name, Direction::Read)?;
            set.outputs.push(channel);
        }

        tracing::debug!(
            "Allocated {} pipes in {:?}",
            set.outputs.len() + 1,
            set.dir_path
        );
        Ok(set)
    }

    /// The pipe the parameter file is written to
    pub fn param(&self) -> &Channel {
        &self.param
    }

    /// Output pipes, in plan order
    pub fn outputs(&self) -> &[Channel] {
        &self.outputs
    }

    /// Directory holding this run's pipes
    pub fn dir(&self) -> &Path {
        &self.dir_path
    }

    /// Unlink every pipe and remove the run directory
    ///
    /// Safe to call repeatedly; later calls do nothing. Every path is
    /// attempted even if an earlier one fails; the first error is returned.
    pub fn cleanup(&mut self) -> Result<()> {
        let mut first_error: Option<CambError> = None;

        for channel in self.outputs.iter_mut().chain(std::iter::once(&mut self.param)) {
            if let Err(e) = channel.unlink() {
                tracing::error!("Failed to unlink {:?}: {}", channel.path, e);
                first_error.get_or_insert(CambError::channel(&channel.path, e));
            }
        }

        if first_error.is_none() {
            if let Some(dir) = self.dir.take() {
                if let Err(e) = dir.close() {
                    tracing::error!("Failed to remove {:?}: {}", self.dir_path, e);
                    first_error = Some(CambError::channel(&self.dir_path, e));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Whether every pipe and the run directory are gone
    pub fn is_clean(&self) -> bool {
        self.dir.is_none()
    }
}

impl Drop for ChannelSet {
    fn drop(&mut self) {
        if !self.is_clean() {
            let _ = self.cleanup();
        }
    }
}
