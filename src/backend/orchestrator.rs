//! Pipe orchestrator
//!
//! Runs the executable once with every file it touches replaced by a FIFO.
//!
//! # Run sequence
//!
//! 1. Reject parameters that would not serialize to one line each, plan
//!    the outputs and create one pipe per planned output plus the
//!    parameter pipe; inject the output pipe paths into the parameters.
//! 2. Start the parameter writer and one reader per output pipe.
//! 3. Wait until every reader is about to block in `open` (readiness
//!    barrier), then start the executable with the parameter pipe path.
//! 4. After the executable exits, release readers whose pipe it never
//!    opened, then settle the writer.
//! 5. Unlink every pipe, on success and failure alike.
//!
//! A non-zero exit becomes [`CambError::ProcessFailed`] carrying whatever
//! tables were read.

use crate::backend::channel::ChannelSet;
use crate::backend::plan::{OutputPlan, RESERVED_OUTPUT_KEYS};
use crate::backend::process::{LaunchRequest, ProcessLauncher, SystemLauncher};
use crate::backend::worker::{ReadOutcome, TaskGroup};
use crate::config::{to_param_file, validate_params, RunnerSettings};
use crate::error::{CambError, Result};
use crate::types::{ChannelWarning, ParameterSet, RunResult};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Runs one executable through named pipes
#[derive(Debug)]
pub struct PipeOrchestrator<L = SystemLauncher> {
    executable: PathBuf,
    settings: RunnerSettings,
    launcher: L,
}

impl PipeOrchestrator<SystemLauncher> {
    /// Create an orchestrator for `executable`
    ///
    /// Fails with a config error if the executable does not exist.
    pub fn new(executable: impl AsRef<Path>, settings: RunnerSettings) -> Result<Self> {
        Self::with_launcher(executable, settings, SystemLauncher)
    }
}

impl<L: ProcessLauncher> PipeOrchestrator<L> {
    /// Create an orchestrator using a custom launcher
    pub fn with_launcher(executable: impl AsRef<Path>, settings: RunnerSettings, launcher: L) -> Result<Self> {
        let executable = executable.as_ref();
        let executable = std::fs::canonicalize(executable).map_err(|_| {
            CambError::Config(format!("Couldn't find executable {:?}", executable))
        })?;

        Ok(Self {
            executable,
            settings,
            launcher,
        })
    }

    /// Absolute path of the executable
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Run the executable with a fully merged parameter set
    pub fn run(&self, params: &ParameterSet) -> Result<RunResult> {
        let started = Instant::now();
        let deadline = self.settings.timeout().and_then(|t| started.checked_add(t));

        validate_params(params)?;
        let plan = OutputPlan::plan(params, &self.settings.truthy_token)?;
        let mut channels = ChannelSet::create(&plan, self.settings.fifo_dir.as_deref())?;
        tracing::info!(
            "Running {:?} with outputs {:?}",
            self.executable,
            plan.result_names().collect::<Vec<_>>()
        );

        let outcome = self.run_with_channels(params, &plan, &channels, deadline);
        let cleanup = channels.cleanup();

        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => {
                if let Err(cleanup_err) = cleanup {
                    tracing::error!("Cleanup after failed run also failed: {}", cleanup_err);
                }
                tracing::warn!("Run failed: {}", e);
                return Err(e);
            }
        };
        cleanup?;
        result.elapsed = started.elapsed();

        match result.status {
            Some(status) if !status.success() => {
                tracing::warn!("Executable exited with {}", status);
                Err(CambError::ProcessFailed {
                    status,
                    partial: Box::new(result),
                })
            }
            _ => {
                tracing::info!(
                    "Run finished in {:?} with {} tables",
                    result.elapsed,
                    result.tables.len()
                );
                Ok(result)
            }
        }
    }

    fn run_with_channels(
        &self,
        params: &ParameterSet,
        plan: &OutputPlan,
        channels: &ChannelSet,
        deadline: Option<Instant>,
    ) -> Result<RunResult> {
        let full = inject_paths(params, plan, channels);
        let text = to_param_file(&full);

        // Dropping the group on any early return releases blocked threads
        let mut tasks = TaskGroup::new(self.settings.poll_interval());
        tasks.spawn_writer(channels.param(), text)?;
        for channel in channels.outputs() {
            tasks.spawn_reader(channel)?;
        }
        tasks.wait_ready(deadline)?;

        let request = LaunchRequest {
            program: self.executable.clone(),
            working_dir: self
                .executable
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/")),
            param_file: channels.param().path().to_path_buf(),
            capture_stderr: self.settings.capture_stderr,
            poll_interval: self.settings.poll_interval(),
        };
        let output = self.launcher.run(&request, deadline)?;

        tasks.settle_readers(self.settings.release_grace(), deadline)?;
        tasks.settle_writer(deadline)?;

        let mut result = RunResult {
            stdout: output.stdout,
            stderr: output.stderr,
            status: Some(output.status),
            ..Default::default()
        };

        if let Some(report) = tasks.take_writer_report() {
            match (report.result, report.released) {
                (_, true) => result.warnings.push(ChannelWarning {
                    channel: channels.param().name().to_string(),
                    message: "executable never read its parameters".to_string(),
                }),
                (Ok(n), false) => tracing::debug!("Wrote {} bytes of parameters", n),
                (Err(e), false) => {
                    tracing::warn!("Parameter write failed: {}", e);
                    result.warnings.push(ChannelWarning {
                        channel: channels.param().name().to_string(),
                        message: format!("parameter write failed: {}", e),
                    });
                }
            }
        }

        for (channel, report) in channels.outputs().iter().zip(tasks.take_reader_reports()) {
            let Some(report) = report else {
                continue;
            };
            let name = channel.name().to_string();
            if report.released {
                result.released.push(name.clone());
            }

            let message = match report.outcome {
                ReadOutcome::Table(table) => {
                    tracing::debug!("Output {} decoded as {:?}", name, table.shape());
                    result.tables.insert(name, table);
                    continue;
                }
                ReadOutcome::Skipped => continue,
                ReadOutcome::Decode(e) => e.to_string(),
                ReadOutcome::Io(e) | ReadOutcome::Open(e) => e.to_string(),
            };
            tracing::warn!("Dropping output {}: {}", name, message);
            result.warnings.push(ChannelWarning {
                channel: name,
                message,
            });
        }

        Ok(result)
    }
}

/// Point planned output keys at their pipes and blank the other output keys
fn inject_paths(params: &ParameterSet, plan: &OutputPlan, channels: &ChannelSet) -> ParameterSet {
    let mut full = params.clone();
    for key in RESERVED_OUTPUT_KEYS {
        full.insert(key, "");
    }
    for (planned, channel) in plan.channels().iter().zip(channels.outputs()) {
        full.insert(planned.param_key, channel.path().to_string_lossy().into_owned());
    }
    full
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::process::{MockProcessLauncher, ProcessOutput};
    use crate::config::parse_params;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::time::Duration;
    use tempfile::{NamedTempFile, TempDir};

    struct Fixture {
        executable: NamedTempFile,
        fifo_parent: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                executable: NamedTempFile::new().unwrap(),
                fifo_parent: tempfile::tempdir().unwrap(),
            }
        }

        fn orchestrator(&self, launcher: MockProcessLauncher) -> PipeOrchestrator<MockProcessLauncher> {
            let settings = RunnerSettings::new()
                .with_fifo_dir(self.fifo_parent.path())
                .with_timeout(Duration::from_secs(20));
            PipeOrchestrator::with_launcher(self.executable.path(), settings, launcher).unwrap()
        }

        fn leftover_pipes(&self) -> usize {
            std::fs::read_dir(self.fifo_parent.path()).unwrap().count()
        }
    }

    fn params(scalar: bool, lensing: bool) -> ParameterSet {
        let flag = |on: bool| if on { "T" } else { "F" };
        ParameterSet::from([
            ("get_scalar_cls", flag(scalar)),
            ("get_vector_cls", "F"),
            ("get_tensor_cls", "F"),
            ("do_lensing", flag(lensing)),
            ("get_transfer", "F"),
            ("hubble", "70"),
        ])
    }

    fn status(code: i32) -> ExitStatus {
        ExitStatus::from_raw(code << 8)
    }

    /// Read the parameter pipe like the executable would
    fn read_params(request: &LaunchRequest) -> ParameterSet {
        let text = std::fs::read_to_string(&request.param_file).unwrap();
        assert!(text.ends_with("END\n"));
        parse_params(&text).unwrap()
    }

    #[test]
    fn test_run_collects_written_outputs_and_releases_the_rest() {
        let fixture = Fixture::new();
        let mut launcher = MockProcessLauncher::new();
        launcher.expect_run().times(1).returning(|request, _| {
            let params = read_params(request);
            assert_eq!(params.get("hubble"), Some("70"));
            assert_eq!(params.get("tensor_output_file"), Some(""));
            let scalar = params.get("scalar_output_file").unwrap();
            std::fs::write(scalar, "2 100.0\n3 90.0\n").unwrap();
            Ok(ProcessOutput {
                status: status(0),
                stdout: b"ok\n".to_vec(),
                stderr: Vec::new(),
            })
        });

        let result = fixture.orchestrator(launcher).run(&params(true, true)).unwrap();

        assert_eq!(result.get("scalar").unwrap().shape(), (2, 2));
        assert!(!result.contains("lensed"));
        assert_eq!(result.released, vec!["lensed".to_string()]);
        assert_eq!(result.stdout_lossy(), "ok\n");
        assert!(result.warnings.is_empty());
        assert_eq!(fixture.leftover_pipes(), 0);
    }

    #[test]
    fn test_caller_cannot_choose_output_paths() {
        let fixture = Fixture::new();
        let mut launcher = MockProcessLauncher::new();
        launcher.expect_run().returning(|request, _| {
            let params = read_params(request);
            let path = params.get("scalar_output_file").unwrap();
            assert_ne!(path, "/tmp/mine.dat");
            std::fs::write(path, "").unwrap();
            Ok(ProcessOutput {
                status: status(0),
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        });

        let mut input = params(true, false);
        input.insert("scalar_output_file", "/tmp/mine.dat");
        let result = fixture.orchestrator(launcher).run(&input).unwrap();
        assert!(result.get("scalar").unwrap().is_empty());
    }

    #[test]
    fn test_failed_process_keeps_partial_results() {
        let fixture = Fixture::new();
        let mut launcher = MockProcessLauncher::new();
        launcher.expect_run().returning(|request, _| {
            let params = read_params(request);
            std::fs::write(params.get("scalar_output_file").unwrap(), "2 1.0\n").unwrap();
            Ok(ProcessOutput {
                status: status(3),
                stdout: b"bad parameter\n".to_vec(),
                stderr: Vec::new(),
            })
        });

        let err = fixture.orchestrator(launcher).run(&params(true, false)).unwrap_err();
        match err {
            CambError::ProcessFailed { status, partial } => {
                assert_eq!(status.code(), Some(3));
                assert!(partial.contains("scalar"));
                assert_eq!(partial.stdout_lossy(), "bad parameter\n");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(fixture.leftover_pipes(), 0);
    }

    #[test]
    fn test_launch_timeout_cleans_up() {
        let fixture = Fixture::new();
        let mut launcher = MockProcessLauncher::new();
        launcher
            .expect_run()
            .returning(|_, _| Err(CambError::Timeout("process did not exit".into())));

        let err = fixture.orchestrator(launcher).run(&params(true, true)).unwrap_err();
        assert!(matches!(err, CambError::Timeout(_)));
        assert_eq!(fixture.leftover_pipes(), 0);
    }

    #[test]
    fn test_unread_parameters_are_a_warning() {
        let fixture = Fixture::new();
        let mut launcher = MockProcessLauncher::new();
        launcher.expect_run().returning(|_, _| {
            Ok(ProcessOutput {
                status: status(0),
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        });

        let result = fixture.orchestrator(launcher).run(&params(false, false)).unwrap();
        assert!(result.tables.is_empty());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].channel, "param");
    }

    #[test]
    fn test_garbage_output_is_not_fatal() {
        let fixture = Fixture::new();
        let mut launcher = MockProcessLauncher::new();
        launcher.expect_run().returning(|request, _| {
            let params = read_params(request);
            std::fs::write(params.get("scalar_output_file").unwrap(), "2 1.0\n3\n").unwrap();
            std::fs::write(params.get("lensed_output_file").unwrap(), "2 4.0\n").unwrap();
            Ok(ProcessOutput {
                status: status(0),
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        });

        let result = fixture.orchestrator(launcher).run(&params(true, true)).unwrap();
        assert!(!result.contains("scalar"));
        assert!(result.contains("lensed"));
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].channel, "scalar");
    }

    #[test]
    fn test_missing_switch_creates_nothing() {
        let fixture = Fixture::new();
        let launcher = MockProcessLauncher::new();
        let mut input = params(true, false);
        input.remove("get_transfer");

        let err = fixture.orchestrator(launcher).run(&input).unwrap_err();
        assert!(matches!(err, CambError::Config(_)));
        assert_eq!(fixture.leftover_pipes(), 0);
    }

    #[test]
    fn test_multiline_value_creates_nothing() {
        let fixture = Fixture::new();
        let launcher = MockProcessLauncher::new();
        let mut input = params(true, false);
        input.insert("hubble", "70\nscalar_output_file = /tmp/chosen.dat");

        let err = fixture.orchestrator(launcher).run(&input).unwrap_err();
        assert!(matches!(err, CambError::Config(_)));
        assert_eq!(fixture.leftover_pipes(), 0);
    }

    #[test]
    fn test_missing_executable() {
        let err = PipeOrchestrator::new("/nonexistent/camb", RunnerSettings::default()).unwrap_err();
        assert!(matches!(err, CambError::Config(_)));
    }
}
