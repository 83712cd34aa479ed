//! Backend module: running the executable through named pipes
//!
//! All blocking work happens on dedicated threads so that no open of a
//! FIFO can stall the caller forever. Threads report over crossbeam
//! channels to the orchestrator.
//!
//! # Components
//!
//! - [`OutputPlan`] - Which output pipes a parameter set calls for
//! - [`ChannelSet`] - The per-run FIFOs and their guaranteed removal
//! - [`TaskGroup`] - Parameter writer and output reader threads
//! - [`ProcessLauncher`] / [`SystemLauncher`] - Starting and supervising the child
//! - [`PipeOrchestrator`] - Ties the above into one run
//!
//! # Example
//!
//! ```ignore
//! use camb_pipes::backend::PipeOrchestrator;
//! use camb_pipes::config::{ConfigStore, DefaultsSource, RunnerSettings};
//! use camb_pipes::ParameterSet;
//!
//! let store = ConfigStore::load(&DefaultsSource::Embedded)?;
//! let orchestrator = PipeOrchestrator::new("/opt/camb/camb", RunnerSettings::default())?;
//!
//! let params = store.merge(&ParameterSet::from([("get_scalar_cls", "T")]));
//! let result = orchestrator.run(&params)?;
//! println!("{:?}", result.get("scalar").map(|t| t.shape()));
//! ```

pub mod channel;
pub mod orchestrator;
pub mod plan;
pub mod process;
pub mod worker;

pub use channel::{Channel, ChannelSet, Direction};
pub use orchestrator::PipeOrchestrator;
pub use plan::{OutputPlan, PlannedChannel, RESERVED_OUTPUT_KEYS};
pub use process::{LaunchRequest, ProcessLauncher, ProcessOutput, SystemLauncher};
pub use worker::{ReadOutcome, ReaderReport, TaskGroup, WriterReport};
