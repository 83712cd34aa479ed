//! Pipe worker threads
//!
//! One writer thread feeds the parameter file into its pipe and one reader
//! thread per output pipe drains and decodes a table. Opening a FIFO is the
//! only place these threads block: an open waits until the executable opens
//! the other end, possibly forever.
//!
//! # Coordination
//!
//! All threads report to the orchestrator over a single crossbeam channel
//! of [`TaskEvent`]s:
//!
//! - `Ready` is sent by a reader immediately before its blocking open, so
//!   the orchestrator can hold the executable back until every reader is
//!   waiting.
//! - `ReaderDone` / `WriterDone` carry each thread's outcome.
//!
//! A thread stuck in `open` is released by [`Channel::poke`]: the
//! orchestrator briefly opens the executable's end of that pipe itself.
//! Each pipe has a small state machine (waiting, opened, released) so the
//! orchestrator only pokes pipes the executable never touched, and so a
//! reader can tell a released pipe from a genuinely empty output.

use crate::analysis::{decode, DecodeError};
use crate::backend::channel::Channel;
use crate::error::{CambError, Result};
use crate::types::Table;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How long shutdown keeps poking stuck threads before giving up on them
pub const ABORT_LIMIT: Duration = Duration::from_secs(2);

const WAITING: u8 = 0;
const OPENED: u8 = 1;
const RELEASED: u8 = 2;

/// Shared open-state of one pipe end
#[derive(Debug)]
struct PipeState(AtomicU8);

impl PipeState {
    fn new() -> Self {
        Self(AtomicU8::new(WAITING))
    }

    /// Called by the thread after its open returned; false if it was released
    fn mark_opened(&self) -> bool {
        self.0
            .compare_exchange(WAITING, OPENED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Called by the orchestrator; true if the pipe is (now) released
    fn claim_release(&self) -> bool {
        match self
            .0
            .compare_exchange(WAITING, RELEASED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == RELEASED,
        }
    }

    fn is_released(&self) -> bool {
        self.0.load(Ordering::Acquire) == RELEASED
    }
}

/// What a reader thread produced
#[derive(Debug)]
pub enum ReadOutcome {
    /// A decoded table (possibly empty)
    Table(Table),
    /// Released by the orchestrator and nothing arrived
    Skipped,
    /// Bytes arrived but did not form a table
    Decode(DecodeError),
    /// Reading failed after the pipe was open
    Io(std::io::Error),
    /// The pipe could not be opened at all
    Open(std::io::Error),
}

/// Final report of a reader thread
#[derive(Debug)]
pub struct ReaderReport {
    pub released: bool,
    pub outcome: ReadOutcome,
}

/// Final report of the writer thread
#[derive(Debug)]
pub struct WriterReport {
    pub released: bool,
    /// Bytes written, or the write error
    pub result: std::io::Result<usize>,
    /// Whether the failure happened while opening the pipe
    pub open_failed: bool,
}

/// Messages from worker threads to the orchestrator
#[derive(Debug)]
pub enum TaskEvent {
    Ready { index: usize },
    ReaderDone { index: usize, report: ReaderReport },
    WriterDone(WriterReport),
}

fn run_reader(index: usize, path: PathBuf, state: Arc<PipeState>, events: Sender<TaskEvent>) {
    let _ = events.send(TaskEvent::Ready { index });

    let report = match File::open(&path) {
        Ok(mut file) => {
            let released = !state.mark_opened();
            let mut bytes = Vec::new();
            let outcome = match file.read_to_end(&mut bytes) {
                Err(e) => ReadOutcome::Io(e),
                Ok(_) if released && bytes.is_empty() => ReadOutcome::Skipped,
                Ok(n) => {
                    tracing::trace!("Read {} bytes from {:?}", n, path);
                    match decode(&bytes) {
                        Ok(table) => ReadOutcome::Table(table),
                        Err(e) => ReadOutcome::Decode(e),
                    }
                }
            };
            ReaderReport { released, outcome }
        }
        Err(e) => ReaderReport {
            released: state.is_released(),
            outcome: ReadOutcome::Open(e),
        },
    };

    let _ = events.send(TaskEvent::ReaderDone { index, report });
}

fn run_writer(path: PathBuf, text: String, state: Arc<PipeState>, events: Sender<TaskEvent>) {
    let report = match OpenOptions::new().write(true).open(&path) {
        Ok(mut file) => {
            let released = !state.mark_opened();
            let result = file.write_all(text.as_bytes()).map(|()| text.len());
            WriterReport {
                released,
                result,
                open_failed: false,
            }
        }
        Err(e) => WriterReport {
            released: state.is_released(),
            result: Err(e),
            open_failed: true,
        },
    };

    let _ = events.send(TaskEvent::WriterDone(report));
}

/// A spawned pipe thread and what it reported
struct Task<R> {
    name: String,
    channel_path: PathBuf,
    state: Arc<PipeState>,
    handle: Option<JoinHandle<()>>,
    report: Option<R>,
}

impl<R> Task<R> {
    fn new(channel: &Channel, handle: JoinHandle<()>, state: Arc<PipeState>) -> Self {
        Self {
            name: channel.name().to_string(),
            channel_path: channel.path().to_path_buf(),
            state,
            handle: Some(handle),
            report: None,
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Pipe thread for {} panicked", self.name);
            }
        }
    }
}

/// The writer and reader threads of one run
///
/// Dropping the group releases any thread still blocked in `open` and joins
/// every thread that finished. Threads that cannot be released within
/// [`ABORT_LIMIT`] are left detached.
pub struct TaskGroup<'a> {
    events_tx: Sender<TaskEvent>,
    events_rx: Receiver<TaskEvent>,
    channels: Vec<&'a Channel>,
    param: Option<&'a Channel>,
    writer: Option<Task<WriterReport>>,
    readers: Vec<Task<ReaderReport>>,
    ready: usize,
    poll: Duration,
}

impl<'a> TaskGroup<'a> {
    pub fn new(poll: Duration) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            events_tx,
            events_rx,
            channels: Vec::new(),
            param: None,
            writer: None,
            readers: Vec::new(),
            ready: 0,
            poll,
        }
    }

    /// Start the thread writing `text` into the parameter pipe
    pub fn spawn_writer(&mut self, channel: &'a Channel, text: String) -> Result<()> {
        let state = Arc::new(PipeState::new());
        let path = channel.path().to_path_buf();
        let events = self.events_tx.clone();
        let thread_state = state.clone();

        let handle = std::thread::Builder::new()
            .name("camb-param-writer".to_string())
            .spawn(move || run_writer(path, text, thread_state, events))?;

        self.param = Some(channel);
        self.writer = Some(Task::new(channel, handle, state));
        Ok(())
    }

    /// Start a reader thread for an output pipe
    pub fn spawn_reader(&mut self, channel: &'a Channel) -> Result<()> {
        let index = self.readers.len();
        let state = Arc::new(PipeState::new());
        let path = channel.path().to_path_buf();
        let events = self.events_tx.clone();
        let thread_state = state.clone();

        let handle = std::thread::Builder::new()
            .name(format!("camb-reader-{}", channel.name()))
            .spawn(move || run_reader(index, path, thread_state, events))?;

        self.channels.push(channel);
        self.readers.push(Task::new(channel, handle, state));
        Ok(())
    }

    fn writer_done(&self) -> bool {
        self.writer.as_ref().map_or(true, |w| w.report.is_some())
    }

    fn readers_done(&self) -> bool {
        self.readers.iter().all(|r| r.report.is_some())
    }

    /// Record one event; fatal pipe failures become errors
    fn dispatch(&mut self, event: TaskEvent) -> Result<()> {
        match event {
            TaskEvent::Ready { index } => {
                tracing::trace!("Reader {} waiting in open", self.readers[index].name);
                self.ready += 1;
            }
            TaskEvent::ReaderDone { index, report } => {
                let task = &mut self.readers[index];
                tracing::debug!("Reader {} finished (released: {})", task.name, report.released);
                let fatal = match &report.outcome {
                    ReadOutcome::Open(e) => Some(CambError::channel(
                        &task.channel_path,
                        std::io::Error::new(e.kind(), e.to_string()),
                    )),
                    _ => None,
                };
                task.report = Some(report);
                task.join();
                if let Some(err) = fatal {
                    return Err(err);
                }
            }
            TaskEvent::WriterDone(report) => {
                let Some(task) = self.writer.as_mut() else {
                    return Ok(());
                };
                tracing::debug!("Parameter writer finished (released: {})", report.released);
                let fatal = match (&report.result, report.open_failed && !report.released) {
                    (Err(e), true) => Some(CambError::channel(
                        &task.channel_path,
                        std::io::Error::new(e.kind(), e.to_string()),
                    )),
                    _ => None,
                };
                task.report = Some(report);
                task.join();
                if let Some(err) = fatal {
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Wait for the next event until `until`; `Ok(false)` on timeout
    fn next_event(&mut self, until: Option<Instant>) -> Result<bool> {
        let event = match until {
            Some(until) => match self.events_rx.recv_deadline(until) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => return Ok(false),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CambError::Timeout("pipe threads stopped reporting".to_string()))
                }
            },
            // The group holds a sender, so this only returns with an event
            None => self
                .events_rx
                .recv()
                .map_err(|_| CambError::Timeout("pipe threads stopped reporting".to_string()))?,
        };
        self.dispatch(event)?;
        Ok(true)
    }

    /// Readiness barrier: block until every reader is about to open its pipe
    pub fn wait_ready(&mut self, deadline: Option<Instant>) -> Result<()> {
        while self.ready < self.readers.len() {
            if !self.next_event(deadline)? {
                return Err(CambError::Timeout(format!(
                    "{} of {} readers became ready",
                    self.ready,
                    self.readers.len()
                )));
            }
        }
        tracing::debug!("All {} readers ready", self.readers.len());
        Ok(())
    }

    /// Poke every released thread still waiting, returns how many were woken
    fn poke_released(&self) -> usize {
        let mut woken = 0;
        let targets = self
            .readers
            .iter()
            .zip(&self.channels)
            .filter(|(task, _)| task.report.is_none() && task.state.is_released())
            .map(|(_, channel)| *channel)
            .chain(
                self.writer
                    .as_ref()
                    .filter(|w| w.report.is_none() && w.state.is_released())
                    .and(self.param),
            );

        for channel in targets {
            match channel.poke() {
                Ok(true) => woken += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to poke {:?}: {}", channel.path(), e),
            }
        }
        woken
    }

    /// Wait for readers after the executable has exited
    ///
    /// Readers get `grace` to finish on their own. Any reader whose pipe the
    /// executable never opened is then released.
    pub fn settle_readers(&mut self, grace: Duration, deadline: Option<Instant>) -> Result<()> {
        let grace_end = Instant::now() + grace;
        let grace_end = deadline.map_or(grace_end, |d| d.min(grace_end));
        while !self.readers_done() {
            if !self.next_event(Some(grace_end))? {
                break;
            }
        }

        for task in self.readers.iter().filter(|t| t.report.is_none()) {
            if task.state.claim_release() {
                tracing::warn!("Output {} was never opened by the executable, releasing", task.name);
            }
        }

        self.drain_until(deadline, |group| group.readers_done(), "output readers")
    }

    /// Wait for the parameter writer, releasing it if the executable never read
    pub fn settle_writer(&mut self, deadline: Option<Instant>) -> Result<()> {
        if let Some(task) = self.writer.as_ref().filter(|w| w.report.is_none()) {
            if task.state.claim_release() {
                tracing::warn!("Executable exited without opening the parameter pipe");
            }
        }
        self.drain_until(deadline, |group| group.writer_done(), "parameter writer")
    }

    /// Poke released pipes and handle events until `done` holds
    fn drain_until(
        &mut self,
        deadline: Option<Instant>,
        done: impl Fn(&Self) -> bool,
        what: &str,
    ) -> Result<()> {
        while !done(self) {
            self.poke_released();
            let mut step = Instant::now() + self.poll;
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(CambError::Timeout(format!("waiting for {}", what)));
                }
                step = step.min(deadline);
            }
            self.next_event(Some(step))?;
        }
        Ok(())
    }

    /// Release every thread still blocked and wait up to `limit` for them
    pub fn release_all(&mut self, limit: Duration) {
        for task in self.readers.iter().filter(|t| t.report.is_none()) {
            task.state.claim_release();
        }
        if let Some(task) = self.writer.as_ref().filter(|w| w.report.is_none()) {
            task.state.claim_release();
        }

        let until = Instant::now() + limit;
        let all_done = |group: &Self| group.readers_done() && group.writer_done();
        loop {
            if let Err(e) = self.drain_until(Some(until), all_done, "pipe threads") {
                match e {
                    CambError::Timeout(_) => {
                        let stuck: Vec<_> = self
                            .readers
                            .iter()
                            .filter(|t| t.report.is_none())
                            .map(|t| t.name.as_str())
                            .collect();
                        tracing::error!("Abandoning stuck pipe threads: {:?}", stuck);
                        return;
                    }
                    // A failure we are already unwinding from; keep draining
                    other => tracing::debug!("Ignoring pipe error during shutdown: {}", other),
                }
                continue;
            }
            return;
        }
    }

    /// Take reader reports in spawn order; `None` for readers that never reported
    pub fn take_reader_reports(&mut self) -> Vec<Option<ReaderReport>> {
        self.readers.iter_mut().map(|t| t.report.take()).collect()
    }

    /// Take the writer report
    pub fn take_writer_report(&mut self) -> Option<WriterReport> {
        self.writer.as_mut().and_then(|w| w.report.take())
    }

    fn all_reported(&self) -> bool {
        self.readers.iter().all(|t| t.report.is_some() || t.handle.is_none())
            && self
                .writer
                .as_ref()
                .map_or(true, |w| w.report.is_some() || w.handle.is_none())
    }
}

impl Drop for TaskGroup<'_> {
    fn drop(&mut self) {
        if !self.all_reported() {
            self.release_all(ABORT_LIMIT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::channel::ChannelSet;
    use crate::backend::plan::OutputPlan;
    use crate::types::ParameterSet;
    use std::io::Read;

    fn channels(parent: &std::path::Path) -> ChannelSet {
        let params = ParameterSet::from([
            ("get_scalar_cls", "T"),
            ("get_vector_cls", "F"),
            ("get_tensor_cls", "T"),
            ("do_lensing", "F"),
            ("get_transfer", "F"),
        ]);
        let plan = OutputPlan::plan(&params, "T").unwrap();
        ChannelSet::create(&plan, Some(parent)).unwrap()
    }

    #[test]
    fn test_state_machine() {
        let state = PipeState::new();
        assert!(state.mark_opened());
        assert!(!state.claim_release());

        let state = PipeState::new();
        assert!(state.claim_release());
        assert!(state.claim_release());
        assert!(!state.mark_opened());
        assert!(state.is_released());
    }

    #[test]
    fn test_readers_and_writer_round_trip() {
        let parent = tempfile::tempdir().unwrap();
        let set = channels(parent.path());
        let mut group = TaskGroup::new(Duration::from_millis(5));
        let deadline = Some(Instant::now() + Duration::from_secs(10));

        group.spawn_writer(set.param(), "a = 1\nEND\n".to_string()).unwrap();
        for channel in set.outputs() {
            group.spawn_reader(channel).unwrap();
        }
        group.wait_ready(deadline).unwrap();

        // Play the executable: read the parameters, write the first output only
        let mut text = String::new();
        File::open(set.param().path()).unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "a = 1\nEND\n");
        std::fs::write(set.outputs()[0].path(), "2 1.5\n3 2.5\n").unwrap();

        group.settle_readers(Duration::from_millis(50), deadline).unwrap();
        group.settle_writer(deadline).unwrap();

        let writer = group.take_writer_report().unwrap();
        assert!(!writer.released);
        assert_eq!(writer.result.unwrap(), 10);

        let reports = group.take_reader_reports();
        let first = reports[0].as_ref().unwrap();
        assert!(!first.released);
        match &first.outcome {
            ReadOutcome::Table(table) => assert_eq!(table.shape(), (2, 2)),
            other => panic!("unexpected outcome {:?}", other),
        }
        let second = reports[1].as_ref().unwrap();
        assert!(second.released);
        assert!(matches!(second.outcome, ReadOutcome::Skipped));
    }

    #[test]
    fn test_drop_releases_blocked_threads() {
        let parent = tempfile::tempdir().unwrap();
        let set = channels(parent.path());
        let started = Instant::now();
        {
            let mut group = TaskGroup::new(Duration::from_millis(5));
            group.spawn_writer(set.param(), "END\n".to_string()).unwrap();
            for channel in set.outputs() {
                group.spawn_reader(channel).unwrap();
            }
            group.wait_ready(Some(Instant::now() + Duration::from_secs(5))).unwrap();
        }
        assert!(started.elapsed() < ABORT_LIMIT);
    }

    #[test]
    fn test_wait_ready_with_no_readers() {
        let mut group = TaskGroup::new(Duration::from_millis(5));
        group.wait_ready(Some(Instant::now())).unwrap();
    }
}
