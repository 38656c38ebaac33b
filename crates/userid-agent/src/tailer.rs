//! The tailing orchestrator.
//!
//! One foreground loop drives a small state machine: read the next line of
//! the active log, hand it to the record parser, forward valid events to the
//! aggregator, and fall back to short or long sleeps when the file runs dry
//! or the directory offers no file at all. After ten consecutive empty reads
//! the rotation detector is consulted again. The next state is fully
//! determined by the (state, transition) pair; an unmatched pair is fatal.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace};

use crate::aggregator::EntryAggregator;
use crate::connector::EndpointConnector;
use crate::errors::TailerError;
use crate::periodic::{spawn_periodic, PeriodicTask};
use crate::record::RecordParser;
use crate::watcher::{Rotation, RotationDetector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    TryNewFile,
    TryReadLine,
    LineProc,
    Sleep05,
    Sleep30,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Ok,
    Nok,
    Poll,
    Sleep,
}

/// Consecutive empty reads before the directory is rescanned for rotation.
const POLL_AFTER_EMPTY_READS: u32 = 10;
const READ_BACKOFF: Duration = Duration::from_millis(500);
const RESCAN_BACKOFF: Duration = Duration::from_secs(30);

pub struct TailerConfig {
    pub detector: RotationDetector,
    pub parser: RecordParser,
    pub aggregator: Arc<EntryAggregator>,
    pub primary: Arc<EndpointConnector>,
    pub secondary: Arc<EndpointConnector>,
    /// Period of the aggregator flush timer.
    pub flush_period: Duration,
    /// External stop signal; observing it ends the loop gracefully.
    pub cancel: CancellationToken,
}

pub struct Tailer {
    detector: RotationDetector,
    parser: RecordParser,
    aggregator: Arc<EntryAggregator>,
    primary: Arc<EndpointConnector>,
    secondary: Arc<EndpointConnector>,
    flush_period: Duration,
    cancel: CancellationToken,
    current_file: Option<PathBuf>,
    reader: Option<BufReader<File>>,
    pending_line: String,
    empty_reads: u32,
    read_backoff: Duration,
    rescan_backoff: Duration,
}

impl Tailer {
    pub fn new(config: TailerConfig) -> Self {
        Tailer {
            detector: config.detector,
            parser: config.parser,
            aggregator: config.aggregator,
            primary: config.primary,
            secondary: config.secondary,
            flush_period: config.flush_period,
            cancel: config.cancel,
            current_file: None,
            reader: None,
            pending_line: String::new(),
            empty_reads: 0,
            read_backoff: READ_BACKOFF,
            rescan_backoff: RESCAN_BACKOFF,
        }
    }

    /// Overrides the 500 ms / 30 s backoffs.
    pub fn backoffs(mut self, read: Duration, rescan: Duration) -> Self {
        self.read_backoff = read;
        self.rescan_backoff = rescan;
        self
    }

    /// Runs the tailing loop until the stop signal fires or a fatal
    /// condition is hit. Graceful shutdown runs on every exit path.
    pub async fn run(&mut self) -> Result<(), TailerError> {
        let flush_cancel = self.cancel.child_token();
        let flush_task = spawn_periodic(
            Arc::clone(&self.aggregator) as Arc<dyn PeriodicTask>,
            self.flush_period,
            flush_cancel.clone(),
        );
        let result = self.run_loop().await;
        if let Err(e) = &result {
            error!(error = %e, "tailing loop terminated");
        }
        self.shutdown(flush_cancel, flush_task).await;
        result
    }

    async fn run_loop(&mut self) -> Result<(), TailerError> {
        let mut state = State::Init;
        let mut transition = Transition::Ok;
        while !self.cancel.is_cancelled() {
            (state, transition) = match (state, transition) {
                (State::Init | State::Sleep30, Transition::Ok)
                | (State::Sleep05, Transition::Poll) => {
                    trace!("fsm: try-new-file");
                    (State::TryNewFile, self.try_new_file().await?)
                }
                (State::TryNewFile | State::LineProc | State::Sleep05, Transition::Ok) => {
                    trace!("fsm: try-read-line");
                    (State::TryReadLine, self.try_read_line().await?)
                }
                (State::TryReadLine, Transition::Ok) => {
                    trace!("fsm: line-proc");
                    self.process_line().await;
                    self.empty_reads = 0;
                    (State::LineProc, Transition::Ok)
                }
                (State::TryReadLine, Transition::Nok) => {
                    trace!(tries = self.empty_reads, "fsm: short sleep");
                    self.sleep(self.read_backoff).await;
                    self.empty_reads += 1;
                    let next = if self.empty_reads >= POLL_AFTER_EMPTY_READS {
                        self.empty_reads = 0;
                        Transition::Poll
                    } else {
                        Transition::Ok
                    };
                    (State::Sleep05, next)
                }
                (State::TryNewFile, Transition::Sleep) => {
                    trace!("fsm: long sleep");
                    self.sleep(self.rescan_backoff).await;
                    (State::Sleep30, Transition::Ok)
                }
                (state, transition) => {
                    return Err(TailerError::UnmatchedTransition { state, transition });
                }
            };
        }
        Ok(())
    }

    /// Consults the rotation detector and swaps the file handle when the
    /// active file moved. The old handle is closed before the new one opens.
    async fn try_new_file(&mut self) -> Result<Transition, TailerError> {
        let rotation = self
            .detector
            .detect(self.current_file.as_deref())
            .map_err(TailerError::DirectoryScan)?;
        match rotation {
            Rotation::Rotated { path, start_at_end } => {
                if let (Some(previous), Some(_)) = (&self.current_file, self.reader.take()) {
                    info!(file = %previous.display(), "closing rotated-away log file");
                }
                let file = File::open(&path).await?;
                let mut reader = BufReader::new(file);
                if start_at_end {
                    info!(file = %path.display(), "positioning at the end of the log file");
                    reader.seek(SeekFrom::End(0)).await?;
                }
                info!(file = %path.display(), "opening log file");
                self.current_file = Some(path);
                self.reader = Some(reader);
                Ok(Transition::Ok)
            }
            Rotation::NoChange => Ok(Transition::Ok),
            Rotation::Sleep => Ok(Transition::Sleep),
        }
    }

    /// Attempts to read one line. End of file is the negative transition,
    /// never a blocking wait.
    async fn try_read_line(&mut self) -> Result<Transition, TailerError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(Transition::Nok);
        };
        self.pending_line.clear();
        if reader.read_line(&mut self.pending_line).await? == 0 {
            return Ok(Transition::Nok);
        }
        while self.pending_line.ends_with('\n') || self.pending_line.ends_with('\r') {
            self.pending_line.pop();
        }
        Ok(Transition::Ok)
    }

    async fn process_line(&mut self) {
        match self.parser.parse(&self.pending_line) {
            Some(event) => {
                trace!("valid accounting entry, forwarding to the aggregator");
                self.aggregator.add_entry(event).await;
            }
            None => trace!("ignoring accounting entry read from file"),
        }
    }

    /// Backoff that wakes early when the stop signal fires.
    async fn sleep(&self, period: Duration) {
        tokio::select! {
            () = tokio::time::sleep(period) => {}
            () = self.cancel.cancelled() => {}
        }
    }

    async fn shutdown(&mut self, flush_cancel: CancellationToken, flush_task: JoinHandle<()>) {
        info!("graceful shutdown requested");
        flush_cancel.cancel();
        let _ = flush_task.await;
        self.reader = None;
        for connector in [&self.primary, &self.secondary] {
            if connector.is_ready() {
                connector.shutdown();
            } else {
                connector.give_up();
            }
        }
        info!("graceful shutdown completed");
    }
}
