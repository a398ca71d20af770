//! Execution contexts for the parse pipeline.
//!
//! A [`ParseSession`] hands jobs to a [`ParseBackend`]: the background
//! [`ThreadedBackend`] when it can be started, the [`InlineBackend`]
//! otherwise. Both run [`parse_telemetry`] and report through the same
//! message channel. Every job carries the session generation at the time it
//! was started; messages from older generations are dropped.

use crate::config::TelemetryConfig;
use crate::error::{Error, Result};
use crate::index::TelemetryIndex;
use crate::pipeline::{CancelToken, ParseSummary, Progress, TelemetryFile, parse_telemetry};
use crate::record::TelemetryRecord;
use crate::schema::{self, Schema};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// How often [`ParseSession::wait`] checks that its backend is still alive.
const LIVENESS_INTERVAL: Duration = Duration::from_millis(50);

pub struct ParseJob {
    pub generation: u64,
    pub file: TelemetryFile,
    pub schema: &'static Schema,
    pub options: TelemetryConfig,
    pub video_duration: Option<f64>,
    pub cancel: CancelToken,
}

#[derive(Debug)]
pub enum ParseMessage {
    Progress {
        generation: u64,
        progress: Progress,
    },
    Complete {
        generation: u64,
        summary: ParseSummary,
        index: TelemetryIndex,
    },
    Error {
        generation: u64,
        error: Error,
    },
}

impl ParseMessage {
    pub fn generation(&self) -> u64 {
        match self {
            ParseMessage::Progress { generation, .. }
            | ParseMessage::Complete { generation, .. }
            | ParseMessage::Error { generation, .. } => *generation,
        }
    }
}

pub trait ParseBackend: Send {
    fn name(&self) -> &'static str;

    /// Start `job`, reporting on `events`. A backend that cannot take the job
    /// hands it back.
    #[allow(clippy::result_large_err)]
    fn submit(&self, job: ParseJob, events: Sender<ParseMessage>) -> std::result::Result<(), ParseJob>;

    /// False once the backend can no longer report on accepted jobs.
    fn is_alive(&self) -> bool {
        true
    }
}

/// Runs a job to completion and reports the outcome. The file buffer is
/// dropped before the final message is sent.
pub fn run_job(job: ParseJob, events: &Sender<ParseMessage>) {
    let ParseJob {
        generation,
        file,
        schema,
        options,
        video_duration,
        cancel,
    } = job;

    let result = parse_telemetry(&file, schema, &options, video_duration, &cancel, &mut |progress| {
        let _ = events.send(ParseMessage::Progress { generation, progress });
    });
    drop(file);

    let msg = match result {
        Ok(out) => ParseMessage::Complete {
            generation,
            summary: out.summary,
            index: out.index,
        },
        Err(error) => ParseMessage::Error { generation, error },
    };
    if events.send(msg).is_err() {
        trace!(generation, "session gone, dropping result");
    }
}

/// Runs jobs on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineBackend;

impl ParseBackend for InlineBackend {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn submit(&self, job: ParseJob, events: Sender<ParseMessage>) -> std::result::Result<(), ParseJob> {
        run_job(job, &events);
        Ok(())
    }
}

type Queued = (ParseJob, Sender<ParseMessage>);

/// One long-lived background thread fed through a job queue. Jobs run in
/// submission order; a superseded job stops at its next cancellation check.
pub struct ThreadedBackend {
    jobs: Sender<Queued>,
    handle: JoinHandle<()>,
}

impl ThreadedBackend {
    pub fn spawn() -> Result<Self> {
        let (jobs, queue) = unbounded::<Queued>();
        let handle = thread::Builder::new()
            .name("dashtel-parse".into())
            .spawn(move || {
                for (job, events) in queue {
                    run_job(job, &events);
                }
                debug!("parse worker exiting");
            })
            .map_err(|e| Error::WorkerUnavailable(e.to_string()))?;
        Ok(Self { jobs, handle })
    }
}

impl ParseBackend for ThreadedBackend {
    fn name(&self) -> &'static str {
        "threaded"
    }

    fn submit(&self, job: ParseJob, events: Sender<ParseMessage>) -> std::result::Result<(), ParseJob> {
        self.jobs.send((job, events)).map_err(|e| e.into_inner().0)
    }

    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }
}

#[derive(Debug)]
pub enum SessionEvent {
    Progress(Progress),
    Completed(ParseSummary),
    Failed(Error),
}

/// Owns the currently installed index and routes parse results into it.
pub struct ParseSession {
    backend: Box<dyn ParseBackend>,
    fallback: InlineBackend,
    options: TelemetryConfig,
    generation: AtomicU64,
    cancel: Option<CancelToken>,
    events_tx: Sender<ParseMessage>,
    events_rx: Receiver<ParseMessage>,
    index: Option<Arc<TelemetryIndex>>,
    summary: Option<ParseSummary>,
}

impl ParseSession {
    /// Background backend when `options.use_worker` is set and a worker can be
    /// started, inline otherwise.
    pub fn new(options: TelemetryConfig) -> Self {
        let backend: Box<dyn ParseBackend> = if options.use_worker {
            match ThreadedBackend::spawn() {
                Ok(b) => Box::new(b),
                Err(e) => {
                    warn!(error = %e, "falling back to inline parsing");
                    Box::new(InlineBackend)
                }
            }
        } else {
            Box::new(InlineBackend)
        };
        Self::with_backend(backend, options)
    }

    pub fn with_backend(backend: Box<dyn ParseBackend>, options: TelemetryConfig) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            backend,
            fallback: InlineBackend,
            options,
            generation: AtomicU64::new(0),
            cancel: None,
            events_tx,
            events_rx,
            index: None,
            summary: None,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Start parsing `data`, superseding any parse in flight and discarding
    /// the current index. Requires a loaded schema.
    pub fn load(&mut self, data: Vec<u8>, video_duration: Option<f64>) -> Result<u64> {
        let schema = schema::schema()?;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        if let Some(previous) = self.cancel.take() {
            previous.cancel();
        }
        let cancel = CancelToken::new();
        self.cancel = Some(cancel.clone());
        self.index = None;
        self.summary = None;

        let job = ParseJob {
            generation,
            file: TelemetryFile::new(data),
            schema,
            options: self.options.clone(),
            video_duration,
            cancel,
        };
        debug!(generation, backend = self.backend.name(), "starting parse");
        if let Err(job) = self.backend.submit(job, self.events_tx.clone()) {
            warn!(generation, backend = self.backend.name(), "backend rejected job, parsing inline");
            let _ = self.fallback.submit(job, self.events_tx.clone());
        }
        Ok(generation)
    }

    /// Apply one message. Stale messages yield `None`.
    fn accept(&mut self, msg: ParseMessage) -> Option<SessionEvent> {
        let current = self.generation();
        if msg.generation() != current {
            trace!(stale = msg.generation(), current, "discarding stale parse message");
            return None;
        }
        match msg {
            ParseMessage::Progress { progress, .. } => Some(SessionEvent::Progress(progress)),
            ParseMessage::Complete { summary, index, .. } => {
                self.index = Some(Arc::new(index));
                self.summary = Some(summary.clone());
                self.cancel = None;
                Some(SessionEvent::Completed(summary))
            }
            ParseMessage::Error { error, .. } => {
                self.cancel = None;
                Some(SessionEvent::Failed(error))
            }
        }
    }

    /// Drain pending messages without blocking.
    pub fn poll(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(msg) = self.events_rx.try_recv() {
            if let Some(ev) = self.accept(msg) {
                out.push(ev);
            }
        }
        out
    }

    /// Block until the current parse completes or fails.
    pub fn wait(&mut self) -> Result<ParseSummary> {
        if self.cancel.is_none() {
            // nothing in flight
            return self.summary.clone().ok_or(Error::Cancelled);
        }
        loop {
            let msg = match self.events_rx.recv_timeout(LIVENESS_INTERVAL) {
                Ok(msg) => msg,
                Err(RecvTimeoutError::Timeout) if self.backend.is_alive() => continue,
                // a message may have landed just before the backend went away
                Err(RecvTimeoutError::Timeout) => match self.events_rx.try_recv() {
                    Ok(msg) => msg,
                    Err(_) => return Err(self.backend_lost()),
                },
                Err(RecvTimeoutError::Disconnected) => return Err(self.backend_lost()),
            };
            match self.accept(msg) {
                Some(SessionEvent::Completed(summary)) => return Ok(summary),
                Some(SessionEvent::Failed(e)) => return Err(e),
                _ => {}
            }
        }
    }

    /// The job in flight will never report; leave the session without
    /// telemetry.
    fn backend_lost(&mut self) -> Error {
        warn!(
            generation = self.generation(),
            backend = self.backend.name(),
            "parse backend stopped without reporting"
        );
        self.cancel = None;
        self.index = None;
        self.summary = None;
        Error::WorkerUnavailable(format!("{} backend stopped", self.backend.name()))
    }

    /// Shared handle to the installed index, if a parse has completed.
    pub fn index(&self) -> Option<Arc<TelemetryIndex>> {
        self.index.clone()
    }

    pub fn summary(&self) -> Option<&ParseSummary> {
        self.summary.as_ref()
    }

    pub fn has_telemetry(&self) -> bool {
        self.index.as_ref().is_some_and(|i| i.has_telemetry())
    }

    pub fn telemetry_at(&self, t: f64) -> Option<&TelemetryRecord> {
        self.index.as_deref().and_then(|i| i.telemetry_at(t))
    }

    /// Cancel any parse in flight and drop the installed index.
    pub fn reset(&mut self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(c) = self.cancel.take() {
            c.cancel();
        }
        self.index = None;
        self.summary = None;
    }
}
