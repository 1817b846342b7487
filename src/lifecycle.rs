//! Process lifecycle: shutdown token, owned workers with bounded join, and the
//! service that wires capture, annotation and delivery together.
//!
//! States move strictly forward: `Idle -> Running -> Stopping -> Stopped`.

use anyhow::{Context, Result};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::channel::{ChannelStats, FrameChannel};
use crate::config::StreamerConfig;
use crate::detect;
use crate::frame::{EncodedFrame, Frame};
use crate::ingest::CaptureHints;
use crate::pipeline::{AnnotateStage, AnnotateSummary, CaptureStage, CaptureSummary};
use crate::record::Recorder;
use crate::server::StreamServer;

/// Bound on each worker join during shutdown.
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Process-wide stop request. Clones share the flag; once set it stays set.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// How a worker ended up after a bounded join.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinOutcome<T> {
    Joined(T),
    Panicked,
    /// Still running when the bound expired; the thread is left detached.
    Abandoned,
}

impl<T> JoinOutcome<T> {
    pub fn joined(&self) -> Option<&T> {
        match self {
            Self::Joined(value) => Some(value),
            _ => None,
        }
    }
}

/// Named worker thread owned by the service.
pub struct Worker<T> {
    name: &'static str,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> Worker<T> {
    pub fn spawn<F>(name: &'static str, body: F) -> Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(body)
            .with_context(|| format!("failed to spawn {} worker", name))?;
        Ok(Self { name, handle })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait at most `bound` for the worker to finish.
    pub fn join_timeout(self, bound: Duration) -> JoinOutcome<T> {
        let deadline = Instant::now() + bound;
        while !self.handle.is_finished() {
            if Instant::now() >= deadline {
                log::warn!(
                    "{} worker did not stop within {:?}; abandoning it",
                    self.name,
                    bound
                );
                return JoinOutcome::Abandoned;
            }
            std::thread::sleep(JOIN_POLL_INTERVAL);
        }
        match self.handle.join() {
            Ok(value) => JoinOutcome::Joined(value),
            Err(_) => {
                log::error!("{} worker panicked", self.name);
                JoinOutcome::Panicked
            }
        }
    }
}

/// What the service saw by the time it stopped.
#[derive(Clone, Debug)]
pub struct StopReport {
    pub capture: JoinOutcome<CaptureSummary>,
    pub annotate: JoinOutcome<AnnotateSummary>,
    pub raw: ChannelStats,
    pub encoded: ChannelStats,
}

impl StopReport {
    pub fn frames_read(&self) -> u64 {
        self.capture.joined().map_or(0, |s| s.frames_read)
    }

    pub fn frames_annotated(&self) -> u64 {
        self.annotate.joined().map_or(0, |s| s.frames_annotated)
    }
}

/// The running streamer: two pipeline workers plus the HTTP listener.
pub struct StreamService {
    state: LifecycleState,
    shutdown: Shutdown,
    server: StreamServer,
    capture: Worker<CaptureSummary>,
    annotate: Worker<AnnotateSummary>,
    raw: FrameChannel<Frame>,
    encoded: FrameChannel<EncodedFrame>,
}

impl StreamService {
    /// Load the detector, bind the listener and start the pipeline workers.
    ///
    /// Nothing is started if the detector or the listener fails.
    pub fn start(cfg: &StreamerConfig, shutdown: Shutdown) -> Result<Self> {
        log::info!("lifecycle: {}", LifecycleState::Idle);
        let detector = detect::load(&cfg.model)?;

        let raw = FrameChannel::bounded(cfg.channel_capacity);
        let encoded = FrameChannel::bounded(cfg.channel_capacity);
        let server = StreamServer::bind(&cfg.bind_addr(), encoded.clone(), shutdown.clone())?;

        let capture_stage = CaptureStage::new(
            cfg.source.uri.clone(),
            CaptureHints {
                width: cfg.source.width,
                height: cfg.source.height,
            },
            raw.clone(),
            shutdown.clone(),
        );
        let recorder = cfg
            .record
            .path
            .as_ref()
            .map(|path| Recorder::new(path, cfg.record.fps));
        let annotate_stage = AnnotateStage::new(
            detector,
            raw.clone(),
            encoded.clone(),
            shutdown.clone(),
            cfg.annotate.clone(),
            recorder,
        );

        let capture = Worker::spawn("capture", move || capture_stage.run())?;
        let annotate = match Worker::spawn("annotate", move || annotate_stage.run()) {
            Ok(worker) => worker,
            Err(err) => {
                shutdown.trigger();
                capture.join_timeout(WORKER_JOIN_TIMEOUT);
                return Err(err);
            }
        };

        let service = Self {
            state: LifecycleState::Running,
            shutdown,
            server,
            capture,
            annotate,
            raw,
            encoded,
        };
        log::info!("lifecycle: {}", service.state);
        Ok(service)
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Serve clients until shutdown is requested or the listener fails, then
    /// stop the workers. A listener error is returned after cleanup.
    pub fn serve(mut self) -> Result<StopReport> {
        let served = self.server.run();
        if let Err(err) = &served {
            log::error!("stream server failed: {}", err);
        }

        self.shutdown.trigger();
        self.transition(LifecycleState::Stopping);
        let capture = self.capture.join_timeout(WORKER_JOIN_TIMEOUT);
        let annotate = self.annotate.join_timeout(WORKER_JOIN_TIMEOUT);
        let report = StopReport {
            capture,
            annotate,
            raw: self.raw.stats(),
            encoded: self.encoded.stats(),
        };
        self.state = LifecycleState::Stopped;
        log::info!("lifecycle: {}", self.state);
        log::info!(
            "run summary: {} frames read, {} annotated, raw dropped {}, encoded dropped {}",
            report.frames_read(),
            report.frames_annotated(),
            report.raw.dropped,
            report.encoded.dropped
        );

        served.map(|()| report)
    }

    fn transition(&mut self, next: LifecycleState) {
        log::info!("lifecycle: {} -> {}", self.state, next);
        self.state = next;
    }
}
