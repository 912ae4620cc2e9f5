use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    config::{BuildError, Config},
    filter::MetricFilter,
    snapshot::Snapshot,
    sockets::{self, SocketError},
    stats::{self, StatsError, StatsSource},
    util::panic_message,
};

/// Errors that could occur during a single tick.
///
/// A failed tick is logged and skipped; the next tick runs as scheduled.
#[derive(Debug, Error)]
pub enum CycleError {
    /// Sampling the host's statistics failed.
    #[error(transparent)]
    Stats(#[from] StatsError),

    /// Reading the backlog of the host's listening sockets failed.
    #[error(transparent)]
    Sockets(#[from] SocketError),
}

impl CycleError {
    /// Returns a short, stable identifier for the kind of error.
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Stats(e) => e.kind(),
            CycleError::Sockets(e) => e.kind(),
        }
    }
}

/// Lifecycle of a publisher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerState {
    /// Started, but the background thread has not picked up the schedule yet.
    Idle,

    /// Started, waiting out the initial delay.
    Delayed,

    /// Publishing on every tick.
    Running,

    /// Never started because publishing is disabled, or shut down.
    Stopped,
}

impl RunnerState {
    const fn as_u8(self) -> u8 {
        match self {
            RunnerState::Idle => 0,
            RunnerState::Delayed => 1,
            RunnerState::Running => 2,
            RunnerState::Stopped => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => RunnerState::Idle,
            1 => RunnerState::Delayed,
            2 => RunnerState::Running,
            _ => RunnerState::Stopped,
        }
    }
}

#[derive(Debug)]
struct SharedState(AtomicU8);

impl SharedState {
    fn new(state: RunnerState) -> Arc<Self> {
        Arc::new(SharedState(AtomicU8::new(state.as_u8())))
    }

    fn get(&self) -> RunnerState {
        RunnerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: RunnerState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

/// Samples a host's statistics on a fixed cadence and publishes them to every configured target.
///
/// Each tick runs the same pipeline: sample the host, normalize the statistics into a [`Snapshot`], merge in the
/// socket backlog when socket telemetry is enabled, apply the metric filter, then dispatch to every target in
/// registration order. Ticks never overlap: the next tick is scheduled `frequency` after the previous one finished.
///
/// A tick that fails, whether the host could not be sampled or something panicked, is logged and skipped. Nothing
/// that happens during a tick stops the publisher.
pub struct Publisher {
    config: Config,
    source: Box<dyn StatsSource>,
    socket_telemetry: bool,
}

impl Publisher {
    /// Creates a publisher for the given host.
    pub fn new<S>(config: Config, source: S) -> Self
    where
        S: StatsSource,
    {
        let socket_telemetry = config.socket_telemetry();
        Publisher { config, source: Box::new(source), socket_telemetry }
    }

    /// Returns the publisher's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs a single tick on the calling thread, returning the snapshot that was dispatched.
    ///
    /// # Errors
    ///
    /// If the host cannot be sampled, or its sockets cannot be read, an error is returned and nothing is dispatched.
    /// Target failures are not errors here: they are logged by the dispatcher.
    pub fn tick(&mut self) -> Result<Snapshot, CycleError> {
        debug!(plugin = "telemetry", "publish");

        let raw = self.source.stats()?;
        let mut snapshot = stats::normalize_with(&raw, self.config.metric_filter().requested());

        if self.socket_telemetry && wants_socket_backlog(self.config.metric_filter()) {
            let listeners = self.source.listeners();
            match sockets::collect(&listeners, self.config.backlog_parser()) {
                Ok(backlog) => snapshot.merge(backlog),
                Err(e) if e.is_unsupported() => {
                    warn!(plugin = "telemetry", err = e.kind(), msg = %e, "Socket telemetry unavailable, disabling.");
                    self.socket_telemetry = false;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let snapshot = self.config.metric_filter().apply(snapshot);
        self.config.dispatcher().dispatch(&snapshot);
        Ok(snapshot)
    }

    fn tick_logged(&mut self) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.tick())) {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!(plugin = "telemetry", err = e.kind(), msg = %e, "Telemetry tick failed."),
            Err(payload) => error!(
                plugin = "telemetry",
                err = "panic",
                msg = panic_message(&*payload),
                "Telemetry tick panicked."
            ),
        }
    }

    /// Starts publishing on a dedicated background thread.
    ///
    /// When publishing is disabled, nothing is started and the returned handle is already
    /// [`Stopped`](RunnerState::Stopped); the host is never sampled.
    ///
    /// # Errors
    ///
    /// If the frequency is zero, or the background thread cannot be spawned, an error is returned.
    pub fn start(self) -> Result<PublisherHandle, BuildError> {
        if !self.config.enabled() {
            info!(plugin = "telemetry", "disabled, exiting...");
            return Ok(PublisherHandle {
                state: SharedState::new(RunnerState::Stopped),
                shutdown: None,
                thread: None,
            });
        }

        if self.config.frequency().is_zero() {
            return Err(BuildError::ZeroFrequency);
        }

        info!(plugin = "telemetry", "enabled, setting up runner...");

        let state = SharedState::new(RunnerState::Idle);
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let thread_state = Arc::clone(&state);
        let thread = thread::Builder::new()
            .name("server-telemetry-publisher".to_string())
            .spawn(move || self.run(&thread_state, &shutdown_rx))
            .map_err(|_| BuildError::Backend)?;

        Ok(PublisherHandle { state, shutdown: Some(shutdown_tx), thread: Some(thread) })
    }

    fn run(mut self, state: &SharedState, shutdown: &Receiver<()>) {
        state.set(RunnerState::Delayed);
        if !wait(shutdown, self.config.initial_delay()) {
            state.set(RunnerState::Running);
            loop {
                self.tick_logged();

                if wait(shutdown, self.config.frequency()) {
                    break;
                }
            }
        }

        debug!(plugin = "telemetry", "Publisher stopped.");
        state.set(RunnerState::Stopped);
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("config", &self.config)
            .field("socket_telemetry", &self.socket_telemetry)
            .finish_non_exhaustive()
    }
}

// The backlog is merged before filtering, so a filter that drops it makes collection pointless.
fn wants_socket_backlog(filter: &MetricFilter) -> bool {
    filter.requested().map_or(true, |names| names.iter().any(|name| name == sockets::SOCKETS_BACKLOG))
}

/// Sleeps for `duration`, returning `true` early if shutdown was requested.
///
/// Once the handle is dropped without a shutdown, the channel disconnects and this degrades to a plain sleep, so the
/// publisher keeps running until the process exits.
fn wait(shutdown: &Receiver<()>, duration: Duration) -> bool {
    match shutdown.recv_timeout(duration) {
        Ok(()) => true,
        Err(RecvTimeoutError::Timeout) => false,
        Err(RecvTimeoutError::Disconnected) => {
            thread::sleep(duration);
            false
        }
    }
}

/// Handle to a started [`Publisher`].
///
/// Dropping the handle detaches the background thread, which then runs for the rest of the process.
#[derive(Debug)]
pub struct PublisherHandle {
    state: Arc<SharedState>,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl PublisherHandle {
    /// Returns the current state of the publisher.
    pub fn state(&self) -> RunnerState {
        self.state.get()
    }

    /// Stops the publisher, waiting for an in-flight tick to finish.
    ///
    /// A publisher waiting out its initial delay or its frequency is woken up immediately.
    pub fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // The thread only exits after a shutdown request, so the channel is still connected.
            let _ = shutdown.send(());
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(plugin = "telemetry", "Publisher thread panicked.");
            }
        }

        self.state.set(RunnerState::Stopped);
    }
}
