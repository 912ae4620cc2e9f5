//! Periodic publishing of in-process server statistics to pluggable metric targets.
//!
//! A [`Publisher`] samples its host on a fixed cadence, normalizes the raw statistics into a flat [`Snapshot`] of
//! `workers.*`, `queue.*` and, optionally, `sockets.*` metrics, reduces it with a [`MetricFilter`], and hands the
//! result to every configured [`Target`] in turn.
//!
//! # Usage
//!
//! The host implements [`StatsSource`], then a publisher is configured and started once during startup:
//!
//! ```
//! # use std::time::Duration;
//! use server_telemetry::{Config, LogTarget, Publisher, RawStats, StatsError, StatsSource, TargetParams, WorkerStats};
//!
//! struct Host;
//!
//! impl StatsSource for Host {
//!     fn stats(&self) -> Result<RawStats, StatsError> {
//!         Ok(WorkerStats { max_threads: 5, running_threads: 2, pool_capacity: 3, ..Default::default() }.into())
//!     }
//! }
//!
//! let config = Config::default()
//!     .with_enabled(true)
//!     .with_frequency(Duration::from_secs(10))
//!     // Typed targets are built directly...
//!     .add_target(LogTarget::new())
//!     .expect("log target is always valid")
//!     // ...while built-in targets can also be selected by name, with string parameters.
//!     .add_named_target("io", TargetParams::new().with("formatter", "json"))
//!     .expect("valid raw-stream parameters");
//!
//! let handle = Publisher::new(config, Host).start().expect("failed to start publisher");
//!
//! // On host shutdown:
//! handle.shutdown();
//! ```
//!
//! # Targets
//!
//! - `log`: a structured line per tick through `tracing`, or to a writer. See [`LogTarget`].
//! - `raw-stream` (`io`): a formatted line per tick on standard output, or any writer. See [`RawStreamTarget`].
//! - `statsd` (`dogstatsd`): a gauge per metric over UDP or Unix domain sockets. Requires the `statsd` feature.
//! - `metrics-sdk` (`otel`, `open_telemetry`): an OpenTelemetry gauge per metric. Requires the `otel` feature.
//!
//! Anything else can be published to by implementing [`Target`], or from a closure with [`from_fn`].
//!
//! # Failures
//!
//! Publishing is best-effort. A failing or panicking target is logged and skipped without affecting the other
//! targets, and a tick that fails as a whole is logged and skipped without affecting the next one. A target whose
//! consumer has disconnected, as happens to pipes during host shutdown, is skipped silently.
#![deny(clippy::all)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod config;
pub use self::config::{BuildError, Config};

mod dispatcher;
pub use self::dispatcher::Dispatcher;

mod filter;
pub use self::filter::MetricFilter;

mod metadata;
pub use self::metadata::{describe, MetricDescription};

pub mod registry;
pub use self::registry::{BuiltinTarget, TargetConfig, TargetParams};

mod runner;
pub use self::runner::{CycleError, Publisher, PublisherHandle, RunnerState};

mod snapshot;
pub use self::snapshot::{MetricValue, Snapshot};

pub mod sockets;
pub use self::sockets::{SocketDescriptor, SocketError, SocketKind};

pub mod stats;
pub use self::stats::{ClusterStats, RawStats, StatsError, StatsSource, WorkerRecord, WorkerStats};

mod target;
pub use self::target::{from_fn, FnTarget, Target, TargetError};

pub mod targets;
pub use self::targets::{
    io::{Formatter, RawStreamTarget},
    log::LogTarget,
    Transform,
};

#[cfg(feature = "otel")]
#[cfg_attr(docsrs, doc(cfg(feature = "otel")))]
pub use self::targets::otel::{GaugeTarget, GaugeTargetBuilder};

#[cfg(feature = "statsd")]
#[cfg_attr(docsrs, doc(cfg(feature = "statsd")))]
pub use self::targets::statsd::{StatsdBuilder, StatsdTarget};

#[cfg(test)]
mod test_util;
pub(crate) mod util;
