//! Normalization of raw host statistics into a flat [`Snapshot`].
//!
//! Hosts expose their statistics in one of two shapes: a single process serving requests directly, or a cluster
//! of worker processes reporting to an aggregate. Both are reduced to the same set of `workers.*` and `queue.*`
//! metrics.
use std::sync::Arc;

use serde::{de, Deserialize, Deserializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{sockets::SocketDescriptor, snapshot::Snapshot};

/// Errors that could occur while sampling host statistics.
#[derive(Debug, Error)]
pub enum StatsError {
    /// The host could not produce statistics for this tick.
    #[error("statistics unavailable: {reason}")]
    Unavailable {
        /// Details about why the statistics were unavailable.
        reason: String,
    },

    /// The statistics document could not be parsed.
    #[error("failed to parse statistics: {0}")]
    Parse(#[from] serde_json::Error),
}

impl StatsError {
    /// Returns a short, stable identifier for the kind of error.
    pub fn kind(&self) -> &'static str {
        match self {
            StatsError::Unavailable { .. } => "stats_unavailable",
            StatsError::Parse(_) => "stats_parse",
        }
    }
}

/// The host process whose statistics are published.
///
/// Implementations are called from the publisher's background thread once per tick.
pub trait StatsSource: Send + Sync + 'static {
    /// Samples the current statistics.
    ///
    /// # Errors
    ///
    /// If statistics cannot be produced right now, an error is returned and the tick is skipped.
    fn stats(&self) -> Result<RawStats, StatsError>;

    /// Returns the listening sockets currently bound by the host.
    ///
    /// Only consulted when socket telemetry is enabled. Defaults to no sockets.
    fn listeners(&self) -> Vec<SocketDescriptor<'_>> {
        Vec::new()
    }
}

impl<T> StatsSource for Arc<T>
where
    T: StatsSource + ?Sized,
{
    fn stats(&self) -> Result<RawStats, StatsError> {
        (**self).stats()
    }

    fn listeners(&self) -> Vec<SocketDescriptor<'_>> {
        (**self).listeners()
    }
}

/// Counters reported by a single process, or by one worker's thread pool.
///
/// Absent fields default to zero.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerStats {
    /// Requests waiting for a thread.
    #[serde(deserialize_with = "null_as_zero")]
    pub backlog: u64,

    /// Highest backlog observed since the last sample.
    #[serde(deserialize_with = "null_as_zero")]
    pub backlog_max: u64,

    /// Highest number of requests buffered by the reactor since the last sample.
    #[serde(deserialize_with = "null_as_zero")]
    pub reactor_max: u64,

    /// Number of requests the thread pool can accept right now.
    #[serde(deserialize_with = "null_as_zero")]
    pub pool_capacity: u64,

    /// Lifetime number of requests served.
    #[serde(deserialize_with = "null_as_zero")]
    pub requests_count: u64,

    /// Configured maximum number of threads.
    #[serde(deserialize_with = "null_as_zero")]
    pub max_threads: u64,

    /// Number of threads currently spawned.
    #[serde(alias = "running", deserialize_with = "null_as_zero")]
    pub running_threads: u64,
}

/// One worker process in a clustered host.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(from = "WorkerRecordRepr")]
pub struct WorkerRecord {
    /// Whether the worker has finished booting.
    pub booted: bool,

    /// Number of threads the worker has spawned.
    pub spawned_threads: u64,

    /// Configured maximum number of threads for the worker.
    pub max_threads: u64,

    /// Lifetime number of requests served by the worker.
    pub requests_count: u64,
}

// Workers either report their counters inline, or nested under `last_status`.
#[derive(Default, Deserialize)]
#[serde(default)]
struct WorkerRecordRepr {
    #[serde(alias = "status", deserialize_with = "booted_flag")]
    booted: bool,
    #[serde(alias = "running", deserialize_with = "null_as_zero")]
    spawned_threads: u64,
    #[serde(deserialize_with = "null_as_zero")]
    max_threads: u64,
    #[serde(deserialize_with = "null_as_zero")]
    requests_count: u64,
    last_status: Option<WorkerStats>,
}

impl From<WorkerRecordRepr> for WorkerRecord {
    fn from(repr: WorkerRecordRepr) -> Self {
        match repr.last_status {
            Some(status) => WorkerRecord {
                booted: repr.booted,
                spawned_threads: status.running_threads,
                max_threads: status.max_threads,
                requests_count: status.requests_count,
            },
            None => WorkerRecord {
                booted: repr.booted,
                spawned_threads: repr.spawned_threads,
                max_threads: repr.max_threads,
                requests_count: repr.requests_count,
            },
        }
    }
}

/// Statistics for a clustered host: an aggregate record plus one record per worker.
///
/// The request queue is shared by all workers, so queue counters come from the aggregate and are never summed.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ClusterStats {
    /// Total number of configured workers.
    #[serde(deserialize_with = "null_as_zero")]
    pub workers: u64,

    /// Requests waiting for a thread.
    #[serde(default, deserialize_with = "null_as_zero")]
    pub backlog: u64,

    /// Highest backlog observed since the last sample.
    #[serde(default, deserialize_with = "null_as_zero")]
    pub backlog_max: u64,

    /// Highest number of requests buffered by the reactor since the last sample.
    #[serde(default, deserialize_with = "null_as_zero")]
    pub reactor_max: u64,

    /// Number of requests the cluster can accept right now.
    #[serde(default, deserialize_with = "null_as_zero")]
    pub pool_capacity: u64,

    /// Per-worker records.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub worker_status: Vec<WorkerRecord>,
}

impl ClusterStats {
    /// Creates cluster statistics from worker records, with `workers` set to the number of records.
    pub fn from_workers(worker_status: Vec<WorkerRecord>) -> Self {
        ClusterStats { workers: worker_status.len() as u64, worker_status, ..Default::default() }
    }

    fn sum_by(&self, f: impl Fn(&WorkerRecord) -> u64) -> u64 {
        self.worker_status.iter().map(f).sum()
    }
}

/// Raw statistics as sampled from the host.
///
/// The presence of a `workers` key distinguishes the clustered shape from the single-process shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawStats {
    /// Aggregate plus per-worker records.
    Clustered(ClusterStats),

    /// A single process with a flat set of counters.
    Single(WorkerStats),
}

impl RawStats {
    /// Parses a JSON statistics document.
    ///
    /// # Errors
    ///
    /// If the document is not a JSON object, or a counter has the wrong type, an error is returned. A document
    /// with a `workers` key is always parsed as the clustered shape.
    pub fn from_json(json: &str) -> Result<Self, StatsError> {
        Ok(serde_json::from_str(json)?)
    }

    fn from_object(object: Map<String, Value>) -> Result<Self, serde_json::Error> {
        if object.contains_key("workers") {
            serde_json::from_value(Value::Object(object)).map(RawStats::Clustered)
        } else {
            serde_json::from_value(Value::Object(object)).map(RawStats::Single)
        }
    }

    fn workers_booted(&self) -> u64 {
        match self {
            RawStats::Single(_) => 1,
            RawStats::Clustered(c) => c.worker_status.iter().filter(|w| w.booted).count() as u64,
        }
    }

    fn workers_total(&self) -> u64 {
        match self {
            RawStats::Single(_) => 1,
            RawStats::Clustered(c) => c.workers,
        }
    }

    fn workers_spawned_threads(&self) -> u64 {
        match self {
            RawStats::Single(s) => s.running_threads,
            RawStats::Clustered(c) => c.sum_by(|w| w.spawned_threads),
        }
    }

    fn workers_max_threads(&self) -> u64 {
        match self {
            RawStats::Single(s) => s.max_threads,
            RawStats::Clustered(c) => c.sum_by(|w| w.max_threads),
        }
    }

    fn workers_requests_count(&self) -> u64 {
        match self {
            RawStats::Single(s) => s.requests_count,
            RawStats::Clustered(c) => c.sum_by(|w| w.requests_count),
        }
    }

    fn queue_backlog(&self) -> u64 {
        match self {
            RawStats::Single(s) => s.backlog,
            RawStats::Clustered(c) => c.backlog,
        }
    }

    fn queue_backlog_max(&self) -> u64 {
        match self {
            RawStats::Single(s) => s.backlog_max,
            RawStats::Clustered(c) => c.backlog_max,
        }
    }

    fn queue_reactor_max(&self) -> u64 {
        match self {
            RawStats::Single(s) => s.reactor_max,
            RawStats::Clustered(c) => c.reactor_max,
        }
    }

    fn queue_capacity(&self) -> u64 {
        match self {
            RawStats::Single(s) => s.pool_capacity,
            RawStats::Clustered(c) => c.pool_capacity,
        }
    }
}

impl<'de> Deserialize<'de> for RawStats {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let object = Map::deserialize(deserializer)?;
        RawStats::from_object(object).map_err(de::Error::custom)
    }
}

fn null_as_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<WorkerRecord>, D::Error> {
    Ok(Option::<Vec<WorkerRecord>>::deserialize(deserializer)?.unwrap_or_default())
}

// Hosts report the flag either as a boolean or as a status string.
#[derive(Deserialize)]
#[serde(untagged)]
enum BootedFlag {
    Flag(bool),
    Status(String),
}

fn booted_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Option::<BootedFlag>::deserialize(deserializer)? {
        Some(BootedFlag::Flag(booted)) => booted,
        Some(BootedFlag::Status(status)) => status == "booted",
        None => false,
    })
}

impl From<WorkerStats> for RawStats {
    fn from(stats: WorkerStats) -> Self {
        RawStats::Single(stats)
    }
}

impl From<ClusterStats> for RawStats {
    fn from(stats: ClusterStats) -> Self {
        RawStats::Clustered(stats)
    }
}

type Extractor = fn(&RawStats) -> u64;

/// Every metric the adapter produces, in output order.
const METRICS: &[(&str, Extractor)] = &[
    ("workers.booted", RawStats::workers_booted),
    ("workers.total", RawStats::workers_total),
    ("workers.spawned_threads", RawStats::workers_spawned_threads),
    ("workers.max_threads", RawStats::workers_max_threads),
    ("workers.requests_count", RawStats::workers_requests_count),
    ("queue.backlog", RawStats::queue_backlog),
    ("queue.backlog_max", RawStats::queue_backlog_max),
    ("queue.reactor_max", RawStats::queue_reactor_max),
    ("queue.capacity", RawStats::queue_capacity),
];

/// Normalizes raw statistics into a snapshot of every known metric.
pub fn normalize(raw: &RawStats) -> Snapshot {
    normalize_with(raw, None)
}

/// Normalizes raw statistics, computing only the metrics named in `requested`.
///
/// Passing `None` computes every metric. The result is equivalent to normalizing everything and filtering
/// afterwards, except that output order follows the adapter's own order.
pub fn normalize_with(raw: &RawStats, requested: Option<&[String]>) -> Snapshot {
    METRICS
        .iter()
        .filter(|(name, _)| requested.map_or(true, |names| names.iter().any(|n| n == name)))
        .map(|(name, extract)| (*name, extract(raw)))
        .collect()
}
