//! Built-in targets.
use std::{borrow::Cow, fmt, str::FromStr};

use crate::snapshot::Snapshot;

pub mod io;
pub mod log;
#[cfg(feature = "otel")]
#[cfg_attr(docsrs, doc(cfg(feature = "otel")))]
pub mod otel;
#[cfg(feature = "statsd")]
#[cfg_attr(docsrs, doc(cfg(feature = "statsd")))]
pub mod statsd;

/// Renames metric keys before a text target writes them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Transform {
    /// Keys are written as-is, e.g. `queue.backlog`.
    #[default]
    Passthrough,

    /// Dots are replaced with dashes, e.g. `queue-backlog`.
    ///
    /// Useful for log pipelines that would otherwise treat dotted keys as nested objects.
    Dashes,
}

impl Transform {
    /// Applies the transform to a single metric name.
    pub fn apply<'a>(&self, name: &'a str) -> Cow<'a, str> {
        match self {
            Transform::Passthrough => Cow::Borrowed(name),
            Transform::Dashes => Cow::Owned(name.replace('.', "-")),
        }
    }

    /// Applies the transform to every metric name in a snapshot, preserving order.
    pub fn apply_snapshot<'a>(&self, snapshot: &'a Snapshot) -> Cow<'a, Snapshot> {
        match self {
            Transform::Passthrough => Cow::Borrowed(snapshot),
            Transform::Dashes => Cow::Owned(
                snapshot.iter().map(|(name, value)| (self.apply(name).into_owned(), value)).collect(),
            ),
        }
    }
}

impl FromStr for Transform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passthrough" => Ok(Transform::Passthrough),
            "dashes" => Ok(Transform::Dashes),
            other => Err(format!("unknown transform '{other}' (expected 'passthrough' or 'dashes')")),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transform::Passthrough => "passthrough",
            Transform::Dashes => "dashes",
        })
    }
}
