//! A target that writes each snapshot to a byte stream.
use std::{
    fmt,
    io::{self, Write},
    str::FromStr,
};

use parking_lot::Mutex;

use super::Transform;
use crate::{
    snapshot::Snapshot,
    target::{Target, TargetError},
};

type FormatFn = dyn Fn(&Snapshot) -> String + Send + Sync;

/// Renders a snapshot as a single line of text.
#[derive(Default)]
pub enum Formatter {
    /// The snapshot's [`Display`](fmt::Display) form, e.g. `{"workers.total": 5}`.
    #[default]
    Display,

    /// Compact JSON, e.g. `{"workers.total":5}`.
    Json,

    /// Space-separated `key=value` pairs, e.g. `workers.total=5`.
    Logfmt,

    /// A user-supplied rendering function.
    Custom(Box<FormatFn>),
}

impl Formatter {
    /// Creates a formatter from a closure.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Snapshot) -> String + Send + Sync + 'static,
    {
        Formatter::Custom(Box::new(f))
    }

    /// Renders a snapshot.
    pub fn format(&self, snapshot: &Snapshot) -> String {
        match self {
            Formatter::Display => snapshot.to_string(),
            // Keys are strings and values are plain numbers, so serialization cannot fail.
            Formatter::Json => serde_json::to_string(snapshot).unwrap_or_default(),
            Formatter::Logfmt => snapshot
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join(" "),
            Formatter::Custom(f) => f(snapshot),
        }
    }
}

impl fmt::Debug for Formatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formatter::Display => f.write_str("Display"),
            Formatter::Json => f.write_str("Json"),
            Formatter::Logfmt => f.write_str("Logfmt"),
            Formatter::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl FromStr for Formatter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "display" => Ok(Formatter::Display),
            "json" => Ok(Formatter::Json),
            "logfmt" => Ok(Formatter::Logfmt),
            other => Err(format!("unknown formatter '{other}' (expected 'display', 'json' or 'logfmt')")),
        }
    }
}

/// Writes each snapshot, rendered by a [`Formatter`], as one line to a byte stream.
///
/// The stream is flushed after every line. Writing to standard output is the default.
pub struct RawStreamTarget {
    formatter: Formatter,
    transform: Transform,
    stream: Mutex<Box<dyn Write + Send>>,
}

impl RawStreamTarget {
    /// Creates a `RawStreamTarget` writing to standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Creates a `RawStreamTarget` writing to the given stream.
    pub fn new<W>(stream: W) -> Self
    where
        W: Write + Send + 'static,
    {
        RawStreamTarget {
            formatter: Formatter::default(),
            transform: Transform::default(),
            stream: Mutex::new(Box::new(stream)),
        }
    }

    /// Sets the formatter.
    #[must_use]
    pub fn with_formatter(mut self, formatter: Formatter) -> Self {
        self.formatter = formatter;
        self
    }

    /// Sets the transform applied to metric names before formatting.
    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }
}

impl Default for RawStreamTarget {
    fn default() -> Self {
        Self::stdout()
    }
}

impl fmt::Debug for RawStreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawStreamTarget")
            .field("formatter", &self.formatter)
            .field("transform", &self.transform)
            .finish_non_exhaustive()
    }
}

impl Target for RawStreamTarget {
    fn publish(&self, snapshot: &Snapshot) -> Result<(), TargetError> {
        let snapshot = self.transform.apply_snapshot(snapshot);
        let mut line = self.formatter.format(&snapshot);
        line.push('\n');

        let mut stream = self.stream.lock();
        stream.write_all(line.as_bytes())?;
        stream.flush()?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "raw-stream"
    }
}
