//! A target that writes each snapshot as a single structured log line.
use std::{fmt::Write as _, io::Write};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn, Level};

use super::Transform;
use crate::{
    snapshot::Snapshot,
    target::{Target, TargetError},
};

const DEFAULT_LABEL: &str = "Publish telemetry";
const DEFAULT_SEPARATOR: &str = " ";

enum Output {
    Tracing(Level),
    Writer(Mutex<Box<dyn Write + Send>>),
}

/// Writes each snapshot as one line: `message="<label>" name=value name=value ...`.
///
/// By default lines are emitted as `tracing` events at the `INFO` level, so they end up wherever the host's
/// subscriber sends its logs. A dedicated writer can be configured instead.
pub struct LogTarget {
    label: String,
    separator: String,
    transform: Transform,
    output: Output,
}

impl LogTarget {
    /// Creates a `LogTarget` that logs through `tracing` at the `INFO` level.
    pub fn new() -> Self {
        LogTarget {
            label: DEFAULT_LABEL.to_string(),
            separator: DEFAULT_SEPARATOR.to_string(),
            transform: Transform::Passthrough,
            output: Output::Tracing(Level::INFO),
        }
    }

    /// Sets the message label written at the start of every line.
    ///
    /// Defaults to `Publish telemetry`.
    #[must_use]
    pub fn with_label<S: Into<String>>(mut self, label: S) -> Self {
        self.label = label.into();
        self
    }

    /// Sets the separator between fields.
    ///
    /// Defaults to a single space.
    #[must_use]
    pub fn with_separator<S: Into<String>>(mut self, separator: S) -> Self {
        self.separator = separator.into();
        self
    }

    /// Sets the transform applied to metric names.
    ///
    /// Defaults to [`Transform::Passthrough`].
    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Logs through `tracing` at the given level.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.output = Output::Tracing(level);
        self
    }

    /// Writes lines to the given writer instead of logging through `tracing`.
    #[must_use]
    pub fn with_writer<W>(mut self, writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        self.output = Output::Writer(Mutex::new(Box::new(writer)));
        self
    }

    /// Formats a snapshot as a log line, without a trailing newline.
    pub fn format(&self, snapshot: &Snapshot) -> String {
        let mut line = String::new();
        let _ = write!(line, "message={:?}", self.label);
        for (name, value) in snapshot.iter() {
            line.push_str(&self.separator);
            let _ = write!(line, "{}={}", self.transform.apply(name), value);
        }
        line
    }
}

impl Default for LogTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl Target for LogTarget {
    fn publish(&self, snapshot: &Snapshot) -> Result<(), TargetError> {
        let line = self.format(snapshot);

        match &self.output {
            Output::Tracing(level) => {
                let level = *level;
                if level == Level::ERROR {
                    error!("{line}");
                } else if level == Level::WARN {
                    warn!("{line}");
                } else if level == Level::INFO {
                    info!("{line}");
                } else if level == Level::DEBUG {
                    debug!("{line}");
                } else {
                    trace!("{line}");
                }
            }
            Output::Writer(writer) => {
                let mut writer = writer.lock();
                writer.write_all(line.as_bytes())?;
                writer.write_all(b"\n")?;
                writer.flush()?;
            }
        }

        Ok(())
    }

    fn kind(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::LogTarget;
    use crate::{
        snapshot::{MetricValue, Snapshot},
        target::Target,
        targets::Transform,
        test_util::{ClosedPipe, SharedBuffer},
    };

    fn snapshot() -> Snapshot {
        [("queue.backlog", MetricValue::Integer(0)), ("workers.spawned_threads", MetricValue::Integer(2))]
            .into_iter()
            .collect()
    }

    #[test]
    fn label_comes_first() {
        let target = LogTarget::new();
        assert_eq!(
            target.format(&snapshot()),
            r#"message="Publish telemetry" queue.backlog=0 workers.spawned_threads=2"#
        );
    }

    #[test]
    fn custom_separator_and_transform() {
        let target = LogTarget::new()
            .with_label("stats")
            .with_separator(", ")
            .with_transform(Transform::Dashes);
        assert_eq!(
            target.format(&snapshot()),
            r#"message="stats", queue-backlog=0, workers-spawned_threads=2"#
        );
    }

    #[test]
    fn empty_snapshot_is_just_the_label() {
        assert_eq!(LogTarget::new().format(&Snapshot::new()), r#"message="Publish telemetry""#);
    }

    #[test]
    fn writes_one_line_per_publish() {
        let buffer = SharedBuffer::default();
        let target = LogTarget::new().with_writer(buffer.clone());

        target.publish(&snapshot()).unwrap();
        target.publish(&snapshot()).unwrap();

        let lines = buffer.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], lines[1]);
    }

    #[test]
    fn closed_writer_reports_broken_pipe() {
        let target = LogTarget::new().with_writer(ClosedPipe);
        assert!(target.publish(&snapshot()).unwrap_err().is_broken_pipe());
    }
}
