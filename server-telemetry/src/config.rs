use std::time::Duration;

use thiserror::Error;

use crate::{
    dispatcher::Dispatcher,
    filter::MetricFilter,
    registry::{BuiltinTarget, TargetConfig, TargetParams},
    sockets::{self, BacklogParser},
};

const DEFAULT_FREQUENCY: Duration = Duration::from_secs(5);
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);

/// Errors that could occur while configuring or starting a publisher.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The symbolic target name is not a built-in target.
    #[error("unknown target '{name}'")]
    UnknownTarget {
        /// The name that was requested.
        name: String,
    },

    /// A target parameter was unknown or had an invalid value.
    #[error("invalid parameter '{parameter}' for {target} target: {reason}")]
    InvalidParameter {
        /// Kind of the target being built.
        target: &'static str,

        /// Name of the offending parameter.
        parameter: String,

        /// Details about why the parameter was rejected.
        reason: String,
    },

    /// Failed to parse the remote address of a push target.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the parsing failure.
        reason: String,
    },

    /// Flushing after every publish was requested without a meter provider to flush.
    #[error("force_flush requires an explicit meter provider")]
    MissingMeterProvider,

    /// The frequency must be non-zero.
    #[error("frequency must be greater than zero")]
    ZeroFrequency,

    /// Failed to spawn the background thread.
    #[error("failed to spawn background thread for publisher")]
    Backend,
}

/// Publisher configuration.
///
/// Built once during startup, then moved into [`Publisher::start`](crate::Publisher::start), after which it is only
/// read by the publisher's background thread.
///
/// ```
/// # use std::time::Duration;
/// # use server_telemetry::{Config, LogTarget, MetricFilter};
/// let config = Config::default()
///     .with_enabled(true)
///     .with_frequency(Duration::from_secs(10))
///     .with_metric_filter(MetricFilter::only(["workers.booted", "queue.backlog"]))
///     .add_target(LogTarget::new())
///     .unwrap();
/// assert_eq!(config.target_count(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    enabled: bool,
    frequency: Duration,
    initial_delay: Duration,
    filter: MetricFilter,
    socket_telemetry: bool,
    backlog_parser: BacklogParser,
    dispatcher: Dispatcher,
}

impl Config {
    /// Enables or disables publishing.
    ///
    /// Defaults to disabled.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the interval between the end of one tick and the start of the next.
    ///
    /// Defaults to 5 seconds.
    #[must_use]
    pub fn with_frequency(mut self, frequency: Duration) -> Self {
        self.frequency = frequency;
        self
    }

    /// Sets how long to wait after starting before the first tick.
    ///
    /// Defaults to 5 seconds.
    #[must_use]
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Sets the metric filter.
    ///
    /// Defaults to publishing every metric.
    #[must_use]
    pub fn with_metric_filter(mut self, filter: MetricFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Enables or disables the `sockets.backlog` metric.
    ///
    /// Defaults to disabled.
    #[must_use]
    pub fn with_socket_telemetry(mut self, enabled: bool) -> Self {
        self.socket_telemetry = enabled;
        self
    }

    /// Sets the function used to read the backlog of a listening socket.
    ///
    /// Defaults to [`tcp_info_backlog`](crate::sockets::tcp_info_backlog).
    #[must_use]
    pub fn with_socket_backlog_parser(mut self, parser: BacklogParser) -> Self {
        self.backlog_parser = parser;
        self
    }

    /// Appends a target.
    ///
    /// Targets are invoked in the order they were added. Adding the same target twice invokes it twice per tick.
    ///
    /// # Errors
    ///
    /// Typed targets are already built and never fail; the `Result` mirrors [`add_named_target`](Self::add_named_target)
    /// so both can be chained the same way.
    pub fn add_target<T>(mut self, target: T) -> Result<Self, BuildError>
    where
        T: Into<TargetConfig>,
    {
        self.dispatcher.add_shared_target(target.into().into_target());
        Ok(self)
    }

    /// Builds a built-in target from its symbolic name and appends it.
    ///
    /// # Errors
    ///
    /// If the name is not a built-in target, or any parameter is unknown or invalid, an error is returned and the
    /// configuration is left unchanged.
    pub fn add_named_target(self, name: &str, params: TargetParams) -> Result<Self, BuildError> {
        let target = name.parse::<BuiltinTarget>()?.build(&params)?;
        self.add_target(target)
    }

    /// Returns `true` if publishing is enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the interval between ticks.
    pub fn frequency(&self) -> Duration {
        self.frequency
    }

    /// Returns the delay before the first tick.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Returns the metric filter.
    pub fn metric_filter(&self) -> &MetricFilter {
        &self.filter
    }

    /// Returns `true` if socket telemetry is enabled.
    pub fn socket_telemetry(&self) -> bool {
        self.socket_telemetry
    }

    /// Returns the number of registered targets.
    pub fn target_count(&self) -> usize {
        self.dispatcher.len()
    }

    pub(crate) fn backlog_parser(&self) -> BacklogParser {
        self.backlog_parser
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enabled: false,
            frequency: DEFAULT_FREQUENCY,
            initial_delay: DEFAULT_INITIAL_DELAY,
            filter: MetricFilter::all(),
            socket_telemetry: false,
            backlog_parser: sockets::tcp_info_backlog,
            dispatcher: Dispatcher::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{BuildError, Config};
    use crate::{
        filter::MetricFilter,
        registry::TargetParams,
        target::from_fn,
        targets::log::LogTarget,
    };

    #[test]
    fn defaults() {
        let config = Config::default();
        assert!(!config.enabled());
        assert_eq!(config.frequency(), Duration::from_secs(5));
        assert_eq!(config.initial_delay(), Duration::from_secs(5));
        assert_eq!(config.metric_filter(), &MetricFilter::all());
        assert!(!config.socket_telemetry());
        assert_eq!(config.target_count(), 0);
    }

    #[test]
    fn targets_keep_registration_order() {
        let config = Config::default()
            .add_target(LogTarget::new())
            .unwrap()
            .add_target(from_fn(|_| Ok(())))
            .unwrap()
            .add_named_target("io", TargetParams::new())
            .unwrap();

        let kinds = config.dispatcher().target_kinds().collect::<Vec<_>>();
        assert_eq!(kinds, vec!["log", "custom", "raw-stream"]);
    }

    #[test]
    fn unknown_named_target() {
        let result = Config::default().add_named_target("carrier-pigeon", TargetParams::new());
        assert!(matches!(result, Err(BuildError::UnknownTarget { name }) if name == "carrier-pigeon"));
    }

    #[test]
    fn invalid_parameter_is_rejected() {
        let params = TargetParams::new().with("transform", "camel_case");
        let result = Config::default().add_named_target("log", params);
        assert!(matches!(
            result,
            Err(BuildError::InvalidParameter { target: "log", parameter, .. }) if parameter == "transform"
        ));
    }
}
