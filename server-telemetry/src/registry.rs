//! Resolution of symbolic target names into built-in targets.
use std::{fmt, str::FromStr, sync::Arc};

use indexmap::IndexMap;

use crate::{
    config::BuildError,
    target::{FnTarget, Target, TargetError},
    targets::{
        io::{Formatter, RawStreamTarget},
        log::LogTarget,
        Transform,
    },
    snapshot::Snapshot,
};

#[cfg(feature = "otel")]
use crate::targets::otel::GaugeTarget;
#[cfg(feature = "statsd")]
use crate::targets::statsd::StatsdTarget;

/// A built-in target, selected by its symbolic name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuiltinTarget {
    /// `log`: one structured line per tick. See [`LogTarget`].
    Log,

    /// `raw-stream`, or `io`: one formatted line per tick on standard output. See [`RawStreamTarget`].
    RawStream,

    /// `statsd`, or `dogstatsd`: one gauge per metric. See [`StatsdTarget`].
    #[cfg(feature = "statsd")]
    Statsd,

    /// `metrics-sdk`, `open_telemetry` or `otel`: one OpenTelemetry gauge per metric, recorded through the global
    /// meter provider. See [`GaugeTarget`].
    #[cfg(feature = "otel")]
    MetricsSdk,
}

impl BuiltinTarget {
    /// Returns the canonical name of the target.
    pub const fn name(&self) -> &'static str {
        match self {
            BuiltinTarget::Log => "log",
            BuiltinTarget::RawStream => "raw-stream",
            #[cfg(feature = "statsd")]
            BuiltinTarget::Statsd => "statsd",
            #[cfg(feature = "otel")]
            BuiltinTarget::MetricsSdk => "metrics-sdk",
        }
    }

    fn parameters(&self) -> &'static [&'static str] {
        match self {
            BuiltinTarget::Log => &["label", "separator", "transform"],
            BuiltinTarget::RawStream => &["formatter", "transform"],
            #[cfg(feature = "statsd")]
            BuiltinTarget::Statsd => &["address", "prefix", "tags"],
            #[cfg(feature = "otel")]
            BuiltinTarget::MetricsSdk => &["prefix", "suffix", "attributes", "force_flush"],
        }
    }

    /// Builds the target from string parameters.
    ///
    /// # Errors
    ///
    /// If a parameter is not recognized by this target, or its value cannot be parsed, an error is returned.
    pub fn build(&self, params: &TargetParams) -> Result<TargetConfig, BuildError> {
        let target = self.name();
        if let Some(unknown) = params.names().find(|name| !self.parameters().iter().any(|known| known == name)) {
            return Err(BuildError::InvalidParameter {
                target,
                parameter: unknown.to_string(),
                reason: format!("expected one of: {}", self.parameters().join(", ")),
            });
        }

        match self {
            BuiltinTarget::Log => {
                let mut log = LogTarget::new();
                if let Some(label) = params.get("label") {
                    log = log.with_label(label);
                }
                if let Some(separator) = params.get("separator") {
                    log = log.with_separator(separator);
                }
                if let Some(transform) = params.parse::<Transform>(target, "transform")? {
                    log = log.with_transform(transform);
                }
                Ok(TargetConfig::Log(log))
            }
            BuiltinTarget::RawStream => {
                let mut stream = RawStreamTarget::stdout();
                if let Some(formatter) = params.parse::<Formatter>(target, "formatter")? {
                    stream = stream.with_formatter(formatter);
                }
                if let Some(transform) = params.parse::<Transform>(target, "transform")? {
                    stream = stream.with_transform(transform);
                }
                Ok(TargetConfig::RawStream(stream))
            }
            #[cfg(feature = "statsd")]
            BuiltinTarget::Statsd => {
                let mut builder = StatsdTarget::builder();
                if let Some(address) = params.get("address") {
                    builder = builder.with_remote_address(address)?;
                }
                if let Some(prefix) = params.get("prefix") {
                    builder = builder.with_prefix(prefix);
                }
                if let Some(tags) = params.get("tags") {
                    for (key, value) in split_pairs(tags, ':') {
                        builder = builder.with_tag(key, value);
                    }
                }
                Ok(TargetConfig::Statsd(builder.build()))
            }
            #[cfg(feature = "otel")]
            BuiltinTarget::MetricsSdk => {
                if params.parse::<bool>(target, "force_flush")? == Some(true) {
                    return Err(BuildError::MissingMeterProvider);
                }

                let mut builder = GaugeTarget::global();
                if let Some(prefix) = params.get("prefix") {
                    builder = builder.with_prefix(prefix);
                }
                if let Some(suffix) = params.get("suffix") {
                    builder = builder.with_suffix(suffix);
                }
                if let Some(attributes) = params.get("attributes") {
                    let attributes = split_pairs(attributes, '=')
                        .map(|(key, value)| opentelemetry::KeyValue::new(key.to_string(), value.to_string()));
                    builder = builder.with_attributes(attributes);
                }
                Ok(TargetConfig::MetricsSdk(builder.build()))
            }
        }
    }
}

impl FromStr for BuiltinTarget {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(BuiltinTarget::Log),
            "raw-stream" | "io" => Ok(BuiltinTarget::RawStream),
            #[cfg(feature = "statsd")]
            "statsd" | "dogstatsd" => Ok(BuiltinTarget::Statsd),
            #[cfg(feature = "otel")]
            "metrics-sdk" | "open_telemetry" | "otel" => Ok(BuiltinTarget::MetricsSdk),
            _ => Err(BuildError::UnknownTarget { name: s.to_string() }),
        }
    }
}

impl fmt::Display for BuiltinTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Splits `a<sep>b,c<sep>d` into pairs, trimming whitespace. An entry without the separator has an empty value.
fn split_pairs(list: &str, separator: char) -> impl Iterator<Item = (&str, &str)> {
    list.split(',').map(str::trim).filter(|entry| !entry.is_empty()).map(move |entry| {
        match entry.split_once(separator) {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (entry, ""),
        }
    })
}

/// String parameters for a built-in target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetParams {
    params: IndexMap<String, String>,
}

impl TargetParams {
    /// Creates an empty set of parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter, replacing any previous value.
    #[must_use]
    pub fn with<K, V>(mut self, name: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Gets the raw value of a parameter.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Iterates over the parameter names.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.params.keys().map(String::as_str)
    }

    fn parse<T>(&self, target: &'static str, name: &str) -> Result<Option<T>, BuildError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(name)
            .map(|value| {
                value.parse::<T>().map_err(|e| BuildError::InvalidParameter {
                    target,
                    parameter: name.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }
}

impl<K, V> FromIterator<(K, V)> for TargetParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        TargetParams { params: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

/// A target ready to be registered.
///
/// Every built-in target converts into this type, and any other [`Target`] can be wrapped with
/// [`TargetConfig::custom`].
pub enum TargetConfig {
    /// A [`LogTarget`].
    Log(LogTarget),

    /// A [`RawStreamTarget`].
    RawStream(RawStreamTarget),

    /// A [`StatsdTarget`].
    #[cfg(feature = "statsd")]
    Statsd(StatsdTarget),

    /// A [`GaugeTarget`].
    #[cfg(feature = "otel")]
    MetricsSdk(GaugeTarget),

    /// A user-supplied target.
    Custom(Arc<dyn Target>),
}

impl TargetConfig {
    /// Wraps a user-supplied target.
    pub fn custom<T>(target: T) -> Self
    where
        T: Target + 'static,
    {
        TargetConfig::Custom(Arc::new(target))
    }

    pub(crate) fn into_target(self) -> Arc<dyn Target> {
        match self {
            TargetConfig::Log(target) => Arc::new(target),
            TargetConfig::RawStream(target) => Arc::new(target),
            #[cfg(feature = "statsd")]
            TargetConfig::Statsd(target) => Arc::new(target),
            #[cfg(feature = "otel")]
            TargetConfig::MetricsSdk(target) => Arc::new(target),
            TargetConfig::Custom(target) => target,
        }
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetConfig::Log(_) => f.write_str("Log"),
            TargetConfig::RawStream(target) => f.debug_tuple("RawStream").field(target).finish(),
            #[cfg(feature = "statsd")]
            TargetConfig::Statsd(target) => f.debug_tuple("Statsd").field(target).finish(),
            #[cfg(feature = "otel")]
            TargetConfig::MetricsSdk(target) => f.debug_tuple("MetricsSdk").field(target).finish(),
            TargetConfig::Custom(target) => f.debug_tuple("Custom").field(&target.kind()).finish(),
        }
    }
}

impl From<LogTarget> for TargetConfig {
    fn from(target: LogTarget) -> Self {
        TargetConfig::Log(target)
    }
}

impl From<RawStreamTarget> for TargetConfig {
    fn from(target: RawStreamTarget) -> Self {
        TargetConfig::RawStream(target)
    }
}

#[cfg(feature = "statsd")]
impl From<StatsdTarget> for TargetConfig {
    fn from(target: StatsdTarget) -> Self {
        TargetConfig::Statsd(target)
    }
}

#[cfg(feature = "otel")]
impl From<GaugeTarget> for TargetConfig {
    fn from(target: GaugeTarget) -> Self {
        TargetConfig::MetricsSdk(target)
    }
}

impl<F> From<FnTarget<F>> for TargetConfig
where
    F: Fn(&Snapshot) -> Result<(), TargetError> + Send + Sync + 'static,
{
    fn from(target: FnTarget<F>) -> Self {
        TargetConfig::custom(target)
    }
}

impl From<Arc<dyn Target>> for TargetConfig {
    fn from(target: Arc<dyn Target>) -> Self {
        TargetConfig::Custom(target)
    }
}

#[cfg(test)]
mod tests {
    use super::{split_pairs, BuiltinTarget, TargetConfig, TargetParams};
    use crate::config::BuildError;

    #[test]
    fn names_and_aliases() {
        let cases = [
            ("log", BuiltinTarget::Log),
            ("raw-stream", BuiltinTarget::RawStream),
            ("io", BuiltinTarget::RawStream),
            #[cfg(feature = "statsd")]
            ("statsd", BuiltinTarget::Statsd),
            #[cfg(feature = "statsd")]
            ("dogstatsd", BuiltinTarget::Statsd),
            #[cfg(feature = "otel")]
            ("metrics-sdk", BuiltinTarget::MetricsSdk),
            #[cfg(feature = "otel")]
            ("open_telemetry", BuiltinTarget::MetricsSdk),
            #[cfg(feature = "otel")]
            ("otel", BuiltinTarget::MetricsSdk),
        ];

        for (name, expected) in cases {
            assert_eq!(name.parse::<BuiltinTarget>().unwrap(), expected, "name: {name}");
        }
        assert!(matches!("Log".parse::<BuiltinTarget>(), Err(BuildError::UnknownTarget { .. })));
    }

    #[test]
    fn builds_log_target_with_parameters() {
        let params: TargetParams =
            [("label", "stats"), ("separator", ";"), ("transform", "dashes")].into_iter().collect();
        let config = BuiltinTarget::Log.build(&params).unwrap();
        assert!(matches!(config, TargetConfig::Log(_)));
    }

    #[test]
    fn rejects_unknown_parameters() {
        let params = TargetParams::new().with("colour", "blue");
        let err = BuiltinTarget::RawStream.build(&params).unwrap_err();
        assert!(matches!(err, BuildError::InvalidParameter { target: "raw-stream", .. }));
    }

    #[test]
    fn rejects_unknown_formatter() {
        let params = TargetParams::new().with("formatter", "yaml");
        let err = BuiltinTarget::RawStream.build(&params).unwrap_err();
        assert!(err.to_string().contains("formatter"));
    }

    #[cfg(feature = "statsd")]
    #[test]
    fn statsd_address_is_validated() {
        let params = TargetParams::new().with("address", "nowhere at all");
        let err = BuiltinTarget::Statsd.build(&params).unwrap_err();
        assert!(matches!(err, BuildError::InvalidRemoteAddress { .. }));

        let params =
            TargetParams::new().with("address", "127.0.0.1:8125").with("tags", "env:prod, role");
        assert!(matches!(BuiltinTarget::Statsd.build(&params), Ok(TargetConfig::Statsd(_))));
    }

    #[cfg(feature = "otel")]
    #[test]
    fn force_flush_needs_a_provider() {
        let params = TargetParams::new().with("force_flush", "true");
        assert!(matches!(BuiltinTarget::MetricsSdk.build(&params), Err(BuildError::MissingMeterProvider)));

        let params = TargetParams::new().with("force_flush", "false").with("attributes", "service=web");
        assert!(matches!(BuiltinTarget::MetricsSdk.build(&params), Ok(TargetConfig::MetricsSdk(_))));
    }

    #[test]
    fn pairs() {
        let pairs = split_pairs("env:prod, role ,,zone:us:east", ':').collect::<Vec<_>>();
        assert_eq!(pairs, vec![("env", "prod"), ("role", ""), ("zone", "us:east")]);
    }
}
