//! A target that records every metric into an OpenTelemetry gauge.
use std::fmt;

use opentelemetry::{
    global,
    metrics::{Gauge, Meter},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use parking_lot::Mutex;
use scc::HashMap;

use crate::{
    metadata,
    snapshot::Snapshot,
    target::{Target, TargetError},
};

const METER_NAME: &str = "server-telemetry";

/// Builder for a [`GaugeTarget`].
pub struct GaugeTargetBuilder {
    meter: Meter,
    provider: Option<SdkMeterProvider>,
    prefix: Option<String>,
    suffix: Option<String>,
    attributes: Vec<KeyValue>,
}

impl GaugeTargetBuilder {
    /// Set a prefix for every instrument name.
    ///
    /// The prefix is joined to the metric name with a dot.
    #[must_use]
    pub fn with_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set a suffix for every instrument name.
    ///
    /// The suffix is joined to the metric name with a dot.
    #[must_use]
    pub fn with_suffix<S: Into<String>>(mut self, suffix: S) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// Add an attribute to every recorded value.
    #[must_use]
    pub fn with_attribute(mut self, attribute: KeyValue) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Add attributes to every recorded value.
    #[must_use]
    pub fn with_attributes<I>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = KeyValue>,
    {
        self.attributes.extend(attributes);
        self
    }

    /// Flush the given provider after every publish.
    ///
    /// A gauge only exports its last value, so without a flush, values recorded between two exports of the
    /// provider's reader are overwritten before they are seen. Flushing on every publish exports each snapshot, at the
    /// cost of a synchronous export on the publisher's thread.
    #[must_use]
    pub fn with_force_flush(mut self, provider: SdkMeterProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Builds the target.
    pub fn build(self) -> GaugeTarget {
        GaugeTarget {
            meter: self.meter,
            provider: self.provider,
            prefix: self.prefix.filter(|p| !p.is_empty()),
            suffix: self.suffix.filter(|s| !s.is_empty()),
            attributes: self.attributes,
            instruments: HashMap::new(),
            create_lock: Mutex::new(()),
        }
    }
}

/// Records every metric of a snapshot into an OpenTelemetry gauge.
///
/// One gauge instrument is created per metric name, the first time that name is published, and reused afterwards.
/// Instruments carry the unit and description of the metric when it is a known one.
pub struct GaugeTarget {
    meter: Meter,
    provider: Option<SdkMeterProvider>,
    prefix: Option<String>,
    suffix: Option<String>,
    attributes: Vec<KeyValue>,
    instruments: HashMap<String, Gauge<f64>>,
    create_lock: Mutex<()>,
}

impl GaugeTarget {
    /// Creates a builder recording into instruments created by the given meter.
    pub fn builder(meter: Meter) -> GaugeTargetBuilder {
        GaugeTargetBuilder { meter, provider: None, prefix: None, suffix: None, attributes: Vec::new() }
    }

    /// Creates a builder recording through the process-global meter provider.
    pub fn global() -> GaugeTargetBuilder {
        Self::builder(global::meter(METER_NAME))
    }

    /// Returns the instrument name for the given metric.
    pub fn instrument_name(&self, metric: &str) -> String {
        let mut name = String::new();
        for part in [self.prefix.as_deref(), Some(metric), self.suffix.as_deref()].into_iter().flatten() {
            if !name.is_empty() {
                name.push('.');
            }
            name.push_str(part);
        }
        name
    }

    /// Returns the number of instruments created so far.
    pub fn instrument_count(&self) -> usize {
        self.instruments.len()
    }

    fn gauge(&self, metric: &str) -> Gauge<f64> {
        let name = self.instrument_name(metric);
        if let Some(gauge) = self.instruments.read(&name, |_, g| g.clone()) {
            return gauge;
        }

        let _guard = self.create_lock.lock();
        if let Some(gauge) = self.instruments.read(&name, |_, g| g.clone()) {
            return gauge;
        }

        let description = metadata::describe(metric);
        let builder = self.meter.f64_gauge(name.clone()).with_unit(description.unit());
        let builder = match description.description() {
            Some(text) => builder.with_description(text),
            None => builder,
        };
        let gauge = builder.build();

        let _ = self.instruments.insert(name, gauge.clone());
        gauge
    }
}

impl fmt::Debug for GaugeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaugeTarget")
            .field("prefix", &self.prefix)
            .field("suffix", &self.suffix)
            .field("attributes", &self.attributes)
            .field("force_flush", &self.provider.is_some())
            .finish_non_exhaustive()
    }
}

impl Target for GaugeTarget {
    fn publish(&self, snapshot: &Snapshot) -> Result<(), TargetError> {
        for (name, value) in snapshot.iter() {
            self.gauge(name).record(value.as_f64(), &self.attributes);
        }

        if let Some(provider) = &self.provider {
            provider.force_flush().map_err(|e| TargetError::Flush { reason: e.to_string() })?;
        }

        Ok(())
    }

    fn kind(&self) -> &'static str {
        "metrics-sdk"
    }
}
