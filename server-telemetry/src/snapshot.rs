use std::fmt;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// A single metric value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricValue {
    /// An unsigned integer counter or gauge value.
    Integer(u64),

    /// A floating-point value.
    FloatingPoint(f64),
}

impl MetricValue {
    /// Returns the value as a floating-point number.
    pub fn as_f64(self) -> f64 {
        match self {
            MetricValue::Integer(v) => v as f64,
            MetricValue::FloatingPoint(v) => v,
        }
    }
}

impl From<u64> for MetricValue {
    fn from(value: u64) -> Self {
        MetricValue::Integer(value)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::FloatingPoint(value)
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Integer(v) => write!(f, "{v}"),
            MetricValue::FloatingPoint(v) => write!(f, "{v}"),
        }
    }
}

impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetricValue::Integer(v) => serializer.serialize_u64(*v),
            MetricValue::FloatingPoint(v) => serializer.serialize_f64(*v),
        }
    }
}

/// A flat, ordered mapping from dotted metric name to value.
///
/// Insertion order is preserved and reflects how the metrics were grouped when they were produced: worker
/// metrics, then queue metrics, then socket metrics. Targets receive a shared reference and must treat the snapshot
/// as read-only.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    metrics: IndexMap<String, MetricValue>,
}

impl Snapshot {
    /// Creates an empty `Snapshot`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a metric, replacing the value of an existing metric with the same name in place.
    pub fn insert<K, V>(&mut self, name: K, value: V)
    where
        K: Into<String>,
        V: Into<MetricValue>,
    {
        self.metrics.insert(name.into(), value.into());
    }

    /// Gets the value of the given metric, if present.
    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.metrics.get(name).copied()
    }

    /// Returns `true` if the snapshot contains the given metric.
    pub fn contains(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    /// Returns the number of metrics in the snapshot.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Returns `true` if the snapshot has no metrics.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Iterates over the metrics in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, MetricValue)> + '_ {
        self.metrics.iter().map(|(name, value)| (name.as_str(), *value))
    }

    /// Iterates over the metric names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.metrics.keys().map(String::as_str)
    }

    /// Appends every metric from `other`, in order.
    pub fn merge(&mut self, other: Snapshot) {
        self.metrics.extend(other.metrics);
    }
}

impl<K, V> FromIterator<(K, V)> for Snapshot
where
    K: Into<String>,
    V: Into<MetricValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Snapshot { metrics: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

impl IntoIterator for Snapshot {
    type Item = (String, MetricValue);
    type IntoIter = indexmap::map::IntoIter<String, MetricValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.metrics.into_iter()
    }
}

/// Renders the snapshot as `{"name": value, ...}`.
impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.metrics.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name:?}: {value}")?;
        }
        f.write_str("}")
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.metrics.len()))?;
        for (name, value) in &self.metrics {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::{MetricValue, Snapshot};

    #[test]
    fn preserves_insertion_order() {
        let mut snapshot = Snapshot::new();
        snapshot.insert("workers.total", 2u64);
        snapshot.insert("queue.backlog", 0u64);
        snapshot.insert("sockets.backlog", 7u64);

        let names = snapshot.names().collect::<Vec<_>>();
        assert_eq!(names, vec!["workers.total", "queue.backlog", "sockets.backlog"]);
    }

    #[test]
    fn reinsert_keeps_position() {
        let mut snapshot = Snapshot::new();
        snapshot.insert("a", 1u64);
        snapshot.insert("b", 2u64);
        snapshot.insert("a", 3u64);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.iter().next(), Some(("a", MetricValue::Integer(3))));
    }

    #[test]
    fn display_and_json() {
        let snapshot: Snapshot =
            [("workers.total", MetricValue::Integer(5)), ("load", MetricValue::FloatingPoint(0.5))]
                .into_iter()
                .collect();

        assert_eq!(snapshot.to_string(), r#"{"workers.total": 5, "load": 0.5}"#);
        assert_eq!(
            serde_json::to_string(&snapshot).unwrap(),
            r#"{"workers.total":5,"load":0.5}"#
        );
    }
}
