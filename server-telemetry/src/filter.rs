use crate::snapshot::Snapshot;

/// Reduces a snapshot to an allow-listed subset of metrics.
///
/// An unset filter passes every metric through untouched. A set filter keeps only the metrics whose names exactly
/// match an entry, in the filter's own order, so an empty list filters everything out. Requested names that the
/// snapshot does not contain are skipped silently, as metric sets change between host versions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricFilter {
    names: Option<Vec<String>>,
}

impl MetricFilter {
    /// Creates a filter that passes every metric.
    pub fn all() -> Self {
        MetricFilter { names: None }
    }

    /// Creates a filter that keeps only the given metric names.
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MetricFilter { names: Some(names.into_iter().map(Into::into).collect()) }
    }

    /// Returns the requested metric names, or `None` if every metric is requested.
    pub fn requested(&self) -> Option<&[String]> {
        self.names.as_deref()
    }

    /// Applies the filter.
    pub fn apply(&self, snapshot: Snapshot) -> Snapshot {
        match &self.names {
            None => snapshot,
            Some(names) => names
                .iter()
                .filter_map(|name| snapshot.get(name).map(|value| (name.clone(), value)))
                .collect(),
        }
    }
}
