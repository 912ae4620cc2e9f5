/// Unit and description of a known metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetricDescription {
    unit: &'static str,
    description: Option<&'static str>,
}

impl MetricDescription {
    /// Unit of the metric, in UCUM annotation form.
    pub fn unit(&self) -> &'static str {
        self.unit
    }

    /// Human-readable description of the metric.
    pub fn description(&self) -> Option<&'static str> {
        self.description
    }
}

const fn described(unit: &'static str, description: &'static str) -> MetricDescription {
    MetricDescription { unit, description: Some(description) }
}

const UNKNOWN: MetricDescription = MetricDescription { unit: "1", description: None };

/// Looks up the unit and description of a metric.
///
/// Unknown metrics have a unit of `1` and no description.
pub fn describe(metric: &str) -> MetricDescription {
    match metric {
        "workers.booted" => described("{process}", "Number of worker processes that have finished booting"),
        "workers.total" => described("{process}", "Number of configured worker processes"),
        "workers.spawned_threads" => {
            described("{thread}", "Number of request threads spawned across all workers")
        }
        "workers.max_threads" => {
            described("{thread}", "Maximum number of request threads across all workers")
        }
        "workers.requests_count" => {
            described("{request}", "Number of requests served since the workers started")
        }
        "queue.backlog" => described("{request}", "Number of requests waiting for a thread"),
        "queue.backlog_max" => {
            described("{request}", "Highest request backlog observed since the last sample")
        }
        "queue.reactor_max" => {
            described("{request}", "Highest number of requests buffered by the reactor since the last sample")
        }
        "queue.capacity" => described("{request}", "Number of requests that can be accepted right now"),
        "sockets.backlog" => {
            described("{connection}", "Number of connections waiting to be accepted on listening sockets")
        }
        _ => UNKNOWN,
    }
}
