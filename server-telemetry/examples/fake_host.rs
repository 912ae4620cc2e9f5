use std::{
    net::TcpListener,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use server_telemetry::{
    ClusterStats, Config, LogTarget, MetricFilter, Publisher, RawStats, SocketDescriptor, StatsError, StatsSource,
    StatsdTarget, TargetParams, Transform, WorkerRecord,
};
use tracing_subscriber::EnvFilter;

/// Pretends to be a clustered server with a growing request count.
struct FakeHost {
    listener: TcpListener,
    requests: AtomicU64,
}

impl StatsSource for FakeHost {
    fn stats(&self) -> Result<RawStats, StatsError> {
        let requests = self.requests.fetch_add(17, Ordering::Relaxed);
        let worker = |requests_count| WorkerRecord {
            booted: true,
            spawned_threads: 3,
            max_threads: 5,
            requests_count,
        };

        let mut stats = ClusterStats::from_workers(vec![worker(requests), worker(requests / 2)]);
        stats.backlog = requests % 4;
        stats.pool_capacity = 7;
        Ok(stats.into())
    }

    fn listeners(&self) -> Vec<SocketDescriptor<'_>> {
        vec![SocketDescriptor::tcp(&self.listener)]
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let host = FakeHost {
        listener: TcpListener::bind("127.0.0.1:0").expect("failed to bind listener"),
        requests: AtomicU64::new(0),
    };

    let statsd = StatsdTarget::builder()
        .with_remote_address("localhost:9125")
        .expect("failed to parse remote address")
        .with_prefix("fake_host")
        .with_tag("env", "demo")
        .build();

    let config = Config::default()
        .with_enabled(true)
        .with_initial_delay(Duration::from_secs(1))
        .with_frequency(Duration::from_secs(2))
        .with_socket_telemetry(true)
        .with_metric_filter(MetricFilter::only([
            "workers.booted",
            "workers.requests_count",
            "queue.backlog",
            "queue.capacity",
            "sockets.backlog",
        ]))
        .add_target(LogTarget::new().with_transform(Transform::Dashes))
        .expect("failed to add log target")
        .add_named_target("io", TargetParams::new().with("formatter", "logfmt"))
        .expect("failed to add raw-stream target")
        .add_target(statsd)
        .expect("failed to add statsd target");

    let handle = Publisher::new(config, host).start().expect("failed to start publisher");

    std::thread::sleep(Duration::from_secs(10));
    handle.shutdown();
}
