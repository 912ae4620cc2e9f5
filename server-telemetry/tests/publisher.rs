use std::{
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use server_telemetry::{
    from_fn, ClusterStats, Config, FnTarget, Formatter, LogTarget, MetricFilter, Publisher, RawStats, RawStreamTarget,
    RunnerState, Snapshot, StatsError, StatsSource, TargetError, TargetParams, Transform, WorkerRecord,
};
use tracing::Level;

#[derive(Clone, Default)]
struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }
}

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with a subscriber that captures every event emitted on the current thread.
fn capture_logs<F: FnOnce()>(f: F) -> String {
    let buffer = SharedBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_max_level(Level::DEBUG)
        .without_time()
        .finish();

    tracing::subscriber::with_default(subscriber, f);
    buffer.contents()
}

#[derive(Default)]
struct FakeCluster {
    samples: AtomicUsize,
    unavailable: bool,
}

impl StatsSource for FakeCluster {
    fn stats(&self) -> Result<RawStats, StatsError> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(StatsError::Unavailable { reason: "control server not ready".to_string() });
        }

        let worker = |booted, threads| WorkerRecord {
            booted,
            spawned_threads: threads,
            max_threads: 5,
            requests_count: 10,
        };
        let mut cluster = ClusterStats::from_workers(vec![worker(true, 5), worker(true, 3), worker(false, 0)]);
        cluster.backlog = 4;
        cluster.pool_capacity = 7;
        Ok(cluster.into())
    }
}

/// Records `<name>:<metric count>` for every snapshot its targets receive.
#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn target(
        &self,
        name: &'static str,
    ) -> FnTarget<impl Fn(&Snapshot) -> Result<(), TargetError> + Send + Sync + 'static> {
        let calls = Arc::clone(&self.calls);
        from_fn(move |snapshot: &Snapshot| {
            calls.lock().push(format!("{name}:{}", snapshot.len()));
            Ok(())
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[test]
fn disabled_publisher_logs_and_exits() {
    let host = Arc::new(FakeCluster::default());
    let logs = capture_logs(|| {
        let handle = Publisher::new(Config::default(), Arc::clone(&host)).start().unwrap();
        assert_eq!(handle.state(), RunnerState::Stopped);
        handle.shutdown();
    });

    assert!(logs.contains("disabled, exiting..."), "logs: {logs}");
    assert!(logs.contains("telemetry"), "logs: {logs}");
    assert!(!logs.contains("setting up runner"), "logs: {logs}");
    assert_eq!(host.samples.load(Ordering::SeqCst), 0);
}

#[test]
fn enabled_publisher_logs_setup() {
    let config = Config::default().with_enabled(true).with_initial_delay(Duration::from_secs(3600));
    let logs = capture_logs(|| {
        let handle = Publisher::new(config, FakeCluster::default()).start().unwrap();
        handle.shutdown();
    });

    assert!(logs.contains("enabled, setting up runner..."), "logs: {logs}");
}

#[test]
fn tick_normalizes_cluster_stats() {
    let buffer = SharedBuffer::default();
    let config = Config::default()
        .with_enabled(true)
        .add_target(RawStreamTarget::new(buffer.clone()).with_formatter(Formatter::Json))
        .unwrap();

    let mut publisher = Publisher::new(config, FakeCluster::default());
    publisher.tick().unwrap();

    assert_eq!(
        buffer.contents(),
        concat!(
            r#"{"workers.booted":2,"workers.total":3,"workers.spawned_threads":8,"workers.max_threads":15,"#,
            r#""workers.requests_count":30,"queue.backlog":4,"queue.backlog_max":0,"queue.reactor_max":0,"#,
            r#""queue.capacity":7}"#,
            "\n"
        )
    );
}

#[test]
fn filtered_log_lines_use_filter_order() {
    let buffer = SharedBuffer::default();
    let config = Config::default()
        .with_metric_filter(MetricFilter::only(["queue.backlog", "workers.booted", "not.a.metric"]))
        .add_target(LogTarget::new().with_transform(Transform::Dashes).with_writer(buffer.clone()))
        .unwrap();

    let mut publisher = Publisher::new(config, FakeCluster::default());
    publisher.tick().unwrap();

    assert_eq!(buffer.contents(), "message=\"Publish telemetry\" queue-backlog=4 workers-booted=2\n");
}

#[test]
fn targets_run_in_registration_order_each_tick() {
    let recorder = Recorder::default();
    let config = Config::default()
        .with_metric_filter(MetricFilter::only(["workers.total"]))
        .add_target(recorder.target("b"))
        .unwrap()
        .add_target(recorder.target("a"))
        .unwrap();

    let mut publisher = Publisher::new(config, FakeCluster::default());
    publisher.tick().unwrap();
    publisher.tick().unwrap();

    assert_eq!(recorder.calls(), vec!["b:1", "a:1", "b:1", "a:1"]);
}

#[test]
fn failing_target_is_logged_and_skipped() {
    let recorder = Recorder::default();
    let config = Config::default()
        .add_target(from_fn(|_| Err(TargetError::custom("statsd agent unreachable"))))
        .unwrap()
        .add_target(recorder.target("after"))
        .unwrap();

    let mut publisher = Publisher::new(config, FakeCluster::default());
    let logs = capture_logs(|| {
        publisher.tick().unwrap();
    });

    assert_eq!(recorder.calls(), vec!["after:9"]);
    assert!(logs.contains("statsd agent unreachable"), "logs: {logs}");
    assert!(logs.contains("custom"), "logs: {logs}");
}

#[test]
fn broken_pipe_is_silent() {
    let config = Config::default()
        .add_target(from_fn(|_| Err(io::Error::from(io::ErrorKind::BrokenPipe).into())))
        .unwrap();

    let mut publisher = Publisher::new(config, FakeCluster::default());
    let logs = capture_logs(|| {
        publisher.tick().unwrap();
    });

    assert!(logs.contains("publish"), "logs: {logs}");
    assert!(!logs.contains("ERROR"), "logs: {logs}");
}

#[test]
fn unavailable_stats_fail_the_tick() {
    let recorder = Recorder::default();
    let config = Config::default().add_target(recorder.target("never")).unwrap();
    let mut publisher =
        Publisher::new(config, FakeCluster { unavailable: true, ..FakeCluster::default() });

    let err = publisher.tick().unwrap_err();
    assert_eq!(err.kind(), "stats_unavailable");
    assert!(recorder.calls().is_empty());
}

#[test]
fn background_publisher_ticks_until_shutdown() {
    let recorder = Recorder::default();
    let config = Config::default()
        .with_enabled(true)
        .with_initial_delay(Duration::from_millis(10))
        .with_frequency(Duration::from_millis(10))
        .add_target(recorder.target("bg"))
        .unwrap()
        .add_named_target("log", TargetParams::new().with("label", "background"))
        .unwrap();

    let handle = Publisher::new(config, FakeCluster::default()).start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while recorder.calls().len() < 3 {
        assert!(Instant::now() < deadline, "publisher did not tick");
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(handle.state(), RunnerState::Running);

    handle.shutdown();
    let ticks = recorder.calls().len();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.calls().len(), ticks);
}
