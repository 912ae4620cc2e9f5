//! A target that pushes every metric as a statsd gauge.
//!
//! Each metric in a snapshot is sent as its own `name:value|g` payload. Sends are best-effort: a failed send is
//! logged at the debug level and the metric is dropped, without failing the publish.
//!
//! UDP is the default transport. On Linux, Unix domain sockets are supported as well, in both datagram
//! (`unixgram://path`) and stream (`unix://path`) flavors. Stream payloads are length-prefixed.
use std::{fmt, time::Duration};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    config::BuildError,
    snapshot::Snapshot,
    target::{Target, TargetError},
};

mod client;
mod writer;

use self::{
    client::{ClientState, RemoteAddr},
    writer::PayloadWriter,
};

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Builder for a [`StatsdTarget`].
pub struct StatsdBuilder {
    remote_addr: RemoteAddr,
    write_timeout: Duration,
    prefix: Option<String>,
    tags: Vec<(String, String)>,
}

impl StatsdBuilder {
    /// Set the remote address to send metrics to.
    ///
    /// For UDP, the address simply needs to be in the format of `<host>:<port>`. For Unix domain sockets, an address in
    /// the format of `<scheme>://<path>`. The scheme can be either `unix` or `unixgram`, for a stream (`SOCK_STREAM`)
    /// or datagram (`SOCK_DGRAM`) socket, respectively.
    ///
    /// Defaults to sending to `127.0.0.1:8125` over UDP.
    ///
    /// # Errors
    ///
    /// If the given address is not able to be parsed as a valid address, an error will be returned indicating the
    /// reason.
    pub fn with_remote_address<A>(mut self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        self.remote_addr = RemoteAddr::try_from(addr.as_ref())
            .map_err(|reason| BuildError::InvalidRemoteAddress { reason })?;
        Ok(self)
    }

    /// Set the write timeout for sending metrics.
    ///
    /// When the write timeout is reached, the metric being sent is dropped without retrying.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set a prefix for every metric name.
    ///
    /// The prefix is joined to the name with a dot, so `puma` turns `workers.total` into `puma.workers.total`.
    #[must_use]
    pub fn with_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Add a constant tag to every metric.
    ///
    /// A tag with an empty value is sent as a bare tag.
    #[must_use]
    pub fn with_tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Builds the target.
    ///
    /// No connection is made until the first snapshot is published.
    pub fn build(self) -> StatsdTarget {
        let writer = PayloadWriter::new(self.remote_addr.requires_length_prefix())
            .with_prefix(self.prefix)
            .with_tags(&self.tags);

        StatsdTarget {
            transport: self.remote_addr.transport_id(),
            state: Mutex::new(Inner {
                client: ClientState::new(self.remote_addr, self.write_timeout),
                writer,
            }),
        }
    }
}

impl Default for StatsdBuilder {
    fn default() -> Self {
        StatsdBuilder {
            remote_addr: RemoteAddr::default(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            prefix: None,
            tags: Vec::new(),
        }
    }
}

struct Inner {
    client: ClientState,
    writer: PayloadWriter,
}

/// Sends every metric of a snapshot as a statsd gauge.
///
/// Created with [`StatsdBuilder`].
pub struct StatsdTarget {
    transport: &'static str,
    state: Mutex<Inner>,
}

impl StatsdTarget {
    /// Creates a builder.
    pub fn builder() -> StatsdBuilder {
        StatsdBuilder::default()
    }
}

impl fmt::Debug for StatsdTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsdTarget").field("transport", &self.transport).finish_non_exhaustive()
    }
}

impl Target for StatsdTarget {
    fn publish(&self, snapshot: &Snapshot) -> Result<(), TargetError> {
        let mut state = self.state.lock();
        let Inner { client, writer } = &mut *state;

        let mut metrics_sent = 0;
        let mut metrics_dropped = 0;
        for (name, value) in snapshot.iter() {
            let payload = writer.write_gauge(name, value);
            if let Err(e) = client.try_send(payload) {
                debug!(error = %e, metric = name, transport = self.transport, "Failed to send metric.");
                metrics_dropped += 1;
            } else {
                metrics_sent += 1;
            }
        }

        trace!(metrics_sent, metrics_dropped, "Finished sending metrics.");
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "statsd"
    }
}
