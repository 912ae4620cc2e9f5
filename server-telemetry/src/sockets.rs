//! Backlog introspection for the host's listening sockets.
use std::io;
use std::marker::PhantomData;

#[cfg(unix)]
use std::os::fd::{AsFd, BorrowedFd};

use thiserror::Error;

use crate::snapshot::Snapshot;

/// Name of the metric produced by [`collect`].
pub const SOCKETS_BACKLOG: &str = "sockets.backlog";

/// Errors that could occur while inspecting a socket.
#[derive(Debug, Error)]
pub enum SocketError {
    /// The platform does not support the introspection call.
    #[error("socket introspection unsupported: {reason}")]
    Unsupported {
        /// Details about what is unsupported.
        reason: &'static str,
    },

    /// The introspection call failed.
    #[error("socket introspection failed: {0}")]
    Io(#[from] io::Error),
}

impl SocketError {
    /// Returns `true` if this error signals a missing platform capability rather than a failure.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, SocketError::Unsupported { .. })
    }

    /// Returns a short, stable identifier for the kind of error.
    pub fn kind(&self) -> &'static str {
        match self {
            SocketError::Unsupported { .. } => "socket_unsupported",
            SocketError::Io(_) => "socket_io",
        }
    }
}

/// Transport of a listening socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketKind {
    /// A TCP listener.
    Tcp,

    /// A Unix domain stream listener.
    Unix,
}

/// A read-only view of one of the host's listening sockets.
///
/// The socket is owned by the host; the descriptor borrows it for the duration of a single collection.
#[derive(Clone, Copy, Debug)]
pub struct SocketDescriptor<'a> {
    kind: SocketKind,
    #[cfg(unix)]
    fd: BorrowedFd<'a>,
    _socket: PhantomData<&'a ()>,
}

impl<'a> SocketDescriptor<'a> {
    /// Creates a descriptor from a borrowed file descriptor.
    #[cfg(unix)]
    pub fn new(kind: SocketKind, fd: BorrowedFd<'a>) -> Self {
        SocketDescriptor { kind, fd, _socket: PhantomData }
    }

    /// Creates a descriptor for a TCP listener.
    #[cfg(unix)]
    pub fn tcp<S: AsFd>(socket: &'a S) -> Self {
        Self::new(SocketKind::Tcp, socket.as_fd())
    }

    /// Creates a descriptor for a Unix domain listener.
    #[cfg(unix)]
    pub fn unix<S: AsFd>(socket: &'a S) -> Self {
        Self::new(SocketKind::Unix, socket.as_fd())
    }

    /// Returns the transport of the socket.
    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    /// Returns the underlying file descriptor.
    #[cfg(unix)]
    pub fn fd(&self) -> BorrowedFd<'a> {
        self.fd
    }
}

/// Extracts the number of pending, not yet accepted, connections from a listening socket.
pub type BacklogParser = fn(&SocketDescriptor<'_>) -> Result<u64, SocketError>;

/// Sums the backlog of every TCP listener into a `sockets.backlog` metric.
///
/// Unix domain listeners are skipped.
///
/// # Errors
///
/// If the parser fails for any socket, the error is returned and no partial sum is reported. Callers should treat
/// [`SocketError::Unsupported`] as a reason to stop collecting rather than as a failure.
pub fn collect(
    sockets: &[SocketDescriptor<'_>],
    parser: BacklogParser,
) -> Result<Snapshot, SocketError> {
    let mut backlog = 0u64;
    for socket in sockets.iter().filter(|s| s.kind() == SocketKind::Tcp) {
        backlog += parser(socket)?;
    }

    let mut snapshot = Snapshot::new();
    snapshot.insert(SOCKETS_BACKLOG, backlog);
    Ok(snapshot)
}

/// Reads the accept queue length of a TCP listener via `TCP_INFO`.
///
/// For a socket in the `LISTEN` state, the kernel reports the number of established connections waiting to be
/// accepted in `tcpi_unacked`.
///
/// # Errors
///
/// Returns [`SocketError::Unsupported`] on platforms without `TCP_INFO`, and [`SocketError::Io`] if the call fails.
#[cfg(target_os = "linux")]
pub fn tcp_info_backlog(socket: &SocketDescriptor<'_>) -> Result<u64, SocketError> {
    use std::os::fd::AsRawFd;

    // SAFETY: `tcp_info` is a plain C struct for which all-zeroes is a valid value.
    let mut info: libc::tcp_info = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::tcp_info>() as libc::socklen_t;

    // SAFETY: the descriptor is borrowed for the duration of the call, and `info`/`len` describe a valid,
    // writable buffer of the right size.
    let rc = unsafe {
        libc::getsockopt(
            socket.fd().as_raw_fd(),
            libc::SOL_TCP,
            libc::TCP_INFO,
            std::ptr::addr_of_mut!(info).cast::<libc::c_void>(),
            &mut len,
        )
    };

    if rc != 0 {
        let err = io::Error::last_os_error();
        return match err.raw_os_error() {
            Some(libc::ENOPROTOOPT) | Some(libc::EOPNOTSUPP) => {
                Err(SocketError::Unsupported { reason: "TCP_INFO not available for socket" })
            }
            _ => Err(SocketError::Io(err)),
        };
    }

    Ok(u64::from(info.tcpi_unacked))
}

/// Reads the accept queue length of a TCP listener via `TCP_INFO`.
///
/// # Errors
///
/// Always returns [`SocketError::Unsupported`]: `TCP_INFO` is only available on Linux.
#[cfg(not(target_os = "linux"))]
pub fn tcp_info_backlog(_socket: &SocketDescriptor<'_>) -> Result<u64, SocketError> {
    Err(SocketError::Unsupported { reason: "TCP_INFO is only available on Linux" })
}

#[cfg(all(test, unix))]
mod tests {
    use std::net::TcpListener;
    use std::os::unix::net::UnixListener;

    use super::*;
    use crate::snapshot::MetricValue;

    fn three(_: &SocketDescriptor<'_>) -> Result<u64, SocketError> {
        Ok(3)
    }

    fn unsupported(_: &SocketDescriptor<'_>) -> Result<u64, SocketError> {
        Err(SocketError::Unsupported { reason: "test" })
    }

    #[test]
    fn sums_tcp_listeners_only() {
        let tcp_a = TcpListener::bind("127.0.0.1:0").unwrap();
        let tcp_b = TcpListener::bind("127.0.0.1:0").unwrap();
        let dir = std::env::temp_dir().join(format!("server-telemetry-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&dir);
        let unix = UnixListener::bind(&dir).unwrap();

        let sockets = [
            SocketDescriptor::tcp(&tcp_a),
            SocketDescriptor::unix(&unix),
            SocketDescriptor::tcp(&tcp_b),
        ];
        let snapshot = collect(&sockets, three).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(SOCKETS_BACKLOG), Some(MetricValue::Integer(6)));

        drop(unix);
        let _ = std::fs::remove_file(&dir);
    }

    #[test]
    fn no_sockets_reports_zero() {
        let snapshot = collect(&[], three).unwrap();
        assert_eq!(snapshot.get(SOCKETS_BACKLOG), Some(MetricValue::Integer(0)));
    }

    #[test]
    fn unsupported_is_reported_not_raised() {
        let tcp = TcpListener::bind("127.0.0.1:0").unwrap();
        let err = collect(&[SocketDescriptor::tcp(&tcp)], unsupported).unwrap_err();
        assert!(err.is_unsupported());
        assert_eq!(err.kind(), "socket_unsupported");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn tcp_info_counts_unaccepted_connections() {
        use std::net::TcpStream;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let descriptor = SocketDescriptor::tcp(&listener);
        assert_eq!(tcp_info_backlog(&descriptor).unwrap(), 0);

        let _clients = (0..2).map(|_| TcpStream::connect(addr).unwrap()).collect::<Vec<_>>();

        // The final ACK of the handshake may still be in flight when `connect` returns.
        let mut backlog = 0;
        for _ in 0..100 {
            backlog = tcp_info_backlog(&descriptor).unwrap();
            if backlog == 2 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(backlog, 2);
    }
}
