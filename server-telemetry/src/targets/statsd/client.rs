use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs as _, UdpSocket},
    time::Duration,
};

#[cfg(target_os = "linux")]
use std::{
    io::Write as _,
    os::unix::net::{UnixDatagram, UnixStream},
    path::PathBuf,
};

#[derive(Clone, Debug)]
pub(crate) enum RemoteAddr {
    Udp(Vec<SocketAddr>),

    #[cfg(target_os = "linux")]
    Unixgram(PathBuf),

    #[cfg(target_os = "linux")]
    Unix(PathBuf),
}

impl RemoteAddr {
    /// Returns the transport ID for the remote address, such as `udp` for UDP.
    pub const fn transport_id(&self) -> &'static str {
        match self {
            RemoteAddr::Udp(_) => "udp",
            #[cfg(target_os = "linux")]
            RemoteAddr::Unix(_) => "uds-stream",
            #[cfg(target_os = "linux")]
            RemoteAddr::Unixgram(_) => "uds",
        }
    }

    /// Returns `true` if payloads must carry a length prefix on this transport.
    pub fn requires_length_prefix(&self) -> bool {
        match self {
            RemoteAddr::Udp(_) => false,
            #[cfg(target_os = "linux")]
            RemoteAddr::Unixgram(_) => false,
            #[cfg(target_os = "linux")]
            RemoteAddr::Unix(_) => true,
        }
    }
}

impl Default for RemoteAddr {
    fn default() -> Self {
        RemoteAddr::Udp(vec![SocketAddr::from(([127, 0, 0, 1], 8125))])
    }
}

impl<'a> TryFrom<&'a str> for RemoteAddr {
    type Error = String;

    fn try_from(addr: &'a str) -> Result<Self, Self::Error> {
        #[cfg(target_os = "linux")]
        if let Some((scheme, path)) = addr.split_once("://") {
            return match scheme {
                "unix" => Ok(RemoteAddr::Unix(PathBuf::from(path))),
                "unixgram" => Ok(RemoteAddr::Unixgram(PathBuf::from(path))),
                _ => Err(format!("invalid scheme '{}' (expected 'unix' or 'unixgram')", scheme)),
            };
        }

        match addr.to_socket_addrs() {
            Ok(addrs) => {
                let addrs = addrs.collect::<Vec<_>>();
                if addrs.is_empty() {
                    Err(format!("'{addr}' did not resolve to any address"))
                } else {
                    Ok(RemoteAddr::Udp(addrs))
                }
            }
            Err(e) => Err(e.to_string()),
        }
    }
}

pub(super) enum Client {
    Udp(UdpSocket),

    #[cfg(target_os = "linux")]
    Unixgram(UnixDatagram),

    #[cfg(target_os = "linux")]
    Unix(UnixStream),
}

impl Client {
    fn connect(remote_addr: &RemoteAddr, write_timeout: Duration) -> io::Result<Self> {
        match remote_addr {
            RemoteAddr::Udp(addrs) => {
                let local: SocketAddr = match addrs.first() {
                    Some(SocketAddr::V6(_)) => (Ipv6Addr::UNSPECIFIED, 0).into(),
                    _ => (Ipv4Addr::UNSPECIFIED, 0).into(),
                };
                UdpSocket::bind(local).and_then(|socket| {
                    socket.connect(&addrs[..])?;
                    socket.set_write_timeout(Some(write_timeout))?;
                    Ok(Client::Udp(socket))
                })
            }

            #[cfg(target_os = "linux")]
            RemoteAddr::Unixgram(path) => UnixDatagram::unbound().and_then(|socket| {
                socket.connect(path)?;
                socket.set_write_timeout(Some(write_timeout))?;
                Ok(Client::Unixgram(socket))
            }),

            #[cfg(target_os = "linux")]
            RemoteAddr::Unix(path) => UnixStream::connect(path).and_then(|socket| {
                socket.set_write_timeout(Some(write_timeout))?;
                Ok(Client::Unix(socket))
            }),
        }
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Client::Udp(socket) => socket.send(buf),

            #[cfg(target_os = "linux")]
            Client::Unixgram(socket) => socket.send(buf),

            #[cfg(target_os = "linux")]
            Client::Unix(socket) => socket.write_all(buf).map(|()| buf.len()),
        }
    }
}

/// Connection state of a statsd client.
///
/// The socket is opened lazily on the first send. A failed send drops the socket, and the next send reconnects.
/// The socket is taken out of its slot for the duration of a send, so a send that unwinds leaves the client
/// disconnected rather than wedged.
pub(super) struct ClientState {
    remote_addr: RemoteAddr,
    write_timeout: Duration,
    client: Option<Client>,
}

impl ClientState {
    pub fn new(remote_addr: RemoteAddr, write_timeout: Duration) -> Self {
        ClientState { remote_addr, write_timeout, client: None }
    }

    pub fn try_send(&mut self, payload: &[u8]) -> io::Result<usize> {
        let mut client = match self.client.take() {
            Some(client) => client,
            None => Client::connect(&self.remote_addr, self.write_timeout)?,
        };

        let result = client.send(payload);
        if result.is_ok() {
            self.client = Some(client);
        }

        result
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::{net::UdpSocket, time::Duration};

    use super::{ClientState, RemoteAddr};

    #[test]
    fn parses_remote_addresses() {
        assert_eq!(RemoteAddr::try_from("127.0.0.1:8125").unwrap().transport_id(), "udp");
        assert!(RemoteAddr::try_from("not an address").is_err());

        #[cfg(target_os = "linux")]
        {
            let unix = RemoteAddr::try_from("unix:///var/run/statsd.sock").unwrap();
            assert_eq!(unix.transport_id(), "uds-stream");
            assert!(unix.requires_length_prefix());

            let unixgram = RemoteAddr::try_from("unixgram:///var/run/statsd.sock").unwrap();
            assert_eq!(unixgram.transport_id(), "uds");
            assert!(!unixgram.requires_length_prefix());

            assert!(RemoteAddr::try_from("tcp://127.0.0.1:8125").is_err());
        }
    }

    #[test]
    fn connects_lazily_and_sends() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let addr = RemoteAddr::try_from(server.local_addr().unwrap().to_string().as_str()).unwrap();

        let mut state = ClientState::new(addr, Duration::from_secs(1));
        assert!(!state.is_connected());

        assert_eq!(state.try_send(b"a:1|g").unwrap(), 5);
        assert!(state.is_connected());

        let mut buf = [0u8; 64];
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"a:1|g");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn reconnects_once_the_remote_appears() {
        use std::os::unix::net::UnixDatagram;

        let path = std::env::temp_dir().join(format!("server-telemetry-statsd-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let addr = RemoteAddr::try_from(format!("unixgram://{}", path.display()).as_str()).unwrap();
        let mut state = ClientState::new(addr, Duration::from_secs(1));

        assert!(state.try_send(b"a:1|g").is_err());
        assert!(!state.is_connected());

        let server = UnixDatagram::bind(&path).unwrap();
        server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(state.try_send(b"a:2|g").unwrap(), 5);
        assert!(state.is_connected());

        let mut buf = [0u8; 64];
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"a:2|g");

        drop(server);
        let _ = std::fs::remove_file(&path);
        assert!(state.try_send(b"a:3|g").is_err());
        assert!(!state.is_connected());
    }

    #[test]
    fn send_interrupted_by_a_panic_leaves_the_client_usable() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let addr = RemoteAddr::try_from(server.local_addr().unwrap().to_string().as_str()).unwrap();
        let mut state = ClientState::new(addr, Duration::from_secs(1));
        state.try_send(b"a:1|g").unwrap();

        // Mirrors a send that unwinds while the socket is out of its slot.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _client = state.client.take();
            panic!("send unwound");
        }));
        assert!(result.is_err());
        assert!(!state.is_connected());

        assert_eq!(state.try_send(b"a:2|g").unwrap(), 5);
        let mut buf = [0u8; 64];
        let first = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..first], b"a:1|g");
        let second = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..second], b"a:2|g");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_connect_stays_disconnected() {
        let addr = RemoteAddr::try_from("unix:///nonexistent/statsd.sock").unwrap();
        let mut state = ClientState::new(addr, Duration::from_secs(1));

        assert!(state.try_send(b"a:1|g").is_err());
        assert!(!state.is_connected());
        assert!(state.try_send(b"a:1|g").is_err());
    }
}
