use std::fmt;
use std::io;
use std::net;
use std::net::{SocketAddr, ToSocketAddrs};

pub type NetworkResult<T> = Result<T, NetworkError>;

#[derive(Debug, Eq, PartialEq)]
pub enum NetworkError {
    /// The operation cannot make progress yet and should be retried.
    Wait,
    Fatal(ErrorType),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorType {
    PayloadTooLarge,
    EmptyPayload,
    QueueClosed,
    NotConnected,
    AddrParse,
    Serialization,
    UnknownTag,
    Io(io::ErrorKind),
}

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => NetworkError::Wait,
            kind => NetworkError::Fatal(ErrorType::Io(kind)),
        }
    }
}

impl From<net::AddrParseError> for NetworkError {
    #[inline]
    fn from(_: net::AddrParseError) -> Self {
        NetworkError::Fatal(ErrorType::AddrParse)
    }
}

pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for NetworkResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(NetworkError::Wait) => false,
            _ => true,
        }
    }
}

/// A remote peer address. Equality is by value; the client side of a router
/// keys its connection dedup on this.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl Destination {
    #[inline]
    pub fn new<H: Into<String>>(host: H, port: u16) -> Destination {
        Destination {
            host: host.into(),
            port,
        }
    }

    /// Parses a `host:port` string.
    pub fn parse(value: &str) -> NetworkResult<Destination> {
        let split = value
            .rfind(':')
            .ok_or(NetworkError::Fatal(ErrorType::AddrParse))?;

        let host = &value[..split];
        let port: u16 = value[split + 1..]
            .parse()
            .map_err(|_| NetworkError::Fatal(ErrorType::AddrParse))?;

        if host.is_empty() {
            return Err(NetworkError::Fatal(ErrorType::AddrParse));
        }

        Ok(Destination::new(host, port))
    }

    /// Resolves the destination to a socket address.
    pub fn resolve(&self) -> NetworkResult<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or(NetworkError::Fatal(ErrorType::AddrParse))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The side of a dual router a connection belongs to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Side {
    Server,
    Client,
}

/// Opaque transport-level identity of a live connection. Sufficient to send a
/// reply over the same connection without a destination lookup.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ConnectionId {
    pub side: Side,
    pub token: usize,
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.side {
            Side::Server => write!(f, "srv/{}", self.token),
            Side::Client => write!(f, "cli/{}", self.token),
        }
    }
}

/// A fully assembled inbound frame together with the identity of the
/// connection it arrived on. Valid from frame completion until the handler
/// returns.
#[derive(Debug, Clone)]
pub struct RouterMessage {
    pub payload: Vec<u8>,
    pub origin: ConnectionId,
    pub peer: SocketAddr,
    /// Set on client-side connections: the destination the connection was
    /// dialed for.
    pub dest: Option<Destination>,
}

/// Receives assembled frames and connectivity changes. Callbacks run on the
/// reactor thread and must not block; anything beyond a trivial handoff has to
/// be deferred to a worker queue.
pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: RouterMessage);

    fn on_disconnect(&self, _origin: ConnectionId, _peer: SocketAddr, _dest: Option<&Destination>) {}
}
