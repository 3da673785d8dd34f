use crate::connection::Connection;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Pending connections the kernel queues before `accept`
const BACKLOG: i32 = 1024;

/// Listener collaborator driven by the accept loop
pub trait Accept: Send + Sync {
    /// Mark the listener as serving
    fn start(&self);

    /// Stop serving; the accept loop exits at its next check
    fn stop(&self);

    fn is_listening(&self) -> bool;

    /// Block until a client connects. An error here is fatal for the server.
    fn accept(&self) -> io::Result<Connection>;

    fn local_addr(&self) -> SocketAddr;
}

/// Owns the listening socket; bound at construction, accepted from by the server loop
pub struct ConnectionAcceptor {
    listener: TcpListener,
    address: SocketAddr,
    listening: AtomicBool,
    connection_count: AtomicUsize,
}

impl ConnectionAcceptor {
    /// Create a new connection acceptor bound to the specified address
    pub fn new<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket_addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "No socket addresses found")
        })?;

        let socket = Self::create_socket(&socket_addr)?;
        let listener: TcpListener = socket.into();
        let address = listener.local_addr()?;

        Ok(Self {
            listener,
            address,
            listening: AtomicBool::new(false),
            connection_count: AtomicUsize::new(0),
        })
    }

    /// Connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::Relaxed)
    }

    /// Create a properly configured blocking socket
    fn create_socket(addr: &SocketAddr) -> io::Result<Socket> {
        let domain = if addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&socket2::SockAddr::from(*addr))?;
        socket.listen(BACKLOG)?;

        Ok(socket)
    }
}

impl Accept for ConnectionAcceptor {
    fn start(&self) {
        self.listening.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.listening.store(false, Ordering::SeqCst);
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn accept(&self) -> io::Result<Connection> {
        let (stream, addr) = self.listener.accept()?;
        let count = self.connection_count.fetch_add(1, Ordering::Relaxed);
        Ok(Connection::new(stream, addr, count))
    }

    /// Get the local address this acceptor is bound to
    fn local_addr(&self) -> SocketAddr {
        self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;

    #[test]
    fn test_bind_ephemeral_port_and_accept() {
        let acceptor = ConnectionAcceptor::new("127.0.0.1:0").unwrap();
        let addr = acceptor.local_addr();
        assert_ne!(addr.port(), 0);
        assert!(!acceptor.is_listening());

        acceptor.start();
        assert!(acceptor.is_listening());

        let _client = TcpStream::connect(addr).unwrap();
        let connection = acceptor.accept().unwrap();
        assert_eq!(connection.id(), 0);
        assert_eq!(connection.peer_addr().ip().to_string(), "127.0.0.1");
        assert_eq!(acceptor.connection_count(), 1);

        acceptor.stop();
        assert!(!acceptor.is_listening());
    }
}
