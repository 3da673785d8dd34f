use crate::error::{ServerError, ServerResult};
use crate::http::{HttpParser, Request, Response};
use log::warn;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

const READ_CHUNK: usize = 8 * 1024;

/// Represents the current state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Reading,
    Processing,
    Writing,
    Closed,
}

/// One accepted client connection, serving exactly one request.
///
/// The stream is shut down when the connection is closed or dropped, so every
/// exit path releases it.
pub struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    id: usize,
    state: ConnectionState,
    max_header_size: usize,
}

impl Connection {
    /// Create a new connection from a TcpStream
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, id: usize) -> Self {
        // Set TCP_NODELAY to disable Nagle's algorithm; a peer that already
        // went away can make this fail, which only concerns this connection
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Could not set TCP_NODELAY on connection {} from {}: {}", id, peer_addr, e);
        }

        Self {
            stream,
            peer_addr,
            id,
            state: ConnectionState::New,
            max_header_size: 16 * 1024,
        }
    }

    /// Limit how long a read may block; `None` waits forever
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    pub fn set_max_header_size(&mut self, size: usize) {
        self.max_header_size = size;
    }

    /// Read and parse the request, draining its whole body
    pub fn read_request(&mut self) -> ServerResult<Request> {
        self.state = ConnectionState::Reading;
        let mut parser = HttpParser::with_max_header_size(self.max_header_size);
        let mut chunk = [0u8; READ_CHUNK];

        while !parser.is_complete() {
            let read = self.stream.read(&mut chunk)?;
            if read == 0 {
                return Err(ServerError::Connection(format!(
                    "Connection {} closed before the request was complete",
                    self.id
                )));
            }
            parser.parse(&chunk[..read])?;
        }

        self.state = ConnectionState::Processing;
        parser.get_request(self.peer_addr)
    }

    /// Serialize and send a complete response
    pub fn write_response(&mut self, response: &Response) -> ServerResult<()> {
        self.state = ConnectionState::Writing;
        let encoded = response.serialize()?;
        self.stream.write_all(&encoded)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Writable side of the connection for streamed responses
    pub fn writer(&mut self) -> &mut TcpStream {
        self.state = ConnectionState::Writing;
        &mut self.stream
    }

    /// Close the connection
    pub fn close(&mut self) -> io::Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.state = ConnectionState::Closed;
        self.stream.shutdown(Shutdown::Both)
    }

    /// Get the connection's peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Get the connection's unique ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Get the current state of the connection
    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use std::net::TcpListener;
    use std::thread;

    fn pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, addr) = listener.accept().unwrap();
        (Connection::new(stream, addr, 7), client)
    }

    #[test]
    fn test_read_request_drains_body() {
        let (mut connection, mut client) = pair();

        let writer = thread::spawn(move || {
            client.write_all(b"POST /echo?x=1 HTTP/1.1\r\nHost: t\r\nContent-Length: 10\r\n\r\n01234").unwrap();
            thread::sleep(Duration::from_millis(20));
            client.write_all(b"56789").unwrap();
            client
        });

        let request = connection.read_request().unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.path, "/echo");
        assert_eq!(request.body, "0123456789");
        assert_eq!(request.client_address, "127.0.0.1");
        assert_eq!(connection.state(), ConnectionState::Processing);

        writer.join().unwrap();
    }

    #[test]
    fn test_truncated_request_is_an_error() {
        let (mut connection, mut client) = pair();
        client.write_all(b"GET / HTTP/1.1\r\nHost: t\r\n").unwrap();
        drop(client);

        assert!(matches!(connection.read_request(), Err(ServerError::Connection(_))));
    }

    #[test]
    fn test_write_response_then_close() {
        let (mut connection, mut client) = pair();
        connection
            .write_response(&Response::new().with_body("hi"))
            .unwrap();
        connection.close().unwrap();
        assert_eq!(connection.state(), ConnectionState::Closed);

        let mut received = String::new();
        client.read_to_string(&mut received).unwrap();
        assert!(received.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(received.ends_with("\r\n\r\nhi"));
    }
}
