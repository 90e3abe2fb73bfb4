use std::fmt::{Debug, Formatter};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::{Duration, Instant};

/// A TCP stream bound to one absolute deadline for the whole session.
///
/// The deadline is fixed when the connection is dialed and is never refreshed. Before every read
/// or write the socket timeouts are re-armed with whatever time is left, so a hung server blocks
/// at most until the deadline, after which every further I/O call fails with
/// [`io::ErrorKind::TimedOut`] and the connection must be discarded.
pub struct Deadline {
    stream: TcpStream,
    expires: Instant,
}

impl Deadline {
    /// Dial `host:port`, spending at most `timeout` on the connect, and start the session clock.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> io::Result<Self> {
        use std::net::ToSocketAddrs;

        let expires = Instant::now() + timeout;
        let mut last_err = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(Deadline { stream, expires }),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", host))
        }))
    }

    /// Time left before the session deadline trips.
    pub fn remaining(&self) -> Duration {
        self.expires.saturating_duration_since(Instant::now())
    }

    fn arm(&self) -> io::Result<()> {
        let left = self.remaining();
        if left.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "session deadline exceeded",
            ));
        }
        self.stream.set_read_timeout(Some(left))?;
        self.stream.set_write_timeout(Some(left))
    }
}

impl Read for Deadline {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.arm()?;
        self.stream.read(buf)
    }
}

impl Write for Deadline {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.arm()?;
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl Debug for Deadline {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Deadline({:?} left)", self.remaining())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn reads_and_writes_within_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"* OK ready\r\n").unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).unwrap();
            buf
        });

        let mut conn = Deadline::connect("127.0.0.1", port, Duration::from_secs(5)).unwrap();
        let mut buf = [0u8; 12];
        conn.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"* OK ready\r\n");
        conn.write_all(b"ping").unwrap();
        assert_eq!(&server.join().unwrap(), b"ping");
        assert!(conn.remaining() <= Duration::from_secs(5));
    }

    #[test]
    fn expired_deadline_fails_io() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut conn = Deadline::connect("127.0.0.1", port, Duration::from_millis(50)).unwrap();
        thread::sleep(Duration::from_millis(80));

        let err = conn.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        let err = conn.read(&mut [0u8; 1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
