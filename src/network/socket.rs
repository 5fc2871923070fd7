//! Socket setup
//!
//! Listener creation goes through socket2 so SO_REUSEADDR and the backlog
//! can be set before binding.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{ConnectFailureReason, NetworkError};

/// Pending connections the kernel queues for the accept loop
const LISTEN_BACKLOG: i32 = 10;

/// Bind a TCP listener on `addr` with address reuse enabled
pub fn bind_listener(addr: SocketAddr) -> Result<TcpListener, NetworkError> {
    let bind_failed = |source: io::Error| NetworkError::BindFailed { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_failed)?;
    socket.set_reuse_address(true).map_err(bind_failed)?;
    socket.bind(&addr.into()).map_err(bind_failed)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_failed)?;

    Ok(socket.into())
}

/// Resolve `host:port`, mapping lookup failures to a DNS connect failure
pub fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, NetworkError> {
    let target = format!("{host}:{port}");
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| NetworkError::ConnectFailed {
            target: target.clone(),
            reason: ConnectFailureReason::Dns,
            detail: e.to_string(),
        })?
        .collect();

    if addrs.is_empty() {
        return Err(NetworkError::ConnectFailed {
            target,
            reason: ConnectFailureReason::Dns,
            detail: "no addresses found".into(),
        });
    }
    Ok(addrs)
}

/// Connect to the first reachable address before `deadline`
pub fn connect(
    target: &str,
    addrs: &[SocketAddr],
    deadline: Instant,
) -> Result<TcpStream, NetworkError> {
    let mut last_error = None;

    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match TcpStream::connect_timeout(addr, remaining) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!(%addr, "connect attempt failed: {}", e);
                last_error = Some(e);
            }
        }
    }

    let (reason, detail) = match last_error {
        Some(e) => (classify(&e), e.to_string()),
        None => (ConnectFailureReason::Timeout, "connect timeout elapsed".to_string()),
    };
    Err(NetworkError::ConnectFailed {
        target: target.to_string(),
        reason,
        detail,
    })
}

fn classify(err: &io::Error) -> ConnectFailureReason {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => ConnectFailureReason::Refused,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ConnectFailureReason::Timeout,
        _ => ConnectFailureReason::Unreachable,
    }
}

/// Apply per-stream options shared by both ends
pub fn configure_stream(
    stream: &TcpStream,
    nodelay: bool,
    read_timeout: Duration,
    write_timeout: Duration,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(nodelay)?;
    stream.set_read_timeout(Some(read_timeout))?;
    stream.set_write_timeout(Some(write_timeout))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[test]
    fn test_ephemeral_bind() {
        let listener = bind_listener(loopback(0)).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_port_in_use() {
        let first = bind_listener(loopback(0)).unwrap();
        let taken = first.local_addr().unwrap();
        // Reuse-address still refuses a second active listener
        let err = bind_listener(taken).unwrap_err();
        assert!(matches!(err, NetworkError::BindFailed { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::BindFailure);
    }

    #[test]
    fn test_refused() {
        let addr = {
            let listener = bind_listener(loopback(0)).unwrap();
            listener.local_addr().unwrap()
        };
        let started = Instant::now();
        let err = connect("closed", &[addr], started + Duration::from_secs(5)).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(
            err.connect_reason(),
            Some(ConnectFailureReason::Refused | ConnectFailureReason::Timeout)
        ));
    }

    #[test]
    fn test_expired_deadline() {
        let err = connect("late", &[loopback(9)], Instant::now()).unwrap_err();
        assert_eq!(err.connect_reason(), Some(ConnectFailureReason::Timeout));
    }

    #[test]
    fn test_resolve_localhost() {
        let addrs = resolve("127.0.0.1", 4000).unwrap();
        assert_eq!(addrs, vec![loopback(4000)]);
    }
}
