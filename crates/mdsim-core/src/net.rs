//! Socket helpers the std API does not expose: non-blocking connect and
//! receive-buffer sizing.

use std::{
    io,
    mem,
    net::{SocketAddr, SocketAddrV4, TcpStream, ToSocketAddrs},
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
};

#[inline]
fn cvt(rc: libc::c_int) -> io::Result<libc::c_int> {
    if rc < 0 { Err(io::Error::last_os_error()) } else { Ok(rc) }
}

fn set_int_opt(
    fd: RawFd,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> io::Result<()> {
    // SAFETY: `value` outlives the call and the length matches its type.
    cvt(unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    })
    .map(|_| ())
}

fn get_int_opt(fd: RawFd, level: libc::c_int, name: libc::c_int) -> io::Result<libc::c_int> {
    let mut value: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: `value`/`len` are valid out-pointers sized for a c_int.
    cvt(unsafe {
        libc::getsockopt(
            fd,
            level,
            name,
            &mut value as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    })?;
    Ok(value)
}

/// Request a kernel receive buffer of `bytes`. The kernel may clamp or
/// double the value.
pub fn set_recv_buffer(socket: &impl AsRawFd, bytes: usize) -> io::Result<()> {
    let bytes = bytes.min(libc::c_int::MAX as usize) as libc::c_int;
    set_int_opt(socket.as_raw_fd(), libc::SOL_SOCKET, libc::SO_RCVBUF, bytes)
}

/// Effective kernel receive buffer size.
pub fn recv_buffer(socket: &impl AsRawFd) -> io::Result<usize> {
    get_int_opt(socket.as_raw_fd(), libc::SOL_SOCKET, libc::SO_RCVBUF).map(|v| v as usize)
}

/// Resolve `host:port` to its first IPv4 address.
pub fn resolve_ipv4(host: &str, port: u16) -> io::Result<SocketAddrV4> {
    (host, port)
        .to_socket_addrs()?
        .find_map(|a| match a {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no IPv4 address for {host}:{port}"))
        })
}

/// Start a non-blocking IPv4 TCP connect with `TCP_NODELAY` and the given
/// receive buffer.
///
/// Returns as soon as the connect is issued; the socket becomes writable once
/// the handshake finishes, after which `TcpStream::take_error` reports the
/// outcome.
pub fn connect_nonblocking(addr: SocketAddrV4, recv_buffer_bytes: usize) -> io::Result<TcpStream> {
    // SAFETY: plain syscall; the descriptor is checked and owned below.
    let fd = cvt(unsafe {
        libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC, 0)
    })?;
    // SAFETY: `fd` is freshly created and owned only here; closed on drop.
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };

    set_int_opt(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, 1)?;
    if recv_buffer_bytes > 0 {
        set_recv_buffer(&owned, recv_buffer_bytes)?;
    }

    // SAFETY: all-zero is a valid sockaddr_in.
    let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
    sa.sin_family = libc::AF_INET as libc::sa_family_t;
    sa.sin_port = addr.port().to_be();
    sa.sin_addr = libc::in_addr { s_addr: u32::from(*addr.ip()).to_be() };

    // SAFETY: `sa` is a fully initialized sockaddr_in of the stated length.
    let rc = unsafe {
        libc::connect(
            fd,
            &sa as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINPROGRESS) {
            return Err(err);
        }
    }

    Ok(TcpStream::from(owned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::{Events, Interest, Poller};
    use std::{net::TcpListener, time::Duration};

    #[test]
    fn nonblocking_connect_completes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let addr = SocketAddrV4::new([127, 0, 0, 1].into(), port);
        let stream = connect_nonblocking(addr, 1 << 20).unwrap();
        let poller = Poller::new().unwrap();
        poller.add(&stream, 7, Interest::WRITABLE).unwrap();
        let mut events = Events::with_capacity(4);
        assert_eq!(poller.wait(&mut events, Some(Duration::from_secs(2))).unwrap(), 1);
        assert!(stream.take_error().unwrap().is_none());
        assert!(stream.nodelay().unwrap());
        assert!(recv_buffer(&stream).unwrap() > 0);

        let (_accepted, _) = listener.accept().unwrap();
    }

    #[test]
    fn resolves_localhost_to_ipv4() {
        let addr = resolve_ipv4("127.0.0.1", 9876).unwrap();
        assert_eq!(addr.port(), 9876);
        assert!(addr.ip().is_loopback());
    }
}
