//! Raw socket plumbing the `net` module needs that `std::net` doesn't
//! expose: creating a connect that returns before it completes, and reading
//! back `SO_ERROR` once it does.
//!
//! Standard `EINPROGRESS`/`getsockopt(SO_ERROR)` nonblocking-connect
//! handling, without a `poll(2)` loop of its own — here the *loop*, not the
//! calling thread, waits for write-readiness.

use std::io;
use std::mem;
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{FromRawFd, RawFd};

use libc::{c_int, c_void, sockaddr, socklen_t, SOCK_CLOEXEC, SOCK_STREAM};

/// Creates a non-blocking TCP socket and issues `connect(2)`, returning as
/// soon as the kernel has either completed the connect synchronously or
/// reported `EINPROGRESS`. The caller registers the resulting stream for
/// write-readiness and later calls [`take_socket_error`] to learn the
/// outcome.
pub fn connect_nonblocking(addr: &SocketAddr) -> io::Result<TcpStream> {
    let family = match addr {
        SocketAddr::V4(..) => libc::AF_INET,
        SocketAddr::V6(..) => libc::AF_INET6,
    };

    let fd = crate::sys::syscall!(socket(family, SOCK_STREAM | SOCK_CLOEXEC, 0))?;

    let stream = unsafe { TcpStream::from_raw_fd(fd) };
    stream.set_nonblocking(true)?;

    let result = match addr {
        SocketAddr::V4(a) => {
            let raw = socket2_sockaddr_in(a);
            crate::sys::syscall!(connect(
                fd,
                &raw as *const libc::sockaddr_in as *const sockaddr,
                mem::size_of::<libc::sockaddr_in>() as socklen_t
            ))
        }
        SocketAddr::V6(a) => {
            let raw = socket2_sockaddr_in6(a);
            crate::sys::syscall!(connect(
                fd,
                &raw as *const libc::sockaddr_in6 as *const sockaddr,
                mem::size_of::<libc::sockaddr_in6>() as socklen_t
            ))
        }
    };

    match result {
        Ok(_) => Ok(stream),
        Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => Ok(stream),
        Err(e) => Err(e),
    }
}

/// Reads and clears `SO_ERROR` on `fd`. `Ok(None)` means the connect
/// succeeded; `Ok(Some(e))` carries the refusal/failure cause.
pub fn take_socket_error(fd: RawFd) -> io::Result<Option<io::Error>> {
    let mut raw: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;

    crate::sys::syscall!(getsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_ERROR,
        &mut raw as *mut _ as *mut c_void,
        &mut len
    ))?;

    if raw == 0 {
        Ok(None)
    } else {
        Ok(Some(io::Error::from_raw_os_error(raw)))
    }
}

fn socket2_sockaddr_in(addr: &std::net::SocketAddrV4) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        },
        sin_zero: [0; 8],
    }
}

fn socket2_sockaddr_in6(addr: &std::net::SocketAddrV6) -> libc::sockaddr_in6 {
    libc::sockaddr_in6 {
        sin6_family: libc::AF_INET6 as libc::sa_family_t,
        sin6_port: addr.port().to_be(),
        sin6_flowinfo: addr.flowinfo(),
        sin6_addr: libc::in6_addr {
            s6_addr: addr.ip().octets(),
        },
        sin6_scope_id: addr.scope_id(),
    }
}
