//! Low-level socket helpers: nonblocking connect, ephemeral-port listeners,
//! and the historical host-byte-order IPv4 encoding DCC negotiation uses on
//! the wire.

use crate::error::{Error, Result};
use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::{FromRawFd, RawFd};

/// Encodes an IPv4 address as the decimal unsigned 32-bit integer DCC
/// negotiation puts on the wire: `(a<<24)|(b<<16)|(c<<8)|d`, regardless of
/// the host machine's endianness. This is *not* a network-byte-order
/// encoding — it is a historical quirk every implementation must reproduce
/// bit-for-bit to interoperate.
pub fn ip_to_dcc_host_order(addr: Ipv4Addr) -> u32 {
    let [a, b, c, d] = addr.octets();
    (u32::from(a) << 24) | (u32::from(b) << 16) | (u32::from(c) << 8) | u32::from(d)
}

/// Inverse of [`ip_to_dcc_host_order`].
pub fn dcc_host_order_to_ip(value: u32) -> Ipv4Addr {
    Ipv4Addr::new(
        (value >> 24) as u8,
        (value >> 16) as u8,
        (value >> 8) as u8,
        value as u8,
    )
}

/// Resolves `host:port` and initiates a nonblocking connect: opens a TCP
/// socket in nonblocking mode and issues `connect`. Returns once the connect
/// has been *initiated*; completion is observed later via writable
/// readiness, not by this call.
pub fn connect_nonblocking(host: &str, port: u16) -> Result<TcpStream> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(Error::Connect)?
        .next()
        .ok_or(Error::Invalid)?;
    connect_nonblocking_addr(addr)
}

/// Same as [`connect_nonblocking`] but for an already-resolved address, used
/// directly when accepting an offered DCC session and connecting out to the
/// advertised peer.
pub fn connect_nonblocking_addr(addr: SocketAddr) -> Result<TcpStream> {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        if fd < 0 {
            return Err(Error::Socket(io::Error::last_os_error()));
        }

        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            libc::close(fd);
            return Err(Error::Socket(io::Error::last_os_error()));
        }

        let (sockaddr, len) = socketaddr_to_raw(addr);
        let rc = libc::connect(fd, &sockaddr as *const _ as *const libc::sockaddr, len);
        if rc < 0 {
            let err = io::Error::last_os_error();
            let in_progress = err.raw_os_error() == Some(libc::EINPROGRESS)
                || err.kind() == io::ErrorKind::WouldBlock;
            if !in_progress {
                libc::close(fd);
                return Err(Error::Connect(err));
            }
        }

        Ok(TcpStream::from_raw_fd(fd))
    }
}

fn socketaddr_to_raw(addr: SocketAddr) -> (libc::sockaddr_in, libc::socklen_t) {
    match addr {
        SocketAddr::V4(v4) => {
            let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            (sin, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
        }
        SocketAddr::V6(_) => {
            // DCC and the main session both speak IPv4 on the wire; an
            // IPv6-only resolution is a configuration error.
            (unsafe { mem::zeroed() }, 0)
        }
    }
}

/// Binds a listening socket on an ephemeral port on the given local address,
/// used when offering an outbound DCC session.
pub fn listen_on_ephemeral_port(local_ip: Ipv4Addr) -> Result<TcpListener> {
    let addr = SocketAddrV4::new(local_ip, 0);
    let listener = TcpListener::bind(addr).map_err(Error::Socket)?;
    listener.set_nonblocking(true).map_err(Error::Socket)?;
    Ok(listener)
}

/// Probes a freshly-connecting socket for a pending `SO_ERROR` once it
/// becomes writable — the standard way to learn whether a nonblocking
/// `connect` succeeded. Shared by the main session socket and every DCC
/// socket, both of which drive a nonblocking connect the same way.
pub fn probe_connect_error(fd: std::os::unix::io::RawFd) -> io::Result<()> {
    let mut err: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    if err != 0 {
        return Err(io::Error::from_raw_os_error(err));
    }
    Ok(())
}

/// Reads the local address a connected or connecting socket is bound to,
/// without taking ownership of the descriptor away from its `Stream`.
pub fn local_addr_of(fd: RawFd) -> io::Result<SocketAddr> {
    unsafe {
        let mut storage: libc::sockaddr_in = mem::zeroed();
        let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let rc = libc::getsockname(
            fd,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
        );
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        let ip = Ipv4Addr::from(storage.sin_addr.s_addr.to_ne_bytes());
        let port = u16::from_be(storage.sin_port);
        Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
    }
}
