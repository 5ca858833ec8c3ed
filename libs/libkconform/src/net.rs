//! Socket address builders.

use std::mem;
use std::net::Ipv4Addr;

use crate::error::Error;

/// `sockaddr_in` for `ip:port`, in network byte order.
pub fn inet_addr(ip: Ipv4Addr, port: u16) -> libc::sockaddr_in {
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    addr.sin_family = libc::AF_INET as libc::sa_family_t;
    addr.sin_port = port.to_be();
    addr.sin_addr = libc::in_addr {
        s_addr: u32::from(ip).to_be(),
    };
    addr
}

/// Inverse of [`inet_addr`].
pub fn inet_parts(addr: &libc::sockaddr_in) -> (Ipv4Addr, u16) {
    (
        Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)),
        u16::from_be(addr.sin_port),
    )
}

/// `sockaddr_un` for `path` and the length to pass with it.
///
/// A leading NUL byte makes an abstract name; its length covers exactly the
/// name bytes, with no terminator. Pathname addresses include the
/// terminating NUL.
pub fn unix_addr(path: &[u8]) -> Result<(libc::sockaddr_un, libc::socklen_t), Error> {
    let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    let abstract_name = path.first() == Some(&0);
    let capacity = if abstract_name {
        addr.sun_path.len()
    } else {
        addr.sun_path.len() - 1
    };
    if path.len() > capacity {
        return Err(Error::Unsupported(format!(
            "unix socket path of {} bytes does not fit",
            path.len()
        )));
    }
    for (dst, src) in addr.sun_path.iter_mut().zip(path) {
        *dst = *src as libc::c_char;
    }
    let extra = if abstract_name { 0 } else { 1 };
    let len = mem::size_of::<libc::sa_family_t>() + path.len() + extra;
    Ok((addr, len as libc::socklen_t))
}

/// Offset of `sun_path` inside `sockaddr_un`, i.e. the length of an
/// unnamed address.
pub fn unix_unnamed_len() -> libc::socklen_t {
    mem::size_of::<libc::sa_family_t>() as libc::socklen_t
}

pub fn socklen_of<T>() -> libc::socklen_t {
    mem::size_of::<T>() as libc::socklen_t
}

pub fn sockaddr_ptr<T>(addr: &T) -> *const libc::sockaddr {
    addr as *const T as *const libc::sockaddr
}

pub fn sockaddr_mut_ptr<T>(addr: &mut T) -> *mut libc::sockaddr {
    addr as *mut T as *mut libc::sockaddr
}

/// Port the kernel assigned to a bound socket.
pub fn local_port(fd: libc::c_int) -> Result<u16, Error> {
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = socklen_of::<libc::sockaddr_in>();
    let ret = unsafe { libc::getsockname(fd, sockaddr_mut_ptr(&mut addr), &mut len) };
    Error::from_ret("getsockname", ret as i64)?;
    Ok(inet_parts(&addr).1)
}

/// Set or clear `O_NONBLOCK`.
pub fn set_nonblocking(fd: libc::c_int, on: bool) -> Result<(), Error> {
    let flags = Error::from_ret("fcntl(F_GETFL)", unsafe { libc::fcntl(fd, libc::F_GETFL) } as i64)?
        as libc::c_int;
    let flags = if on {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    Error::from_ret("fcntl(F_SETFL)", unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } as i64)?;
    Ok(())
}
