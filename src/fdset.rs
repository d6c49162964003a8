//! A safe wrapper around `libc::fd_set` plus the `select(2)` call itself,
//! the embeddable readiness primitive `Session::run` is built on.

use std::io;
use std::mem::MaybeUninit;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// A `select(2)`-compatible descriptor set.
pub struct FdSet(libc::fd_set);

impl FdSet {
    pub fn new() -> Self {
        unsafe {
            let mut set = MaybeUninit::<libc::fd_set>::uninit();
            libc::FD_ZERO(set.as_mut_ptr());
            FdSet(set.assume_init())
        }
    }

    pub fn set(&mut self, fd: RawFd) {
        unsafe { libc::FD_SET(fd, &mut self.0) };
    }

    pub fn is_set(&self, fd: RawFd) -> bool {
        unsafe { libc::FD_ISSET(fd, &self.0) }
    }

    fn as_mut_ptr(&mut self) -> *mut libc::fd_set {
        &mut self.0
    }
}

impl Default for FdSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocks until one of `read_set`/`write_set` has a ready descriptor, `timeout`
/// elapses, or an error occurs. `timeout` of `None` blocks indefinitely,
/// matching `Session::run`'s default; a caller embedding `add_descriptors`/
/// `process_descriptors` directly in its own loop may pass a shorter one.
pub fn select(
    maxfd: RawFd,
    read_set: &mut FdSet,
    write_set: &mut FdSet,
    timeout: Option<Duration>,
) -> io::Result<usize> {
    let mut tv = timeout.map(|d| libc::timeval {
        tv_sec: d.as_secs() as libc::time_t,
        tv_usec: d.subsec_micros() as libc::suseconds_t,
    });
    let tv_ptr = match &mut tv {
        Some(tv) => tv as *mut libc::timeval,
        None => std::ptr::null_mut(),
    };

    let rc = unsafe {
        libc::select(
            maxfd + 1,
            read_set.as_mut_ptr(),
            write_set.as_mut_ptr(),
            std::ptr::null_mut(),
            tv_ptr,
        )
    };

    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err);
    }
    Ok(rc as usize)
}
