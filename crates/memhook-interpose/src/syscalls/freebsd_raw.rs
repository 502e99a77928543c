//! FreeBSD Raw Syscall Wrappers
//!
//! FreeBSD documents `syscall(2)` as returning `int`, which truncates the
//! address returned by `SYS_mmap` on 64-bit targets. `__syscall(2)` returns a
//! full `off_t` and is used wherever pointers are 64 bits wide.
//!
//! Both are plain traps in libc and are never routed back through the
//! exported `mmap`/`munmap`. errno is set by libc on failure.

use libc::{c_int, c_void, off_t, size_t, ssize_t};

const SYS_WRITE: i64 = 4;
const SYS_MUNMAP: i64 = 73;
const SYS_MMAP: i64 = 477;

#[cfg(target_pointer_width = "64")]
extern "C" {
    fn __syscall(number: i64, ...) -> off_t;
}

/// Raw mmap syscall. Returns `MAP_FAILED` with errno set on failure.
///
/// The offset travels as one full 64-bit argument word; it is reinterpreted
/// as unsigned so no narrower type can sign-extend it on the way in.
#[inline(always)]
pub unsafe fn raw_mmap(
    addr: *mut c_void,
    len: size_t,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: off_t,
) -> *mut c_void {
    #[cfg(target_pointer_width = "64")]
    {
        __syscall(
            SYS_MMAP,
            addr,
            len,
            prot as i64,
            flags as i64,
            fd as i64,
            offset as u64,
        ) as *mut c_void
    }
    #[cfg(not(target_pointer_width = "64"))]
    {
        libc::syscall(SYS_MMAP as c_int, addr, len, prot, flags, fd, offset) as isize as *mut c_void
    }
}

/// Raw munmap syscall - returns `0` or `-1` with errno set.
#[inline(always)]
pub unsafe fn raw_munmap(addr: *mut c_void, len: size_t) -> c_int {
    #[cfg(target_pointer_width = "64")]
    {
        __syscall(SYS_MUNMAP, addr, len) as c_int
    }
    #[cfg(not(target_pointer_width = "64"))]
    {
        libc::syscall(SYS_MUNMAP as c_int, addr, len)
    }
}

/// Raw write syscall, used for the one diagnostic the hot path may emit.
#[inline(always)]
pub unsafe fn raw_write(fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
    #[cfg(target_pointer_width = "64")]
    {
        __syscall(SYS_WRITE, fd as i64, buf, count) as ssize_t
    }
    #[cfg(not(target_pointer_width = "64"))]
    {
        libc::syscall(SYS_WRITE as c_int, fd, buf, count) as ssize_t
    }
}
