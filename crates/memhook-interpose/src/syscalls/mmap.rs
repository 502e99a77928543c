//! Exported entry points.
//!
//! `mmap`, `munmap` and `sbrk` carry the platform's exact C signatures so the
//! dynamic linker resolves callers to them ahead of libc. They are left out of
//! this crate's own test binary, which would otherwise interpose itself.

use crate::INTERPOSER;
use libc::{c_int, c_void, off_t, size_t};

#[cfg(all(feature = "interpose", not(test)))]
use libc::intptr_t;

#[cfg(all(feature = "interpose", not(test)))]
#[no_mangle]
pub unsafe extern "C" fn mmap(
    addr: *mut c_void,
    len: size_t,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: off_t,
) -> *mut c_void {
    INTERPOSER.map(addr, len, prot, flags, fd, offset)
}

#[cfg(all(feature = "interpose", not(test)))]
#[no_mangle]
pub unsafe extern "C" fn munmap(addr: *mut c_void, len: size_t) -> c_int {
    INTERPOSER.unmap(addr, len)
}

#[cfg(all(feature = "interpose", not(test)))]
#[no_mangle]
pub unsafe extern "C" fn sbrk(increment: intptr_t) -> *mut c_void {
    INTERPOSER.adjust_break(increment)
}

/// mmap for hook code: honours an installed replacement, fires no hooks.
#[no_mangle]
pub unsafe extern "C" fn memhook_unhooked_mmap(
    addr: *mut c_void,
    len: size_t,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: off_t,
) -> *mut c_void {
    INTERPOSER.unhooked_map(addr, len, prot, flags, fd, offset)
}

/// munmap for hook code: honours an installed replacement, fires no hooks.
#[no_mangle]
pub unsafe extern "C" fn memhook_unhooked_munmap(addr: *mut c_void, len: size_t) -> c_int {
    INTERPOSER.unhooked_unmap(addr, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unhooked_exports_reach_the_kernel() {
        unsafe {
            let p = memhook_unhooked_mmap(
                std::ptr::null_mut(),
                8192,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            );
            assert_ne!(p, libc::MAP_FAILED);
            *(p as *mut u64) = 42;
            assert_eq!(memhook_unhooked_munmap(p, 8192), 0);
            assert_eq!(memhook_unhooked_munmap(0x1001 as *mut c_void, 8192), -1);
        }
    }
}
