//! The unhooked primitives: raw kernel traps for mmap/munmap and libc's own
//! `sbrk` reached through `RTLD_NEXT`.

#[cfg(target_os = "freebsd")]
pub mod freebsd_raw;
#[cfg(target_os = "linux")]
pub mod linux_raw;
pub mod mmap;

#[cfg(target_os = "freebsd")]
pub use freebsd_raw as raw;
#[cfg(target_os = "linux")]
pub use linux_raw as raw;

#[cfg(not(any(target_os = "freebsd", target_os = "linux")))]
compile_error!("memhook-interpose supports FreeBSD and Linux only");

use crate::hooks::MapRequest;
use crate::interposer::RawPrimitives;
use libc::{c_int, c_void, intptr_t, size_t};

/// The real thing: kernel traps plus libc's `sbrk`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPrimitives;

impl RawPrimitives for SystemPrimitives {
    #[inline(always)]
    unsafe fn map(&self, req: &MapRequest) -> *mut c_void {
        raw::raw_mmap(
            req.start, req.length, req.prot, req.flags, req.fd, req.offset,
        )
    }

    #[inline(always)]
    unsafe fn unmap(&self, start: *mut c_void, length: size_t) -> c_int {
        raw::raw_munmap(start, length)
    }

    #[inline(always)]
    unsafe fn adjust_break(&self, increment: intptr_t) -> *mut c_void {
        crate::reals::real_sbrk(increment)
    }
}
