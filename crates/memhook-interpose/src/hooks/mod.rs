//! Hook capability consumed by the interposer.
//!
//! A `MemoryHooks` implementation gets first refusal on every request:
//! observers see `pre_*`/`post_*` notifications, and a replacement may service
//! a map or unmap outright. Every method defaults to "do nothing / decline".

pub mod registry;

use libc::{c_int, c_void, intptr_t, off_t, size_t};

pub use registry::{HookError, HookTable, HOOKS};

/// Arguments of one `mmap` call, passed through untouched.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapRequest {
    pub start: *mut c_void,
    pub length: size_t,
    pub prot: c_int,
    pub flags: c_int,
    pub fd: c_int,
    pub offset: off_t,
}

impl MapRequest {
    pub const fn new(
        start: *mut c_void,
        length: size_t,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off_t,
    ) -> Self {
        Self {
            start,
            length,
            prot,
            flags,
            fd,
            offset,
        }
    }
}

pub trait MemoryHooks {
    fn pre_map(&self, _req: &MapRequest) {}

    /// `Some(result)` services the request; the real mmap is skipped.
    fn replace_map(&self, _req: &MapRequest) -> Option<*mut c_void> {
        None
    }

    fn post_map(&self, _result: *mut c_void, _req: &MapRequest) {}

    /// Fires before the region is released (or handed to a replacement).
    fn pre_unmap(&self, _start: *mut c_void, _length: size_t) {}

    /// `Some(status)` services the request; the real munmap is skipped.
    fn replace_unmap(&self, _start: *mut c_void, _length: size_t) -> Option<c_int> {
        None
    }

    fn pre_break(&self, _increment: intptr_t) {}

    fn post_break(&self, _result: *mut c_void, _increment: intptr_t) {}
}

impl<H: MemoryHooks + ?Sized> MemoryHooks for &H {
    #[inline]
    fn pre_map(&self, req: &MapRequest) {
        (**self).pre_map(req)
    }
    #[inline]
    fn replace_map(&self, req: &MapRequest) -> Option<*mut c_void> {
        (**self).replace_map(req)
    }
    #[inline]
    fn post_map(&self, result: *mut c_void, req: &MapRequest) {
        (**self).post_map(result, req)
    }
    #[inline]
    fn pre_unmap(&self, start: *mut c_void, length: size_t) {
        (**self).pre_unmap(start, length)
    }
    #[inline]
    fn replace_unmap(&self, start: *mut c_void, length: size_t) -> Option<c_int> {
        (**self).replace_unmap(start, length)
    }
    #[inline]
    fn pre_break(&self, increment: intptr_t) {
        (**self).pre_break(increment)
    }
    #[inline]
    fn post_break(&self, result: *mut c_void, increment: intptr_t) {
        (**self).post_break(result, increment)
    }
}

/// Hooks that observe nothing and replace nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl MemoryHooks for NoHooks {}
