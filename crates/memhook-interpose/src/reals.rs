//! Real Symbol Storage
//!
//! Lazily resolved pointers to the next definition of a symbol in link order,
//! so the exported `sbrk` can reach libc's `sbrk` instead of itself.
//!
//! The cache is a single `AtomicPtr`. Threads racing on first use may each
//! resolve the symbol once; every resolution yields the same address, so the
//! last store wins harmlessly and no lock sits on the call path.

use libc::{c_char, c_void, intptr_t};
use std::sync::atomic::{AtomicPtr, Ordering};

/// Looks up a NUL-terminated symbol name.
pub type Resolver = unsafe fn(*const c_char) -> *mut c_void;

/// `dlsym(RTLD_NEXT, name)`
pub unsafe fn dlsym_next(name: *const c_char) -> *mut c_void {
    libc::dlsym(libc::RTLD_NEXT, name)
}

/// Storage for a real libc function, resolved on first use
pub struct RealSymbol {
    ptr: AtomicPtr<c_void>,
    name: &'static str,
    resolver: Resolver,
}

impl RealSymbol {
    /// `name` must carry a trailing NUL.
    pub const fn new(name: &'static str) -> Self {
        Self::with_resolver(name, dlsym_next)
    }

    pub const fn with_resolver(name: &'static str, resolver: Resolver) -> Self {
        Self {
            ptr: AtomicPtr::new(std::ptr::null_mut()),
            name,
            resolver,
        }
    }

    /// Symbol name without the trailing NUL
    pub fn name(&self) -> &'static str {
        self.name.trim_end_matches('\0')
    }

    /// Get the real function pointer, or null if the resolver finds nothing.
    /// A null result is not cached.
    #[inline]
    pub unsafe fn get(&self) -> *mut c_void {
        let p = self.ptr.load(Ordering::Acquire);
        if !p.is_null() {
            return p;
        }
        let f = (self.resolver)(self.name.as_ptr() as *const c_char);
        if !f.is_null() {
            self.ptr.store(f, Ordering::Release);
        }
        f
    }

    /// Like [`get`](Self::get), but an unresolvable symbol terminates the
    /// process. There is no correct fallback for a missing `sbrk`.
    #[inline]
    pub unsafe fn get_or_abort(&self) -> *mut c_void {
        let f = self.get();
        if f.is_null() {
            crate::fatal_unresolved(self.name());
        }
        f
    }
}

pub type SbrkFn = unsafe extern "C" fn(intptr_t) -> *mut c_void;

pub static REAL_SBRK: RealSymbol = RealSymbol::new("sbrk\0");

/// Call libc's `sbrk`, bypassing the exported one.
#[inline]
pub unsafe fn real_sbrk(increment: intptr_t) -> *mut c_void {
    let f: SbrkFn = std::mem::transmute::<*mut c_void, SbrkFn>(REAL_SBRK.get_or_abort());
    f(increment)
}
