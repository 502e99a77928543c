//! Process-wide hook table.
//!
//! C-ABI callbacks live in fixed arrays of atomic slots so that invoking them
//! on the interposed path is lock-free and allocation-free. Registration takes
//! a per-list spin lock; readers never do.
//!
//! Notification lists hold up to [`MAX_HOOKS`] callbacks each. Replacements
//! are singular: a second one is refused until the first is removed.

use super::{MapRequest, MemoryHooks};
use libc::{c_int, c_void, intptr_t, off_t, size_t};
use memhook_config::{log_hooks_debug, log_hooks_warn};
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

pub const MAX_HOOKS: usize = 7;

pub type PreMmapHook =
    extern "C" fn(start: *const c_void, size: size_t, prot: c_int, flags: c_int, fd: c_int, offset: off_t);
/// Returns non-zero if it handled the request and wrote `*result`.
pub type MmapReplacement = extern "C" fn(
    start: *const c_void,
    size: size_t,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: off_t,
    result: *mut *mut c_void,
) -> c_int;
pub type MmapHook = extern "C" fn(
    result: *const c_void,
    start: *const c_void,
    size: size_t,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: off_t,
);
pub type MunmapHook = extern "C" fn(ptr: *const c_void, size: size_t);
/// Returns non-zero if it handled the request and wrote `*result`.
pub type MunmapReplacement =
    extern "C" fn(ptr: *const c_void, size: size_t, result: *mut c_int) -> c_int;
pub type PreSbrkHook = extern "C" fn(increment: intptr_t);
pub type SbrkHook = extern "C" fn(result: *const c_void, increment: intptr_t);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HookError {
    #[error("hook list `{0}` is full")]
    ListFull(&'static str),
    #[error("a replacement is already installed for `{0}`")]
    ReplacementInstalled(&'static str),
    #[error("hook is not registered in `{0}`")]
    NotRegistered(&'static str),
}

/// A function pointer that can sit in an atomic slot.
pub trait HookFn: Copy {
    fn into_raw(self) -> *mut ();
    /// # Safety
    /// `raw` must have come from `into_raw` on the same type.
    unsafe fn from_raw(raw: *mut ()) -> Self;
}

macro_rules! impl_hook_fn {
    ($($ty:ty),* $(,)?) => {
        $(
            impl HookFn for $ty {
                #[inline(always)]
                fn into_raw(self) -> *mut () {
                    self as *mut ()
                }
                #[inline(always)]
                unsafe fn from_raw(raw: *mut ()) -> Self {
                    std::mem::transmute::<*mut (), $ty>(raw)
                }
            }
        )*
    };
}

impl_hook_fn!(
    PreMmapHook,
    MmapReplacement,
    MmapHook,
    MunmapHook,
    MunmapReplacement,
    PreSbrkHook,
    SbrkHook,
);

/// Fixed-capacity list of hooks of one kind.
pub struct HookList<F: HookFn, const N: usize> {
    name: &'static str,
    slots: [AtomicPtr<()>; N],
    /// One past the highest slot that may be occupied.
    end: AtomicUsize,
    lock: AtomicBool,
    _marker: PhantomData<F>,
}

// Slots only hold plain function pointers.
unsafe impl<F: HookFn, const N: usize> Sync for HookList<F, N> {}
unsafe impl<F: HookFn, const N: usize> Send for HookList<F, N> {}

impl<F: HookFn, const N: usize> HookList<F, N> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: [const { AtomicPtr::new(ptr::null_mut()) }; N],
            end: AtomicUsize::new(0),
            lock: AtomicBool::new(false),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        let r = f();
        self.lock.store(false, Ordering::Release);
        r
    }

    /// Put `hook` in the first free slot; returns the slot index.
    pub fn add(&self, hook: F) -> Result<usize, HookError> {
        let raw = hook.into_raw();
        self.with_lock(|| {
            let idx = self
                .slots
                .iter()
                .position(|s| s.load(Ordering::Relaxed).is_null())
                .ok_or(HookError::ListFull(self.name))?;
            self.slots[idx].store(raw, Ordering::Release);
            if idx >= self.end.load(Ordering::Relaxed) {
                self.end.store(idx + 1, Ordering::Release);
            }
            Ok(idx)
        })
    }

    /// Remove the first slot holding `hook`.
    pub fn remove(&self, hook: F) -> Result<(), HookError> {
        let raw = hook.into_raw();
        self.with_lock(|| {
            let end = self.end.load(Ordering::Relaxed);
            let idx = self.slots[..end]
                .iter()
                .position(|s| s.load(Ordering::Relaxed) == raw)
                .ok_or(HookError::NotRegistered(self.name))?;
            self.slots[idx].store(ptr::null_mut(), Ordering::Release);

            let mut new_end = end;
            while new_end > 0 && self.slots[new_end - 1].load(Ordering::Relaxed).is_null() {
                new_end -= 1;
            }
            self.end.store(new_end, Ordering::Release);
            Ok(())
        })
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end.load(Ordering::Acquire) == 0
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        let end = self.end.load(Ordering::Acquire);
        self.slots[..end]
            .iter()
            .filter(|s| !s.load(Ordering::Acquire).is_null())
            .count()
    }

    /// Call `f` for every registered hook, in slot order.
    #[inline]
    pub fn for_each(&self, mut f: impl FnMut(F)) {
        let end = self.end.load(Ordering::Acquire);
        for slot in &self.slots[..end] {
            let raw = slot.load(Ordering::Acquire);
            if !raw.is_null() {
                f(unsafe { F::from_raw(raw) });
            }
        }
    }

    /// First registered hook, if any
    #[inline]
    pub fn first(&self) -> Option<F> {
        let end = self.end.load(Ordering::Acquire);
        self.slots[..end]
            .iter()
            .map(|s| s.load(Ordering::Acquire))
            .find(|p| !p.is_null())
            .map(|raw| unsafe { F::from_raw(raw) })
    }
}

/// Every hook and replacement the interposer consults.
pub struct HookTable {
    pub pre_mmap: HookList<PreMmapHook, MAX_HOOKS>,
    pub mmap_replacement: HookList<MmapReplacement, 1>,
    pub mmap: HookList<MmapHook, MAX_HOOKS>,
    pub munmap: HookList<MunmapHook, MAX_HOOKS>,
    pub munmap_replacement: HookList<MunmapReplacement, 1>,
    pub pre_sbrk: HookList<PreSbrkHook, MAX_HOOKS>,
    pub sbrk: HookList<SbrkHook, MAX_HOOKS>,
}

/// The table behind the exported symbols.
pub static HOOKS: HookTable = HookTable::new();

impl Default for HookTable {
    fn default() -> Self {
        Self::new()
    }
}

fn added<T>(list: &'static str, r: Result<T, HookError>) -> Result<(), HookError> {
    match r {
        Ok(_) => {
            log_hooks_debug!("Hook registered", list = list);
            Ok(())
        }
        Err(e) => {
            log_hooks_warn!("Hook registration refused", list = list, error = tracing::field::display(&e));
            Err(e)
        }
    }
}

fn removed(list: &'static str, r: Result<(), HookError>) -> Result<(), HookError> {
    if r.is_ok() {
        log_hooks_debug!("Hook removed", list = list);
    }
    r
}

impl HookTable {
    pub const fn new() -> Self {
        Self {
            pre_mmap: HookList::new("pre_mmap"),
            mmap_replacement: HookList::new("mmap_replacement"),
            mmap: HookList::new("mmap"),
            munmap: HookList::new("munmap"),
            munmap_replacement: HookList::new("munmap_replacement"),
            pre_sbrk: HookList::new("pre_sbrk"),
            sbrk: HookList::new("sbrk"),
        }
    }

    pub fn add_pre_mmap_hook(&self, hook: PreMmapHook) -> Result<(), HookError> {
        added(self.pre_mmap.name(), self.pre_mmap.add(hook))
    }

    pub fn remove_pre_mmap_hook(&self, hook: PreMmapHook) -> Result<(), HookError> {
        removed(self.pre_mmap.name(), self.pre_mmap.remove(hook))
    }

    pub fn add_mmap_hook(&self, hook: MmapHook) -> Result<(), HookError> {
        added(self.mmap.name(), self.mmap.add(hook))
    }

    pub fn remove_mmap_hook(&self, hook: MmapHook) -> Result<(), HookError> {
        removed(self.mmap.name(), self.mmap.remove(hook))
    }

    pub fn add_munmap_hook(&self, hook: MunmapHook) -> Result<(), HookError> {
        added(self.munmap.name(), self.munmap.add(hook))
    }

    pub fn remove_munmap_hook(&self, hook: MunmapHook) -> Result<(), HookError> {
        removed(self.munmap.name(), self.munmap.remove(hook))
    }

    pub fn add_pre_sbrk_hook(&self, hook: PreSbrkHook) -> Result<(), HookError> {
        added(self.pre_sbrk.name(), self.pre_sbrk.add(hook))
    }

    pub fn remove_pre_sbrk_hook(&self, hook: PreSbrkHook) -> Result<(), HookError> {
        removed(self.pre_sbrk.name(), self.pre_sbrk.remove(hook))
    }

    pub fn add_sbrk_hook(&self, hook: SbrkHook) -> Result<(), HookError> {
        added(self.sbrk.name(), self.sbrk.add(hook))
    }

    pub fn remove_sbrk_hook(&self, hook: SbrkHook) -> Result<(), HookError> {
        removed(self.sbrk.name(), self.sbrk.remove(hook))
    }

    pub fn set_mmap_replacement(&self, hook: MmapReplacement) -> Result<(), HookError> {
        let r = self
            .mmap_replacement
            .add(hook)
            .map_err(|_| HookError::ReplacementInstalled(self.mmap_replacement.name()));
        added(self.mmap_replacement.name(), r)
    }

    pub fn remove_mmap_replacement(&self, hook: MmapReplacement) -> Result<(), HookError> {
        removed(
            self.mmap_replacement.name(),
            self.mmap_replacement.remove(hook),
        )
    }

    pub fn set_munmap_replacement(&self, hook: MunmapReplacement) -> Result<(), HookError> {
        let r = self
            .munmap_replacement
            .add(hook)
            .map_err(|_| HookError::ReplacementInstalled(self.munmap_replacement.name()));
        added(self.munmap_replacement.name(), r)
    }

    pub fn remove_munmap_replacement(&self, hook: MunmapReplacement) -> Result<(), HookError> {
        removed(
            self.munmap_replacement.name(),
            self.munmap_replacement.remove(hook),
        )
    }
}

impl MemoryHooks for HookTable {
    #[inline]
    fn pre_map(&self, req: &MapRequest) {
        self.pre_mmap.for_each(|hook| {
            hook(req.start, req.length, req.prot, req.flags, req.fd, req.offset)
        });
    }

    #[inline]
    fn replace_map(&self, req: &MapRequest) -> Option<*mut c_void> {
        let replacement = self.mmap_replacement.first()?;
        let mut result = ptr::null_mut();
        let handled = replacement(
            req.start,
            req.length,
            req.prot,
            req.flags,
            req.fd,
            req.offset,
            &mut result,
        );
        (handled != 0).then_some(result)
    }

    #[inline]
    fn post_map(&self, result: *mut c_void, req: &MapRequest) {
        self.mmap.for_each(|hook| {
            hook(
                result, req.start, req.length, req.prot, req.flags, req.fd, req.offset,
            )
        });
    }

    #[inline]
    fn pre_unmap(&self, start: *mut c_void, length: size_t) {
        self.munmap.for_each(|hook| hook(start, length));
    }

    #[inline]
    fn replace_unmap(&self, start: *mut c_void, length: size_t) -> Option<c_int> {
        let replacement = self.munmap_replacement.first()?;
        let mut result: c_int = 0;
        let handled = replacement(start, length, &mut result);
        (handled != 0).then_some(result)
    }

    #[inline]
    fn pre_break(&self, increment: intptr_t) {
        self.pre_sbrk.for_each(|hook| hook(increment));
    }

    #[inline]
    fn post_break(&self, result: *mut c_void, increment: intptr_t) {
        self.sbrk.for_each(|hook| hook(result, increment));
    }
}

// =============================================================================
// C-ABI registration surface. 1 on success, 0 on failure (including NULL).
// =============================================================================

macro_rules! export_registration {
    ($($export:ident => $method:ident($ty:ty);)*) => {
        $(
            #[no_mangle]
            pub extern "C" fn $export(hook: Option<$ty>) -> c_int {
                match hook {
                    Some(hook) => HOOKS.$method(hook).is_ok() as c_int,
                    None => 0,
                }
            }
        )*
    };
}

export_registration! {
    memhook_add_pre_mmap_hook => add_pre_mmap_hook(PreMmapHook);
    memhook_remove_pre_mmap_hook => remove_pre_mmap_hook(PreMmapHook);
    memhook_add_mmap_hook => add_mmap_hook(MmapHook);
    memhook_remove_mmap_hook => remove_mmap_hook(MmapHook);
    memhook_add_munmap_hook => add_munmap_hook(MunmapHook);
    memhook_remove_munmap_hook => remove_munmap_hook(MunmapHook);
    memhook_add_pre_sbrk_hook => add_pre_sbrk_hook(PreSbrkHook);
    memhook_remove_pre_sbrk_hook => remove_pre_sbrk_hook(PreSbrkHook);
    memhook_add_sbrk_hook => add_sbrk_hook(SbrkHook);
    memhook_remove_sbrk_hook => remove_sbrk_hook(SbrkHook);
    memhook_set_mmap_replacement => set_mmap_replacement(MmapReplacement);
    memhook_remove_mmap_replacement => remove_mmap_replacement(MmapReplacement);
    memhook_set_munmap_replacement => set_munmap_replacement(MunmapReplacement);
    memhook_remove_munmap_replacement => remove_munmap_replacement(MunmapReplacement);
}
