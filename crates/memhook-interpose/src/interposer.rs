//! The interposer proper: pre-notify, offer to the replacement, fall back to
//! the raw primitive, post-notify.
//!
//! `Interposer` is generic over both seams so the exported symbols can run
//! against the global hook table and the kernel while tests run against
//! fakes. It holds no state of its own.

use crate::hooks::{MapRequest, MemoryHooks};
use libc::{c_int, c_void, intptr_t, off_t, size_t};

/// Unhooked versions of the three primitives. Implementations must never
/// route back through the exported `mmap`/`munmap`/`sbrk`.
pub trait RawPrimitives {
    unsafe fn map(&self, req: &MapRequest) -> *mut c_void;
    unsafe fn unmap(&self, start: *mut c_void, length: size_t) -> c_int;
    unsafe fn adjust_break(&self, increment: intptr_t) -> *mut c_void;
}

pub struct Interposer<H, P> {
    hooks: H,
    primitives: P,
}

impl<H, P> Interposer<H, P> {
    pub const fn new(hooks: H, primitives: P) -> Self {
        Self { hooks, primitives }
    }
}

impl<H: MemoryHooks, P: RawPrimitives> Interposer<H, P> {
    #[inline]
    pub unsafe fn map(
        &self,
        start: *mut c_void,
        length: size_t,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off_t,
    ) -> *mut c_void {
        let req = MapRequest::new(start, length, prot, flags, fd, offset);
        self.hooks.pre_map(&req);
        let result = match self.hooks.replace_map(&req) {
            Some(result) => result,
            None => self.primitives.map(&req),
        };
        self.hooks.post_map(result, &req);
        result
    }

    #[inline]
    pub unsafe fn unmap(&self, start: *mut c_void, length: size_t) -> c_int {
        self.hooks.pre_unmap(start, length);
        match self.hooks.replace_unmap(start, length) {
            Some(result) => result,
            None => self.primitives.unmap(start, length),
        }
    }

    #[inline]
    pub unsafe fn adjust_break(&self, increment: intptr_t) -> *mut c_void {
        self.hooks.pre_break(increment);
        let result = self.primitives.adjust_break(increment);
        self.hooks.post_break(result, increment);
        result
    }

    /// `map` without notifications, for use by hook code itself.
    #[inline]
    pub unsafe fn unhooked_map(
        &self,
        start: *mut c_void,
        length: size_t,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off_t,
    ) -> *mut c_void {
        let req = MapRequest::new(start, length, prot, flags, fd, offset);
        match self.hooks.replace_map(&req) {
            Some(result) => result,
            None => self.primitives.map(&req),
        }
    }

    /// `unmap` without notifications, for use by hook code itself.
    #[inline]
    pub unsafe fn unhooked_unmap(&self, start: *mut c_void, length: size_t) -> c_int {
        match self.hooks.replace_unmap(start, length) {
            Some(result) => result,
            None => self.primitives.unmap(start, length),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoHooks;
    use crate::syscalls::SystemPrimitives;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        PreMap(MapRequest),
        ReplaceMap(MapRequest),
        PostMap(usize, MapRequest),
        PreUnmap(usize, size_t),
        ReplaceUnmap(usize, size_t),
        PreBreak(intptr_t),
        PostBreak(usize, intptr_t),
        RawMap(MapRequest),
        RawUnmap(usize, size_t),
        RawBreak(intptr_t),
    }

    #[derive(Default)]
    struct Log(Mutex<Vec<Event>>);

    impl Log {
        fn push(&self, e: Event) {
            self.0.lock().unwrap().push(e);
        }
        fn take(&self) -> Vec<Event> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    struct FakeHooks<'a> {
        log: &'a Log,
        map_replacement: Option<usize>,
        unmap_replacement: Option<c_int>,
    }

    impl MemoryHooks for FakeHooks<'_> {
        fn pre_map(&self, req: &MapRequest) {
            self.log.push(Event::PreMap(*req));
        }
        fn replace_map(&self, req: &MapRequest) -> Option<*mut c_void> {
            self.log.push(Event::ReplaceMap(*req));
            self.map_replacement.map(|p| p as *mut c_void)
        }
        fn post_map(&self, result: *mut c_void, req: &MapRequest) {
            self.log.push(Event::PostMap(result as usize, *req));
        }
        fn pre_unmap(&self, start: *mut c_void, length: size_t) {
            self.log.push(Event::PreUnmap(start as usize, length));
        }
        fn replace_unmap(&self, start: *mut c_void, length: size_t) -> Option<c_int> {
            self.log.push(Event::ReplaceUnmap(start as usize, length));
            self.unmap_replacement
        }
        fn pre_break(&self, increment: intptr_t) {
            self.log.push(Event::PreBreak(increment));
        }
        fn post_break(&self, result: *mut c_void, increment: intptr_t) {
            self.log.push(Event::PostBreak(result as usize, increment));
        }
    }

    struct FakePrimitives<'a> {
        log: &'a Log,
    }

    const RAW_MAP_RESULT: usize = 0x7000_0000;
    const RAW_BREAK_RESULT: usize = 0x5500_0000;

    impl RawPrimitives for FakePrimitives<'_> {
        unsafe fn map(&self, req: &MapRequest) -> *mut c_void {
            self.log.push(Event::RawMap(*req));
            RAW_MAP_RESULT as *mut c_void
        }
        unsafe fn unmap(&self, start: *mut c_void, length: size_t) -> c_int {
            self.log.push(Event::RawUnmap(start as usize, length));
            -7
        }
        unsafe fn adjust_break(&self, increment: intptr_t) -> *mut c_void {
            self.log.push(Event::RawBreak(increment));
            RAW_BREAK_RESULT as *mut c_void
        }
    }

    fn interposer<'a>(
        log: &'a Log,
        map_replacement: Option<usize>,
        unmap_replacement: Option<c_int>,
    ) -> Interposer<FakeHooks<'a>, FakePrimitives<'a>> {
        Interposer::new(
            FakeHooks {
                log,
                map_replacement,
                unmap_replacement,
            },
            FakePrimitives { log },
        )
    }

    fn sample_request() -> MapRequest {
        MapRequest::new(
            0x1000_0000 as *mut c_void,
            8192,
            libc::PROT_READ,
            libc::MAP_PRIVATE,
            3,
            -4096,
        )
    }

    #[test]
    fn test_map_falls_through_to_raw_and_notifies_in_order() {
        let log = Log::default();
        let ip = interposer(&log, None, None);
        let req = sample_request();

        let result =
            unsafe { ip.map(req.start, req.length, req.prot, req.flags, req.fd, req.offset) };

        assert_eq!(result as usize, RAW_MAP_RESULT);
        assert_eq!(
            log.take(),
            vec![
                Event::PreMap(req),
                Event::ReplaceMap(req),
                Event::RawMap(req),
                Event::PostMap(RAW_MAP_RESULT, req),
            ]
        );
    }

    #[test]
    fn test_map_replacement_is_authoritative() {
        let log = Log::default();
        let ip = interposer(&log, Some(0x1000), None);

        for req in [
            sample_request(),
            MapRequest::new(std::ptr::null_mut(), 1, 0, 0, -1, 0),
            MapRequest::new(usize::MAX as *mut c_void, usize::MAX, -1, -1, -1, off_t::MIN),
        ] {
            let result =
                unsafe { ip.map(req.start, req.length, req.prot, req.flags, req.fd, req.offset) };
            assert_eq!(result as usize, 0x1000);
            let events = log.take();
            assert!(!events.iter().any(|e| matches!(e, Event::RawMap(_))));
            assert_eq!(events.last(), Some(&Event::PostMap(0x1000, req)));
        }
    }

    #[test]
    fn test_replacement_failure_is_surfaced_verbatim() {
        let log = Log::default();
        let ip = interposer(&log, Some(libc::MAP_FAILED as usize), Some(-1));

        let mapped = unsafe { ip.map(std::ptr::null_mut(), 4096, 0, 0, -1, 0) };
        assert_eq!(mapped, libc::MAP_FAILED);
        assert_eq!(unsafe { ip.unmap(0x2000 as *mut c_void, 4096) }, -1);
        assert!(!log
            .take()
            .iter()
            .any(|e| matches!(e, Event::RawMap(_) | Event::RawUnmap(..))));
    }

    #[test]
    fn test_unmap_notifies_then_falls_through() {
        let log = Log::default();
        let ip = interposer(&log, None, None);

        let status = unsafe { ip.unmap(0x3000 as *mut c_void, 4096) };

        assert_eq!(status, -7);
        assert_eq!(
            log.take(),
            vec![
                Event::PreUnmap(0x3000, 4096),
                Event::ReplaceUnmap(0x3000, 4096),
                Event::RawUnmap(0x3000, 4096),
            ]
        );
    }

    #[test]
    fn test_unmap_replacement_skips_raw() {
        let log = Log::default();
        let ip = interposer(&log, None, Some(0));

        assert_eq!(unsafe { ip.unmap(0x3000 as *mut c_void, 4096) }, 0);
        assert_eq!(
            log.take(),
            vec![
                Event::PreUnmap(0x3000, 4096),
                Event::ReplaceUnmap(0x3000, 4096),
            ]
        );
    }

    #[test]
    fn test_adjust_break_wraps_real_call() {
        let log = Log::default();
        let ip = interposer(&log, Some(0x1000), Some(0));

        let result = unsafe { ip.adjust_break(-64) };

        assert_eq!(result as usize, RAW_BREAK_RESULT);
        assert_eq!(
            log.take(),
            vec![
                Event::PreBreak(-64),
                Event::RawBreak(-64),
                Event::PostBreak(RAW_BREAK_RESULT, -64),
            ]
        );
    }

    #[test]
    fn test_unhooked_paths_skip_notifications_but_honor_replacement() {
        let log = Log::default();
        let ip = interposer(&log, None, None);
        let req = sample_request();

        let mapped = unsafe {
            ip.unhooked_map(req.start, req.length, req.prot, req.flags, req.fd, req.offset)
        };
        assert_eq!(mapped as usize, RAW_MAP_RESULT);
        assert_eq!(unsafe { ip.unhooked_unmap(mapped, 8192) }, -7);
        assert_eq!(
            log.take(),
            vec![
                Event::ReplaceMap(req),
                Event::RawMap(req),
                Event::ReplaceUnmap(RAW_MAP_RESULT, 8192),
                Event::RawUnmap(RAW_MAP_RESULT, 8192),
            ]
        );

        let ip = interposer(&log, Some(0x1000), Some(0));
        let mapped = unsafe { ip.unhooked_map(std::ptr::null_mut(), 4096, 0, 0, -1, 0) };
        assert_eq!(mapped as usize, 0x1000);
        assert_eq!(unsafe { ip.unhooked_unmap(mapped, 4096) }, 0);
        assert!(log
            .take()
            .iter()
            .all(|e| matches!(e, Event::ReplaceMap(_) | Event::ReplaceUnmap(..))));
    }

    /// Hooks that only observe, running over the real kernel.
    struct Observer<'a>(&'a Log);

    impl MemoryHooks for Observer<'_> {
        fn pre_map(&self, req: &MapRequest) {
            self.0.push(Event::PreMap(*req));
        }
        fn post_map(&self, result: *mut c_void, req: &MapRequest) {
            self.0.push(Event::PostMap(result as usize, *req));
        }
    }

    #[test]
    fn test_real_anonymous_map_through_interposer() {
        let log = Log::default();
        let ip = Interposer::new(Observer(&log), SystemPrimitives);
        let prot = libc::PROT_READ | libc::PROT_WRITE;
        let flags = libc::MAP_PRIVATE | libc::MAP_ANON;

        let p = unsafe { ip.map(std::ptr::null_mut(), 4096, prot, flags, -1, 0) };
        assert_ne!(p, libc::MAP_FAILED);
        unsafe {
            std::ptr::write_bytes(p as *mut u8, 0xCD, 4096);
            assert_eq!(*(p as *const u8).add(4095), 0xCD);
        }

        let req = MapRequest::new(std::ptr::null_mut(), 4096, prot, flags, -1, 0);
        assert_eq!(
            log.take(),
            vec![Event::PreMap(req), Event::PostMap(p as usize, req)]
        );
        assert_eq!(unsafe { ip.unmap(p, 4096) }, 0);
    }

    #[test]
    fn test_real_unmap_of_invalid_region_passes_einval_through() {
        let ip = Interposer::new(NoHooks, SystemPrimitives);
        let status = unsafe { ip.unmap(0x1001 as *mut c_void, 4096) };
        assert_eq!(status, -1);
        assert_eq!(
            std::io::Error::last_os_error().raw_os_error(),
            Some(libc::EINVAL)
        );
    }

    #[test]
    fn test_real_failure_matches_direct_raw_call() {
        let ip = Interposer::new(NoHooks, SystemPrimitives);

        let via_interposer =
            unsafe { ip.map(std::ptr::null_mut(), 4096, libc::PROT_READ, libc::MAP_PRIVATE, -1, 0) };
        let errno_interposed = crate::get_errno();
        let direct = unsafe {
            crate::syscalls::raw::raw_mmap(
                std::ptr::null_mut(),
                4096,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        let errno_direct = crate::get_errno();

        assert_eq!(via_interposer, libc::MAP_FAILED);
        assert_eq!(via_interposer, direct);
        assert_eq!(errno_interposed, errno_direct);
    }

    #[test]
    fn test_real_break_query_is_not_failure() {
        let ip = Interposer::new(NoHooks, SystemPrimitives);
        let brk = unsafe { ip.adjust_break(0) };
        assert_ne!(brk as isize, -1);
    }
}
