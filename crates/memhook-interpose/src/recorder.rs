// =============================================================================
// recorder.rs — in-process ring of recent memory events
// =============================================================================
//
// Runs on the interposed path when enabled, so it is built from statics and
// atomics only: no allocation, no locks, no TLS.
//
// Concurrent writers that land on the same slot may tear an entry. The ring is
// a debugging aid and accepts that.
// =============================================================================

use crate::hooks::{MapRequest, MemoryHooks};
use libc::{c_char, c_int, c_void, intptr_t, size_t};
use std::cell::UnsafeCell;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Map = 1,
    MapReplaced = 2,
    Unmap = 3,
    UnmapReplaced = 4,
    Break = 5,
}

pub static EVENT_NAMES: &[&str] = &[
    "UNKNOWN",
    "Map",
    "MapReplaced",
    "Unmap",
    "UnmapReplaced",
    "Break",
];

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MemoryEvent {
    pub timestamp: u64,
    pub kind: u8,
    pub _pad: [u8; 7],
    /// Region start, or the previous break for `Break`
    pub address: u64,
    /// Region length, or the increment for `Break`
    pub length: i64,
    pub result: i64,
}

impl MemoryEvent {
    const EMPTY: Self = Self {
        timestamp: 0,
        kind: 0,
        _pad: [0; 7],
        address: 0,
        length: 0,
        result: 0,
    };
}

pub const RECORDER_SIZE: usize = 4096;

pub struct MemoryRecorder {
    buffer: [UnsafeCell<MemoryEvent>; RECORDER_SIZE],
    pub head: AtomicUsize,
    enabled: AtomicBool,
}

unsafe impl Sync for MemoryRecorder {}

impl Default for MemoryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecorder {
    pub const fn new() -> Self {
        Self {
            buffer: [const { UnsafeCell::new(MemoryEvent::EMPTY) }; RECORDER_SIZE],
            head: AtomicUsize::new(0),
            enabled: AtomicBool::new(false),
        }
    }

    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn record(&self, kind: EventKind, address: u64, length: i64, result: i64) {
        if !self.is_enabled() {
            return;
        }
        let idx = self.head.fetch_add(1, Ordering::Relaxed) % RECORDER_SIZE;
        unsafe {
            *self.buffer[idx].get() = MemoryEvent {
                timestamp: monotonic_ns(),
                kind: kind as u8,
                _pad: [0; 7],
                address,
                length,
                result,
            };
        }
    }

    /// Snapshot of the entry at absolute position `pos`.
    pub fn entry(&self, pos: usize) -> MemoryEvent {
        unsafe { *self.buffer[pos % RECORDER_SIZE].get() }
    }

    /// Per-kind counts over the last `window` events.
    pub fn counts(&self, window: usize) -> [u32; 8] {
        let mut counts = [0u32; 8];
        let head = self.head.load(Ordering::Relaxed);
        let start = head.saturating_sub(window.min(RECORDER_SIZE));
        for i in start..head {
            let kind = self.entry(i).kind as usize;
            if kind > 0 && kind < counts.len() {
                counts[kind] += 1;
            }
        }
        counts
    }

    /// Write a small JSON summary into `writer`.
    pub fn write_summary(&self, writer: &mut impl Write) -> std::fmt::Result {
        let head = self.head.load(Ordering::Relaxed);
        let counts = self.counts(1000);
        writeln!(writer, "{{")?;
        writeln!(writer, "  \"pid\": {},", unsafe { libc::getpid() })?;
        writeln!(writer, "  \"recording\": {},", self.is_enabled())?;
        writeln!(writer, "  \"events_last_1k\": {{")?;
        for (i, name) in EVENT_NAMES.iter().enumerate().skip(1) {
            writeln!(writer, "    \"{}\": {},", name, counts[i])?;
        }
        writeln!(writer, "    \"total_recorded\": {}", head)?;
        writeln!(writer, "  }}")?;
        write!(writer, "}}")
    }

    /// Write the retained events to stderr.
    pub fn dump(&self) {
        let head = self.head.load(Ordering::Relaxed);
        let start = head.saturating_sub(RECORDER_SIZE);

        let mut buf = [0u8; 256];
        let mut header = StackWriter::new(&mut buf);
        let _ = writeln!(
            header,
            "\n--- [memhook] Event Dump (PID: {}) ---",
            unsafe { libc::getpid() }
        );
        write_stderr(header.as_str());

        for i in start..head {
            let entry = self.entry(i);
            if entry.kind == 0 {
                continue;
            }
            let name = EVENT_NAMES.get(entry.kind as usize).unwrap_or(&"INVALID");
            let mut buf = [0u8; 256];
            let mut line = StackWriter::new(&mut buf);
            let _ = writeln!(
                line,
                "[{:>15}] {:<14} ADDR:0x{:016x} LEN:{} RES:0x{:x}",
                entry.timestamp, name, entry.address, entry.length, entry.result
            );
            write_stderr(line.as_str());
        }
        write_stderr("--- End of Dump ---\n");
    }
}

pub static RECORDER: MemoryRecorder = MemoryRecorder::new();

fn monotonic_ns() -> u64 {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    (ts.tv_sec as u64)
        .wrapping_mul(1_000_000_000)
        .wrapping_add(ts.tv_nsec as u64)
}

pub(crate) fn write_stderr(msg: &str) {
    unsafe {
        crate::syscalls::raw::raw_write(2, msg.as_ptr() as *const c_void, msg.len());
    }
}

/// `fmt::Write` over a fixed stack buffer. Output past the end is dropped.
pub struct StackWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> StackWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    pub fn as_str(&self) -> &str {
        // Only whole &str pieces are ever copied in.
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

impl Write for StackWriter<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        let room = self.buf.len() - self.len;
        if s.len() > room {
            return Err(std::fmt::Error);
        }
        self.buf[self.len..self.len + s.len()].copy_from_slice(s.as_bytes());
        self.len += s.len();
        Ok(())
    }
}

/// Wraps a hook implementation and records what passes through it.
pub struct Recorded<H> {
    inner: H,
    recorder: &'static MemoryRecorder,
}

impl<H> Recorded<H> {
    pub const fn new(inner: H, recorder: &'static MemoryRecorder) -> Self {
        Self { inner, recorder }
    }
}

impl<H: MemoryHooks> MemoryHooks for Recorded<H> {
    #[inline]
    fn pre_map(&self, req: &MapRequest) {
        self.inner.pre_map(req)
    }

    #[inline]
    fn replace_map(&self, req: &MapRequest) -> Option<*mut c_void> {
        let r = self.inner.replace_map(req);
        if let Some(result) = r {
            self.recorder.record(
                EventKind::MapReplaced,
                req.start as u64,
                req.length as i64,
                result as i64,
            );
        }
        r
    }

    #[inline]
    fn post_map(&self, result: *mut c_void, req: &MapRequest) {
        self.inner.post_map(result, req);
        self.recorder.record(
            EventKind::Map,
            req.start as u64,
            req.length as i64,
            result as i64,
        );
    }

    #[inline]
    fn pre_unmap(&self, start: *mut c_void, length: size_t) {
        self.inner.pre_unmap(start, length);
        self.recorder
            .record(EventKind::Unmap, start as u64, length as i64, 0);
    }

    #[inline]
    fn replace_unmap(&self, start: *mut c_void, length: size_t) -> Option<c_int> {
        let r = self.inner.replace_unmap(start, length);
        if let Some(status) = r {
            self.recorder.record(
                EventKind::UnmapReplaced,
                start as u64,
                length as i64,
                status as i64,
            );
        }
        r
    }

    #[inline]
    fn pre_break(&self, increment: intptr_t) {
        self.inner.pre_break(increment)
    }

    #[inline]
    fn post_break(&self, result: *mut c_void, increment: intptr_t) {
        self.inner.post_break(result, increment);
        self.recorder
            .record(EventKind::Break, result as u64, increment as i64, result as i64);
    }
}

/// Telemetry export: writes a NUL-terminated JSON summary to `buf`.
/// Returns the length written, or -1 if the buffer is missing or too small.
#[no_mangle]
pub unsafe extern "C" fn memhook_get_telemetry(buf: *mut c_char, buf_size: size_t) -> c_int {
    if buf.is_null() || buf_size == 0 {
        return -1;
    }

    let mut scratch = [0u8; 1024];
    let mut writer = StackWriter::new(&mut scratch);
    if RECORDER.write_summary(&mut writer).is_err() {
        return -1;
    }

    let out = writer.as_str();
    let len = out.len();
    if len >= buf_size {
        return -1;
    }
    std::ptr::copy_nonoverlapping(out.as_ptr(), buf as *mut u8, len);
    *buf.add(len) = 0;
    len as c_int
}

#[no_mangle]
pub extern "C" fn memhook_dump_recorder() {
    RECORDER.dump();
}
