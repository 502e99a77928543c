//! # memhook-interpose
//!
//! LD_PRELOAD interposer for `mmap`, `munmap` and `sbrk` on FreeBSD (and
//! Linux, for development). Every call is offered to the process-wide
//! [`HookTable`](hooks::HookTable) first: pre-hooks observe, a replacement
//! may service the request outright, post-hooks observe the result. Without
//! a replacement the request goes to the kernel through a raw trap, or to
//! libc's own `sbrk` through `dlsym(RTLD_NEXT)`.
//!
//! # Hot-path rules
//!
//! The exported symbols can be reached from inside malloc, from the dynamic
//! loader, and from any thread. On that path:
//! - no allocation (`String`, `Vec`, `Box`)
//! - no locks, no `tracing`, no `println!`
//! - no `panic!`; the single fatal case writes with a raw syscall and aborts
//!
//! Logging and config belong to [`init`] and hook registration only.

// Allow unsafe FFI functions without safety docs - these are inherently unsafe C ABI
#![allow(clippy::missing_safety_doc)]

pub mod hooks;
pub mod interposer;
pub mod reals;
pub mod recorder;
pub mod syscalls;

use hooks::{HookTable, HOOKS};
use interposer::Interposer;
use memhook_config::{log_interpose_info, log_interpose_warn, Config, ConfigError};
use recorder::{Recorded, RECORDER};
use std::sync::atomic::{AtomicBool, Ordering};
use syscalls::SystemPrimitives;

pub use hooks::{HookError, MapRequest, MemoryHooks};
pub use interposer::RawPrimitives;

/// The interposer behind the exported symbols.
pub static INTERPOSER: Interposer<Recorded<&'static HookTable>, SystemPrimitives> =
    Interposer::new(Recorded::new(&HOOKS, &RECORDER), SystemPrimitives);

static DUMP_ON_ABORT: AtomicBool = AtomicBool::new(false);

/// Platform-agnostic errno access
#[inline(always)]
pub unsafe fn set_errno(e: libc::c_int) {
    #[cfg(target_os = "linux")]
    {
        *libc::__errno_location() = e;
    }
    #[cfg(target_os = "freebsd")]
    {
        *libc::__error() = e;
    }
}

#[inline(always)]
pub fn get_errno() -> libc::c_int {
    #[cfg(target_os = "linux")]
    unsafe {
        *libc::__errno_location()
    }
    #[cfg(target_os = "freebsd")]
    unsafe {
        *libc::__error()
    }
}

/// The real `name` could not be resolved. Nothing sensible can follow.
#[cold]
#[inline(never)]
pub(crate) fn fatal_unresolved(name: &str) -> ! {
    if DUMP_ON_ABORT.load(Ordering::Relaxed) {
        RECORDER.dump();
    }
    recorder::write_stderr("memhook: unable to resolve real `");
    recorder::write_stderr(name);
    recorder::write_stderr("`, aborting\n");
    unsafe { libc::abort() }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("failed to load memhook config: {0}")]
    Config(#[from] ConfigError),
}

/// Apply a loaded config to the running interposer.
pub fn configure(config: &Config) {
    RECORDER.set_enabled(config.recorder.enabled);
    DUMP_ON_ABORT.store(config.recorder.dump_on_abort, Ordering::Relaxed);
}

/// Load config, install logging if the host has none, and apply settings.
/// Never called implicitly; the host decides when it is safe to allocate.
pub fn init() -> Result<(), InitError> {
    let config = Config::load()?;
    let installed = memhook_config::logging::try_init_logging(config.logging.level);
    configure(&config);
    log_interpose_info!(
        "memhook initialised",
        recorder = config.recorder.enabled,
        dump_on_abort = config.recorder.dump_on_abort,
        own_subscriber = installed,
    );
    Ok(())
}

/// C entry for [`init`]: 0 on success, -1 on failure.
#[no_mangle]
pub extern "C" fn memhook_init() -> libc::c_int {
    match init() {
        Ok(()) => 0,
        Err(e) => {
            log_interpose_warn!("memhook init failed", error = tracing::field::display(&e));
            -1
        }
    }
}
