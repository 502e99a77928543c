//! Linux Raw Syscall Wrappers
//!
//! Hand-rolled raw assembly syscalls so that the interposed `mmap`/`munmap`
//! never re-enter themselves through libc's wrappers.
//!
//! Supports AArch64 and x86_64 only. Elsewhere `SYS_mmap` is either missing
//! or the old struct-pointer interface, so other targets are rejected.

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("memhook raw syscalls on Linux support x86_64 and aarch64 only");

use libc::{c_int, c_void, off_t, size_t, ssize_t};

/// Kernel errors come back as `-errno` in this range.
const MAX_ERRNO: i64 = 4095;

/// Convert a raw kernel return into the libc convention: on failure set errno
/// and hand back `-1`.
#[inline(always)]
unsafe fn check(ret: i64) -> i64 {
    if (-MAX_ERRNO..0).contains(&ret) {
        crate::set_errno(-ret as c_int);
        -1
    } else {
        ret
    }
}

/// Raw mmap syscall - bypasses libc entirely.
///
/// Returns `MAP_FAILED` with errno set on failure. The offset is handed to the
/// kernel as the full 64-bit register value.
#[inline(always)]
pub unsafe fn raw_mmap(
    addr: *mut c_void,
    len: size_t,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: off_t,
) -> *mut c_void {
    #[cfg(target_arch = "x86_64")]
    {
        let ret: i64;
        std::arch::asm!(
            "syscall",
            in("rax") 9i64, // SYS_mmap
            in("rdi") addr,
            in("rsi") len as i64,
            in("rdx") prot as i64,
            in("r10") flags as i64,
            in("r8") fd as i64,
            in("r9") offset as i64,
            lateout("rax") ret,
            lateout("rcx") _,
            lateout("r11") _,
            options(nostack),
        );
        check(ret) as *mut c_void
    }
    #[cfg(target_arch = "aarch64")]
    {
        let ret: i64;
        std::arch::asm!(
            "svc #0",
            in("x8") 222i64, // SYS_mmap
            inlateout("x0") addr as i64 => ret,
            in("x1") len as i64,
            in("x2") prot as i64,
            in("x3") flags as i64,
            in("x4") fd as i64,
            in("x5") offset as i64,
            options(nostack),
        );
        check(ret) as *mut c_void
    }
}

/// Raw munmap syscall - returns `0` or `-1` with errno set.
#[inline(always)]
pub unsafe fn raw_munmap(addr: *mut c_void, len: size_t) -> c_int {
    #[cfg(target_arch = "x86_64")]
    {
        let ret: i64;
        std::arch::asm!(
            "syscall",
            in("rax") 11i64, // SYS_munmap
            in("rdi") addr,
            in("rsi") len as i64,
            lateout("rax") ret,
            lateout("rcx") _,
            lateout("r11") _,
            options(nostack),
        );
        check(ret) as c_int
    }
    #[cfg(target_arch = "aarch64")]
    {
        let ret: i64;
        std::arch::asm!(
            "svc #0",
            in("x8") 215i64, // SYS_munmap
            inlateout("x0") addr as i64 => ret,
            in("x1") len as i64,
            options(nostack),
        );
        check(ret) as c_int
    }
}

/// Raw write syscall, used for the one diagnostic the hot path may emit.
#[inline(always)]
pub unsafe fn raw_write(fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
    #[cfg(target_arch = "x86_64")]
    {
        let ret: i64;
        std::arch::asm!(
            "syscall",
            in("rax") 1i64, // SYS_write
            in("rdi") fd as i64,
            in("rsi") buf,
            in("rdx") count as i64,
            lateout("rax") ret,
            lateout("rcx") _,
            lateout("r11") _,
            options(nostack),
        );
        check(ret) as ssize_t
    }
    #[cfg(target_arch = "aarch64")]
    {
        let ret: i64;
        std::arch::asm!(
            "svc #0",
            in("x8") 64i64, // SYS_write
            inlateout("x0") fd as i64 => ret,
            in("x1") buf,
            in("x2") count as i64,
            options(nostack),
        );
        check(ret) as ssize_t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: usize = 4096;

    #[test]
    fn test_raw_mmap_anonymous_roundtrip() {
        unsafe {
            let p = raw_mmap(
                std::ptr::null_mut(),
                PAGE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            assert_ne!(p, libc::MAP_FAILED);
            *(p as *mut u8) = 0xAB;
            assert_eq!(*(p as *const u8), 0xAB);
            assert_eq!(raw_munmap(p, PAGE), 0);
        }
    }

    #[test]
    fn test_raw_mmap_bad_fd_sets_errno() {
        unsafe {
            let p = raw_mmap(
                std::ptr::null_mut(),
                PAGE,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                -1,
                0,
            );
            assert_eq!(p, libc::MAP_FAILED);
            assert_eq!(crate::get_errno(), libc::EBADF);
        }
    }

    #[test]
    fn test_raw_munmap_unaligned_is_einval() {
        unsafe {
            assert_eq!(raw_munmap(0x1001 as *mut c_void, PAGE), -1);
            assert_eq!(crate::get_errno(), libc::EINVAL);
        }
    }
}
