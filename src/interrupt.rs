//! Interrupting a worker's blocking syscall (`spec.md` §4.9, "Cancellation
//! of a blocking task").
//!
//! The original implementation cancels a worker via `pthread_cancel`,
//! which unwinds the thread out of a cancellation point inside the
//! blocking `read`/`write`/`fsync` call straight into the cleanup handler.
//! Safe Rust has no equivalent unwind-through-a-syscall primitive, so this
//! crate emulates it the way user-space signal-based interruption has
//! always worked on POSIX: install a no-op handler (deliberately without
//! `SA_RESTART`) for a dedicated signal, and `pthread_kill` the worker's
//! native thread to knock its blocking syscall out with `EINTR`. The
//! worker then checks whether it was actually the target of a cancellation
//! (`spec.md`'s `running` word going to the "running-with-waiters"
//! sentinel) before treating an `EINTR` as cancellation rather than a
//! stray signal to retry past.

use std::sync::Once;

extern "C" fn no_op_handler(_: libc::c_int) {}

#[cfg(target_os = "linux")]
pub(crate) fn signo() -> libc::c_int {
    // A fixed offset into the realtime range, away from signals an
    // embedding application is likely to reserve for itself.
    unsafe { libc::SIGRTMIN() + 2 }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn signo() -> libc::c_int {
    libc::SIGUSR2
}

static INSTALL: Once = Once::new();

/// Installs the no-op handler for the cancellation signal exactly once per
/// process.
pub(crate) fn ensure_installed() {
    INSTALL.call_once(|| unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = no_op_handler as usize;
        libc::sigemptyset(&mut action.sa_mask);
        // No SA_RESTART: a blocking read/write/fsync interrupted by this
        // signal must return EINTR rather than resume transparently.
        action.sa_flags = 0;
        let rc = libc::sigaction(signo(), &action, std::ptr::null_mut());
        assert_eq!(rc, 0, "installing the aio cancellation signal handler failed");
    });
}

/// Sends the cancellation signal to `tid` (a native thread id captured via
/// `libc::pthread_self()` on the worker thread).
pub(crate) fn interrupt(tid: libc::pthread_t) {
    unsafe {
        libc::pthread_kill(tid, signo());
    }
}
