//! AS-safe "publish and notify" wakeup words (`spec.md` §4.4, §4.9).
//!
//! Three channels in this crate need to be observed and woken without
//! taking a lock, because the close path may run inside a signal handler:
//! a request's `err` slot, a worker's `running` word, and the process-global
//! `__aio_fut` word used by list-style suspend waiters. All three are kept
//! as `AtomicU32` (the i32 sentinels/errno values they carry are encoded via
//! `as u32`/`as i32` at the edges) because [`atomic_wait`] only wraps
//! `AtomicU32`. All three share the same tiny protocol, implemented once
//! here on top of that portable futex wrapper.

use std::sync::atomic::{AtomicU32, Ordering};

/// Blocks the calling thread while `word` still reads `expected`.
///
/// Spurious wakeups are possible; callers must re-check their own
/// predicate in a loop, exactly as with a condvar.
pub fn wait_u32(word: &AtomicU32, expected: u32) {
    atomic_wait::wait(word, expected);
}

/// Wakes every thread parked in [`wait_u32`] on `word`.
pub fn wake_all_u32(word: &AtomicU32) {
    atomic_wait::wake_all(word);
}

/// Swaps `word` to `new` and wakes waiters if the previous value satisfies
/// `should_wake`. This is the "publish and notify, elide the syscall if no
/// one is listening" shape every cleanup-path wakeup in `spec.md` §4.4
/// follows; each of the three wakeup channels there has its own notion of
/// "a waiter might be registered" (an exact sentinel for `running` and
/// `__aio_fut`, "anything but IN_PROGRESS" for `err`), so the predicate is
/// left to the caller rather than hardcoded here.
pub fn publish_u32(word: &AtomicU32, new: u32, should_wake: impl FnOnce(u32) -> bool) {
    if should_wake(word.swap(new, Ordering::SeqCst)) {
        wake_all_u32(word);
    }
}
