//! Completion notification delivery (`spec.md` §4.4 step g, §6).

use crate::handle::Notify;

/// Delivers the completion notification. Runs on the worker task, after
/// the request has already been unlinked from its queue and is otherwise
/// fully retired — matching the original's placement of this as the last
/// thing `cleanup()` does.
pub(crate) fn deliver(notify: &Notify) {
    match notify {
        Notify::None => {}
        Notify::Signal { signo, value } => deliver_signal(*signo, *value),
        Notify::Callback { func, value } => func(*value),
    }
}

/// Enqueues a realtime-style signal to the current process carrying
/// `value` as the `sigval`.
///
/// The reference implementation builds a raw `siginfo_t` with
/// `si_code = SI_ASYNCIO` via `SYS_rt_sigqueueinfo`, a code POSIX reserves
/// specifically for AIO completions. Rust's `libc` crate does not expose
/// safe field access into `siginfo_t`'s platform-specific union, so this
/// crate uses the portable `sigqueue(3)` wrapper instead: the signal and
/// `sigval` payload are delivered identically, but the handler will observe
/// `si_code == SI_QUEUE` rather than `SI_ASYNCIO`. Recorded as a deliberate
/// simplification in `DESIGN.md`.
fn deliver_signal(signo: i32, value: i32) {
    unsafe {
        let sigval = libc::sigval { sival_int: value };
        let rc = libc::sigqueue(libc::getpid(), signo, sigval);
        if rc != 0 {
            tracing::warn!(
                target: "aio::notify",
                signo,
                errno = std::io::Error::last_os_error().raw_os_error(),
                "failed to deliver aio completion signal"
            );
        }
    }
}
