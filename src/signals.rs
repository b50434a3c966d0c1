//! Signal-blocking discipline (`spec.md` §5 "Signal discipline").
//!
//! Every lock-taking entry point on the submitter/canceller/closer side
//! blocks all signals for the duration of its critical section, and every
//! worker task blocks all signals for its entire lifetime, with one
//! necessary exception: the dedicated cancellation signal `interrupt.rs`
//! installs must stay unblocked on worker threads, or `aio_cancel`'s
//! `pthread_kill` would leave it permanently pending instead of knocking the
//! worker's blocking syscall out with `EINTR` (the original's
//! `pthread_cancel` has the same carve-out for its own cancellation signal).
//! This is what makes `aio_cancel` safe to call from `close`'s
//! signal-handler context while still remaining interruptible.

use nix::sys::signal::{self, SigSet, SigmaskHow};

/// RAII guard blocking every signal on the calling thread, restoring the
/// previous mask on drop.
pub struct AllSignalsBlocked {
    previous: SigSet,
}

impl AllSignalsBlocked {
    pub fn enter() -> Self {
        let all = SigSet::all();
        let mut previous = SigSet::empty();
        signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&all), Some(&mut previous))
            .expect("pthread_sigmask does not fail for a full set");
        Self { previous }
    }
}

impl Drop for AllSignalsBlocked {
    fn drop(&mut self) {
        let _ = signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None);
    }
}

/// Blocks all signals on the calling thread permanently, except the
/// cancellation signal `interrupt.rs` uses to knock a blocking syscall out
/// with `EINTR`. Called once at the top of every worker task (`spec.md`
/// §4.3, §5): there is no matching "restore" because the worker thread's
/// entire lifetime is the critical section.
///
/// `nix::sys::signal::Signal` can't represent a dynamic realtime signal
/// number (see `interrupt.rs`), so excluding it from the blocked set is done
/// with raw `libc` sigset calls rather than `SigSet`.
pub fn block_all_forever() {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigfillset(&mut set);
        libc::sigdelset(&mut set, crate::interrupt::signo());
        let rc = libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
        assert_eq!(rc, 0, "pthread_sigmask does not fail for a full set");
    }
}
