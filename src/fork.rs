//! `fork()` safety (`spec.md` §4.8), grounded on the original's
//! `__aio_atfork`, registered once via `pthread_atfork`.
//!
//! Three phases: before `fork()` returns in either process, the directory's
//! write lock is taken so no other thread can be mid-mutation of the trie
//! at the instant of the fork; in the parent the lock is simply released;
//! in the child every other thread is gone (POSIX guarantees only the
//! calling thread survives a `fork()`), so any queue whose mutex a vanished
//! thread held is permanently unlockable and is abandoned rather than
//! reused, and all process-global counters are reset to empty.
//!
//! The reference implementation takes its directory lock in *shared* mode
//! for this and papers over the "what if another reader was concurrently
//! holding it at the instant of fork" problem by unconditionally
//! reinitializing the underlying `pthread_rwlock_t` in the child rather
//! than trusting its inherited refcount. `parking_lot::RwLock` has no safe
//! "reinitialize regardless of current holders" operation, so this crate
//! takes the lock in *exclusive* mode in the prepare handler instead: that
//! blocks `fork()` until every other reader and writer has finished, which
//! gives the child a trie guaranteed to be quiescent at the fork instant
//! without needing to reinitialize anything.

use std::sync::Once;

use crate::directory;

static REGISTER: Once = Once::new();

extern "C" fn prepare() {
    directory::pre_fork();
}

extern "C" fn parent() {
    directory::post_fork_parent();
}

extern "C" fn child() {
    directory::post_fork_child();
    tracing::debug!(target: "aio::fork", "reinitialized aio directory after fork");
}

/// Registers the atfork handlers exactly once per process. Safe to call
/// redundantly; only the first call has any effect.
pub(crate) fn ensure_registered() {
    REGISTER.call_once(|| unsafe {
        let rc = libc::pthread_atfork(Some(prepare), Some(parent), Some(child));
        assert_eq!(rc, 0, "registering the aio pthread_atfork handlers failed");
    });
}
