//! Per-descriptor coordination object (`spec.md` §3, §4.2 "Queue").

use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::handle::OpCode;
use crate::worker::WorkerState;

/// Per-fd coordination object. Every field except `ref_count` (see
/// [`QueueState`]) lives behind [`Queue::mutex`]; the condvar is the
/// sequencing wake channel described in `spec.md` §4.2.
pub struct Queue {
    /// Informational key this queue was created for. `spec.md` §9 notes
    /// this does not uniquely identify an open file description across
    /// close+reopen of the same fd number; this crate makes the same
    /// simplifying assumption the original does and documents it rather
    /// than solving it (see `DESIGN.md`).
    pub fd: i32,
    mutex: Mutex<QueueState>,
    condvar: Condvar,
}

pub struct QueueState {
    /// `ref` in `spec.md` §3: incremented by submitters, decremented by
    /// the unref routine, both always under [`Queue::mutex`].
    pub ref_count: usize,
    pub seekable: bool,
    pub append: bool,
    pub init: bool,
    /// Live workers for this fd. An unordered bag rather than the
    /// original's intrusive doubly linked list — that list was never part
    /// of the wire contract (`spec.md` §3), only an implementation detail
    /// for O(1) unlink, which a `Vec` + swap-remove gives just as well at
    /// this crate's expected queue depths.
    pub workers: Vec<Arc<WorkerState>>,
}

impl Queue {
    pub(crate) fn new(fd: i32) -> Self {
        Self {
            fd,
            mutex: Mutex::new(QueueState {
                ref_count: 0,
                seekable: false,
                append: false,
                init: false,
                workers: Vec::new(),
            }),
            condvar: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.mutex.lock()
    }

    /// Blocks until woken by [`Queue::notify_sequencing_waiters`]. Must be
    /// called with `state` locked from `self`; re-derives its own predicate
    /// after waking, as any condvar wait must.
    pub fn wait_for_sequencing<'a>(
        &self,
        mut state: MutexGuard<'a, QueueState>,
    ) -> MutexGuard<'a, QueueState> {
        self.condvar.wait(&mut state);
        state
    }

    /// Wakes every worker parked in [`Queue::wait_for_sequencing`]
    /// (`spec.md` §4.4 step f: "broadcast the condvar").
    pub fn notify_sequencing_waiters(&self) {
        self.condvar.notify_all();
    }

    /// Lazily classifies the fd's seekability/append-mode on first worker
    /// entry (`spec.md` §4.2). Must be called with `state` locked.
    pub fn classify_if_needed(&self, state: &mut QueueState) {
        if state.init {
            return;
        }
        let seekable = unsafe { libc::lseek(self.fd, 0, libc::SEEK_CUR) } >= 0;
        let flags = unsafe { libc::fcntl(self.fd, libc::F_GETFL) };
        let append = !seekable || (flags >= 0 && flags & libc::O_APPEND != 0);
        state.seekable = seekable;
        state.append = append;
        state.init = true;
        tracing::trace!(target: "aio::queue", fd = self.fd, seekable, append, "fd classified");
    }

    /// Sequencing rule from `spec.md` §4.2: does `op` need to wait for
    /// outstanding WRITEs on this queue to drain before it may proceed?
    pub fn needs_ordering(op: OpCode, append: bool) -> bool {
        match op {
            OpCode::Read => false,
            OpCode::Write => append,
            OpCode::Sync | OpCode::DSync => true,
        }
    }

    /// Does any worker other than `me` still have a WRITE in flight?
    pub fn has_write_sibling(state: &QueueState, me: &Arc<WorkerState>) -> bool {
        state.workers.iter().any(|w| !Arc::ptr_eq(w, me) && w.op.is_write_like())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_rule_matches_spec_table() {
        assert!(!Queue::needs_ordering(OpCode::Read, false));
        assert!(!Queue::needs_ordering(OpCode::Read, true));
        assert!(!Queue::needs_ordering(OpCode::Write, false));
        assert!(Queue::needs_ordering(OpCode::Write, true));
        assert!(Queue::needs_ordering(OpCode::Sync, false));
        assert!(Queue::needs_ordering(OpCode::DSync, true));
    }
}
