//! The single completion choke point every request passes through
//! (`spec.md` §4.4). Runs for both normal completion and cancellation.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::directory;
use crate::futex;
use crate::handle::Aiocb;
use crate::notify;
use crate::queue::Queue;
use crate::worker::{WorkerState, FINISHED, RUNNING_WITH_WAITER};

/// Steps a-g of `spec.md` §4.4. Takes the worker's already-final `ret`/`err`
/// (written by [`crate::worker::run`] just before this guard's `Drop`
/// fires) and wakes every class of waiter the spec enumerates.
pub(crate) fn run(queue: &Arc<Queue>, worker: &Arc<WorkerState>, cb: &Arc<Aiocb>) {
    // Step b (ret/err already staged by `worker::run` before this guard
    // dropped) - just read back the final err for the swaps below.
    let final_err = worker.err.load(Ordering::SeqCst);

    // Step c: running -> 0, wake cancellers if one was armed.
    futex::publish_u32(&worker.running, FINISHED, |prev| prev == RUNNING_WITH_WAITER);

    // Step d: swap the handle's err to the final value. Unlike `running`,
    // nothing in this crate arms a distinct "waiter registered" sentinel on
    // `err` before parking (`Aiocb::wait_until_complete` just parks on
    // whatever value is already there) - without such a sentinel, the
    // previous value observed here is always `IN_PROGRESS` even when a
    // waiter is parked, so this always wakes rather than eliding the call
    // the way `spec.md` §4.4 step d does when an external suspend layer
    // stages its own sentinel first.
    futex::publish_u32(cb.err_word(), final_err as u32, |_prev| true);

    // Step e: clear the process-global wakeup word for list-style waiters.
    futex::publish_u32(directory::global_wakeup_word(), 0, |prev| prev != 0);

    // Step f: unlink from the queue, wake sequencing siblings, unref.
    {
        let mut state = queue.lock();
        state.workers.retain(|w| !Arc::ptr_eq(w, worker));
        queue.notify_sequencing_waiters();
        directory::release(queue, state);
    }

    // Step g: deliver the external completion notification.
    notify::deliver(&cb.notify);
}
