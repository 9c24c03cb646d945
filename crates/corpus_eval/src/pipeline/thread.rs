//! Thread-local storage for worker identification.
//!
//! Each worker thread records its id when spawned so that failures and log
//! lines can be attributed without threading the id through every call.

use std::cell::Cell;

thread_local! {
    /// Id of the worker running on this thread (0 to num_workers-1).
    /// `None` outside worker threads.
    pub static WORKER_ID: Cell<Option<usize>> = const { Cell::new(None) };
}

pub(crate) fn set_worker_id(id: usize) {
    WORKER_ID.with(|cell| cell.set(Some(id)));
}

/// The id of the calling worker, if called from a worker thread.
pub fn current_worker_id() -> Option<usize> {
    WORKER_ID.with(|cell| cell.get())
}
