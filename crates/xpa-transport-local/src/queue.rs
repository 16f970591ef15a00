//! Request queue of one server-side endpoint.

use std::collections::VecDeque;
use std::sync::mpsc::SyncSender;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use xpa_core::{ForeignBuffer, RequestInfo, ServerHandle};

/// What the client asked for.
pub(crate) enum JobKind {
    Get,
    Set { data: ForeignBuffer },
}

/// One request waiting for its server.
pub(crate) struct Job {
    pub server: ServerHandle,
    pub kind: JobKind,
    pub params: String,
    pub info: RequestInfo,
    pub reply: SyncSender<Outcome>,
}

/// What goes back to the waiting client.
pub(crate) struct Outcome {
    pub message: String,
    pub data: Option<ForeignBuffer>,
}

#[derive(Default)]
pub(crate) struct Queue {
    pending: Mutex<VecDeque<Job>>,
    ready: Condvar,
    poller: Mutex<Option<ThreadId>>,
}

impl Queue {
    pub fn push(&self, job: Job) {
        self.pending.lock().push_back(job);
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Wait until a job is pending. `None` waits forever.
    ///
    /// Returns false if the deadline passed with nothing to do.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut pending = self.pending.lock();
        match timeout {
            None => {
                while pending.is_empty() {
                    self.ready.wait(&mut pending);
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while pending.is_empty() {
                    if self.ready.wait_until(&mut pending, deadline).timed_out() {
                        return !pending.is_empty();
                    }
                }
                true
            }
        }
    }

    pub fn pop(&self) -> Option<Job> {
        self.pending.lock().pop_front()
    }

    /// Remove jobs addressed to `server`.
    pub fn drain_server(&self, server: ServerHandle) -> Vec<Job> {
        let mut pending = self.pending.lock();
        let (gone, keep): (Vec<Job>, Vec<Job>) =
            pending.drain(..).partition(|job| job.server == server);
        pending.extend(keep);
        gone
    }

    pub fn set_poller(&self, thread: Option<ThreadId>) {
        *self.poller.lock() = thread;
    }

    /// True if the calling thread is currently polling this queue.
    pub fn polled_by_current_thread(&self) -> bool {
        *self.poller.lock() == Some(std::thread::current().id())
    }
}
