//! Single-threaded deferred work queues.
//!
//! Each [`WorkQueue`] owns one worker thread that runs queued [`Work`] items in deadline order.
//! A work item is either pending (queued once) or not: queuing an item that is already pending is
//! a no-op and does not move its deadline, and [`WorkQueue::cancel`] removes a pending item
//! without waiting for one that is already running.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

static NEXT_WORK_ID: AtomicU64 = AtomicU64::new(1);

/// A reusable unit of deferred work.
#[derive(Clone)]
pub struct Work {
    inner: Arc<WorkInner>,
}

struct WorkInner {
    id: u64,
    name: &'static str,
    func: Box<dyn Fn() + Send + Sync>,
}

impl Work {
    pub fn new(name: &'static str, func: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(WorkInner {
                id: NEXT_WORK_ID.fetch_add(1, Ordering::Relaxed),
                name,
                func: Box::new(func),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    fn id(&self) -> u64 {
        self.inner.id
    }

    fn run(&self) {
        (self.inner.func)();
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Work")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

struct Pending {
    deadline: Instant,
    seq: u64,
    work: Work,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<Pending>,
    running: bool,
    shutdown: bool,
    next_seq: u64,
}

struct Shared {
    state: Mutex<QueueState>,
    /// Signalled when work is queued or the queue shuts down.
    wake: Condvar,
    /// Signalled when the worker finishes an item.
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct WorkQueue {
    name: &'static str,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl WorkQueue {
    pub fn new(name: &'static str) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            wake: Condvar::new(),
            idle: Condvar::new(),
        });
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, &worker_shared))?;
        let worker_id = worker.thread().id();
        Ok(Self {
            name,
            shared,
            worker: Some(worker),
            worker_id,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queue `work` to run as soon as possible. Returns `false` if it was already pending.
    pub fn queue(&self, work: &Work) -> bool {
        self.queue_delayed(work, Duration::ZERO)
    }

    /// Queue `work` to run after `delay`. Returns `false` if it was already pending, in which
    /// case the existing deadline is kept.
    pub fn queue_delayed(&self, work: &Work, delay: Duration) -> bool {
        let mut state = self.shared.lock();
        if state.shutdown {
            tracing::warn!(queue = self.name, work = work.name(), "queue is shut down");
            return false;
        }
        if state.pending.iter().any(|p| p.work.id() == work.id()) {
            return false;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push(Pending {
            deadline: Instant::now() + delay,
            seq,
            work: work.clone(),
        });
        drop(state);
        self.shared.wake.notify_all();
        true
    }

    /// Remove `work` if it is pending. Returns whether it was. Does not wait for a running
    /// instance; cancelling something already fired or already cancelled is a no-op.
    pub fn cancel(&self, work: &Work) -> bool {
        let mut state = self.shared.lock();
        let before = state.pending.len();
        state.pending.retain(|p| p.work.id() != work.id());
        let cancelled = state.pending.len() != before;
        drop(state);
        if cancelled {
            self.shared.idle.notify_all();
        }
        cancelled
    }

    pub fn is_pending(&self, work: &Work) -> bool {
        self.shared
            .lock()
            .pending
            .iter()
            .any(|p| p.work.id() == work.id())
    }

    /// Nothing pending (including delayed items) and nothing running.
    pub fn is_idle(&self) -> bool {
        let state = self.shared.lock();
        !state.running && state.pending.is_empty()
    }

    /// Block until nothing is pending or running, including delayed items.
    ///
    /// Must not be called from this queue's own worker.
    pub fn drain(&self) {
        if thread::current().id() == self.worker_id {
            tracing::error!(queue = self.name, "drain called from the queue's own worker");
            return;
        }
        let mut state = self.shared.lock();
        while !state.shutdown && (state.running || !state.pending.is_empty()) {
            state = self
                .shared
                .idle
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.shutdown = true;
        let dropped = state.pending.len();
        state.pending.clear();
        drop(state);
        if dropped > 0 {
            tracing::debug!(queue = self.name, dropped, "discarding pending work");
        }
        self.shared.wake.notify_all();
        self.shared.idle.notify_all();

        // The last owner may go away from inside one of our own work items.
        if thread::current().id() == self.worker_id {
            return;
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(name: &'static str, shared: &Shared) {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            break;
        }

        let next = state
            .pending
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| (p.deadline, p.seq))
            .map(|(idx, p)| (idx, p.deadline));

        let Some((idx, deadline)) = next else {
            state = shared
                .wake
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            continue;
        };

        let now = Instant::now();
        if deadline > now {
            state = shared
                .wake
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
            continue;
        }

        let item = state.pending.swap_remove(idx);
        state.running = true;
        drop(state);

        tracing::trace!(queue = name, work = item.work.name(), "running work");
        item.work.run();
        drop(item);

        state = shared.lock();
        state.running = false;
        shared.idle.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn counter_work(name: &'static str) -> (Work, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let work = Work::new(name, move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        (work, hits)
    }

    #[test]
    fn queued_work_runs_once() {
        let wq = WorkQueue::new("test_wq").unwrap();
        let (work, hits) = counter_work("once");
        assert!(wq.queue(&work));
        wq.drain();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn requeue_while_pending_is_a_noop() {
        let wq = WorkQueue::new("test_wq").unwrap();
        let (work, hits) = counter_work("coalesced");
        assert!(wq.queue_delayed(&work, Duration::from_millis(50)));
        assert!(!wq.queue_delayed(&work, Duration::from_millis(50)));
        assert!(!wq.queue(&work));
        wq.drain();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_prevents_delayed_work_and_is_idempotent() {
        let wq = WorkQueue::new("test_wq").unwrap();
        let (work, hits) = counter_work("cancelled");
        wq.queue_delayed(&work, Duration::from_secs(60));
        assert!(wq.is_pending(&work));
        assert!(wq.cancel(&work));
        assert!(!wq.cancel(&work));
        wq.drain();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn delayed_work_waits_for_its_deadline() {
        let wq = WorkQueue::new("test_wq").unwrap();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let work = Work::new("timed", move || {
            let _ = tx.lock().unwrap().send(Instant::now());
        });
        let start = Instant::now();
        wq.queue_delayed(&work, Duration::from_millis(30));
        let fired = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(fired.duration_since(start) >= Duration::from_millis(30));
    }

    #[test]
    fn items_run_in_deadline_order() {
        let wq = WorkQueue::new("test_wq").unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let late = {
            let order = order.clone();
            Work::new("late", move || order.lock().unwrap().push("late"))
        };
        let early = {
            let order = order.clone();
            Work::new("early", move || order.lock().unwrap().push("early"))
        };
        wq.queue_delayed(&late, Duration::from_millis(40));
        wq.queue(&early);
        wq.drain();
        assert_eq!(*order.lock().unwrap(), vec!["early", "late"]);
    }

    #[test]
    fn work_can_requeue_itself() {
        let wq = Arc::new(WorkQueue::new("test_wq").unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<Work>>> = Arc::new(Mutex::new(None));
        let work = {
            let wq = Arc::downgrade(&wq);
            let hits = hits.clone();
            let slot = slot.clone();
            Work::new("self_requeue", move || {
                if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                    let (Some(wq), Some(me)) = (wq.upgrade(), slot.lock().unwrap().clone())
                    else {
                        return;
                    };
                    wq.queue(&me);
                }
            })
        };
        *slot.lock().unwrap() = Some(work.clone());
        wq.queue(&work);
        wq.drain();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        slot.lock().unwrap().take();
    }
}
