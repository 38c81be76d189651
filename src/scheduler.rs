//! A cancellable, one-shot timer facility a [`SelectorManager`](crate::SelectorManager)
//! uses to bound connect attempts.
//!
//! A `Task` ordered for a min-heap by deadline, run on a dedicated
//! background thread rather than exposed as a pull-based `pop`/`try_pop`
//! API, since callers here need a fire-and-forget task, not a token to poll.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// A schedulable source of delayed, cancellable one-shot tasks.
///
/// The loop depends on this trait rather than a concrete scheduler so tests
/// can substitute a deterministic fake.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) -> ScheduledHandle;
}

/// A handle to a task scheduled with [`Scheduler::schedule`]. Dropping it
/// does not cancel the task — call [`cancel`](ScheduledHandle::cancel)
/// explicitly.
#[derive(Clone)]
pub struct ScheduledHandle {
    cancelled: Arc<AtomicBool>,
}

impl ScheduledHandle {
    /// Cancels the task if it hasn't fired yet. Returns `true` the first
    /// time it transitions the task to cancelled; idempotent afterwards, so
    /// racing the task's own completion against a `cancel()` call never
    /// double-fires either path.
    pub fn cancel(&self) -> bool {
        self.cancelled
            .compare_exchange(false, true, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
            .is_ok()
    }
}

struct ScheduledTask {
    id: u64,
    deadline: Instant,
    cancelled: Arc<AtomicBool>,
    task: Box<dyn FnOnce() + Send>,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &ScheduledTask) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &ScheduledTask) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    // Reversed so `BinaryHeap`, a max-heap, pops the earliest deadline first.
    fn cmp(&self, other: &ScheduledTask) -> Ordering {
        other.deadline.cmp(&self.deadline).then_with(|| other.id.cmp(&self.id))
    }
}

struct Inner {
    tasks: BinaryHeap<ScheduledTask>,
    shutdown: bool,
}

/// A [`Scheduler`] backed by one background thread and a deadline-ordered
/// min-heap.
pub struct TimerScheduler {
    state: Arc<(Mutex<Inner>, Condvar)>,
    next_id: AtomicU64,
    worker: Option<thread::JoinHandle<()>>,
}

impl TimerScheduler {
    pub fn new() -> TimerScheduler {
        let state = Arc::new((
            Mutex::new(Inner {
                tasks: BinaryHeap::new(),
                shutdown: false,
            }),
            Condvar::new(),
        ));

        let worker_state = state.clone();
        let worker = thread::Builder::new()
            .name("queen-loop-scheduler".into())
            .spawn(move || run(worker_state))
            .expect("failed to spawn scheduler thread");

        TimerScheduler {
            state,
            next_id: AtomicU64::new(0),
            worker: Some(worker),
        }
    }
}

impl Default for TimerScheduler {
    fn default() -> TimerScheduler {
        TimerScheduler::new()
    }
}

impl Scheduler for TimerScheduler {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) -> ScheduledHandle {
        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));

        let entry = ScheduledTask {
            id,
            deadline: Instant::now() + delay,
            cancelled: cancelled.clone(),
            task,
        };

        let (lock, cvar) = &*self.state;
        {
            let mut inner = lock.lock().unwrap();
            inner.tasks.push(entry);
        }
        cvar.notify_one();

        ScheduledHandle { cancelled }
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        {
            let (lock, cvar) = &*self.state;
            lock.lock().unwrap().shutdown = true;
            cvar.notify_one();
        }

        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run(state: Arc<(Mutex<Inner>, Condvar)>) {
    let (lock, cvar) = &*state;
    let mut inner = lock.lock().unwrap();

    loop {
        if inner.shutdown {
            return;
        }

        let next_deadline = inner.tasks.peek().map(|next| next.deadline);
        match next_deadline {
            None => {
                inner = cvar.wait(inner).unwrap();
            }
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    let due = inner.tasks.pop().unwrap();
                    drop(inner);

                    if !due.cancelled.load(AtomicOrdering::SeqCst) {
                        (due.task)();
                    }

                    inner = lock.lock().unwrap();
                } else {
                    let (guard, _timeout) = cvar.wait_timeout(inner, deadline - now).unwrap();
                    inner = guard;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn fires_after_delay() {
        let scheduler = TimerScheduler::new();
        let (tx, rx) = mpsc::channel();

        scheduler.schedule(Duration::from_millis(10), Box::new(move || {
            tx.send(()).unwrap();
        }));

        rx.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn cancel_is_idempotent_and_suppresses_the_task() {
        let scheduler = TimerScheduler::new();
        let (tx, rx) = mpsc::channel();

        let handle = scheduler.schedule(Duration::from_millis(50), Box::new(move || {
            tx.send(()).unwrap();
        }));

        assert!(handle.cancel());
        assert!(!handle.cancel());

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
