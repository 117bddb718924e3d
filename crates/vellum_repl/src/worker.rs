//! Bounded-queue worker pool with stable worker handles.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A unit of replay work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Stable handle to one worker, used as the affinity anchor for a
/// transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerId(usize);

struct Signal {
    lock: Mutex<()>,
    cond: Condvar,
}

struct Worker {
    sender: Option<SyncSender<Task>>,
    pending: Arc<AtomicUsize>,
    thread: Option<JoinHandle<()>>,
}

/// Fixed pool of worker threads, each with a bounded task queue.
///
/// Enqueueing onto a full queue blocks the caller; that backpressure
/// keeps the decoder from outrunning the workers. Tasks on one worker
/// run in enqueue order; tasks run exactly once.
pub struct WorkerGroup {
    workers: Vec<Worker>,
    signal: Arc<Signal>,
}

impl WorkerGroup {
    /// Creates a pool of `threads` workers with per-worker queues of
    /// `queue_size` tasks.
    #[must_use]
    pub fn new(threads: usize, queue_size: usize) -> Self {
        let signal = Arc::new(Signal {
            lock: Mutex::new(()),
            cond: Condvar::new(),
        });

        let workers = (0..threads.max(1))
            .map(|i| {
                let (sender, receiver) = sync_channel::<Task>(queue_size.max(1));
                let pending = Arc::new(AtomicUsize::new(0));
                let thread = {
                    let pending = Arc::clone(&pending);
                    let signal = Arc::clone(&signal);
                    std::thread::Builder::new()
                        .name(format!("replication-worker-{i}"))
                        .spawn(move || run_worker(&receiver, &pending, &signal))
                        .expect("failed to spawn replication worker")
                };
                Worker {
                    sender: Some(sender),
                    pending,
                    thread: Some(thread),
                }
            })
            .collect();

        Self { workers, signal }
    }

    /// Number of workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool has no workers. Never true for a constructed
    /// group.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Enqueues onto the least-loaded worker and returns its handle.
    pub fn enqueue(&self, task: Task) -> WorkerId {
        let mut best = 0;
        let mut best_pending = usize::MAX;
        for (i, worker) in self.workers.iter().enumerate() {
            let pending = worker.pending.load(Ordering::Relaxed);
            if pending < best_pending {
                best = i;
                best_pending = pending;
            }
        }
        let id = WorkerId(best);
        self.enqueue_to(id, task);
        id
    }

    /// Enqueues onto a specific worker, blocking while its queue is
    /// full.
    pub fn enqueue_to(&self, id: WorkerId, task: Task) {
        let worker = &self.workers[id.0];
        // Count before sending so join never misses a queued task.
        worker.pending.fetch_add(1, Ordering::SeqCst);
        if let Some(sender) = &worker.sender {
            if sender.send(task).is_ok() {
                return;
            }
        }
        // The worker is gone; the task cannot run.
        worker.pending.fetch_sub(1, Ordering::SeqCst);
    }

    /// Blocks until every queued task has completed.
    pub fn join(&self) {
        let mut guard = self.signal.lock.lock();
        while self
            .workers
            .iter()
            .any(|worker| worker.pending.load(Ordering::SeqCst) != 0)
        {
            self.signal.cond.wait(&mut guard);
        }
    }
}

impl Drop for WorkerGroup {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            worker.sender = None;
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

fn run_worker(receiver: &Receiver<Task>, pending: &AtomicUsize, signal: &Signal) {
    while let Ok(task) = receiver.recv() {
        task();
        if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _guard = signal.lock.lock();
            signal.cond.notify_all();
        }
    }
}

/// One-shot barrier counted down by worker tasks.
pub struct Countdown {
    remaining: Mutex<usize>,
    cond: Condvar,
}

impl Countdown {
    /// Creates a barrier expecting `count` completions.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            cond: Condvar::new(),
        }
    }

    /// Records one completion.
    pub fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
            if *remaining == 0 {
                self.cond.notify_all();
            }
        }
    }

    /// Blocks until every expected completion has been recorded.
    pub fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining != 0 {
            self.cond.wait(&mut remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    #[test]
    fn tasks_run_exactly_once() {
        let group = WorkerGroup::new(4, 16);
        let counter = Arc::new(AtomicU64::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            group.enqueue(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        group.join();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn same_worker_preserves_order() {
        let group = WorkerGroup::new(4, 64);
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let order = Arc::clone(&order);
            group.enqueue(Box::new(move || {
                std::thread::sleep(Duration::from_millis(20));
                order.lock().push(1);
            }))
        };
        for i in 2..=20 {
            let order = Arc::clone(&order);
            group.enqueue_to(
                first,
                Box::new(move || {
                    order.lock().push(i);
                }),
            );
        }
        group.join();

        let order = order.lock();
        assert_eq!(*order, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn join_with_no_tasks_returns() {
        let group = WorkerGroup::new(2, 4);
        group.join();
    }

    #[test]
    fn join_waits_for_slow_tasks() {
        let group = WorkerGroup::new(2, 4);
        let done = Arc::new(AtomicU64::new(0));
        for _ in 0..4 {
            let done = Arc::clone(&done);
            group.enqueue(Box::new(move || {
                std::thread::sleep(Duration::from_millis(30));
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }
        group.join();
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn countdown_releases_waiter() {
        let countdown = Arc::new(Countdown::new(3));
        let group = WorkerGroup::new(3, 4);
        for _ in 0..3 {
            let countdown = Arc::clone(&countdown);
            group.enqueue(Box::new(move || countdown.count_down()));
        }
        countdown.wait();
    }

    #[test]
    fn countdown_of_zero_never_blocks() {
        Countdown::new(0).wait();
    }
}
