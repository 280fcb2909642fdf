//! Bounded blocking job queues for the ingest pipeline.
//!
//! Jobs are fixed-size tuple buffers that cycle between a free-queue and
//! a full-queue: the reader pops free buffers, fills them from the
//! socket and pushes them full; workers pop full buffers, collect them
//! and push them back free. The free-queue's fixed pool is the
//! back-pressure bound: when workers lag, the reader blocks on the
//! empty free-queue, which in turn stalls the socket read.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Tuples per job buffer (256 KiB of payload).
pub const JOB_SIZE: usize = 1 << 16;

/// One pool-owned tuple buffer. `cnt` is the number of valid tuples in
/// `buf`; the bytes beyond may hold a partial trailing word carried into
/// the next fill.
pub struct Job {
    pub cnt: usize,
    pub buf: Vec<u32>,
}

impl Job {
    pub fn new() -> Self {
        Job {
            cnt: 0,
            buf: vec![0; JOB_SIZE],
        }
    }
}

impl Default for Job {
    fn default() -> Self {
        Self::new()
    }
}

/// Unbounded-capacity blocking FIFO with wake-one semantics.
///
/// Boundedness comes from the element pool, not the queue: a pipeline
/// circulates a fixed set of jobs, so neither queue can ever hold more
/// than the pool size. Shutdown is by value: pipelines use
/// `JobQueue<Option<Job>>` and push one `None` per consumer.
pub struct JobQueue<T> {
    queue: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> JobQueue<T> {
    pub fn new() -> Self {
        JobQueue {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    /// Blocks until an element is available and takes the front one.
    pub fn pop(&self) -> T {
        let mut queue = self.queue.lock().expect("queue mutex poisoned");
        loop {
            if let Some(front) = queue.pop_front() {
                return front;
            }
            queue = self.ready.wait(queue).expect("queue mutex poisoned");
        }
    }

    /// Appends an element and wakes one waiter.
    pub fn push(&self, value: T) {
        {
            let mut queue = self.queue.lock().expect("queue mutex poisoned");
            queue.push_back(value);
        }
        self.ready.notify_one();
    }
}

impl<T> Default for JobQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue<Option<Job>> {
    /// A free-queue pre-seeded with `pool` job buffers.
    pub fn with_pool(pool: usize) -> Self {
        let queue = Self::new();
        for _ in 0..pool {
            queue.push(Some(Job::new()));
        }
        queue
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn fifo_order_per_producer() {
        let queue = JobQueue::new();
        for i in 0..10 {
            queue.push(i);
        }
        for i in 0..10 {
            assert_eq!(queue.pop(), i);
        }
    }

    #[test]
    fn pop_blocks_until_push() {
        let queue = Arc::new(JobQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };
        thread::sleep(std::time::Duration::from_millis(20));
        queue.push(42u32);
        assert_eq!(consumer.join().unwrap(), 42);
    }

    #[test]
    fn pool_cycles_through_both_queues() {
        let free = JobQueue::with_pool(3);
        let full: JobQueue<Option<Job>> = JobQueue::new();

        for round in 0..5 {
            let mut job = free.pop().expect("pool job");
            job.cnt = round;
            full.push(Some(job));
            let job = full.pop().expect("job just pushed");
            assert_eq!(job.cnt, round);
            free.push(Some(job));
        }
    }

    #[test]
    fn sentinel_terminates_consumers() {
        let full: Arc<JobQueue<Option<Job>>> = Arc::new(JobQueue::new());
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let full = Arc::clone(&full);
                thread::spawn(move || {
                    let mut seen = 0usize;
                    while let Some(job) = full.pop() {
                        seen += job.cnt;
                    }
                    seen
                })
            })
            .collect();

        for _ in 0..20 {
            let mut job = Job::new();
            job.cnt = 1;
            full.push(Some(job));
        }
        for _ in 0..4 {
            full.push(None);
        }

        let total: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();
        assert_eq!(total, 20);
    }
}
