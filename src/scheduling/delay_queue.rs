//! Blocking, unbounded, deadline-ordered queue.
//!
//! `DelayQueue` keeps its items in a min-heap keyed by `(deadline, sequence)`. Consumers
//! block in [`DelayQueue::take`] until the head is due. To keep the number of armed timers
//! at one no matter how many threads are waiting, the queue elects a *leader*: the only
//! thread allowed to sleep with a timeout on the current head. Everyone else (followers)
//! parks without a timeout and is woken either when the head changes or when the leader
//! hands timing responsibility over on its way out.
use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    thread::{self, ThreadId},
};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use super::Scheduleable;

/// Heap entry ordered by `(deadline, sequence)`.
#[derive(Debug)]
struct Entry<T>(T);

impl<T: Scheduleable> Entry<T> {
    fn key(&self) -> (std::time::Instant, u64) {
        (self.0.deadline(), self.0.sequence())
    }
}

impl<T: Scheduleable> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T: Scheduleable> Eq for Entry<T> {}

impl<T: Scheduleable> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl<T: Scheduleable> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
struct Inner<T> {
    heap: BinaryHeap<Reverse<Entry<T>>>,
    leader: Option<ThreadId>,
    closed: bool,
    interrupted: bool,
    #[cfg(test)]
    timed_waiters: usize,
    #[cfg(test)]
    peak_timed_waiters: usize,
}

/// Concurrent min-heap with blocking, deadline-aware consumption.
#[derive(Debug)]
pub struct DelayQueue<T: Scheduleable> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
}

impl<T: Scheduleable> Default for DelayQueue<T> {
    fn default() -> Self {
        DelayQueue::new()
    }
}

impl<T: Scheduleable> DelayQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                leader: None,
                closed: false,
                interrupted: false,
                #[cfg(test)]
                timed_waiters: 0,
                #[cfg(test)]
                peak_timed_waiters: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Push an item. Hands the item back once the queue has been closed.
    ///
    /// If the item becomes the new head, the current leader (if any) is timing the wrong
    /// deadline, so leadership is revoked and one waiter is woken to reconsider.
    pub fn insert(&self, item: T) -> Result<(), T> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(item);
        }
        let sequence = item.sequence();
        inner.heap.push(Reverse(Entry(item)));
        if inner
            .heap
            .peek()
            .is_some_and(|Reverse(head)| head.0.sequence() == sequence)
        {
            inner.leader = None;
            self.available.notify_one();
        }
        Ok(())
    }

    /// Block until the head's deadline has passed, then remove and return it.
    ///
    /// Returns `None` once the queue is interrupted, or once it is closed and empty.
    pub fn take(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        let taken = loop {
            if inner.interrupted {
                break None;
            }
            let delay = match inner.heap.peek() {
                Some(Reverse(head)) => head.0.delay(),
                None if inner.closed => break None,
                None => {
                    self.available.wait(&mut inner);
                    continue;
                }
            };
            if delay.is_zero() {
                break inner.heap.pop().map(|Reverse(entry)| entry.0);
            }
            if inner.leader.is_some() {
                self.available.wait(&mut inner);
                continue;
            }
            let me = thread::current().id();
            inner.leader = Some(me);
            trace!(?delay, "leading timed wait on queue head");
            #[cfg(test)]
            {
                inner.timed_waiters += 1;
                inner.peak_timed_waiters = inner.peak_timed_waiters.max(inner.timed_waiters);
            }
            self.available.wait_for(&mut inner, delay);
            #[cfg(test)]
            {
                inner.timed_waiters -= 1;
            }
            if inner.leader == Some(me) {
                inner.leader = None;
            }
        };
        if inner.heap.is_empty() && inner.closed {
            // followers parked behind a leader never saw the close; release them all
            self.available.notify_all();
        } else if inner.leader.is_none() && !inner.heap.is_empty() {
            self.available.notify_one();
        }
        taken
    }

    /// Drop the entry carrying `sequence`, if it is still queued.
    pub fn remove(&self, sequence: u64) -> bool {
        let mut inner = self.inner.lock();
        let was_head = inner
            .heap
            .peek()
            .is_some_and(|Reverse(head)| head.0.sequence() == sequence);
        let before = inner.heap.len();
        inner.heap.retain(|Reverse(entry)| entry.0.sequence() != sequence);
        let removed = inner.heap.len() != before;
        if was_head {
            inner.leader = None;
            self.available.notify_one();
        }
        removed
    }

    /// Refuse further inserts. Queued items are still handed out; once the heap runs dry
    /// every `take` returns `None`.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.available.notify_all();
    }

    /// Close the queue and release every blocked `take` immediately, queued items or not.
    pub fn interrupt(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.interrupted = true;
        self.available.notify_all();
    }

    /// Remove every queued item, earliest first.
    pub fn drain(&self) -> Vec<T> {
        let mut inner = self.inner.lock();
        let heap = std::mem::take(&mut inner.heap);
        inner.leader = None;
        heap.into_sorted_vec()
            .into_iter()
            .rev()
            .map(|Reverse(entry)| entry.0)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Thread currently timing the head's deadline, if any.
    pub fn leader(&self) -> Option<ThreadId> {
        self.inner.lock().leader
    }

    /// Most takers ever seen in a timed wait at the same time.
    #[cfg(test)]
    fn peak_timed_waiters(&self) -> usize {
        self.inner.lock().peak_timed_waiters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{Clock, ManualClock, SystemClock};
    use std::{
        sync::Arc,
        time::{Duration, Instant},
    };

    #[derive(Debug)]
    struct Stamp {
        deadline: Instant,
        sequence: u64,
        value: i32,
        clock: Arc<dyn Clock>,
    }

    impl Scheduleable for Stamp {
        fn deadline(&self) -> Instant {
            self.deadline
        }
        fn sequence(&self) -> u64 {
            self.sequence
        }
        fn delay(&self) -> Duration {
            self.deadline.saturating_duration_since(self.clock.now())
        }
    }

    fn stamp(clock: &Arc<dyn Clock>, deadline: Instant, sequence: u64, value: i32) -> Stamp {
        Stamp {
            deadline,
            sequence,
            value,
            clock: Arc::clone(clock),
        }
    }

    #[test]
    fn distinct_deadlines_come_out_in_order() {
        let manual = Arc::new(ManualClock::new());
        let t0 = manual.now();
        let clock: Arc<dyn Clock> = manual.clone();
        let queue = DelayQueue::new();
        for (seq, offset) in [50u64, 10, 40, 20, 30].into_iter().enumerate() {
            let deadline = t0 + Duration::from_millis(offset);
            queue
                .insert(stamp(&clock, deadline, seq as u64, offset as i32))
                .unwrap();
        }
        manual.advance(Duration::from_millis(100));

        let order: Vec<i32> = (0..5).map(|_| queue.take().unwrap().value).collect();
        assert_eq!(order, vec![10, 20, 30, 40, 50]);
        assert!(queue.is_empty());
    }

    #[test]
    fn equal_deadlines_come_out_in_submission_order() {
        let manual = Arc::new(ManualClock::new());
        let clock: Arc<dyn Clock> = manual.clone();
        let deadline = manual.now();
        let queue = DelayQueue::new();
        for seq in [3u64, 0, 4, 1, 2] {
            queue.insert(stamp(&clock, deadline, seq, seq as i32)).unwrap();
        }
        let order: Vec<u64> = (0..5).map(|_| queue.take().unwrap().sequence).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn nanosecond_deadlines_with_fixed_clock() {
        let manual = Arc::new(ManualClock::new());
        let t0 = manual.now();
        let clock: Arc<dyn Clock> = manual.clone();
        let first = stamp(&clock, t0 + Duration::from_nanos(1000), 0, 1);
        let second = stamp(&clock, t0 + Duration::from_nanos(1000), 1, 2);
        let third = stamp(&clock, t0 + Duration::from_nanos(2000), 2, 3);

        assert_eq!(first.delay(), Duration::from_nanos(1000));
        assert_eq!(third.delay(), Duration::from_nanos(2000));

        let queue = DelayQueue::new();
        queue.insert(third).unwrap();
        queue.insert(first).unwrap();
        queue.insert(second).unwrap();

        manual.set(t0 + Duration::from_nanos(1000));
        assert_eq!(queue.take().unwrap().value, 1);

        manual.set(t0 + Duration::from_nanos(2010));
        assert_eq!(queue.take().unwrap().value, 2);
        assert_eq!(queue.take().unwrap().value, 3);
    }

    #[test]
    fn take_waits_for_deadline() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let queue = DelayQueue::new();
        let start = Instant::now();
        queue
            .insert(stamp(&clock, start + Duration::from_millis(30), 0, 7))
            .unwrap();
        assert_eq!(queue.take().unwrap().value, 7);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn earlier_insert_preempts_leader() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let queue = Arc::new(DelayQueue::new());
        let start = Instant::now();
        queue
            .insert(stamp(&clock, start + Duration::from_secs(5), 0, 1))
            .unwrap();

        let taker = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take().map(|p| p.value))
        };
        thread::sleep(Duration::from_millis(20));
        queue
            .insert(stamp(&clock, Instant::now() + Duration::from_millis(10), 1, 2))
            .unwrap();

        assert_eq!(taker.join().unwrap(), Some(2));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn single_leader_among_many_takers() {
        const TAKERS: u64 = 6;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let queue = Arc::new(DelayQueue::new());
        let start = Instant::now();
        // staggered deadlines hand leadership over once per item
        for seq in 0..TAKERS {
            let deadline = start + Duration::from_millis(60 + 15 * seq);
            queue.insert(stamp(&clock, deadline, seq, seq as i32)).unwrap();
        }

        let takers: Vec<_> = (0..TAKERS)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.take().unwrap().sequence)
            })
            .collect();
        let ids: Vec<ThreadId> = takers.iter().map(|t| t.thread().id()).collect();

        thread::sleep(Duration::from_millis(30));
        let leader = queue.leader().expect("one taker should be timing the head");
        assert!(ids.contains(&leader));

        let mut taken: Vec<u64> = takers.into_iter().map(|t| t.join().unwrap()).collect();
        taken.sort_unstable();
        assert_eq!(taken, (0..TAKERS).collect::<Vec<_>>());
        assert!(queue.leader().is_none());
        assert_eq!(queue.peak_timed_waiters(), 1);
    }

    #[test]
    fn close_releases_parked_followers() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let queue = Arc::new(DelayQueue::new());
        queue
            .insert(stamp(&clock, Instant::now() + Duration::from_millis(50), 0, 1))
            .unwrap();

        let takers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.take().map(|p| p.value))
            })
            .collect();
        thread::sleep(Duration::from_millis(10));
        queue.close();

        let mut results: Vec<Option<i32>> =
            takers.into_iter().map(|t| t.join().unwrap()).collect();
        results.sort_unstable();
        assert_eq!(results, vec![None, None, Some(1)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn remove_drops_entry_and_wakes_waiter() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let queue = Arc::new(DelayQueue::new());
        let now = Instant::now();
        queue
            .insert(stamp(&clock, now + Duration::from_secs(5), 0, 1))
            .unwrap();
        queue
            .insert(stamp(&clock, now + Duration::from_millis(40), 1, 2))
            .unwrap();

        assert!(queue.remove(1));
        assert!(!queue.remove(1));
        assert_eq!(queue.len(), 1);

        queue.insert(stamp(&clock, Instant::now(), 2, 3)).unwrap();
        assert_eq!(queue.take().unwrap().value, 3);
    }

    #[test]
    fn closed_queue_rejects_and_drains_out() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let queue = Arc::new(DelayQueue::new());
        queue
            .insert(stamp(&clock, Instant::now() + Duration::from_millis(20), 0, 1))
            .unwrap();
        queue.close();

        let rejected = queue.insert(stamp(&clock, Instant::now(), 1, 2));
        assert_eq!(rejected.unwrap_err().value, 2);

        assert_eq!(queue.take().unwrap().value, 1);
        assert!(queue.take().is_none());
    }

    #[test]
    fn interrupt_releases_blocked_takers() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let queue = Arc::new(DelayQueue::<Stamp>::new());
        let empty_waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take().is_none())
        };
        thread::sleep(Duration::from_millis(10));
        queue
            .insert(stamp(&clock, Instant::now() + Duration::from_secs(10), 0, 1))
            .unwrap();
        let timed_waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take().is_none())
        };
        thread::sleep(Duration::from_millis(10));

        queue.interrupt();
        assert!(empty_waiter.join().unwrap());
        assert!(timed_waiter.join().unwrap());

        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_returns_items_earliest_first() {
        let manual = Arc::new(ManualClock::new());
        let t0 = manual.now();
        let clock: Arc<dyn Clock> = manual.clone();
        let queue = DelayQueue::new();
        queue.insert(stamp(&clock, t0 + Duration::from_secs(3), 0, 3)).unwrap();
        queue.insert(stamp(&clock, t0 + Duration::from_secs(1), 1, 1)).unwrap();
        queue.insert(stamp(&clock, t0 + Duration::from_secs(2), 2, 2)).unwrap();
        let values: Vec<i32> = queue.drain().into_iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }
}
