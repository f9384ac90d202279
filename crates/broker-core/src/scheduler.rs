//! Priority-ordered admission structure for QUEUED messages.
//!
//! A passive data structure: it knows nothing about message state. Cancelled
//! entries are withdrawn lazily — see the module doc on [`PriorityScheduler::dequeue_blocking`].

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use broker_shared::Priority;

/// One admitted-but-not-yet-dispatched entry, ordered by
/// `(priority_rank, sequence)` ascending — the pair compares as a min-heap
/// key via the reversed [`Ord`] impl below.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct Entry {
    priority_rank: u8,
    sequence: u64,
    id: Uuid,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so that `BinaryHeap` (a max-heap) pops the smallest
        // (priority_rank, sequence) pair first.
        other
            .priority_rank
            .cmp(&self.priority_rank)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The set of QUEUED messages ordered by `(priority_rank, sequence)`.
///
/// Enqueue is synchronous and cheap (`O(log n)`, never awaits); dequeue is
/// async and suspends the caller until work is available or the scheduler is
/// shut down.
#[derive(Debug)]
pub struct PriorityScheduler {
    heap: Mutex<BinaryHeap<Entry>>,
    notify: tokio::sync::Notify,
}

/// Outcome of [`PriorityScheduler::dequeue_blocking`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dequeued {
    /// An id was popped off the head of the heap. The caller (the dispatch
    /// worker) is responsible for re-checking the message's actual state —
    /// it may have been cancelled after admission.
    Id(Uuid),
    /// The scheduler's cancellation signal was tripped; the caller should
    /// stop consuming and exit.
    Shutdown,
}

impl Default for PriorityScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityScheduler {
    pub fn new() -> Self {
        PriorityScheduler {
            heap: Mutex::new(BinaryHeap::new()),
            notify: tokio::sync::Notify::new(),
        }
    }

    /// Admit `id` at the given priority and sequence. Never blocks.
    pub fn enqueue(&self, id: Uuid, priority: Priority, sequence: u64) {
        self.heap.lock().push(Entry {
            priority_rank: priority.rank(),
            sequence,
            id,
        });
        self.notify.notify_one();
    }

    /// Pop the head of the heap, suspending while the heap is empty.
    ///
    /// Returns [`Dequeued::Shutdown`] as soon as `cancel` is tripped, even if
    /// entries remain — the caller is expected to have already decided it is
    /// draining and exiting, not that the queue is empty.
    pub async fn dequeue_blocking(&self, cancel: &CancellationToken) -> Dequeued {
        loop {
            // Register interest in a future notification *before* checking
            // the heap again, so a concurrent `enqueue` between the check
            // and the `.await` below is never missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);

            if let Some(entry) = self.heap.lock().pop() {
                return Dequeued::Id(entry.id);
            }

            if cancel.is_cancelled() {
                return Dequeued::Shutdown;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return Dequeued::Shutdown,
            }
        }
    }

    /// Best-effort removal of `id` from the heap, for callers that want the
    /// entry gone immediately rather than skipped lazily at dequeue time.
    /// Returns whether an entry was actually removed.
    pub fn withdraw(&self, id: Uuid) -> bool {
        let mut heap = self.heap.lock();
        let before = heap.len();
        let remaining: BinaryHeap<Entry> = heap.drain().filter(|e| e.id != id).collect();
        *heap = remaining;
        heap.len() != before
    }

    /// Current number of admitted-but-not-dispatched entries. Used for
    /// queue-position reporting; racy by nature (snapshot under the lock).
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of currently admitted ids in the order they would dispatch,
    /// without removing anything. Used by the query surface to compute
    /// `queue_position` for a still-queued message. `O(n log n)`; fine for
    /// the occasional status/summary read, not on any hot path.
    pub fn ordered_ids(&self) -> Vec<Uuid> {
        let heap = self.heap.lock();
        let mut entries: Vec<Entry> = heap.iter().copied().collect();
        entries.sort_by(|a, b| {
            a.priority_rank
                .cmp(&b.priority_rank)
                .then(a.sequence.cmp(&b.sequence))
        });
        entries.into_iter().map(|e| e.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    #[tokio::test]
    async fn dequeues_high_before_normal_before_low() {
        let sched = PriorityScheduler::new();
        sched.enqueue(uuid(1), Priority::Normal, 1);
        sched.enqueue(uuid(2), Priority::Low, 2);
        sched.enqueue(uuid(3), Priority::High, 3);

        let cancel = CancellationToken::new();
        let first = sched.dequeue_blocking(&cancel).await;
        let second = sched.dequeue_blocking(&cancel).await;
        let third = sched.dequeue_blocking(&cancel).await;

        assert_eq!(first, Dequeued::Id(uuid(3)));
        assert_eq!(second, Dequeued::Id(uuid(1)));
        assert_eq!(third, Dequeued::Id(uuid(2)));
    }

    #[tokio::test]
    async fn fifo_within_same_priority() {
        let sched = PriorityScheduler::new();
        for n in 1..=5u8 {
            sched.enqueue(uuid(n), Priority::Normal, n as u64);
        }
        let cancel = CancellationToken::new();
        for n in 1..=5u8 {
            assert_eq!(sched.dequeue_blocking(&cancel).await, Dequeued::Id(uuid(n)));
        }
    }

    #[tokio::test]
    async fn dequeue_blocks_until_enqueue() {
        let sched = std::sync::Arc::new(PriorityScheduler::new());
        let cancel = CancellationToken::new();

        let sched2 = sched.clone();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { sched2.dequeue_blocking(&cancel2).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        sched.enqueue(uuid(9), Priority::Normal, 1);

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("should not time out")
            .expect("task should not panic");
        assert_eq!(result, Dequeued::Id(uuid(9)));
    }

    #[tokio::test]
    async fn shutdown_wakes_blocked_dequeue() {
        let sched = std::sync::Arc::new(PriorityScheduler::new());
        let cancel = CancellationToken::new();

        let sched2 = sched.clone();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { sched2.dequeue_blocking(&cancel2).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("should not time out")
            .expect("task should not panic");
        assert_eq!(result, Dequeued::Shutdown);
    }

    #[test]
    fn ordered_ids_matches_dispatch_order_without_removing() {
        let sched = PriorityScheduler::new();
        sched.enqueue(uuid(1), Priority::Normal, 1);
        sched.enqueue(uuid(2), Priority::Low, 2);
        sched.enqueue(uuid(3), Priority::High, 3);

        assert_eq!(sched.ordered_ids(), vec![uuid(3), uuid(1), uuid(2)]);
        // non-destructive
        assert_eq!(sched.len(), 3);
    }

    #[test]
    fn withdraw_removes_entry() {
        let sched = PriorityScheduler::new();
        sched.enqueue(uuid(1), Priority::Normal, 1);
        sched.enqueue(uuid(2), Priority::Normal, 2);
        assert!(sched.withdraw(uuid(1)));
        assert!(!sched.withdraw(uuid(1)));
        assert_eq!(sched.len(), 1);
    }
}
