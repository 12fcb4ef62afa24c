//! Bounded hand-off between the read pump thread and the async consumer

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// What to throw away when the queue is full
///
/// Chosen once per run; the queue never switches policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OverflowPolicy {
    /// Keep what is queued, discard the incoming report
    #[default]
    DropNewest,
    /// Discard the oldest queued report to make room
    DropOldest,
}

/// Result of [`ReportQueue::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    DroppedNewest,
    DroppedOldest,
    /// Queue already closed, report discarded
    Closed,
}

#[derive(Default)]
struct Inner {
    reports: VecDeque<Vec<u8>>,
    closed: bool,
    close_reason: Option<String>,
    dropped: u64,
}

/// Bounded FIFO of raw reports with a terminal "closed" state
pub struct ReportQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    policy: OverflowPolicy,
    notify: Notify,
}

impl ReportQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
            policy,
            notify: Notify::new(),
        }
    }

    /// Enqueue a report without ever blocking the producer
    pub fn push(&self, report: Vec<u8>) -> PushOutcome {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return PushOutcome::Closed;
            }

            if inner.reports.len() < self.capacity {
                inner.reports.push_back(report);
                PushOutcome::Queued
            } else {
                inner.dropped += 1;
                match self.policy {
                    OverflowPolicy::DropNewest => PushOutcome::DroppedNewest,
                    OverflowPolicy::DropOldest => {
                        inner.reports.pop_front();
                        inner.reports.push_back(report);
                        PushOutcome::DroppedOldest
                    },
                }
            }
        };

        if outcome != PushOutcome::DroppedNewest {
            self.notify.notify_one();
        }
        outcome
    }

    /// Mark the stream as finished; the first reason recorded wins
    pub fn close(&self, reason: Option<String>) {
        {
            let mut inner = self.inner.lock();
            if inner.close_reason.is_none() {
                inner.close_reason = reason;
            }
            inner.closed = true;
        }
        self.notify.notify_one();
    }

    /// Next report in arrival order, or `None` once closed and drained
    pub async fn pop(&self) -> Option<Vec<u8>> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(report) = inner.reports.pop_front() {
                    return Some(report);
                }
                if inner.closed {
                    // Keep waking any other waiter
                    self.notify.notify_one();
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close_reason(&self) -> Option<String> {
        self.inner.lock().close_reason.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of reports discarded by the overflow policy
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn report(n: u8) -> Vec<u8> {
        vec![0x03, n]
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = ReportQueue::new(4, OverflowPolicy::DropNewest);
        for n in 0..3 {
            assert_eq!(queue.push(report(n)), PushOutcome::Queued);
        }
        for n in 0..3 {
            assert_eq!(queue.pop().await, Some(report(n)));
        }
    }

    #[tokio::test]
    async fn test_drop_newest_keeps_queued() {
        let queue = ReportQueue::new(2, OverflowPolicy::DropNewest);
        queue.push(report(1));
        queue.push(report(2));
        assert_eq!(queue.push(report(3)), PushOutcome::DroppedNewest);
        assert_eq!(queue.push(report(4)), PushOutcome::DroppedNewest);

        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.pop().await, Some(report(1)));
        assert_eq!(queue.pop().await, Some(report(2)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_freshest() {
        let queue = ReportQueue::new(2, OverflowPolicy::DropOldest);
        queue.push(report(1));
        queue.push(report(2));
        assert_eq!(queue.push(report(3)), PushOutcome::DroppedOldest);

        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop().await, Some(report(2)));
        assert_eq!(queue.pop().await, Some(report(3)));
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = ReportQueue::new(4, OverflowPolicy::DropNewest);
        queue.push(report(1));
        queue.close(Some("unplugged".to_string()));
        queue.close(Some("second reason".to_string()));

        assert_eq!(queue.push(report(2)), PushOutcome::Closed);
        assert_eq!(queue.pop().await, Some(report(1)));
        assert_eq!(queue.pop().await, None);
        assert_eq!(queue.pop().await, None);
        assert_eq!(queue.close_reason().as_deref(), Some("unplugged"));
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push_from_thread() {
        let queue = Arc::new(ReportQueue::new(4, OverflowPolicy::DropNewest));
        let producer = queue.clone();

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push(report(7));
        });

        let popped = tokio::time::timeout(Duration::from_secs(2), queue.pop())
            .await
            .expect("pop should wake up");
        assert_eq!(popped, Some(report(7)));
    }

    #[tokio::test]
    async fn test_pop_wakes_on_close() {
        let queue = Arc::new(ReportQueue::new(4, OverflowPolicy::DropNewest));
        let closer = queue.clone();

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            closer.close(None);
        });

        let popped = tokio::time::timeout(Duration::from_secs(2), queue.pop())
            .await
            .expect("pop should wake up");
        assert_eq!(popped, None);
        assert!(queue.is_closed());
        assert_eq!(queue.close_reason(), None);
    }
}
