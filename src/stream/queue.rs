//! Per-viewer outbound frame queue
//!
//! The fan-out pushes with [`FrameQueue::enqueue`], which never blocks and
//! never waits on the viewer. The transport's send loop pulls with
//! [`FrameQueue::dequeue`], which suspends only that viewer's loop until a
//! packet arrives or the queue is closed.

use super::packet::EncodedPacket;
use crate::config::{OverflowPolicy, QueueConfig};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// Result of handing a packet to a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended to the tail
    Queued,
    /// Appended after evicting the oldest pending packet
    DroppedOldest,
    /// Capacity exceeded under the disconnect policy; the queue is now closed
    Overflowed,
    /// Queue was already closed; packet discarded
    Closed,
}

impl EnqueueOutcome {
    /// Whether the packet is now pending in the queue
    pub fn is_queued(&self) -> bool {
        matches!(self, EnqueueOutcome::Queued | EnqueueOutcome::DroppedOldest)
    }
}

struct QueueInner {
    packets: VecDeque<EncodedPacket>,
    closed: bool,
    dropped: u64,
}

/// FIFO of packets awaiting transmission to one viewer
pub struct FrameQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    config: QueueConfig,
}

impl FrameQueue {
    /// Create a queue with the given capacity policy
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                packets: VecDeque::new(),
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
            config: *config,
        }
    }

    /// Create a queue without a capacity limit
    pub fn unbounded() -> Self {
        Self::new(&QueueConfig::unbounded())
    }

    /// Append a packet to the tail
    pub fn enqueue(&self, packet: EncodedPacket) -> EnqueueOutcome {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return EnqueueOutcome::Closed;
            }

            if self.config.is_bounded() && inner.packets.len() >= self.config.capacity {
                match self.config.overflow {
                    OverflowPolicy::DropOldest => {
                        inner.packets.pop_front();
                        inner.dropped += 1;
                        inner.packets.push_back(packet);
                        EnqueueOutcome::DroppedOldest
                    }
                    OverflowPolicy::Disconnect => {
                        inner.dropped += inner.packets.len() as u64 + 1;
                        inner.packets.clear();
                        inner.closed = true;
                        EnqueueOutcome::Overflowed
                    }
                }
            } else {
                inner.packets.push_back(packet);
                EnqueueOutcome::Queued
            }
        };

        if outcome == EnqueueOutcome::Overflowed {
            self.notify.notify_waiters();
        } else {
            self.notify.notify_one();
        }
        outcome
    }

    /// Wait for the next packet in FIFO order
    ///
    /// Returns `None` once the queue is closed, which is the end-of-stream
    /// signal for the send loop.
    pub async fn dequeue(&self) -> Option<EncodedPacket> {
        loop {
            // Registered before checking so a close between the check and
            // the await is not missed.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(packet) = inner.packets.pop_front() {
                    return Some(packet);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Take the next packet without waiting
    pub fn try_dequeue(&self) -> Option<EncodedPacket> {
        self.inner.lock().packets.pop_front()
    }

    /// Close the queue and discard pending packets
    ///
    /// Returns how many packets were discarded. Closing twice is a no-op.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return 0;
            }
            inner.closed = true;
            let n = inner.packets.len();
            inner.packets.clear();
            n
        };
        self.notify.notify_waiters();
        discarded
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of pending packets
    pub fn len(&self) -> usize {
        self.inner.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Packets lost to the capacity policy
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::packet::TimeBase;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    fn packet(pts: u64) -> EncodedPacket {
        EncodedPacket::new(Bytes::from(vec![pts as u8; 4]), pts, TimeBase::default())
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = FrameQueue::unbounded();
        for pts in 0..5 {
            assert_eq!(queue.enqueue(packet(pts)), EnqueueOutcome::Queued);
        }
        assert_eq!(queue.len(), 5);

        for pts in 0..5 {
            assert_eq!(queue.dequeue().await.unwrap().pts, pts);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = Arc::new(FrameQueue::unbounded());
        let reader = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        queue.enqueue(packet(42));
        let received = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.unwrap().pts, 42);
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_reader() {
        let queue = Arc::new(FrameQueue::unbounded());
        let reader = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.close(), 0);

        let received = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_close_discards_and_rejects() {
        let queue = FrameQueue::unbounded();
        queue.enqueue(packet(0));
        queue.enqueue(packet(1));

        assert_eq!(queue.close(), 2);
        assert_eq!(queue.close(), 0);
        assert!(queue.is_closed());
        assert_eq!(queue.enqueue(packet(2)), EnqueueOutcome::Closed);
        assert!(queue.dequeue().await.is_none());
    }

    #[test]
    fn test_drop_oldest_policy() {
        let queue = FrameQueue::new(&QueueConfig::bounded(2, OverflowPolicy::DropOldest));
        assert_eq!(queue.enqueue(packet(0)), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue(packet(1)), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue(packet(2)), EnqueueOutcome::DroppedOldest);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.try_dequeue().unwrap().pts, 1);
        assert_eq!(queue.try_dequeue().unwrap().pts, 2);
    }

    #[test]
    fn test_disconnect_policy_closes_queue() {
        let queue = FrameQueue::new(&QueueConfig::bounded(1, OverflowPolicy::Disconnect));
        assert_eq!(queue.enqueue(packet(0)), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue(packet(1)), EnqueueOutcome::Overflowed);

        assert!(queue.is_closed());
        assert!(queue.is_empty());
        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.enqueue(packet(2)), EnqueueOutcome::Closed);
    }
}
