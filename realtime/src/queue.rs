use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

/// A serialized outbound text frame. Shared across every connection an event
/// fans out to, so serialization happens once per event.
pub type Frame = Arc<str>;

/// Result of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Frame queued without loss.
    Queued,
    /// Queue was full: the oldest frame was discarded to make room and the
    /// queue is now degraded.
    DroppedOldest { consecutive: usize },
    /// Queue was full and the consecutive-drop threshold is reached. The frame
    /// was still queued (drop-oldest), but the owner must evict the consumer.
    Overflowed { consecutive: usize },
    /// Queue no longer accepts frames.
    Closed,
}

struct Inner {
    frames: VecDeque<Frame>,
    consecutive_drops: usize,
    closed: bool,
}

/// Bounded single-consumer queue with a drop-oldest overflow policy.
///
/// Producers (the dispatcher and the connection's reader) never block. The
/// single consumer is the connection's writer, which waits on `recv`.
pub struct OutboundQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
    max_consecutive_drops: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize, max_consecutive_drops: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                consecutive_drops: 0,
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            max_consecutive_drops: max_consecutive_drops.max(1),
        }
    }

    pub fn push(&self, frame: Frame) -> EnqueueOutcome {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return EnqueueOutcome::Closed;
            }

            if inner.frames.len() < self.capacity {
                inner.frames.push_back(frame);
                inner.consecutive_drops = 0;
                EnqueueOutcome::Queued
            } else {
                inner.frames.pop_front();
                inner.frames.push_back(frame);
                inner.consecutive_drops += 1;

                let consecutive = inner.consecutive_drops;
                if consecutive >= self.max_consecutive_drops {
                    EnqueueOutcome::Overflowed { consecutive }
                } else {
                    EnqueueOutcome::DroppedOldest { consecutive }
                }
            }
        };

        self.notify.notify_one();
        outcome
    }

    /// Wait for the next frame. Returns `None` once the queue is closed and
    /// every remaining frame has been handed out.
    pub async fn recv(&self) -> Option<Frame> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(frame) = inner.frames.pop_front() {
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }
            // notify_one stores a permit when nobody is waiting, so a push that
            // lands between the unlock above and this await is not lost.
            self.notify.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<Frame> {
        self.inner.lock().frames.pop_front()
    }

    /// Stop accepting frames. With `discard` the pending frames are dropped,
    /// otherwise the consumer still drains them before `recv` yields `None`.
    pub fn close(&self, discard: bool) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
            if discard {
                inner.frames.clear();
            }
        }
        self.notify.notify_one();
    }

    pub fn is_degraded(&self) -> bool {
        self.inner.lock().consecutive_drops > 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
