/// Recent-Updates Buffer
///
/// A bounded, multi-consumer, multicast replay queue of the most recently
/// published `Update`s (default capacity 1024). Unlike a plain
/// `tokio::sync::broadcast` channel, callers can attach and replay the
/// entire window currently retained -- a subscriber handing off from a
/// historical read to the live tail needs to see an event it knows was
/// already published, not just events sent after attaching. Each
/// subscriber then advances independently from its own cursor.

use crate::error::RepoError;
use crate::types::Update;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

struct Inner {
    entries: VecDeque<Update>,
    /// Sequence number of `entries[0]`, or the next sequence to be assigned
    /// if `entries` is empty.
    base_seq: u64,
    next_seq: u64,
    capacity: usize,
}

impl Inner {
    fn push(&mut self, update: Update) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.base_seq += 1;
        }
        self.entries.push_back(update);
        self.next_seq += 1;
    }
}

/// Shared handle the write path publishes through.
#[derive(Clone)]
pub struct RecentUpdatesBuffer {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl RecentUpdatesBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "recent-updates buffer capacity must be positive");
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity),
                base_seq: 0,
                next_seq: 0,
                capacity,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Publishes one event. Must be called while the caller still holds the
    /// repository's exclusive write lock, so publish order always matches
    /// the order state changes became visible. Never blocks: the ring
    /// buffer simply evicts its oldest entry.
    pub fn publish(&self, update: Update) {
        self.inner.lock().unwrap().push(update);
        self.notify.notify_waiters();
    }

    /// Attaches a new cursor positioned at the oldest entry still retained
    /// (an empty buffer attaches at the tail). This call, and whatever
    /// read established the caller's last-seen id, must happen while still
    /// holding the repository's read lock so no publish can land in between.
    pub fn attach(&self) -> BufferCursor {
        let guard = self.inner.lock().unwrap();
        BufferCursor {
            inner: self.inner.clone(),
            notify: self.notify.clone(),
            next_read_seq: guard.base_seq,
        }
    }

    /// Clones every entry currently retained, oldest first. Lets a
    /// historical splice recover raw events for a height that has already
    /// been folded into the persistent log, as long as the buffer hasn't
    /// evicted them yet. Must be read under the same lock hold as `attach`
    /// so the snapshot and the cursor's starting point agree.
    pub fn snapshot(&self) -> Vec<Update> {
        self.inner.lock().unwrap().entries.iter().cloned().collect()
    }
}

/// Per-subscriber read cursor into the shared ring buffer.
pub struct BufferCursor {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
    next_read_seq: u64,
}

impl BufferCursor {
    /// Awaits and returns the next update after this cursor's position.
    /// Returns `Err(LaggedBehind)` if the buffer evicted the entry this
    /// cursor needed before it could be read.
    pub async fn recv(&mut self) -> Result<Update, RepoError> {
        loop {
            let notified = {
                let guard = self.inner.lock().unwrap();
                if self.next_read_seq < guard.base_seq {
                    return Err(RepoError::LaggedBehind);
                }
                let offset = (self.next_read_seq - guard.base_seq) as usize;
                if let Some(update) = guard.entries.get(offset) {
                    self.next_read_seq += 1;
                    return Ok(update.clone());
                }
                self.notify.notified()
            };
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockAppended, BlockId};

    fn update(id: u8) -> Update {
        Update::BlockAppended(BlockAppended {
            height: id as u32,
            id: BlockId([id; 32]),
            payload: vec![],
        })
    }

    #[tokio::test]
    async fn attach_then_publish_delivers_in_order() {
        let buf = RecentUpdatesBuffer::new(4);
        let mut cursor = buf.attach();
        buf.publish(update(1));
        buf.publish(update(2));
        assert_eq!(cursor.recv().await.unwrap(), update(1));
        assert_eq!(cursor.recv().await.unwrap(), update(2));
    }

    #[tokio::test]
    async fn attach_replays_the_currently_retained_window() {
        let buf = RecentUpdatesBuffer::new(4);
        buf.publish(update(1));
        buf.publish(update(2));
        let mut cursor = buf.attach();
        assert_eq!(cursor.recv().await.unwrap(), update(1));
        assert_eq!(cursor.recv().await.unwrap(), update(2));
    }

    #[tokio::test]
    async fn cursor_that_falls_behind_capacity_is_severed() {
        let buf = RecentUpdatesBuffer::new(2);
        let mut cursor = buf.attach();
        buf.publish(update(1));
        buf.publish(update(2));
        buf.publish(update(3)); // evicts 1, cursor still wants seq 0 (update 1)
        let err = cursor.recv().await.unwrap_err();
        assert!(matches!(err, RepoError::LaggedBehind));
    }

    #[tokio::test]
    async fn recv_waits_for_a_future_publish() {
        let buf = RecentUpdatesBuffer::new(4);
        let mut cursor = buf.attach();
        let buf2 = buf.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            buf2.publish(update(9));
        });
        assert_eq!(cursor.recv().await.unwrap(), update(9));
        handle.await.unwrap();
    }
}
