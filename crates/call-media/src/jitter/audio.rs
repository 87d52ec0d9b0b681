//! Audio jitter buffer: `ordered`/`latest` pop modes.

use super::{EntryQueue, JitterBufferEntry, PushOutcome};

pub const DEFAULT_CAPACITY: usize = 1800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    /// First pop returns the latest buffered entry (cold-start catch-up);
    /// subsequent pops drain the head in order.
    Ordered,
    /// Every pop returns the tail and discards everything older.
    Latest,
}

pub struct AudioJitterBuffer {
    queue: EntryQueue,
    mode: AudioMode,
    has_popped: bool,
    duplicate_dropped: u64,
}

impl AudioJitterBuffer {
    pub fn new(mode: AudioMode, capacity: usize) -> Self {
        Self {
            queue: EntryQueue::new(capacity),
            mode,
            has_popped: false,
            duplicate_dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn duplicate_dropped(&self) -> u64 {
        self.duplicate_dropped
    }

    pub fn dropped_for_capacity(&self) -> u64 {
        self.queue.dropped_oldest()
    }

    pub fn push(&mut self, entry: JitterBufferEntry) -> PushOutcome {
        if self.queue.insert_sorted(entry) {
            PushOutcome::Inserted
        } else {
            self.duplicate_dropped += 1;
            PushOutcome::Duplicate
        }
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.has_popped = false;
    }

    pub fn pop(&mut self) -> Option<JitterBufferEntry> {
        match self.mode {
            AudioMode::Ordered => {
                if !self.has_popped {
                    self.has_popped = true;
                    self.queue.pop_back()
                } else {
                    self.queue.pop_front()
                }
            }
            AudioMode::Latest => {
                let latest = self.queue.pop_back()?;
                self.queue.clear();
                Some(latest)
            }
        }
    }
}
