//! Video jitter buffer: `fast`/`normal`/`buffered`/`correctly` pop modes.

use std::collections::HashMap;

use super::{EntryQueue, JitterBufferEntry, PushOutcome};

pub const DEFAULT_CAPACITY: usize = 9000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoMode {
    Fast,
    Normal,
    Buffered { ahead_frames: usize },
    Correctly,
}

#[derive(Debug, Clone)]
pub struct VideoJitterBufferConfig {
    pub mode: VideoMode,
    pub capacity: usize,
    pub min_delay_ms: u64,
    /// Known encoder keyframe interval, used as the fallback group-advance
    /// signal in `correctly` mode when no `EndOfGroup` was received.
    pub keyframe_interval: Option<u64>,
    /// Minimum spacing between `correctly`-mode pops, to avoid bursts.
    pub min_pop_interval_ms: u64,
}

impl Default for VideoJitterBufferConfig {
    fn default() -> Self {
        Self {
            mode: VideoMode::Normal,
            capacity: DEFAULT_CAPACITY,
            min_delay_ms: 0,
            keyframe_interval: None,
            min_pop_interval_ms: 20,
        }
    }
}

pub struct VideoJitterBuffer {
    queue: EntryQueue,
    config: VideoJitterBufferConfig,
    last_popped: Option<(u64, u64)>,
    /// groupId -> objectId at which an EndOfGroup was observed for that
    /// group (the tail object before the group closed).
    pending_end_group_tail: HashMap<u64, u64>,
    last_pop_at_ms: Option<u64>,
    /// `buffered` mode latches into `fast` behavior once it has reached
    /// `ahead_frames` once, rather than re-stalling every time the buffer
    /// dips below threshold.
    buffered_started: bool,
    stale_dropped: u64,
    duplicate_dropped: u64,
}

impl VideoJitterBuffer {
    pub fn new(config: VideoJitterBufferConfig) -> Self {
        let capacity = config.capacity;
        Self {
            queue: EntryQueue::new(capacity),
            config,
            last_popped: None,
            pending_end_group_tail: HashMap::new(),
            last_pop_at_ms: None,
            buffered_started: false,
            stale_dropped: 0,
            duplicate_dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn stale_dropped(&self) -> u64 {
        self.stale_dropped
    }

    pub fn duplicate_dropped(&self) -> u64 {
        self.duplicate_dropped
    }

    pub fn dropped_for_capacity(&self) -> u64 {
        self.queue.dropped_oldest()
    }

    pub fn push(&mut self, entry: JitterBufferEntry) -> PushOutcome {
        if self.config.mode == VideoMode::Correctly {
            if let Some(last) = self.last_popped {
                if entry.key() <= last {
                    self.stale_dropped += 1;
                    return PushOutcome::Stale;
                }
            }
        }
        if entry.is_end_of_group {
            self.pending_end_group_tail
                .insert(entry.group_id, entry.object_id);
        }
        if self.queue.insert_sorted(entry) {
            PushOutcome::Inserted
        } else {
            self.duplicate_dropped += 1;
            PushOutcome::Duplicate
        }
    }

    /// Reset all state: on subscriber drop / unsubscribe.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.last_popped = None;
        self.pending_end_group_tail.clear();
        self.last_pop_at_ms = None;
        self.buffered_started = false;
    }

    fn ready_by_delay(&self, entry: &JitterBufferEntry, now_ms: u64) -> bool {
        now_ms.saturating_sub(entry.buffer_insert_timestamp_ms) >= self.config.min_delay_ms
    }

    fn record_pop(&mut self, entry: &JitterBufferEntry, now_ms: u64) {
        self.last_popped = Some(entry.key());
        self.last_pop_at_ms = Some(now_ms);
    }

    /// The `(groupId, objectId)` `correctly` mode expects next.
    fn expected_next(&self) -> (u64, u64) {
        let Some((g, o)) = self.last_popped else {
            return (0, 0);
        };
        if let Some(&tail) = self.pending_end_group_tail.get(&g) {
            if o >= tail {
                return (g + 1, 0);
            }
        }
        if let Some(keyframe_interval) = self.config.keyframe_interval {
            if keyframe_interval > 0 && o == keyframe_interval - 1 {
                return (g + 1, 0);
            }
        }
        (g, o + 1)
    }

    pub fn pop(&mut self, now_ms: u64) -> Option<JitterBufferEntry> {
        match self.config.mode {
            VideoMode::Fast => self.pop_fast(),
            VideoMode::Normal => self.pop_normal(now_ms),
            VideoMode::Buffered { ahead_frames } => self.pop_buffered(ahead_frames, now_ms),
            VideoMode::Correctly => self.pop_correctly(now_ms),
        }
    }

    fn pop_fast(&mut self) -> Option<JitterBufferEntry> {
        let entry = self.queue.pop_front()?;
        self.record_pop(&entry, entry.buffer_insert_timestamp_ms);
        Some(entry)
    }

    fn pop_normal(&mut self, now_ms: u64) -> Option<JitterBufferEntry> {
        let head = self.queue.front()?;
        if !self.ready_by_delay(head, now_ms) {
            return None;
        }
        let entry = self.queue.pop_front()?;
        self.record_pop(&entry, now_ms);
        Some(entry)
    }

    fn pop_buffered(&mut self, ahead_frames: usize, now_ms: u64) -> Option<JitterBufferEntry> {
        if !self.buffered_started {
            if self.queue.len() < ahead_frames {
                return None;
            }
            self.buffered_started = true;
        }
        let entry = self.queue.pop_front()?;
        self.record_pop(&entry, now_ms);
        Some(entry)
    }

    fn pop_correctly(&mut self, now_ms: u64) -> Option<JitterBufferEntry> {
        if let Some(last_pop_at) = self.last_pop_at_ms {
            if now_ms.saturating_sub(last_pop_at) < self.config.min_pop_interval_ms {
                return None;
            }
        }
        let expected = self.expected_next();
        let last_popped_group = self.last_popped.map(|(g, _)| g);

        if matches!(self.queue.front(), Some(head) if head.key() == expected) {
            let head = self.queue.front().unwrap();
            if !self.ready_by_delay(head, now_ms) {
                return None;
            }
            let entry = self.queue.pop_front()?;
            self.record_pop(&entry, now_ms);
            return Some(entry);
        }

        // Resync: objectId == 0 and groupId strictly greater than the last
        // popped group (or any group if nothing popped yet).
        let resync = self.queue.remove_first_matching(|e| {
            e.object_id == 0 && last_popped_group.map_or(true, |lg| e.group_id > lg)
        });
        if let Some(entry) = resync {
            if self.ready_by_delay(&entry, now_ms) {
                self.record_pop(&entry, now_ms);
                return Some(entry);
            }
            // Not ready yet: put it back so it's not lost.
            self.queue.insert_sorted(entry);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(group_id: u64, object_id: u64, insert_ms: u64) -> JitterBufferEntry {
        JitterBufferEntry {
            group_id,
            object_id,
            buffer_insert_timestamp_ms: insert_ms,
            capture_timestamp_us: None,
            metadata: None,
            data: vec![1],
            is_end_of_group: false,
        }
    }

    fn buffer(mode: VideoMode) -> VideoJitterBuffer {
        VideoJitterBuffer::new(VideoJitterBufferConfig {
            mode,
            capacity: DEFAULT_CAPACITY,
            min_delay_ms: 0,
            keyframe_interval: None,
            min_pop_interval_ms: 0,
        })
    }

    #[test]
    fn correctly_mode_reorders_out_of_order_pushes() {
        let mut buf = buffer(VideoMode::Correctly);
        buf.push(entry(0, 0, 0));
        buf.push(entry(0, 2, 0));
        buf.push(entry(0, 1, 0));

        assert_eq!(buf.pop(0).unwrap().key(), (0, 0));
        assert_eq!(buf.pop(0).unwrap().key(), (0, 1));
        assert_eq!(buf.pop(0).unwrap().key(), (0, 2));
    }

    #[test]
    fn correctly_mode_advances_group_on_end_of_group_sentinel() {
        let mut buf = buffer(VideoMode::Correctly);
        buf.push(entry(0, 0, 0));
        buf.push(entry(0, 1, 0));
        buf.push(JitterBufferEntry::end_of_group(0, 2, 0));
        buf.push(entry(1, 0, 0));

        assert_eq!(buf.pop(0).unwrap().key(), (0, 0));
        assert_eq!(buf.pop(0).unwrap().key(), (0, 1));
        let sentinel = buf.pop(0).unwrap();
        assert!(sentinel.is_end_of_group);
        assert_eq!(sentinel.key(), (0, 2));
        assert_eq!(buf.pop(0).unwrap().key(), (1, 0));
    }

    #[test]
    fn correctly_mode_resyncs_to_a_later_group_when_expected_entry_missing() {
        let mut buf = buffer(VideoMode::Correctly);
        buf.push(entry(0, 0, 0));
        assert_eq!(buf.pop(0).unwrap().key(), (0, 0));
        // (0,1) never arrives; group 2's keyframe does.
        buf.push(entry(2, 0, 0));
        assert_eq!(buf.pop(0).unwrap().key(), (2, 0));
    }

    #[test]
    fn correctly_mode_rejects_stale_pushes_after_last_popped() {
        let mut buf = buffer(VideoMode::Correctly);
        buf.push(entry(0, 0, 0));
        buf.pop(0);
        assert_eq!(buf.push(entry(0, 0, 0)), PushOutcome::Stale);
        assert_eq!(buf.stale_dropped(), 1);
    }

    #[test]
    fn fast_mode_pops_head_immediately() {
        let mut buf = buffer(VideoMode::Fast);
        buf.push(entry(0, 0, 1_000));
        assert!(buf.pop(1_000).is_some());
    }

    #[test]
    fn normal_mode_respects_min_delay() {
        let mut buf = VideoJitterBuffer::new(VideoJitterBufferConfig {
            mode: VideoMode::Normal,
            capacity: DEFAULT_CAPACITY,
            min_delay_ms: 100,
            keyframe_interval: None,
            min_pop_interval_ms: 0,
        });
        buf.push(entry(0, 0, 1_000));
        assert!(buf.pop(1_050).is_none());
        assert!(buf.pop(1_100).is_some());
    }

    #[test]
    fn buffered_mode_waits_for_threshold_then_behaves_like_fast() {
        let mut buf = VideoJitterBuffer::new(VideoJitterBufferConfig {
            mode: VideoMode::Buffered { ahead_frames: 3 },
            capacity: DEFAULT_CAPACITY,
            min_delay_ms: 0,
            keyframe_interval: None,
            min_pop_interval_ms: 0,
        });
        buf.push(entry(0, 0, 0));
        buf.push(entry(0, 1, 0));
        assert!(buf.pop(0).is_none());
        buf.push(entry(0, 2, 0));
        assert!(buf.pop(0).is_some());
    }

    #[test]
    fn overflow_drops_oldest_and_is_observable() {
        let mut buf = VideoJitterBuffer::new(VideoJitterBufferConfig {
            mode: VideoMode::Fast,
            capacity: 2,
            min_delay_ms: 0,
            keyframe_interval: None,
            min_pop_interval_ms: 0,
        });
        buf.push(entry(0, 0, 0));
        buf.push(entry(0, 1, 0));
        buf.push(entry(0, 2, 0));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.dropped_for_capacity(), 1);
    }

    #[test]
    fn duplicate_push_is_rejected_and_counted() {
        let mut buf = buffer(VideoMode::Fast);
        buf.push(entry(0, 0, 0));
        assert_eq!(buf.push(entry(0, 0, 0)), PushOutcome::Duplicate);
        assert_eq!(buf.duplicate_dropped(), 1);
    }

    #[test]
    fn keyframe_interval_fallback_advances_group_without_end_of_group() {
        let mut buf = VideoJitterBuffer::new(VideoJitterBufferConfig {
            mode: VideoMode::Correctly,
            capacity: DEFAULT_CAPACITY,
            min_delay_ms: 0,
            keyframe_interval: Some(2),
            min_pop_interval_ms: 0,
        });
        buf.push(entry(0, 0, 0));
        buf.push(entry(0, 1, 0));
        buf.push(entry(1, 0, 0));
        assert_eq!(buf.pop(0).unwrap().key(), (0, 0));
        assert_eq!(buf.pop(0).unwrap().key(), (0, 1));
        assert_eq!(buf.pop(0).unwrap().key(), (1, 0));
    }
}
