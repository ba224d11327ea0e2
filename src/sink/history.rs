use std::collections::VecDeque;

use super::FrameEvent;

/// Fixed-capacity FIFO of recent events.
///
/// Never holds more than `capacity` events; pushing into a full history
/// evicts the oldest entry and hands it back to the caller.
#[derive(Debug)]
pub struct EventHistory {
    buffer: VecDeque<FrameEvent>,
    capacity: usize,
}

impl EventHistory {
    /// `capacity` is clamped to at least one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `event`, returning the evicted oldest event when full.
    pub fn push(&mut self, event: FrameEvent) -> Option<FrameEvent> {
        let evicted = if self.buffer.len() >= self.capacity {
            self.buffer.pop_front()
        } else {
            None
        };
        self.buffer.push_back(event);
        evicted
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &FrameEvent> + '_ {
        self.buffer.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameDimensions;

    fn event(frame_id: u64) -> FrameEvent {
        FrameEvent {
            frame_id,
            timestamp: frame_id as f64,
            dimensions: FrameDimensions {
                width: 4,
                height: 4,
                channels: 3,
            },
            brightness: 0.0,
            motion_detected: None,
            results: Vec::new(),
            image_url: None,
        }
    }

    #[test]
    fn evicts_oldest_first() {
        let mut history = EventHistory::new(3);
        let mut evicted = Vec::new();
        for id in 0..7 {
            if let Some(old) = history.push(event(id)) {
                evicted.push(old.frame_id);
            }
            assert!(history.len() <= history.capacity());
        }
        let kept: Vec<u64> = history.iter().map(|e| e.frame_id).collect();
        assert_eq!(kept, vec![4, 5, 6]);
        assert_eq!(evicted, vec![0, 1, 2, 3]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut history = EventHistory::new(0);
        assert_eq!(history.capacity(), 1);
        assert!(history.push(event(0)).is_none());
        assert_eq!(history.push(event(1)).map(|e| e.frame_id), Some(0));
    }
}
