use linked_hash_map::LinkedHashMap;

use crate::common::types::FrameId;

/// Tracks unpinned frames in least-recently-used order. The front of the
/// insertion order is the LRU end; the buffer pool latch serializes access.
pub struct LruReplacer {
    frames: LinkedHashMap<FrameId, ()>,
}

impl LruReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            frames: LinkedHashMap::with_capacity(pool_size),
        }
    }

    /// Mark a frame as a candidate for eviction. A frame that is already
    /// tracked keeps its position.
    pub fn unpin(&mut self, frame_id: FrameId) {
        if !self.frames.contains_key(&frame_id) {
            self.frames.insert(frame_id, ());
        }
    }

    /// Remove a frame from eviction candidacy. No-op if the frame is not
    /// tracked.
    pub fn pin(&mut self, frame_id: FrameId) {
        self.frames.remove(&frame_id);
    }

    /// Remove and return the least recently used frame
    pub fn victim(&mut self) -> Option<FrameId> {
        self.frames.pop_front().map(|(frame_id, ())| frame_id)
    }

    /// Number of frames currently eligible for eviction
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_victim_order_is_lru() {
        let mut replacer = LruReplacer::new(8);
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);

        assert_eq!(replacer.len(), 3);
        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_unpin_is_idempotent() {
        let mut replacer = LruReplacer::new(8);
        replacer.unpin(1);
        replacer.unpin(2);
        // Re-unpinning must neither duplicate nor refresh the entry
        replacer.unpin(1);

        assert_eq!(replacer.len(), 2);
        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
    }

    #[test]
    fn test_pin_removes_candidate() {
        let mut replacer = LruReplacer::new(8);
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);
        replacer.pin(2);
        // Pinning an untracked frame is a no-op
        replacer.pin(9);

        assert_eq!(replacer.len(), 2);
        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(3));
    }

    #[test]
    fn test_reinsert_moves_to_mru_end() {
        let mut replacer = LruReplacer::new(8);
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);

        assert_eq!(replacer.victim(), Some(1));
        replacer.unpin(1);

        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), Some(1));
    }
}
