use std::collections::BTreeMap;

use crate::models::frame::VideoFrame;

/// A camera frame and the overlay frame rendered for the same timing slot.
#[derive(Debug, Clone)]
pub struct SyncedPair {
    pub slot: u64,
    pub camera: VideoFrame,
    pub overlay: VideoFrame,
}

/// Two-input barrier in front of the compositor.
///
/// Each input is keyed by the timing slot the capture lane assigned. A pair is
/// released only once both inputs for a slot have arrived; slots are released
/// in increasing order, and anything older than a released slot is discarded
/// as unmatched.
#[derive(Debug)]
pub struct FrameSynchronizer {
    camera: BTreeMap<u64, VideoFrame>,
    overlay: BTreeMap<u64, VideoFrame>,
    last_released: Option<u64>,
    max_pending: usize,
    unmatched: u64,
}

impl FrameSynchronizer {
    pub fn new(max_pending: usize) -> Self {
        Self {
            camera: BTreeMap::new(),
            overlay: BTreeMap::new(),
            last_released: None,
            max_pending: max_pending.max(1),
            unmatched: 0,
        }
    }

    pub fn push_camera(&mut self, slot: u64, frame: VideoFrame) -> Option<SyncedPair> {
        if self.is_stale(slot) {
            self.unmatched += 1;
            return None;
        }
        match self.overlay.remove(&slot) {
            Some(overlay) => Some(self.release(slot, frame, overlay)),
            None => {
                self.camera.insert(slot, frame);
                self.trim();
                None
            }
        }
    }

    pub fn push_overlay(&mut self, slot: u64, frame: VideoFrame) -> Option<SyncedPair> {
        if self.is_stale(slot) {
            self.unmatched += 1;
            return None;
        }
        match self.camera.remove(&slot) {
            Some(camera) => Some(self.release(slot, camera, frame)),
            None => {
                self.overlay.insert(slot, frame);
                self.trim();
                None
            }
        }
    }

    /// Forget a slot that will never be completed (e.g. its render failed).
    pub fn abandon(&mut self, slot: u64) {
        let removed = self.camera.remove(&slot).is_some() as u64 + self.overlay.remove(&slot).is_some() as u64;
        self.unmatched += removed;
    }

    pub fn pending(&self) -> usize {
        self.camera.len() + self.overlay.len()
    }

    /// Number of inputs discarded without ever being paired.
    pub fn unmatched(&self) -> u64 {
        self.unmatched
    }

    pub fn reset(&mut self) {
        self.camera.clear();
        self.overlay.clear();
        self.last_released = None;
    }

    fn is_stale(&self, slot: u64) -> bool {
        self.last_released.is_some_and(|last| slot <= last)
    }

    fn release(&mut self, slot: u64, camera: VideoFrame, overlay: VideoFrame) -> SyncedPair {
        self.last_released = Some(slot);
        let newer_camera = self.camera.split_off(&slot);
        let newer_overlay = self.overlay.split_off(&slot);
        self.unmatched += (self.camera.len() + self.overlay.len()) as u64;
        self.camera = newer_camera;
        self.overlay = newer_overlay;
        SyncedPair { slot, camera, overlay }
    }

    fn trim(&mut self) {
        while self.camera.len() > self.max_pending {
            self.camera.pop_first();
            self.unmatched += 1;
        }
        while self.overlay.len() > self.max_pending {
            self.overlay.pop_first();
            self.unmatched += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::frame::{FrameSize, PixelBuffer, PixelFormat};

    fn frame(tag: u8) -> VideoFrame {
        let buf = PixelBuffer::from_data(FrameSize::new(1, 1), PixelFormat::Bgra, vec![tag; 4]).unwrap();
        VideoFrame::new(buf, Duration::from_millis(tag as u64))
    }

    #[test]
    fn releases_only_complete_pairs() {
        let mut sync = FrameSynchronizer::new(8);
        assert!(sync.push_camera(1, frame(1)).is_none());
        assert!(sync.push_overlay(2, frame(20)).is_none());

        let pair = sync.push_overlay(1, frame(10)).unwrap();
        assert_eq!(pair.slot, 1);
        assert_eq!(pair.camera.buffer().data()[0], 1);
        assert_eq!(pair.overlay.buffer().data()[0], 10);
        assert_eq!(sync.pending(), 1);
    }

    #[test]
    fn order_of_arrival_does_not_matter() {
        let mut sync = FrameSynchronizer::new(8);
        assert!(sync.push_overlay(5, frame(50)).is_none());
        let pair = sync.push_camera(5, frame(5)).unwrap();
        assert_eq!(pair.camera.buffer().data()[0], 5);
        assert_eq!(pair.overlay.buffer().data()[0], 50);
    }

    #[test]
    fn older_slots_are_discarded_on_release() {
        let mut sync = FrameSynchronizer::new(8);
        sync.push_camera(1, frame(1));
        sync.push_camera(2, frame(2));
        sync.push_camera(3, frame(3));
        assert!(sync.push_overlay(2, frame(20)).is_some());

        assert_eq!(sync.unmatched(), 1);
        assert_eq!(sync.pending(), 1);
        // Slot 1 is now stale and can never pair.
        assert!(sync.push_overlay(1, frame(10)).is_none());
        assert_eq!(sync.unmatched(), 2);
        assert!(sync.push_overlay(3, frame(30)).is_some());
    }

    #[test]
    fn pending_is_bounded() {
        let mut sync = FrameSynchronizer::new(2);
        for slot in 0..5 {
            sync.push_camera(slot, frame(slot as u8));
        }
        assert_eq!(sync.pending(), 2);
        assert_eq!(sync.unmatched(), 3);
        assert!(sync.push_overlay(4, frame(40)).is_some());
    }

    #[test]
    fn abandon_and_reset() {
        let mut sync = FrameSynchronizer::new(8);
        sync.push_camera(7, frame(7));
        sync.abandon(7);
        assert_eq!(sync.pending(), 0);
        assert_eq!(sync.unmatched(), 1);

        sync.push_camera(8, frame(8));
        sync.push_overlay(8, frame(8));
        sync.reset();
        // After a reset earlier slots are accepted again.
        sync.push_camera(1, frame(1));
        assert!(sync.push_overlay(1, frame(1)).is_some());
    }
}
