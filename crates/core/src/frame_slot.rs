use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::decode::Frame;

/// Single-slot register holding the most recently decoded image.
///
/// Written from the packet-receive thread and read by any number of
/// consumers. Both sides are a pointer swap; neither ever waits on the
/// other. Older frames are discarded, never queued.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: ArcSwapOption<Frame>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held frame.
    pub fn store(&self, frame: Frame) {
        self.latest.store(Some(Arc::new(frame)));
    }

    /// Snapshot of the latest frame, or `None` before the first decode.
    pub fn load(&self) -> Option<Arc<Frame>> {
        self.latest.load_full()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.load().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: u8) -> Frame {
        Frame::from_pixel(2, 2, image::Rgb([value, value, value]))
    }

    #[test]
    fn empty_until_first_store() {
        let slot = FrameSlot::new();
        assert!(slot.is_empty());
        assert!(slot.load().is_none());
    }

    #[test]
    fn readers_see_latest_snapshot() {
        let slot = FrameSlot::new();
        slot.store(frame(1));
        let first = slot.load().unwrap();
        slot.store(frame(2));

        // an earlier snapshot stays valid after being overwritten
        assert_eq!(first.get_pixel(0, 0).0, [1, 1, 1]);
        assert_eq!(slot.load().unwrap().get_pixel(0, 0).0, [2, 2, 2]);
        // repeated reads return the same frame until overwritten
        assert!(Arc::ptr_eq(&slot.load().unwrap(), &slot.load().unwrap()));
    }

    #[test]
    fn concurrent_writer_and_readers() {
        let slot = Arc::new(FrameSlot::new());
        let writer = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                for i in 0..100u8 {
                    slot.store(frame(i));
                }
            })
        };
        for _ in 0..100 {
            if let Some(f) = slot.load() {
                assert_eq!(f.dimensions(), (2, 2));
            }
        }
        writer.join().unwrap();
        assert_eq!(slot.load().unwrap().get_pixel(1, 1).0, [99, 99, 99]);
    }
}
