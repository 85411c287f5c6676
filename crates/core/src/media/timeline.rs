/// Extends 32-bit RTP timestamps into a signed 64-bit timeline.
///
/// The first timestamp seen maps to 0. Each later timestamp is placed
/// relative to the previous one using the shortest signed distance, so
/// wraparound moves forward and small reorderings move backward.
#[derive(Debug, Default)]
pub struct Timeline {
    last: Option<u32>,
    extended: i64,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Presentation timestamp of `timestamp`, in clock ticks since the first
    /// packet.
    pub fn pts(&mut self, timestamp: u32) -> i64 {
        if let Some(last) = self.last {
            let delta = timestamp.wrapping_sub(last) as i32;
            self.extended += i64::from(delta);
        }
        self.last = Some(timestamp);
        self.extended
    }
}
