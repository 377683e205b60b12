/// Outbound fault injection applied by the connection writer. Percentages are
/// in the range 0-100.
#[derive(Debug, Clone, Default)]
pub struct FaultInjection {
    pub enabled: bool,
    pub drop_percent: f32,
    pub duplicate_percent: f32,
    pub corrupt_percent: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    Deliver,
    Drop,
    Duplicate,
    Corrupt(usize),
}

impl FaultInjection {
    pub fn should_drop(&self) -> bool {
        self.roll(self.drop_percent)
    }

    pub fn should_duplicate(&self) -> bool {
        self.roll(self.duplicate_percent)
    }

    pub fn should_corrupt(&self) -> bool {
        self.roll(self.corrupt_percent)
    }

    /// Picks the fault for a frame of `frame_len` bytes. Corruption never
    /// touches the header so the receiver keeps frame alignment.
    pub fn action(&self, frame_len: usize) -> FaultAction {
        if self.should_drop() {
            FaultAction::Drop
        } else if self.should_corrupt() && frame_len > super::protocol::HEADER_SIZE {
            let span = frame_len - super::protocol::HEADER_SIZE;
            let offset = super::protocol::HEADER_SIZE + (rand_u64() as usize % span);
            FaultAction::Corrupt(offset)
        } else if self.should_duplicate() {
            FaultAction::Duplicate
        } else {
            FaultAction::Deliver
        }
    }

    fn roll(&self, percent: f32) -> bool {
        if !self.enabled || percent <= 0.0 {
            return false;
        }
        rand_percent() * 100.0 < percent
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub retransmissions: u64,
    pub corrupt_frames: u64,
    pub duplicates: u64,
    pub out_of_order: u64,
    pub rtt_ms: f32,
    pub rtt_variance: f32,
}

pub fn rand_percent() -> f32 {
    rand_u64() as f32 / u64::MAX as f32
}

pub fn rand_u64() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hash, Hasher};
    use std::time::Instant;

    let mut hasher = RandomState::new().build_hasher();
    Instant::now().hash(&mut hasher);
    hasher.finish()
}
