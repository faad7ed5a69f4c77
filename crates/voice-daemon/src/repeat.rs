use voice_proto::protocol::RepeatMode;

/// Bounded "play this track N more times" counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepeatCount {
    remaining: u32,
    total: u32,
}

impl RepeatCount {
    pub fn set(&mut self, count: u32) {
        self.remaining = count;
        self.total = count;
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn is_active(&self) -> bool {
        self.remaining > 0
    }

    /// Consume one repeat and return its 1-based number, or `None` when
    /// nothing is left.
    pub fn decrease(&mut self) -> Option<u32> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.total - self.remaining)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Repeat state of a queue session: one of none / track / queue, plus the
/// orthogonal repeat counter.
#[derive(Debug, Default)]
pub struct RepeatPolicy {
    mode: RepeatMode,
    count: RepeatCount,
}

impl RepeatPolicy {
    pub fn mode(&self) -> RepeatMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: RepeatMode) {
        self.mode = mode;
    }

    /// Switch `mode` on, or back to `None` if it is already on.
    pub fn toggle(&mut self, mode: RepeatMode) -> RepeatMode {
        self.mode = if self.mode == mode {
            RepeatMode::None
        } else {
            mode
        };
        self.mode
    }

    pub fn count(&self) -> &RepeatCount {
        &self.count
    }

    pub fn count_mut(&mut self) -> &mut RepeatCount {
        &mut self.count
    }

    pub fn clear(&mut self) {
        self.mode = RepeatMode::None;
        self.count.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_decrease() {
        let mut count = RepeatCount::default();
        count.set(3);
        assert_eq!(count.decrease(), Some(1));
        assert_eq!(count.decrease(), Some(2));
        assert_eq!(count.remaining(), 1);
        assert_eq!(count.decrease(), Some(3));
        assert!(!count.is_active());
        assert_eq!(count.decrease(), None);
        assert_eq!(count.remaining(), 0);
    }

    #[test]
    fn test_toggle_is_exclusive() {
        let mut policy = RepeatPolicy::default();
        assert_eq!(policy.toggle(RepeatMode::Track), RepeatMode::Track);
        assert_eq!(policy.toggle(RepeatMode::Queue), RepeatMode::Queue);
        assert_eq!(policy.toggle(RepeatMode::Queue), RepeatMode::None);
    }

    #[test]
    fn test_clear_resets_mode_and_count() {
        let mut policy = RepeatPolicy::default();
        policy.set_mode(RepeatMode::Track);
        policy.count_mut().set(5);
        policy.clear();
        assert_eq!(policy.mode(), RepeatMode::None);
        assert_eq!(*policy.count(), RepeatCount::default());
    }
}
