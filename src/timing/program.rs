use super::sequence::MAX_CHANNEL;

/// Remembers which program was last sent on each channel so a program change
/// goes out at most once per session, or again when the instrument changes.
#[derive(Debug, Clone, Default)]
pub struct ProgramLatch {
    sent: [Option<u8>; MAX_CHANNEL as usize + 1],
}

impl ProgramLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `program` must be sent on `channel`, and latches it.
    pub fn needs_change(&mut self, channel: u8, program: u8) -> bool {
        let slot = &mut self.sent[(channel & 0x0F) as usize];
        if *slot == Some(program) {
            return false;
        }
        *slot = Some(program);
        true
    }

    pub fn reset(&mut self) {
        self.sent = Default::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latches_until_program_changes_or_reset() {
        let mut latch = ProgramLatch::new();
        assert!(latch.needs_change(0, 5));
        assert!(!latch.needs_change(0, 5));
        assert!(latch.needs_change(1, 5));
        assert!(latch.needs_change(0, 6));

        latch.reset();
        assert!(latch.needs_change(0, 6));
    }
}
