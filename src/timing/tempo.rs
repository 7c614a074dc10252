use super::SchedulerError;

/// Beats per minute, guaranteed finite and strictly positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tempo(f64);

impl Tempo {
    pub fn new(bpm: f64) -> Result<Self, SchedulerError> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(SchedulerError::InvalidTempo(bpm));
        }
        Ok(Self(bpm))
    }

    pub fn bpm(&self) -> f64 {
        self.0
    }

    pub fn beat_ms(&self) -> f64 {
        60_000.0 / self.0
    }

    pub fn beats_to_ms(&self, beats: f64) -> f64 {
        beats * self.beat_ms()
    }
}

impl TryFrom<f64> for Tempo {
    type Error = SchedulerError;

    fn try_from(bpm: f64) -> Result<Self, Self::Error> {
        Tempo::new(bpm)
    }
}
