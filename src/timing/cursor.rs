use tracing::trace;

use super::{Note, SchedulerError, Tempo, TrackSnapshot};

/// A note picked for scheduling, with its timing relative to session start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DueNote {
    /// Position of the note in the session's track snapshot.
    pub index: usize,
    pub note: Note,
    pub onset_ms: f64,
    pub duration_ms: f64,
    /// The onset was already behind the window when the note was found.
    pub late: bool,
}

/// Walks a track snapshot and hands out each note exactly once per session.
///
/// Identity is positional: two identical notes on the same beat are two
/// entries and are both scheduled.
#[derive(Debug)]
pub struct PlaybackCursor {
    track: TrackSnapshot,
    tempo: Tempo,
    from_beat: f64,
    emitted: Vec<bool>,
    /// Every index below this one is either before `from_beat` or emitted.
    first_pending: usize,
}

impl PlaybackCursor {
    pub fn new(track: TrackSnapshot, tempo: Tempo, from_beat: f64) -> Result<Self, SchedulerError> {
        if !from_beat.is_finite() {
            return Err(SchedulerError::InvalidSeek(from_beat));
        }
        let from_beat = from_beat.max(0.0);
        let first_pending = track.find_beat_index(from_beat);
        let emitted = vec![false; track.notes.len()];

        Ok(Self {
            track,
            tempo,
            from_beat,
            emitted,
            first_pending,
        })
    }

    pub fn track(&self) -> &TrackSnapshot {
        &self.track
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    pub fn from_beat(&self) -> f64 {
        self.from_beat
    }

    /// Milliseconds from session start to the moment `beat` sounds.
    pub fn onset_ms(&self, beat: f64) -> f64 {
        self.tempo.beats_to_ms(beat - self.from_beat)
    }

    pub fn is_emitted(&self, index: usize) -> bool {
        self.emitted.get(index).copied().unwrap_or(false)
    }

    /// Nothing left to schedule in this session.
    pub fn is_exhausted(&self) -> bool {
        self.first_pending >= self.emitted.len()
    }

    pub fn remaining(&self) -> usize {
        self.emitted[self.first_pending..]
            .iter()
            .filter(|emitted| !**emitted)
            .count()
    }

    /// Collects every not-yet-emitted note whose onset is at or before
    /// `window_end_ms`, marking each one emitted.
    ///
    /// Notes whose onset already lies before `window_start_ms` (a tick came in
    /// late) are still returned, flagged as `late`. Scanning stops at the first
    /// note past the horizon since later notes can only start later.
    pub fn notes_due_in_window(&mut self, window_start_ms: f64, window_end_ms: f64) -> Vec<DueNote> {
        let beat_ms = self.tempo.beat_ms();
        let mut due = Vec::new();

        for index in self.first_pending..self.track.notes.len() {
            let note = self.track.notes[index];
            let onset_ms = beat_ms * (note.beat() - self.from_beat);

            if onset_ms > window_end_ms {
                break;
            }
            if self.emitted[index] {
                continue;
            }

            let late = onset_ms < window_start_ms;
            if late {
                trace!(
                    index,
                    onset_ms,
                    window_start_ms,
                    "note found behind the window, scheduling immediately"
                );
            }

            self.emitted[index] = true;
            due.push(DueNote {
                index,
                note,
                onset_ms,
                duration_ms: note.duration() * beat_ms,
                late,
            });
        }

        while self.first_pending < self.emitted.len() && self.emitted[self.first_pending] {
            self.first_pending += 1;
        }

        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::Track;

    fn snapshot(notes: &[(u8, f64, f64)]) -> TrackSnapshot {
        let mut track = Track::new(0, 0).unwrap();
        for &(number, beat, duration) in notes {
            track.insert(Note::new(number, beat, duration, 100).unwrap());
        }
        track.snapshot()
    }

    fn cursor(notes: &[(u8, f64, f64)], bpm: f64, from_beat: f64) -> PlaybackCursor {
        PlaybackCursor::new(snapshot(notes), Tempo::new(bpm).unwrap(), from_beat).unwrap()
    }

    fn indexes(due: &[DueNote]) -> Vec<usize> {
        due.iter().map(|d| d.index).collect()
    }

    #[test]
    fn computes_onset_and_duration_from_tempo() {
        let mut cursor = cursor(&[(36, 0.0, 1.0), (38, 1.0, 0.5)], 120.0, 0.0);
        let due = cursor.notes_due_in_window(0.0, 1000.0);

        assert_eq!(due.len(), 2);
        assert_eq!((due[0].onset_ms, due[0].duration_ms), (0.0, 500.0));
        assert_eq!((due[1].onset_ms, due[1].duration_ms), (500.0, 250.0));
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn overlapping_windows_emit_each_note_once() {
        let mut cursor = cursor(&[(60, 0.0, 1.0), (62, 1.0, 1.0), (64, 2.0, 1.0)], 120.0, 0.0);

        let first = cursor.notes_due_in_window(0.0, 600.0);
        let second = cursor.notes_due_in_window(400.0, 1000.0);
        let third = cursor.notes_due_in_window(900.0, 1500.0);

        assert_eq!(indexes(&first), vec![0, 1]);
        assert_eq!(indexes(&second), vec![2]);
        assert!(third.is_empty());
    }

    #[test]
    fn stops_at_first_note_past_the_horizon() {
        let mut cursor = cursor(&[(60, 0.0, 1.0), (62, 4.0, 1.0), (64, 8.0, 1.0)], 60.0, 0.0);

        let due = cursor.notes_due_in_window(0.0, 3_999.0);
        assert_eq!(indexes(&due), vec![0]);
        assert!(!cursor.is_emitted(1));
        assert!(!cursor.is_emitted(2));
        assert_eq!(cursor.remaining(), 2);
    }

    #[test]
    fn late_notes_are_still_emitted() {
        let mut cursor = cursor(&[(60, 0.0, 1.0), (62, 1.0, 1.0)], 120.0, 0.0);

        let due = cursor.notes_due_in_window(2_000.0, 2_100.0);
        assert_eq!(indexes(&due), vec![0, 1]);
        assert!(due.iter().all(|d| d.late));
        assert!(cursor.notes_due_in_window(2_100.0, 2_200.0).is_empty());
    }

    #[test]
    fn seek_skips_earlier_notes() {
        let mut cursor = cursor(&[(60, 0.0, 1.0), (62, 1.0, 1.0), (64, 2.0, 1.0)], 120.0, 1.0);

        let due = cursor.notes_due_in_window(0.0, 10_000.0);
        assert_eq!(indexes(&due), vec![1, 2]);
        assert_eq!(due[0].onset_ms, 0.0);
        assert_eq!(due[1].onset_ms, 500.0);
    }

    #[test]
    fn seek_past_last_note_is_exhausted() {
        let cursor = cursor(&[(60, 0.0, 1.0)], 120.0, 5.0);
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn identical_notes_are_both_emitted() {
        let mut cursor = cursor(&[(60, 0.0, 1.0), (60, 0.0, 1.0)], 120.0, 0.0);
        let due = cursor.notes_due_in_window(0.0, 100.0);
        assert_eq!(indexes(&due), vec![0, 1]);
    }

    #[test]
    fn rejects_non_finite_seek() {
        let result = PlaybackCursor::new(snapshot(&[]), Tempo::new(120.0).unwrap(), f64::NAN);
        assert!(matches!(result, Err(SchedulerError::InvalidSeek(_))));
    }
}
