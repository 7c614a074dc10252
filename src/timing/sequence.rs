use std::sync::Arc;

use super::SchedulerError;

/// Highest MIDI channel (zero-based).
pub const MAX_CHANNEL: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    note_number: u8,
    beat: f64,
    duration: f64,
    velocity: u8,
}

impl Note {
    pub fn new(
        note_number: u8,
        beat: f64,
        duration: f64,
        velocity: u8,
    ) -> Result<Self, SchedulerError> {
        if note_number > 127 {
            return Err(SchedulerError::InvalidNote("note number above 127"));
        }
        if velocity > 127 {
            return Err(SchedulerError::InvalidNote("velocity above 127"));
        }
        if !beat.is_finite() || beat < 0.0 {
            return Err(SchedulerError::InvalidNote("beat must be a non-negative number"));
        }
        if !duration.is_finite() || duration <= 0.0 {
            return Err(SchedulerError::InvalidNote("duration must be positive"));
        }

        Ok(Self {
            note_number,
            beat,
            duration,
            velocity,
        })
    }

    pub fn note_number(&self) -> u8 {
        self.note_number
    }

    pub fn beat(&self) -> f64 {
        self.beat
    }

    /// Length in beats.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn end_beat(&self) -> f64 {
        self.beat + self.duration
    }
}

/// The editable note source of one track. Notes are always kept sorted by
/// beat; a note inserted on an occupied beat goes in front of the notes
/// already there.
#[derive(Debug, Clone)]
pub struct Track {
    channel: u8,
    program: u8,
    notes: Vec<Note>,
}

impl Track {
    pub fn new(channel: u8, program: u8) -> Result<Self, SchedulerError> {
        if channel > MAX_CHANNEL {
            return Err(SchedulerError::InvalidChannel(channel));
        }
        Ok(Self {
            channel,
            program: program & 0x7F,
            notes: Vec::new(),
        })
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn program(&self) -> u8 {
        self.program
    }

    pub fn set_program(&mut self, program: u8) {
        self.program = program & 0x7F;
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Inserts before the first note whose beat is >= the new one and returns
    /// the index it landed at.
    pub fn insert(&mut self, note: Note) -> usize {
        let index = self.find_beat_index(note.beat);
        self.notes.insert(index, note);
        index
    }

    /// Removes the first note matching pitch, beat and duration.
    pub fn remove(&mut self, note_number: u8, beat: f64, duration: f64) -> Option<Note> {
        let start = self.find_beat_index(beat);
        let offset = self.notes[start..]
            .iter()
            .take_while(|n| n.beat == beat)
            .position(|n| n.note_number == note_number && n.duration == duration)?;
        Some(self.notes.remove(start + offset))
    }

    pub fn remove_all(&mut self) {
        self.notes.clear();
    }

    /// Index of the first note starting at or after `beat`; `len()` if none does.
    pub fn find_beat_index(&self, beat: f64) -> usize {
        find_beat_index(&self.notes, beat)
    }

    /// Beat at which the last sounding note ends.
    pub fn end_beat(&self) -> f64 {
        self.notes.iter().map(Note::end_beat).fold(0.0, f64::max)
    }

    /// Freezes the current notes for a playback session.
    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            channel: self.channel,
            program: self.program,
            notes: Arc::from(self.notes.as_slice()),
        }
    }
}

/// Immutable view of a track taken when playback starts. Indexes into `notes`
/// are the identity of each note for the whole session.
#[derive(Debug, Clone)]
pub struct TrackSnapshot {
    pub channel: u8,
    pub program: u8,
    pub notes: Arc<[Note]>,
}

impl TrackSnapshot {
    pub fn find_beat_index(&self, beat: f64) -> usize {
        find_beat_index(&self.notes, beat)
    }
}

fn find_beat_index(notes: &[Note], beat: f64) -> usize {
    notes.partition_point(|n| n.beat < beat)
}
