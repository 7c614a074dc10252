use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::timing::{MAX_CHANNEL, Note, SchedulerError, Track};

#[derive(Debug, Error)]
pub enum SongError {
    #[error("failed to read song: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse song: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("failed to serialize song: {0}")]
    Serialize(#[from] ron::Error),
    #[error("track {track}: {source}")]
    Track {
        track: usize,
        source: SchedulerError,
    },
    #[error("song has {0} tracks, at most 16 can be played")]
    TooManyTracks(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteData {
    pub note_number: u8,
    pub beat: f64,
    pub duration: f64,
    pub velocity: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackData {
    pub instrument: String,
    /// General MIDI program sent before the track's first note.
    #[serde(default)]
    pub program: u8,
    pub volume: u8,
    pub notes: Vec<NoteData>,
}

/// The persisted song shape. Track `n` plays on MIDI channel `n`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub tempo: f64,
    pub tracks: Vec<TrackData>,
}

impl Song {
    pub fn load(path: &Path) -> Result<Self, SongError> {
        let text = fs::read_to_string(path)?;
        Ok(ron::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SongError> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Builds editable tracks, sorting each track's notes by beat.
    pub fn to_tracks(&self) -> Result<Vec<Track>, SongError> {
        if self.tracks.len() > MAX_CHANNEL as usize + 1 {
            return Err(SongError::TooManyTracks(self.tracks.len()));
        }

        self.tracks
            .iter()
            .enumerate()
            .map(|(index, data)| {
                let wrap = |source| SongError::Track {
                    track: index,
                    source,
                };
                let mut track = Track::new(index as u8, data.program).map_err(wrap)?;
                for note in &data.notes {
                    let note = Note::new(note.note_number, note.beat, note.duration, note.velocity)
                        .map_err(wrap)?;
                    track.insert(note);
                }
                Ok(track)
            })
            .collect()
    }
}
