use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    ProgramChange { program: u8 },
}

impl MidiMessage {
    pub fn status(&self) -> u8 {
        match self {
            MidiMessage::NoteOn { .. } => 0x90,
            MidiMessage::NoteOff { .. } => 0x80,
            MidiMessage::ProgramChange { .. } => 0xC0,
        }
    }
}

/// A channel message as it goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub channel: u8,
    pub message: MidiMessage,
}

impl MidiEvent {
    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            channel,
            message: MidiMessage::NoteOn { note, velocity },
        }
    }

    pub fn note_off(channel: u8, note: u8) -> Self {
        Self {
            channel,
            message: MidiMessage::NoteOff { note },
        }
    }

    pub fn program_change(channel: u8, program: u8) -> Self {
        Self {
            channel,
            message: MidiMessage::ProgramChange { program },
        }
    }

    /// Encodes the event. Channel and data bytes are masked to their legal ranges.
    pub fn to_bytes(&self) -> MidiBytes {
        let status = self.message.status() | (self.channel & 0x0F);
        match self.message {
            MidiMessage::NoteOn { note, velocity } => {
                MidiBytes::three(status, note & 0x7F, velocity & 0x7F)
            }
            MidiMessage::NoteOff { note } => MidiBytes::three(status, note & 0x7F, 0),
            MidiMessage::ProgramChange { program } => MidiBytes::two(status, program & 0x7F),
        }
    }

    /// The (channel, note) pair this event sounds or releases, if any.
    pub fn voice(&self) -> Option<(u8, u8)> {
        match self.message {
            MidiMessage::NoteOn { note, .. } | MidiMessage::NoteOff { note } => {
                Some((self.channel & 0x0F, note & 0x7F))
            }
            MidiMessage::ProgramChange { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiBytes {
    data: [u8; 3],
    len: usize,
}

impl MidiBytes {
    fn two(status: u8, data: u8) -> Self {
        Self {
            data: [status, data, 0],
            len: 2,
        }
    }

    fn three(status: u8, data1: u8, data2: u8) -> Self {
        Self {
            data: [status, data1, data2],
            len: 3,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduledEvent {
    pub target: Instant,
    pub event: MidiEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_standard_channel_messages() {
        assert_eq!(
            MidiEvent::note_on(3, 60, 100).to_bytes().as_slice(),
            &[0x93, 60, 100]
        );
        assert_eq!(
            MidiEvent::note_off(3, 60).to_bytes().as_slice(),
            &[0x83, 60, 0]
        );
        assert_eq!(
            MidiEvent::program_change(9, 33).to_bytes().as_slice(),
            &[0xC9, 33]
        );
    }

    #[test]
    fn out_of_range_values_are_masked() {
        let bytes = MidiEvent::note_on(17, 200, 255).to_bytes();
        assert_eq!(bytes.as_slice(), &[0x91, 200 & 0x7F, 0x7F]);
    }

    #[test]
    fn program_change_has_no_voice() {
        assert_eq!(MidiEvent::program_change(0, 1).voice(), None);
        assert_eq!(MidiEvent::note_off(2, 64).voice(), Some((2, 64)));
    }
}
