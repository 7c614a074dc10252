use std::time::{Duration, Instant};

use ringbuf::traits::Producer;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{PlaybackCursor, ProgramLatch, Tempo, TrackSnapshot};
use crate::events::{MidiEvent, ScheduledEvent};
use crate::output::GatewayInstruction;

pub type InstructionProducer = ringbuf::HeapProd<GatewayInstruction>;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SchedulerError {
    #[error("invalid tempo {0}: beats per minute must be positive")]
    InvalidTempo(f64),
    #[error("invalid start beat {0}")]
    InvalidSeek(f64),
    #[error("invalid note: {0}")]
    InvalidNote(&'static str),
    #[error("invalid MIDI channel {0}")]
    InvalidChannel(u8),
    #[error("gateway instruction buffer is full")]
    BufferFull,
}

/// The scheduler side of the scheduler -> gateway channel.
pub trait GatewaySink {
    fn send(&mut self, instruction: GatewayInstruction) -> Result<(), SchedulerError>;
}

impl GatewaySink for InstructionProducer {
    fn send(&mut self, instruction: GatewayInstruction) -> Result<(), SchedulerError> {
        self.try_push(instruction)
            .map_err(|_| SchedulerError::BufferFull)
    }
}

impl GatewaySink for Vec<GatewayInstruction> {
    fn send(&mut self, instruction: GatewayInstruction) -> Result<(), SchedulerError> {
        self.push(instruction);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerTiming {
    pub interval: Duration,
    pub lookahead: Duration,
}

impl SchedulerTiming {
    /// The lookahead never drops below one tick interval, otherwise a late
    /// tick would leave a gap between two windows.
    pub fn new(interval: Duration, lookahead: Duration) -> Self {
        Self {
            interval,
            lookahead: lookahead.max(interval),
        }
    }
}

impl Default for SchedulerTiming {
    fn default() -> Self {
        Self::new(Duration::from_millis(25), Duration::from_millis(100))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Notes handed to the gateway this tick.
    pub scheduled: usize,
    pub late: usize,
    /// Instructions that could not be queued. Their notes stay marked as
    /// emitted and are not retried.
    pub dropped: usize,
    /// Every note was scheduled and its last event is due; the scheduler went idle.
    pub finished: bool,
}

#[derive(Debug)]
struct PlaybackSession {
    cursor: PlaybackCursor,
    started_at: Instant,
    /// Latest target handed to the gateway so far.
    last_event_at: Instant,
}

/// Offsets past this are clamped; a note this long never ends on its own.
const MAX_EVENT_OFFSET: Duration = Duration::from_secs(60 * 60 * 24 * 365);

impl PlaybackSession {
    fn at(&self, offset_ms: f64) -> Instant {
        let offset = Duration::try_from_secs_f64(offset_ms.max(0.0) / 1000.0)
            .unwrap_or(MAX_EVENT_OFFSET)
            .min(MAX_EVENT_OFFSET);
        self.started_at
            .checked_add(offset)
            .unwrap_or(self.started_at)
    }

    /// All notes are scheduled and the last of their events has fired.
    fn is_done(&self, now: Instant) -> bool {
        self.cursor.is_exhausted() && now >= self.last_event_at
    }
}

/// Turns a track snapshot into timestamped gateway instructions, one
/// lookahead window per tick. Holds at most one session at a time.
#[derive(Debug)]
pub struct LookaheadScheduler {
    timing: SchedulerTiming,
    session: Option<PlaybackSession>,
    programs: ProgramLatch,
}

impl LookaheadScheduler {
    pub fn new(timing: SchedulerTiming) -> Self {
        Self {
            timing,
            session: None,
            programs: ProgramLatch::new(),
        }
    }

    pub fn timing(&self) -> SchedulerTiming {
        self.timing
    }

    pub fn state(&self) -> SchedulerState {
        if self.session.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Channel of the session being played, if any.
    pub fn channel(&self) -> Option<u8> {
        self.session.as_ref().map(|s| s.cursor.track().channel)
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.session.as_ref().map(|s| s.started_at)
    }

    /// Program changes sent outside of sessions (note previews) share the
    /// same latch so an instrument is not re-sent needlessly.
    pub fn programs(&mut self) -> &mut ProgramLatch {
        &mut self.programs
    }

    /// Starts a session at `now`, stopping whatever was playing first.
    ///
    /// An invalid tempo or seek position is reported before any session state
    /// exists and leaves the scheduler idle. Starting past the last note is
    /// valid and leaves the scheduler idle as well.
    pub fn start(
        &mut self,
        track: TrackSnapshot,
        tempo: f64,
        from_beat: f64,
        now: Instant,
        sink: &mut impl GatewaySink,
    ) -> Result<(), SchedulerError> {
        self.stop(sink);

        let tempo = Tempo::new(tempo)?;
        let channel = track.channel;
        let cursor = PlaybackCursor::new(track, tempo, from_beat)?;

        if cursor.is_exhausted() {
            debug!(channel, from_beat, "no notes at or after start beat");
            return Ok(());
        }

        info!(
            channel,
            bpm = tempo.bpm(),
            from_beat = cursor.from_beat(),
            notes = cursor.remaining(),
            "playback started"
        );
        self.session = Some(PlaybackSession {
            cursor,
            started_at: now,
            last_event_at: now,
        });
        Ok(())
    }

    /// Schedules everything due in `[now, now + lookahead]` relative to the
    /// session clock. A tick with nothing due is a no-op.
    ///
    /// The session stays running until its last note-off is due, so a stop
    /// before then still clears whatever the gateway holds.
    pub fn tick(&mut self, now: Instant, sink: &mut impl GatewaySink) -> TickReport {
        let mut report = TickReport::default();
        let Some(session) = self.session.as_mut() else {
            return report;
        };

        let elapsed_ms = now.saturating_duration_since(session.started_at).as_secs_f64() * 1000.0;
        let window_end_ms = elapsed_ms + self.timing.lookahead.as_secs_f64() * 1000.0;
        let due = session.cursor.notes_due_in_window(elapsed_ms, window_end_ms);

        let channel = session.cursor.track().channel;
        let program = session.cursor.track().program;

        for note in due {
            if self.programs.needs_change(channel, program) {
                let priming = GatewayInstruction::EmitNow(MidiEvent::program_change(channel, program));
                if sink.send(priming).is_err() {
                    report.dropped += 1;
                }
            }

            let on = ScheduledEvent {
                target: session.at(note.onset_ms),
                event: MidiEvent::note_on(channel, note.note.note_number(), note.note.velocity()),
            };
            let off = ScheduledEvent {
                target: session.at(note.onset_ms + note.duration_ms),
                event: MidiEvent::note_off(channel, note.note.note_number()),
            };

            session.last_event_at = session.last_event_at.max(off.target);
            for event in [on, off] {
                if sink.send(GatewayInstruction::EmitAt(event)).is_err() {
                    report.dropped += 1;
                }
            }

            report.scheduled += 1;
            if note.late {
                report.late += 1;
            }
        }

        if report.late > 0 {
            debug!(channel, late = report.late, elapsed_ms, "scheduled late notes");
        }
        if report.dropped > 0 {
            warn!(channel, dropped = report.dropped, "gateway buffer full, events dropped");
        }

        if session.is_done(now) {
            info!(channel, "playback finished");
            self.session = None;
            self.programs.reset();
            report.finished = true;
        }

        report
    }

    /// Ends the current session and tells the gateway to forget whatever it
    /// has not fired yet. Does nothing when idle.
    pub fn stop(&mut self, sink: &mut impl GatewaySink) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        self.programs.reset();

        if sink.send(GatewayInstruction::Clear).is_err() {
            warn!("gateway buffer full, could not clear queued events");
        }
        info!(channel = session.cursor.track().channel, "playback stopped");
        true
    }
}

impl Default for LookaheadScheduler {
    fn default() -> Self {
        Self::new(SchedulerTiming::default())
    }
}
