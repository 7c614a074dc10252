mod cursor;
mod program;
mod scheduler;
mod sequence;
mod tempo;

pub use cursor::{DueNote, PlaybackCursor};
pub use program::ProgramLatch;
pub use scheduler::{
    GatewaySink, InstructionProducer, LookaheadScheduler, SchedulerError, SchedulerState,
    SchedulerTiming, TickReport,
};
pub use sequence::{MAX_CHANNEL, Note, Track, TrackSnapshot};
pub use tempo::Tempo;
