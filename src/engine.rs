use crate::config::EngineConfig;
use crate::events::{MidiEvent, ScheduledEvent};
use crate::output::{
    self, DeviceSlot, GatewayInstruction, OutputDevice, OutputGateway, device_slot,
};
use crate::timing::{
    GatewaySink, InstructionProducer, LookaheadScheduler, SchedulerError, SchedulerState, Tempo,
    Track, TrackSnapshot,
};
use arc_swap::ArcSwap;
use crossbeam::channel::{Receiver, Sender};
use ringbuf::{HeapRb, traits::Split};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread::{JoinHandle, Thread};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub enum EngineCommand {
    Start {
        track: TrackSnapshot,
        tempo: Tempo,
        from_beat: f64,
    },
    Stop,
    EmitNow(MidiEvent),
    EmitAfter {
        event: MidiEvent,
        delay: Duration,
    },
    PreviewNote {
        channel: u8,
        program: u8,
        note: u8,
        velocity: u8,
        duration: Duration,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum EngineUpdate {
    PlaybackState { running: bool },
    SessionFinished { channel: u8 },
    DeliveryFailed { message: String },
    Error { message: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("engine thread is not running")]
    Disconnected,
}

/// Lock-free view of the transport for the control stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportStatus {
    pub state: SchedulerState,
    pub channel: Option<u8>,
    pub started_at: Option<Instant>,
}

impl TransportStatus {
    fn idle() -> Self {
        Self {
            state: SchedulerState::Idle,
            channel: None,
            started_at: None,
        }
    }
}

/// Control-side handle to the timing and output threads.
pub struct EngineHandle {
    pub command_tx: Sender<EngineCommand>,
    pub update_rx: Receiver<EngineUpdate>,
    status: Arc<ArcSwap<TransportStatus>>,
    device: DeviceSlot,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("status", &self.status())
            .field("has_output", &self.has_output())
            .finish()
    }
}

impl EngineHandle {
    /// Plays `track` from `from_beat`. The track is snapshotted here, so it
    /// may be edited freely afterwards without affecting this session.
    ///
    /// A bad tempo or start beat is rejected before anything is sent.
    pub fn start(&self, track: &Track, tempo: f64, from_beat: f64) -> Result<(), EngineError> {
        let tempo = Tempo::new(tempo)?;
        if !from_beat.is_finite() {
            return Err(SchedulerError::InvalidSeek(from_beat).into());
        }
        self.send(EngineCommand::Start {
            track: track.snapshot(),
            tempo,
            from_beat,
        })
    }

    pub fn stop(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Stop)
    }

    pub fn emit_now(&self, event: MidiEvent) -> Result<(), EngineError> {
        self.send(EngineCommand::EmitNow(event))
    }

    pub fn emit_after(&self, event: MidiEvent, delay: Duration) -> Result<(), EngineError> {
        self.send(EngineCommand::EmitAfter { event, delay })
    }

    /// Sounds one note right away, outside of any playback session.
    pub fn preview_note(
        &self,
        track: &Track,
        note: u8,
        velocity: u8,
        duration: Duration,
    ) -> Result<(), EngineError> {
        self.send(EngineCommand::PreviewNote {
            channel: track.channel(),
            program: track.program(),
            note,
            velocity,
            duration,
        })
    }

    pub fn status(&self) -> TransportStatus {
        **self.status.load()
    }

    pub fn has_output(&self) -> bool {
        self.device.lock().is_some()
    }

    /// Replaces the output device, returning the previous one.
    pub fn set_output(&self, device: Option<Box<dyn OutputDevice>>) -> Option<Box<dyn OutputDevice>> {
        std::mem::replace(&mut *self.device.lock(), device)
    }

    /// Stops playback and waits for both threads to exit.
    pub fn shutdown(mut self) {
        self.signal_shutdown();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                warn!("engine thread panicked");
            }
        }
    }

    fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.command_tx
            .send(command)
            .map_err(|_| EngineError::Disconnected)
    }

    fn signal_shutdown(&self) {
        let _ = self.command_tx.send(EngineCommand::Shutdown);
        self.running.store(false, Ordering::Release);
        for thread in &self.threads {
            thread.thread().unpark();
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

/// Spawns the scheduler thread and the output thread. `device` may be absent;
/// emits then fail with `DeviceUnavailable` until one is set.
pub fn spawn_engine(config: &EngineConfig, device: Option<Box<dyn OutputDevice>>) -> EngineHandle {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::unbounded();

    let ring_buffer = HeapRb::<GatewayInstruction>::new(config.gateway_capacity.max(1));
    let (producer, consumer) = ring_buffer.split();

    let device = device_slot(device);
    let running = Arc::new(AtomicBool::new(true));
    let status = Arc::new(ArcSwap::from_pointee(TransportStatus::idle()));

    let output_thread = output::spawn_output_thread(
        OutputGateway::new(device.clone()),
        consumer,
        update_tx.clone(),
        running.clone(),
    );

    let state = EngineState {
        scheduler: LookaheadScheduler::new(config.scheduler_timing()),
        producer,
        output: output_thread.thread().clone(),
        ticker: crossbeam::channel::never(),
        status: status.clone(),
        update_tx,
    };
    let engine_thread = std::thread::spawn(move || {
        engine_thread(state, command_rx);
    });

    EngineHandle {
        command_tx,
        update_rx,
        status,
        device,
        running,
        threads: vec![engine_thread, output_thread],
    }
}

struct EngineState {
    scheduler: LookaheadScheduler,
    producer: InstructionProducer,
    /// Parked between deadlines; woken after every push into `producer`.
    output: Thread,
    ticker: Receiver<Instant>,
    status: Arc<ArcSwap<TransportStatus>>,
    update_tx: Sender<EngineUpdate>,
}

fn engine_thread(mut state: EngineState, command_rx: Receiver<EngineCommand>) {
    loop {
        let ticker = state.ticker.clone();
        crossbeam::channel::select! {
            recv(command_rx) -> command => match command {
                Ok(EngineCommand::Shutdown) | Err(crossbeam::channel::RecvError) => {
                    state.stop();
                    break;
                }
                Ok(command) => state.handle(command),
            },
            recv(ticker) -> _ => state.tick(),
        }
    }
    debug!("engine thread stopped");
}

impl EngineState {
    fn handle(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Start {
                track,
                tempo,
                from_beat,
            } => {
                let now = Instant::now();
                match self
                    .scheduler
                    .start(track, tempo.bpm(), from_beat, now, &mut self.producer)
                {
                    Ok(()) if self.scheduler.is_running() => {
                        self.ticker = crossbeam::channel::tick(self.scheduler.timing().interval);
                        self.publish();
                        let _ = self
                            .update_tx
                            .send(EngineUpdate::PlaybackState { running: true });
                        self.tick();
                    }
                    Ok(()) => {
                        self.ticker = crossbeam::channel::never();
                        self.publish();
                        let _ = self
                            .update_tx
                            .send(EngineUpdate::PlaybackState { running: false });
                    }
                    Err(e) => {
                        self.ticker = crossbeam::channel::never();
                        self.publish();
                        self.report(format!("failed to start playback: {e}"));
                    }
                }
            }
            EngineCommand::Stop => self.stop(),
            EngineCommand::EmitNow(event) => self.forward(GatewayInstruction::EmitNow(event)),
            EngineCommand::EmitAfter { event, delay } => {
                self.forward(GatewayInstruction::EmitAt(ScheduledEvent {
                    target: Instant::now() + delay,
                    event,
                }));
            }
            EngineCommand::PreviewNote {
                channel,
                program,
                note,
                velocity,
                duration,
            } => {
                if self.scheduler.programs().needs_change(channel, program) {
                    self.forward(GatewayInstruction::EmitNow(MidiEvent::program_change(
                        channel, program,
                    )));
                }
                self.forward(GatewayInstruction::EmitNow(MidiEvent::note_on(
                    channel, note, velocity,
                )));
                self.forward(GatewayInstruction::EmitAt(ScheduledEvent {
                    target: Instant::now() + duration,
                    event: MidiEvent::note_off(channel, note),
                }));
            }
            EngineCommand::Shutdown => {}
        }
        self.output.unpark();
    }

    fn tick(&mut self) {
        let channel = self.scheduler.channel();
        let report = self.scheduler.tick(Instant::now(), &mut self.producer);
        if report.scheduled > 0 {
            self.output.unpark();
        }

        if report.finished {
            self.ticker = crossbeam::channel::never();
            self.publish();
            if let Some(channel) = channel {
                let _ = self.update_tx.send(EngineUpdate::SessionFinished { channel });
            }
            let _ = self
                .update_tx
                .send(EngineUpdate::PlaybackState { running: false });
        }
    }

    fn stop(&mut self) {
        self.ticker = crossbeam::channel::never();
        if self.scheduler.stop(&mut self.producer) {
            self.output.unpark();
            self.publish();
            let _ = self
                .update_tx
                .send(EngineUpdate::PlaybackState { running: false });
        }
    }

    fn forward(&mut self, instruction: GatewayInstruction) {
        if let Err(e) = self.producer.send(instruction) {
            self.report(e.to_string());
        }
    }

    fn publish(&self) {
        self.status.store(Arc::new(TransportStatus {
            state: self.scheduler.state(),
            channel: self.scheduler.channel(),
            started_at: self.scheduler.started_at(),
        }));
    }

    fn report(&self, message: String) {
        warn!("{message}");
        let _ = self.update_tx.send(EngineUpdate::Error { message });
    }
}
