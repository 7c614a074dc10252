use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use ringbuf::traits::Consumer;
use tracing::{info, warn};

use super::{GatewayInstruction, OutputError, OutputGateway};
use crate::engine::EngineUpdate;

pub type InstructionConsumer = ringbuf::HeapCons<GatewayInstruction>;

/// Longest park while nothing is queued. Producers unpark the thread after
/// every push, so this only bounds how late a missed wakeup is noticed.
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Runs the gateway in its own thread: drains scheduler instructions, fires
/// due events and reports delivery failures to the control stage.
///
/// Between events the thread parks until the next deadline; whoever pushes
/// into the instruction ring must unpark it.
pub fn spawn_output_thread(
    mut gateway: OutputGateway,
    mut consumer: InstructionConsumer,
    update_tx: Sender<EngineUpdate>,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut reporter = FailureReporter::new(update_tx);

        while running.load(Ordering::Acquire) {
            while let Some(instruction) = consumer.try_pop() {
                if let Err(e) = gateway.apply(instruction) {
                    reporter.failed(1, e);
                }
            }

            let report = gateway.dispatch_due(Instant::now());
            if report.sent > 0 {
                reporter.recovered();
            }
            if let Some(e) = report.last_error {
                reporter.failed(report.failed, e);
            }

            let wait = gateway.next_deadline().map_or(IDLE_WAIT, |deadline| {
                deadline
                    .saturating_duration_since(Instant::now())
                    .min(IDLE_WAIT)
            });
            if !wait.is_zero() {
                std::thread::park_timeout(wait);
            }
        }

        gateway.clear_queue();
        info!("output thread stopped");
    })
}

/// Reports a failure once until a send succeeds again, so a missing device
/// does not flood the update channel.
struct FailureReporter {
    update_tx: Sender<EngineUpdate>,
    last: Option<String>,
}

impl FailureReporter {
    fn new(update_tx: Sender<EngineUpdate>) -> Self {
        Self {
            update_tx,
            last: None,
        }
    }

    fn failed(&mut self, count: usize, error: OutputError) {
        let message = error.to_string();
        if self.last.as_deref() == Some(message.as_str()) {
            return;
        }
        warn!(count, "{message}");
        let _ = self.update_tx.send(EngineUpdate::DeliveryFailed {
            message: message.clone(),
        });
        self.last = Some(message);
    }

    fn recovered(&mut self) {
        self.last = None;
    }
}
