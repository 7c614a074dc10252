use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{GatewayInstruction, OutputDevice, OutputError};
use crate::events::{MidiEvent, MidiMessage, ScheduledEvent};

/// Shared slot for the one output device. The control stage swaps devices in
/// and out; only the gateway ever sends through it.
pub type DeviceSlot = Arc<Mutex<Option<Box<dyn OutputDevice>>>>;

pub fn device_slot(device: Option<Box<dyn OutputDevice>>) -> DeviceSlot {
    Arc::new(Mutex::new(device))
}

#[derive(Debug)]
struct Pending {
    target: Instant,
    seq: u64,
    event: MidiEvent,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.target
            .cmp(&other.target)
            .then(self.seq.cmp(&other.seq))
    }
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
    pub last_error: Option<OutputError>,
}

/// Holds timestamped events until they are due and pushes them to the device.
///
/// Events sharing a timestamp go out in the order they arrived. A failed send
/// is reported and forgotten, never retried.
pub struct OutputGateway {
    device: DeviceSlot,
    pending: BinaryHeap<Reverse<Pending>>,
    next_seq: u64,
    sounding: HashMap<(u8, u8), u32>,
}

impl std::fmt::Debug for OutputGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputGateway")
            .field("pending", &self.pending.len())
            .field("sounding", &self.sounding.len())
            .finish()
    }
}

impl OutputGateway {
    pub fn new(device: DeviceSlot) -> Self {
        Self {
            device,
            pending: BinaryHeap::new(),
            next_seq: 0,
            sounding: HashMap::new(),
        }
    }

    pub fn has_device(&self) -> bool {
        self.device.lock().is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.peek().map(|Reverse(p)| p.target)
    }

    pub fn apply(&mut self, instruction: GatewayInstruction) -> Result<(), OutputError> {
        match instruction {
            GatewayInstruction::EmitNow(event) => self.emit_now(event),
            GatewayInstruction::EmitAt(scheduled) => self.emit_at(scheduled),
            GatewayInstruction::Clear => {
                self.clear_queue();
                Ok(())
            }
        }
    }

    pub fn emit_now(&mut self, event: MidiEvent) -> Result<(), OutputError> {
        self.deliver(event)
    }

    /// Queues `event` for its target instant. Refused outright when there is
    /// no device to eventually deliver it to.
    pub fn emit_at(&mut self, scheduled: ScheduledEvent) -> Result<(), OutputError> {
        if !self.has_device() {
            return Err(OutputError::DeviceUnavailable);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(Reverse(Pending {
            target: scheduled.target,
            seq,
            event: scheduled.event,
        }));
        Ok(())
    }

    /// Drops every event that has not fired yet, then releases notes that
    /// already sounded so none of them hang. Returns how many were dropped.
    pub fn clear_queue(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();

        let sounding: Vec<(u8, u8)> = self.sounding.drain().map(|(voice, _)| voice).collect();
        for (channel, note) in sounding {
            // Failures are irrelevant here, the device is gone or the note is.
            let _ = self.deliver(MidiEvent::note_off(channel, note));
        }

        debug!(discarded, "cleared output queue");
        discarded
    }

    /// Sends everything due at or before `now`.
    pub fn dispatch_due(&mut self, now: Instant) -> DispatchReport {
        let mut report = DispatchReport::default();

        while self.next_deadline().is_some_and(|target| target <= now) {
            let Some(Reverse(pending)) = self.pending.pop() else {
                break;
            };
            trace!(event = ?pending.event, "dispatching");
            match self.deliver(pending.event) {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    report.failed += 1;
                    report.last_error = Some(e);
                }
            }
        }

        report
    }

    fn deliver(&mut self, event: MidiEvent) -> Result<(), OutputError> {
        {
            let mut device = self.device.lock();
            let device = device.as_mut().ok_or(OutputError::DeviceUnavailable)?;
            device.send(event.to_bytes().as_slice())?;
        }
        self.track_voice(&event);
        Ok(())
    }

    fn track_voice(&mut self, event: &MidiEvent) {
        let Some(voice) = event.voice() else {
            return;
        };
        match event.message {
            MidiMessage::NoteOn { velocity, .. } if velocity > 0 => {
                *self.sounding.entry(voice).or_default() += 1;
            }
            _ => {
                if let Some(count) = self.sounding.get_mut(&voice) {
                    *count -= 1;
                    if *count == 0 {
                        self.sounding.remove(&voice);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    pub(crate) type Sent = Arc<Mutex<Vec<(Instant, Vec<u8>)>>>;

    /// Records every message it is given along with when it got it.
    pub(crate) struct RecordingDevice {
        pub sent: Sent,
        pub fail: bool,
    }

    impl RecordingDevice {
        pub(crate) fn new() -> (Self, Sent) {
            let sent = Sent::default();
            (
                Self {
                    sent: sent.clone(),
                    fail: false,
                },
                sent,
            )
        }
    }

    impl OutputDevice for RecordingDevice {
        fn name(&self) -> &str {
            "recorder"
        }

        fn send(&mut self, message: &[u8]) -> Result<(), OutputError> {
            if self.fail {
                return Err(OutputError::Send("port went away".into()));
            }
            self.sent.lock().push((Instant::now(), message.to_vec()));
            Ok(())
        }
    }

    fn gateway() -> (OutputGateway, Sent) {
        let (device, sent) = RecordingDevice::new();
        (OutputGateway::new(device_slot(Some(Box::new(device)))), sent)
    }

    fn bytes(sent: &Sent) -> Vec<Vec<u8>> {
        sent.lock().iter().map(|(_, b)| b.clone()).collect()
    }

    fn at(target: Instant, event: MidiEvent) -> ScheduledEvent {
        ScheduledEvent { target, event }
    }

    #[test]
    fn emit_now_bypasses_the_queue() {
        let (mut gateway, sent) = gateway();
        gateway.emit_now(MidiEvent::program_change(0, 5)).unwrap();
        assert_eq!(bytes(&sent), vec![vec![0xC0, 5]]);
        assert_eq!(gateway.pending_len(), 0);
    }

    #[test]
    fn fires_events_in_timestamp_order_once_due() {
        let (mut gateway, sent) = gateway();
        let t0 = Instant::now();
        gateway
            .emit_at(at(t0 + Duration::from_millis(20), MidiEvent::note_off(0, 60)))
            .unwrap();
        gateway
            .emit_at(at(t0 + Duration::from_millis(10), MidiEvent::note_on(0, 60, 90)))
            .unwrap();
        gateway
            .emit_at(at(t0 + Duration::from_millis(10), MidiEvent::note_on(0, 64, 90)))
            .unwrap();

        assert_eq!(gateway.dispatch_due(t0).sent, 0);
        assert_eq!(gateway.next_deadline(), Some(t0 + Duration::from_millis(10)));

        assert_eq!(gateway.dispatch_due(t0 + Duration::from_millis(10)).sent, 2);
        assert_eq!(gateway.dispatch_due(t0 + Duration::from_millis(30)).sent, 1);
        assert_eq!(
            bytes(&sent),
            vec![vec![0x90, 60, 90], vec![0x90, 64, 90], vec![0x80, 60, 0]]
        );
    }

    #[test]
    fn clear_drops_pending_and_releases_sounding_notes() {
        let (mut gateway, sent) = gateway();
        let t0 = Instant::now();
        gateway.emit_at(at(t0, MidiEvent::note_on(2, 60, 100))).unwrap();
        gateway
            .emit_at(at(t0 + Duration::from_secs(1), MidiEvent::note_off(2, 60)))
            .unwrap();
        gateway
            .emit_at(at(t0 + Duration::from_secs(2), MidiEvent::note_on(2, 62, 100)))
            .unwrap();
        gateway.dispatch_due(t0);

        assert_eq!(gateway.clear_queue(), 2);
        assert_eq!(gateway.pending_len(), 0);
        assert_eq!(bytes(&sent), vec![vec![0x92, 60, 100], vec![0x82, 60, 0]]);

        gateway.dispatch_due(t0 + Duration::from_secs(5));
        assert_eq!(sent.lock().len(), 2);
    }

    #[test]
    fn no_device_is_reported_not_swallowed() {
        let mut gateway = OutputGateway::new(device_slot(None));
        assert!(matches!(
            gateway.emit_now(MidiEvent::note_on(0, 60, 100)),
            Err(OutputError::DeviceUnavailable)
        ));
        assert!(matches!(
            gateway.emit_at(at(Instant::now(), MidiEvent::note_on(0, 60, 100))),
            Err(OutputError::DeviceUnavailable)
        ));
    }

    #[test]
    fn failed_sends_are_counted_and_not_retried() {
        let (mut device, sent) = RecordingDevice::new();
        device.fail = true;
        let mut gateway = OutputGateway::new(device_slot(Some(Box::new(device))));
        let t0 = Instant::now();
        gateway.emit_at(at(t0, MidiEvent::note_on(0, 60, 100))).unwrap();
        gateway.emit_at(at(t0, MidiEvent::note_off(0, 60))).unwrap();

        let report = gateway.dispatch_due(t0);
        assert_eq!(report.sent, 0);
        assert_eq!(report.failed, 2);
        assert!(matches!(report.last_error, Some(OutputError::Send(_))));
        assert_eq!(gateway.pending_len(), 0);
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn device_can_be_swapped_at_runtime() {
        let slot = device_slot(None);
        let mut gateway = OutputGateway::new(slot.clone());
        assert!(!gateway.has_device());

        let (device, sent) = RecordingDevice::new();
        *slot.lock() = Some(Box::new(device));
        gateway.emit_now(MidiEvent::note_on(0, 60, 1)).unwrap();
        assert_eq!(sent.lock().len(), 1);
    }
}
