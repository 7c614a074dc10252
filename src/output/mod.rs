mod device;
mod gateway;
mod worker;

pub use device::{MidirDevice, OutputDevice, connect_output, list_output_ports};
pub use gateway::{DeviceSlot, DispatchReport, OutputGateway, device_slot};
pub use worker::{InstructionConsumer, spawn_output_thread};

#[cfg(test)]
pub(crate) use gateway::tests::RecordingDevice;

use thiserror::Error;

use crate::events::{MidiEvent, ScheduledEvent};

/// Everything the scheduler may ask of the gateway. The gateway never
/// answers back to the scheduler.
#[derive(Debug, Clone, Copy)]
pub enum GatewayInstruction {
    EmitNow(MidiEvent),
    EmitAt(ScheduledEvent),
    Clear,
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no MIDI output device is connected")]
    DeviceUnavailable,
    #[error("no MIDI output port matching {0:?}")]
    PortNotFound(String),
    #[error("failed to initialize MIDI client: {0}")]
    Init(#[from] midir::InitError),
    #[error("failed to read MIDI port info: {0}")]
    PortInfo(#[from] midir::PortInfoError),
    #[error("failed to connect to {port}: {message}")]
    Connect { port: String, message: String },
    #[error("failed to send MIDI message: {0}")]
    Send(String),
}
