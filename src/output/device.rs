use midir::{MidiOutput, MidiOutputConnection};
use tracing::info;

use super::OutputError;

/// The raw byte sink at the end of the pipeline.
pub trait OutputDevice: Send {
    fn name(&self) -> &str;

    fn send(&mut self, message: &[u8]) -> Result<(), OutputError>;
}

/// A connected midir output port.
pub struct MidirDevice {
    name: String,
    connection: MidiOutputConnection,
}

impl std::fmt::Debug for MidirDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidirDevice").field("name", &self.name).finish()
    }
}

impl OutputDevice for MidirDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, message: &[u8]) -> Result<(), OutputError> {
        self.connection
            .send(message)
            .map_err(|e| OutputError::Send(e.to_string()))
    }
}

pub fn list_output_ports(client_name: &str) -> Result<Vec<String>, OutputError> {
    let midi_out = MidiOutput::new(client_name)?;
    midi_out
        .ports()
        .iter()
        .map(|port| midi_out.port_name(port).map_err(OutputError::from))
        .collect()
}

/// Connects to the first output port whose name contains `selector`, or to the
/// first port at all when no selector is given.
pub fn connect_output(client_name: &str, selector: Option<&str>) -> Result<MidirDevice, OutputError> {
    let midi_out = MidiOutput::new(client_name)?;
    let ports = midi_out.ports();

    let port = ports
        .iter()
        .find(|p| match selector {
            Some(wanted) => midi_out.port_name(p).unwrap_or_default().contains(wanted),
            None => true,
        })
        .ok_or_else(|| OutputError::PortNotFound(selector.unwrap_or("<any>").to_owned()))?;

    let name = midi_out.port_name(port)?;
    let connection = midi_out
        .connect(port, client_name)
        .map_err(|e| OutputError::Connect {
            port: name.clone(),
            message: e.to_string(),
        })?;

    info!(port = %name, "connected MIDI output");
    Ok(MidirDevice { name, connection })
}
