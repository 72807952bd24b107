//! Driver families
//!
//! - [`com_port`] / [`tcp_port`]: system resource drivers that own a [`Port`]
//! - [`fiscal`]: fiscal registrator device generic over its protocol
//!   ([`shtrih`], [`prim`], [`afp`])
//! - [`ccnet`]: CCNet bill acceptor with debounced status polling
//!
//! Port-bound devices detect by walking [`BAUD_RATES`] on the port of their
//! required resource and sending the family's identification command.

pub mod afp;
pub mod ccnet;
pub mod com_port;
pub mod fiscal;
mod link;
pub mod prim;
pub mod shtrih;
pub mod status_codes;
pub mod tcp_port;

use std::sync::Arc;

use kiosk_core::params::interaction;
use kiosk_core::{
    keys, DetectPriority, Existence, ParameterSpec, ParameterType, Port, PortSettings,
    TransportError,
};
use serde_json::Value;

pub use ccnet::CcnetValidator;
pub use com_port::ComPortDevice;
pub use fiscal::{FiscalProtocol, FiscalRegistrator, FrState};
pub use tcp_port::TcpPortDevice;

/// Baud rates probed during detection, fastest first
pub const BAUD_RATES: [u32; 5] = [115200, 57600, 38400, 19200, 9600];

pub const COM_PORT_PATH: &str = "Common.Driver.IOPort.COM.System";
pub const TCP_PORT_PATH: &str = "Common.Driver.IOPort.TCP.System";

/// Cursor over the baud rates a device is probed at
#[derive(Debug)]
pub(crate) struct BaudProbe {
    rates: &'static [u32],
    steps: usize,
}

impl BaudProbe {
    /// Probe over `rates`; an empty list still yields one step that
    /// leaves the line settings alone (network ports)
    pub(crate) fn new(rates: &'static [u32]) -> Self {
        Self { rates, steps: 0 }
    }

    /// Step to the next candidate; `false` once every one was tried
    pub(crate) fn advance(&mut self) -> bool {
        if self.steps >= self.rates.len().max(1) {
            return false;
        }
        self.steps += 1;
        true
    }

    /// Rate of the current step
    pub(crate) fn current(&self) -> Option<u32> {
        self.steps
            .checked_sub(1)
            .and_then(|index| self.rates.get(index).copied())
    }
}

impl Default for BaudProbe {
    fn default() -> Self {
        Self::new(&BAUD_RATES)
    }
}

/// Open `port` if needed and switch it to `baud_rate`
pub(crate) fn prepare_port(port: &Arc<dyn Port>, baud_rate: u32) -> Result<(), TransportError> {
    if !port.is_open() {
        port.open()?;
    }
    port.apply_settings(PortSettings { baud_rate })
}

/// Parameters every port-bound device declares
pub(crate) fn port_bound_parameters(
    resource: &str,
    protocol: &str,
    models: &[&str],
    priority: DetectPriority,
) -> Vec<ParameterSpec> {
    vec![
        ParameterSpec::string(keys::REQUIRED_RESOURCE, resource),
        ParameterSpec::new(keys::MODEL_NAME, ParameterType::String)
            .with_possible_values(models.iter().copied()),
        ParameterSpec::string(keys::PROTOCOL_NAME, protocol),
        ParameterSpec::string(keys::DETECT_PRIORITY, priority.as_str()),
        ParameterSpec::string(keys::EXISTENCE, Existence::Unique.as_str()),
        ParameterSpec::new(keys::BAUD_RATE, ParameterType::Int)
            .with_default(Value::from(PortSettings::default().baud_rate))
            .with_possible_values(BAUD_RATES),
    ]
}

/// Resource path a port-bound device rides for `interaction_type`
pub(crate) fn resource_for(interaction_type: &str) -> &'static str {
    if interaction_type == interaction::TCP {
        TCP_PORT_PATH
    } else {
        COM_PORT_PATH
    }
}
