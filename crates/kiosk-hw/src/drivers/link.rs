//! Command link of port-bound devices
//!
//! Holds the device base, the lazily connected [`CommandEngine`] over the
//! port of the required resource and the baud-rate probe used while
//! detecting.

use kiosk_core::params::interaction;
use kiosk_core::{keys, Config, DeviceBase, DriverPath, TransportError};
use parking_lot::Mutex;
use tracing::debug;

use super::{prepare_port, BaudProbe};
use crate::error::CommandError;
use crate::protocol::{CommandEngine, Protocol};

pub(crate) struct PortLink<P: Protocol + Default> {
    pub(crate) base: DeviceBase,
    engine: Mutex<Option<CommandEngine<P>>>,
    probe: Mutex<BaudProbe>,
}

impl<P: Protocol + Default> PortLink<P> {
    pub(crate) fn new(path: &str, config: Config) -> Self {
        let probe = if DriverPath::new(path).interaction_type() == interaction::TCP {
            BaudProbe::new(&[])
        } else {
            BaudProbe::default()
        };
        Self {
            base: DeviceBase::new(path, config),
            engine: Mutex::new(None),
            probe: Mutex::new(probe),
        }
    }

    /// Run `operation` on the command engine, connecting first if needed
    pub(crate) fn execute<T, F>(&self, operation: F) -> Result<T, CommandError>
    where
        F: FnOnce(&mut CommandEngine<P>) -> Result<T, CommandError>,
    {
        let mut guard = self.engine.lock();
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        match guard.as_mut() {
            Some(engine) => operation(engine),
            None => Err(CommandError::Transport(TransportError::ConnectionClosed)),
        }
    }

    fn connect(&self) -> Result<CommandEngine<P>, CommandError> {
        let port = self.base.required_port().ok_or_else(|| {
            TransportError::InvalidConfig("no port resource attached".to_string())
        })?;

        // The probe rate wins over the configured one while detecting
        let baud_rate = match self.probe.lock().current() {
            Some(rate) => Some(rate),
            None => self
                .base
                .get_u64(keys::BAUD_RATE)
                .and_then(|v| u32::try_from(v).ok()),
        };
        match baud_rate {
            Some(rate) => prepare_port(&port, rate)?,
            None if !port.is_open() => port.open()?,
            None => {}
        }

        debug!(
            device = %self.base.display_name(),
            port = %port.system_name(),
            baud_rate = ?baud_rate,
            "Connected"
        );
        Ok(CommandEngine::new(P::default(), port, &self.base.display_name()))
    }

    /// Switch the port to the next candidate rate; `false` when exhausted
    pub(crate) fn next_baud_rate(&self) -> bool {
        let rate = {
            let mut probe = self.probe.lock();
            if !probe.advance() {
                return false;
            }
            probe.current()
        };
        let Some(rate) = rate else {
            return true;
        };
        if let Some(port) = self.base.required_port() {
            if let Err(e) = prepare_port(&port, rate) {
                debug!(device = %self.base.display_name(), baud_rate = rate, error = %e, "Cannot switch port");
            }
        }
        true
    }

    pub(crate) fn probe_rate(&self) -> Option<u32> {
        self.probe.lock().current()
    }

    /// Drop the engine; the next command reconnects
    pub(crate) fn disconnect(&self) {
        self.engine.lock().take();
    }

    pub(crate) fn set_log_name(&self, name: &str) {
        self.base.set_log_name(name);
        if let Some(engine) = self.engine.lock().as_mut() {
            engine.set_device_name(name);
        }
    }

    pub(crate) fn release(&self) {
        self.disconnect();
        self.base.clear();
    }
}
