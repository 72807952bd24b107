//! Fiscal registrator device
//!
//! [`FiscalRegistrator`] is generic over the wire protocol of the family.
//! The device rides a port resource (COM or TCP), lazily builds a
//! [`CommandEngine`] over that port and exposes the operations every
//! family supports: identification, reports, document cancel and status.

use std::sync::Arc;

use kiosk_core::{
    keys, Config, ConfigurationChangedHandler, DetectPriority, DetectingIterator, Device,
    DeviceId, ParameterSpec, Plugin, StatusCollection, StatusDebouncer, StatusEvent,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::status_codes::{device, fr, FR_STATUS_TABLE};
use super::link::PortLink;
use super::{port_bound_parameters, resource_for};
use crate::error::CommandError;
use crate::protocol::{CommandEngine, Protocol};

/// Status group of fiscal registrators
pub const FR_STATUS_GROUP: &str = "fr";

/// Family-specific command sequences on top of [`Protocol`]
pub trait FiscalProtocol: Protocol + Default {
    /// Protocol name, also the series part of the driver path
    const SERIES: &'static str;
    const MODELS: &'static [&'static str];
    const PRIORITY: DetectPriority;

    /// Read the model name; doubles as the detection probe
    fn identify(engine: &mut CommandEngine<Self>) -> Result<String, CommandError>;

    fn read_state(engine: &mut CommandEngine<Self>) -> Result<FrState, CommandError>;

    fn x_report(engine: &mut CommandEngine<Self>) -> Result<(), CommandError>;

    fn z_report(engine: &mut CommandEngine<Self>) -> Result<(), CommandError>;

    fn cancel_document(engine: &mut CommandEngine<Self>) -> Result<(), CommandError>;
}

/// Decoded fiscal registrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrState {
    pub session_opened: bool,
    pub session_expired: bool,
    pub document_opened: bool,
    pub paper_end: bool,
    pub printing: bool,
}

impl FrState {
    pub fn status_codes(&self) -> StatusCollection {
        let mut codes = StatusCollection::new();
        if !self.session_opened {
            codes.insert(fr::SESSION_CLOSED);
        }
        if self.session_expired {
            codes.insert(fr::SESSION_EXPIRED);
        }
        if self.document_opened {
            codes.insert(fr::DOCUMENT_OPENED);
        }
        if self.paper_end {
            codes.insert(fr::PAPER_END);
        }
        if self.printing {
            codes.insert(fr::PRINTING);
        }
        if codes.is_empty() {
            codes.insert(device::OK);
        }
        codes
    }
}

/// Fiscal registrator driver instance
pub struct FiscalRegistrator<P: FiscalProtocol> {
    link: PortLink<P>,
    status: Mutex<StatusDebouncer>,
}

impl<P: FiscalProtocol> FiscalRegistrator<P> {
    pub fn new(path: &str, config: Config) -> Self {
        Self {
            link: PortLink::new(path, config),
            status: Mutex::new(StatusDebouncer::new(path, &FR_STATUS_TABLE)),
        }
    }

    /// Parameter schema for the `interaction_type` variant of the family
    pub fn parameters(interaction_type: &str) -> Vec<ParameterSpec> {
        port_bound_parameters(
            resource_for(interaction_type),
            P::SERIES,
            P::MODELS,
            P::PRIORITY,
        )
    }

    /// Run `operation` on the command engine, connecting first if needed
    pub fn execute<T, F>(&self, operation: F) -> Result<T, CommandError>
    where
        F: FnOnce(&mut CommandEngine<P>) -> Result<T, CommandError>,
    {
        self.link.execute(operation)
    }

    pub fn identify(&self) -> Result<String, CommandError> {
        let model = self.execute(P::identify)?;
        self.link
            .base
            .update(keys::MODEL_NAME, Value::from(model.clone()));
        Ok(model)
    }

    pub fn x_report(&self) -> Result<(), CommandError> {
        self.execute(P::x_report)
    }

    pub fn z_report(&self) -> Result<(), CommandError> {
        self.execute(P::z_report)
    }

    pub fn cancel_document(&self) -> Result<(), CommandError> {
        self.execute(P::cancel_document)
    }

    /// Poll the device state; returns an event only when the status changed
    pub fn poll_status(&self) -> Option<StatusEvent> {
        let codes = match self.execute(P::read_state) {
            Ok(state) => state.status_codes(),
            Err(e) => {
                warn!(device = %self.link.base.display_name(), error = %e, "Status poll failed");
                let code = match e {
                    CommandError::Transport(_) => device::NOT_AVAILABLE,
                    _ => device::UNKNOWN,
                };
                [code].into_iter().collect()
            }
        };
        self.status.lock().submit(FR_STATUS_GROUP, codes)
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.status.lock().subscribe()
    }
}

impl<P: FiscalProtocol> Plugin for FiscalRegistrator<P> {
    fn plugin_path(&self) -> &str {
        self.link.base.path()
    }

    fn as_device(self: Arc<Self>) -> Option<Arc<dyn Device>> {
        Some(self)
    }
}

impl<P: FiscalProtocol> Device for FiscalRegistrator<P> {
    fn id(&self) -> DeviceId {
        self.link.base.id()
    }

    fn configuration(&self) -> Config {
        self.link.base.configuration()
    }

    fn set_configuration(&self, config: &Config) {
        self.link.base.merge_configuration(config);
        self.link.disconnect();
    }

    fn detecting_iterator(&self) -> Option<&dyn DetectingIterator> {
        Some(self)
    }

    fn release(&self) -> bool {
        self.link.release();
        true
    }

    fn subscribe_configuration_changed(&self, handler: ConfigurationChangedHandler) {
        self.link.base.subscribe(handler);
    }

    fn log_name(&self) -> String {
        self.link.base.log_name()
    }

    fn set_log_name(&self, name: &str) {
        self.link.set_log_name(name);
        self.status.lock().set_device_name(name);
    }

    fn attach_required_device(&self, device: Arc<dyn Device>) {
        self.link.base.attach_required(device);
        self.link.disconnect();
    }
}

impl<P: FiscalProtocol> DetectingIterator for FiscalRegistrator<P> {
    fn move_next(&self) -> bool {
        self.link.next_baud_rate()
    }

    fn find(&self) -> bool {
        let rate = self.link.probe_rate();
        match self.identify() {
            Ok(model) => {
                if let Some(rate) = rate {
                    self.link.base.update(keys::BAUD_RATE, Value::from(rate));
                }
                info!(device = %self.link.base.display_name(), model = %model, baud_rate = ?rate, "{} device found", P::SERIES);
                true
            }
            Err(e) => {
                debug!(device = %self.link.base.display_name(), baud_rate = ?rate, error = %e, "No {} device", P::SERIES);
                false
            }
        }
    }
}
