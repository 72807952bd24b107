//! CCNet bill acceptors
//!
//! Frame: `SYNC(0x02) ADR(0x03) LNG CMD DATA.. CRC16(LE)`, where `LNG` is
//! the whole frame length and the CRC is CRC-16/KERMIT over everything
//! before it. Answers have the same layout without the command byte; a
//! lone `0x30` data byte means the command was illegal.
//!
//! The validator state is polled and debounced through [`StatusDebouncer`];
//! power-up states are cleared with a Reset.

use std::sync::Arc;
use std::time::Duration;

use kiosk_core::{
    keys, Config, ConfigurationChangedHandler, DetectPriority, DetectingIterator, Device,
    DeviceId, ParameterSpec, Plugin, StatusCode, StatusCollection, StatusDebouncer, StatusEvent,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::link::PortLink;
use super::status_codes::{ccnet, device, CCNET_STATUS_TABLE};
use super::{port_bound_parameters, COM_PORT_PATH};
use crate::error::{AnswerError, CommandError, ErrorCode};
use crate::protocol::frame::{crc16_kermit, length_byte};
use crate::protocol::{CommandEngine, Envelope, Protocol};

pub const SYNC: u8 = 0x02;
/// Peripheral address of bill validators
pub const BILL_VALIDATOR: u8 = 0x03;

/// Status group of the validator state
pub const VALIDATOR_STATUS_GROUP: &str = "validator";

pub const MODELS: &[&str] = &["CashCode SM", "CashCode MSM", "CashCode MFL"];

/// SYNC ADR LNG CRC(2)
const MIN_ANSWER_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcnetCommand {
    Reset,
    GetStatus,
    Poll,
    EnableBillTypes,
    Identification,
}

impl CcnetCommand {
    pub fn code(self) -> u8 {
        match self {
            CcnetCommand::Reset => 0x30,
            CcnetCommand::GetStatus => 0x31,
            CcnetCommand::Poll => 0x33,
            CcnetCommand::EnableBillTypes => 0x34,
            CcnetCommand::Identification => 0x37,
        }
    }
}

pub mod errors {
    use crate::error::ErrorCode;

    pub const ILLEGAL_COMMAND: ErrorCode = 0x30;
    pub const NAK: ErrorCode = 0xFF;
}

#[derive(Debug, Default)]
pub struct CcnetProtocol;

impl Protocol for CcnetProtocol {
    type Command = CcnetCommand;

    fn encode(&self, command: CcnetCommand, data: &[u8]) -> Result<Vec<u8>, CommandError> {
        let mut body = vec![command.code()];
        body.extend_from_slice(data);
        frame(&body)
    }

    fn unpack(&self, _command: CcnetCommand, answer: &[u8]) -> Result<Envelope, AnswerError> {
        if answer.len() < MIN_ANSWER_SIZE {
            return Err(AnswerError::TooShort {
                expected: MIN_ANSWER_SIZE,
                actual: answer.len(),
            });
        }
        if answer[0] != SYNC || answer[1] != BILL_VALIDATOR {
            return Err(AnswerError::InvalidFrame(format!(
                "bad header {:02X} {:02X}",
                answer[0], answer[1]
            )));
        }

        let length = usize::from(answer[2]);
        if length != answer.len() {
            return Err(AnswerError::InvalidFrame(format!(
                "length byte {}, frame has {}",
                length,
                answer.len()
            )));
        }

        let crc_at = length - 2;
        let expected = crc16_kermit(&answer[..crc_at]);
        let actual = u16::from_le_bytes([answer[crc_at], answer[crc_at + 1]]);
        if expected != actual {
            return Err(AnswerError::Checksum { expected, actual });
        }

        let data = &answer[3..crc_at];
        Ok(match data {
            [errors::ILLEGAL_COMMAND] => Envelope {
                error: errors::ILLEGAL_COMMAND,
                payload: Vec::new(),
            },
            [errors::NAK] => Envelope {
                error: errors::NAK,
                payload: Vec::new(),
            },
            _ => Envelope::ok(data.to_vec()),
        })
    }

    fn timeout(&self, command: CcnetCommand) -> Duration {
        match command {
            CcnetCommand::Reset => Duration::from_secs(1),
            _ => Duration::from_millis(200),
        }
    }

    fn error_description(&self, code: ErrorCode) -> String {
        match code {
            errors::ILLEGAL_COMMAND => "Illegal command".to_string(),
            errors::NAK => "Device rejected the frame (NAK)".to_string(),
            _ => format!("Unknown error 0x{:02X}", code),
        }
    }

    fn process_answer(
        &self,
        _engine: &mut CommandEngine<Self>,
        _command: CcnetCommand,
        _code: ErrorCode,
    ) -> bool {
        false
    }
}

/// Wrap `body` (command and data, or answer data) into a frame
pub fn frame(body: &[u8]) -> Result<Vec<u8>, CommandError> {
    let mut frame = vec![SYNC, BILL_VALIDATOR, length_byte(body.len() + 5)?];
    frame.extend_from_slice(body);
    let crc = crc16_kermit(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Identification answer data: part number(15), serial(12), asset(7)
pub fn identification_data(part_number: &str, serial: &str) -> Vec<u8> {
    let mut data = format!("{:<15.15}{:<12.12}", part_number, serial).into_bytes();
    data.extend_from_slice(&[0u8; 7]);
    data
}

/// CCNet bill validator driver instance
pub struct CcnetValidator {
    link: PortLink<CcnetProtocol>,
    status: Mutex<StatusDebouncer>,
}

impl CcnetValidator {
    pub fn new(path: &str, config: Config) -> Self {
        Self {
            link: PortLink::new(path, config),
            status: Mutex::new(StatusDebouncer::new(path, &CCNET_STATUS_TABLE)),
        }
    }

    pub fn parameters() -> Vec<ParameterSpec> {
        port_bound_parameters(COM_PORT_PATH, "CCNet", MODELS, DetectPriority::Normal)
    }

    fn command(&self, command: CcnetCommand, data: &[u8]) -> Result<Vec<u8>, CommandError> {
        self.link.execute(|engine| engine.process_command(command, data))
    }

    /// Read the part number; doubles as the detection probe
    pub fn identify(&self) -> Result<String, CommandError> {
        let data = self.command(CcnetCommand::Identification, &[])?;
        if data.len() < 15 {
            return Err(AnswerError::TooShort {
                expected: 15,
                actual: data.len(),
            }
            .into());
        }
        let part_number = String::from_utf8_lossy(&data[..15]).trim().to_string();
        if part_number.is_empty() {
            return Err(AnswerError::EmptyField(0).into());
        }
        self.link
            .base
            .update(keys::MODEL_NAME, Value::from(part_number.clone()));
        Ok(part_number)
    }

    pub fn reset(&self) -> Result<(), CommandError> {
        self.command(CcnetCommand::Reset, &[]).map(drop)
    }

    /// Enable the bill types in `mask` (bit N = bill type N); 0 disables
    pub fn enable_bill_types(&self, mask: u32) -> Result<(), CommandError> {
        let bytes = mask.to_be_bytes();
        let data = [bytes[1], bytes[2], bytes[3], 0, 0, 0];
        self.command(CcnetCommand::EnableBillTypes, &data).map(drop)
    }

    /// Poll the validator; returns an event only when the status changed
    pub fn poll(&self) -> Option<StatusEvent> {
        let mut codes: StatusCollection = match self.command(CcnetCommand::Poll, &[]) {
            Ok(data) => match data.first() {
                Some(&state) => [StatusCode::from(state)].into_iter().collect(),
                None => [device::UNKNOWN].into_iter().collect(),
            },
            Err(e) => {
                debug!(device = %self.link.base.display_name(), error = %e, "Poll failed");
                [device::NOT_AVAILABLE].into_iter().collect()
            }
        };

        if codes.codes().any(ccnet::is_power_up) {
            info!(device = %self.link.base.display_name(), "Power up state, resetting");
            if let Err(e) = self.reset() {
                warn!(device = %self.link.base.display_name(), error = %e, "Reset failed");
            }
        }

        let mut status = self.status.lock();
        Self::replace_glitches(&status, &mut codes);
        status.submit(VALIDATOR_STATUS_GROUP, codes)
    }

    /// Rewrite transient states that mean a bill is stuck
    fn replace_glitches(status: &StatusDebouncer, codes: &mut StatusCollection) {
        let Some(history) = status.history(VALIDATOR_STATUS_GROUP) else {
            return;
        };

        let stuck = history.is_status_collection_conformed(&[ccnet::VALIDATOR_JAMMED, device::NOT_AVAILABLE])
            || history.is_status_collection_conformed(&[ccnet::STICK_IN_EXIT_CHANNEL]);
        if stuck {
            for code in [ccnet::INITIALIZE, ccnet::RETURNING] {
                if codes.remove(code) {
                    codes.insert(ccnet::STICK_IN_EXIT_CHANNEL);
                }
            }
        }

        status.apply_replacements(
            VALIDATOR_STATUS_GROUP,
            codes,
            &[(ccnet::RETURNING, ccnet::STICK_IN_EXIT_CHANNEL)],
        );
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.status.lock().subscribe()
    }
}

impl Plugin for CcnetValidator {
    fn plugin_path(&self) -> &str {
        self.link.base.path()
    }

    fn as_device(self: Arc<Self>) -> Option<Arc<dyn Device>> {
        Some(self)
    }
}

impl Device for CcnetValidator {
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

impl DetectingIterator for CcnetValidator {
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
                info!(device = %self.link.base.display_name(), model = %model, baud_rate = ?rate, "CCNet validator found");
                true
            }
            Err(e) => {
                debug!(device = %self.link.base.display_name(), baud_rate = ?rate, error = %e, "No CCNet validator");
                false
            }
        }
    }
}
