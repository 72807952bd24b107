//! Shtrih fiscal registrators
//!
//! Binary frame: `STX LEN CMD [PASSWORD(4, LE)] DATA.. LRC`, where `LEN`
//! counts the bytes between itself and the LRC and the LRC is the XOR of
//! `LEN` and everything after it. Answers carry `CMD ERR PAYLOAD..`.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use kiosk_core::DetectPriority;
use once_cell::sync::Lazy;
use tracing::{debug, warn};

use super::fiscal::{FiscalProtocol, FiscalRegistrator, FrState};
use crate::error::{AnswerError, CommandError, ErrorCode};
use crate::protocol::frame::{ascii::STX, length_byte, lrc};
use crate::protocol::{CommandEngine, Envelope, Protocol};

pub type ShtrihFr = FiscalRegistrator<ShtrihProtocol>;

/// Default administrator password
pub const ADMIN_PASSWORD: u32 = 30;

const MAX_PRINTING_POLLS: usize = 10;
const PRINTING_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShtrihCommand {
    GetShortStatus,
    GetLongStatus,
    XReport,
    ZReport,
    CancelDocument,
    ContinuePrinting,
    GetDeviceType,
}

impl ShtrihCommand {
    pub fn code(self) -> u8 {
        match self {
            ShtrihCommand::GetShortStatus => 0x10,
            ShtrihCommand::GetLongStatus => 0x11,
            ShtrihCommand::XReport => 0x40,
            ShtrihCommand::ZReport => 0x41,
            ShtrihCommand::CancelDocument => 0x88,
            ShtrihCommand::ContinuePrinting => 0xB0,
            ShtrihCommand::GetDeviceType => 0xFC,
        }
    }

    fn takes_password(self) -> bool {
        self != ShtrihCommand::GetDeviceType
    }
}

/// Device error codes the compensation table knows about
pub mod errors {
    use crate::error::ErrorCode;

    pub const DOCUMENT_IS_OPENED: ErrorCode = 0x4A;
    pub const NEED_Z_REPORT: ErrorCode = 0x4E;
    pub const NEED_WAIT_FOR_PRINTING: ErrorCode = 0x50;
    pub const NEED_EXTENTION_PRINTING: ErrorCode = 0x58;
    pub const NO_PAPER: ErrorCode = 0x6B;
    pub const BAD_MODE_FOR_COMMAND: ErrorCode = 0x73;
}

static ERROR_DESCRIPTIONS: Lazy<HashMap<ErrorCode, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (0x01, "Fiscal memory failure"),
        (0x37, "Command is not supported"),
        (errors::DOCUMENT_IS_OPENED, "Document is opened, operation is impossible"),
        (errors::NEED_Z_REPORT, "Fiscal session exceeded 24 hours"),
        (errors::NEED_WAIT_FOR_PRINTING, "Previous command is still being printed"),
        (errors::NEED_EXTENTION_PRINTING, "Waiting for the continue printing command"),
        (errors::NO_PAPER, "No receipt paper"),
        (errors::BAD_MODE_FOR_COMMAND, "Command is not supported in this mode"),
    ])
});

/// Device modes (low nibble of the mode byte)
pub mod modes {
    pub const SESSION_OPENED: u8 = 2;
    pub const SESSION_EXPIRED: u8 = 3;
    pub const SESSION_CLOSED: u8 = 4;
    pub const DOCUMENT_OPENED: u8 = 8;
}

/// Printer submodes
pub mod submodes {
    pub const PAPER_PRESENT: u8 = 0;
    pub const PAPER_END_PASSIVE: u8 = 1;
    pub const PAPER_END_ACTIVE: u8 = 2;
    pub const AFTER_PAPER_END: u8 = 3;
    pub const PRINTING_FULL_REPORTS: u8 = 4;
    pub const PRINTING: u8 = 5;
}

/// Offset of the mode byte in the short status payload
pub const SHORT_STATUS_MODE_OFFSET: usize = 3;
/// Offset of the mode byte in the long status payload
pub const LONG_STATUS_MODE_OFFSET: usize = 13;

/// Mode and submode read from a status answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShtrihMode {
    pub mode: u8,
    pub submode: u8,
}

impl ShtrihMode {
    fn parse(payload: &[u8], offset: usize) -> Result<Self, AnswerError> {
        if payload.len() < offset + 2 {
            return Err(AnswerError::TooShort {
                expected: offset + 2,
                actual: payload.len(),
            });
        }
        Ok(Self {
            mode: payload[offset] & 0x0F,
            submode: payload[offset + 1] & 0x0F,
        })
    }

    fn paper_end(&self) -> bool {
        matches!(
            self.submode,
            submodes::PAPER_END_PASSIVE | submodes::PAPER_END_ACTIVE | submodes::AFTER_PAPER_END
        )
    }

    fn printing(&self) -> bool {
        matches!(
            self.submode,
            submodes::PRINTING_FULL_REPORTS | submodes::PRINTING
        )
    }
}

#[derive(Debug)]
pub struct ShtrihProtocol {
    password: u32,
}

impl Default for ShtrihProtocol {
    fn default() -> Self {
        Self {
            password: ADMIN_PASSWORD,
        }
    }
}

impl ShtrihProtocol {
    fn short_status(engine: &mut CommandEngine<Self>) -> Result<ShtrihMode, CommandError> {
        let payload = engine.process_command(ShtrihCommand::GetShortStatus, &[])?;
        Ok(ShtrihMode::parse(&payload, SHORT_STATUS_MODE_OFFSET)?)
    }

    fn long_status(engine: &mut CommandEngine<Self>) -> Result<ShtrihMode, CommandError> {
        let payload = engine.process_command(ShtrihCommand::GetLongStatus, &[])?;
        Ok(ShtrihMode::parse(&payload, LONG_STATUS_MODE_OFFSET)?)
    }

    fn run(engine: &mut CommandEngine<Self>, command: ShtrihCommand) -> bool {
        engine.process_command(command, &[]).is_ok()
    }

    /// Poll until the printer is idle, giving up on paper end
    fn wait_for_printing_end(engine: &mut CommandEngine<Self>) -> bool {
        for _ in 0..MAX_PRINTING_POLLS {
            match Self::short_status(engine) {
                Ok(state) if state.paper_end() => return false,
                Ok(state) if state.printing() => thread::sleep(PRINTING_POLL_INTERVAL),
                Ok(_) => return true,
                Err(_) => return false,
            }
        }
        warn!(device = %engine.device_name(), "Printing did not finish");
        false
    }
}

impl Protocol for ShtrihProtocol {
    type Command = ShtrihCommand;

    fn encode(&self, command: ShtrihCommand, data: &[u8]) -> Result<Vec<u8>, CommandError> {
        let mut body = vec![command.code()];
        if command.takes_password() {
            body.extend_from_slice(&self.password.to_le_bytes());
        }
        body.extend_from_slice(data);

        let mut frame = Vec::with_capacity(body.len() + 3);
        frame.push(STX);
        frame.push(length_byte(body.len())?);
        frame.extend_from_slice(&body);
        frame.push(lrc(&frame[1..]));
        Ok(frame)
    }

    fn unpack(&self, command: ShtrihCommand, answer: &[u8]) -> Result<Envelope, AnswerError> {
        // STX LEN CMD ERR LRC
        if answer.len() < 5 {
            return Err(AnswerError::TooShort {
                expected: 5,
                actual: answer.len(),
            });
        }
        if answer[0] != STX {
            return Err(AnswerError::InvalidFrame(format!(
                "no STX prefix: {:02X}",
                answer[0]
            )));
        }

        let length = usize::from(answer[1]);
        if length < 2 || answer.len() < length + 3 {
            return Err(AnswerError::TooShort {
                expected: length.max(2) + 3,
                actual: answer.len(),
            });
        }

        let expected = lrc(&answer[1..length + 2]);
        let actual = answer[length + 2];
        if expected != actual {
            return Err(AnswerError::Checksum {
                expected: u16::from(expected),
                actual: u16::from(actual),
            });
        }

        let body = &answer[2..length + 2];
        if body[0] != command.code() {
            return Err(AnswerError::CommandMismatch {
                expected: format!("{:02X}", command.code()),
                actual: format!("{:02X}", body[0]),
            });
        }

        Ok(Envelope {
            error: body[1],
            payload: body[2..].to_vec(),
        })
    }

    fn timeout(&self, command: ShtrihCommand) -> Duration {
        match command {
            ShtrihCommand::XReport | ShtrihCommand::ZReport => Duration::from_secs(20),
            ShtrihCommand::GetDeviceType => Duration::from_millis(500),
            _ => Duration::from_secs(3),
        }
    }

    fn error_description(&self, code: ErrorCode) -> String {
        ERROR_DESCRIPTIONS
            .get(&code)
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("Unknown error 0x{:02X}", code))
    }

    fn is_unprocessable(&self, command: ShtrihCommand, code: ErrorCode) -> bool {
        matches!(
            (command, code),
            (ShtrihCommand::CancelDocument, errors::DOCUMENT_IS_OPENED)
                | (ShtrihCommand::ZReport, errors::NEED_Z_REPORT)
                | (ShtrihCommand::ContinuePrinting, errors::NEED_EXTENTION_PRINTING)
        )
    }

    fn answer_repeats(&self) -> usize {
        3
    }

    fn is_not_error(
        &self,
        engine: &mut CommandEngine<Self>,
        command: ShtrihCommand,
        code: ErrorCode,
    ) -> bool {
        // Cancelling with no open document
        if command == ShtrihCommand::CancelDocument && code == errors::BAD_MODE_FOR_COMMAND {
            if let Ok(state) = Self::long_status(engine) {
                if state.mode != modes::DOCUMENT_OPENED {
                    debug!(device = %engine.device_name(), mode = state.mode, "No document to cancel");
                    return true;
                }
            }
        }
        false
    }

    fn process_answer(
        &self,
        engine: &mut CommandEngine<Self>,
        _command: ShtrihCommand,
        code: ErrorCode,
    ) -> bool {
        match code {
            errors::DOCUMENT_IS_OPENED => Self::run(engine, ShtrihCommand::CancelDocument),
            errors::NEED_Z_REPORT => Self::run(engine, ShtrihCommand::ZReport),
            errors::NEED_EXTENTION_PRINTING => Self::run(engine, ShtrihCommand::ContinuePrinting),
            errors::NEED_WAIT_FOR_PRINTING => Self::wait_for_printing_end(engine),
            errors::BAD_MODE_FOR_COMMAND => match Self::long_status(engine) {
                Ok(state) => match state.mode {
                    modes::SESSION_EXPIRED => Self::run(engine, ShtrihCommand::ZReport),
                    modes::DOCUMENT_OPENED => Self::run(engine, ShtrihCommand::CancelDocument),
                    _ => false,
                },
                Err(_) => false,
            },
            _ => false,
        }
    }
}

impl FiscalProtocol for ShtrihProtocol {
    const SERIES: &'static str = "Shtrih";
    const MODELS: &'static [&'static str] = &[
        "SHTRIH-M-PTK",
        "SHTRIH-MINI-FR-K",
        "SHTRIH-LIGHT-FR-K",
        "PayOnline-01-FA",
    ];
    const PRIORITY: DetectPriority = DetectPriority::Normal;

    fn identify(engine: &mut CommandEngine<Self>) -> Result<String, CommandError> {
        // type, subtype, protocol version(2), model, language, name..
        let payload = engine.process_command(ShtrihCommand::GetDeviceType, &[])?;
        if payload.len() < 6 {
            return Err(AnswerError::TooShort {
                expected: 6,
                actual: payload.len(),
            }
            .into());
        }
        let name = String::from_utf8_lossy(&payload[6..]).trim().to_string();
        if name.is_empty() {
            return Ok(format!("Shtrih model {}", payload[4]));
        }
        Ok(name)
    }

    fn read_state(engine: &mut CommandEngine<Self>) -> Result<FrState, CommandError> {
        let state = Self::short_status(engine)?;
        Ok(FrState {
            session_opened: matches!(
                state.mode,
                modes::SESSION_OPENED | modes::SESSION_EXPIRED | modes::DOCUMENT_OPENED
            ),
            session_expired: state.mode == modes::SESSION_EXPIRED,
            document_opened: state.mode == modes::DOCUMENT_OPENED,
            paper_end: state.paper_end(),
            printing: state.printing(),
        })
    }

    fn x_report(engine: &mut CommandEngine<Self>) -> Result<(), CommandError> {
        engine.process_command(ShtrihCommand::XReport, &[]).map(drop)
    }

    fn z_report(engine: &mut CommandEngine<Self>) -> Result<(), CommandError> {
        engine.process_command(ShtrihCommand::ZReport, &[]).map(drop)
    }

    fn cancel_document(engine: &mut CommandEngine<Self>) -> Result<(), CommandError> {
        engine
            .process_command(ShtrihCommand::CancelDocument, &[])
            .map(drop)
    }
}

/// Answer frame builder shared with the integration tests
pub fn answer_frame(
    command: ShtrihCommand,
    error: ErrorCode,
    payload: &[u8],
) -> Result<Vec<u8>, CommandError> {
    let mut body = vec![command.code(), error];
    body.extend_from_slice(payload);
    let mut frame = vec![STX, length_byte(body.len())?];
    frame.extend_from_slice(&body);
    frame.push(lrc(&frame[1..]));
    Ok(frame)
}

/// Short status payload reporting `mode` / `submode`
pub fn short_status_payload(mode: u8, submode: u8) -> Vec<u8> {
    let mut payload = vec![0u8; SHORT_STATUS_MODE_OFFSET + 2];
    payload[SHORT_STATUS_MODE_OFFSET] = mode;
    payload[SHORT_STATUS_MODE_OFFSET + 1] = submode;
    payload
}

/// Long status payload reporting `mode` / `submode`
pub fn long_status_payload(mode: u8, submode: u8) -> Vec<u8> {
    let mut payload = vec![0u8; LONG_STATUS_MODE_OFFSET + 2];
    payload[LONG_STATUS_MODE_OFFSET] = mode;
    payload[LONG_STATUS_MODE_OFFSET + 1] = submode;
    payload
}

/// Device type payload naming `model`
pub fn device_type_payload(model: &str) -> Vec<u8> {
    let mut payload = vec![0x00, 0x00, 0x01, 0x00, 0x10, 0x00];
    payload.extend_from_slice(model.as_bytes());
    payload
}
