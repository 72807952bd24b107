//! Prim fiscal registrators
//!
//! Text frame: `STX "AERF" ID CMD(2 hex) (FS FIELD)* FS ETX CRC(4 hex)`.
//! The packet id cycles through `0x20..=0xFF` and is echoed back together
//! with the command; the CRC is the byte sum of everything between STX
//! and the CRC itself.
//!
//! Answer: `STX ID CMD(2 hex) FS ERR(2 hex) (FS FIELD)* FS ETX CRC(4 hex)`.

use std::collections::HashMap;
use std::time::Duration;

use kiosk_core::DetectPriority;
use once_cell::sync::Lazy;

use super::fiscal::{FiscalProtocol, FiscalRegistrator, FrState};
use crate::error::{AnswerError, CommandError, ErrorCode};
use crate::protocol::frame::{
    ascii::{ETX, FS, STX},
    hex_byte, parse_hex, sum16, PacketId,
};
use crate::protocol::{decode_answer, split_fields, CommandEngine, Envelope, FieldKind, Protocol};

pub type PrimFr = FiscalRegistrator<PrimProtocol>;

const PREFIX: &[u8] = b"AERF";
/// STX ID CMD(2) FS ERR(2) FS ETX CRC(4)
const MIN_ANSWER_SIZE: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimCommand {
    GetStatus,
    GetKkmInfo,
    OpenSession,
    CancelDocument,
    XReport,
    ZReport,
}

impl PrimCommand {
    pub fn code(self) -> u8 {
        match self {
            PrimCommand::GetStatus => 0x11,
            PrimCommand::GetKkmInfo => 0x14,
            PrimCommand::CancelDocument => 0x17,
            PrimCommand::OpenSession => 0x2B,
            PrimCommand::XReport => 0x30,
            PrimCommand::ZReport => 0x31,
        }
    }
}

pub mod errors {
    use crate::error::ErrorCode;

    pub const INVALID_STATE: ErrorCode = 0x01;
    pub const UNKNOWN_COMMAND: ErrorCode = 0x02;
    pub const NEED_BEGIN_SESSION: ErrorCode = 0x08;
    pub const NEED_Z_REPORT: ErrorCode = 0x0A;
    pub const PAPER_END: ErrorCode = 0x0F;
}

static ERROR_DESCRIPTIONS: Lazy<HashMap<ErrorCode, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (errors::INVALID_STATE, "Invalid state for the command"),
        (errors::UNKNOWN_COMMAND, "Unknown command"),
        (errors::NEED_BEGIN_SESSION, "Fiscal session is not opened"),
        (errors::NEED_Z_REPORT, "Fiscal session exceeded 24 hours"),
        (errors::PAPER_END, "Paper end"),
    ])
});

/// Answer shapes
const KKM_INFO: &[FieldKind] = &[FieldKind::FString, FieldKind::FString, FieldKind::String];
const STATUS: &[FieldKind] = &[FieldKind::FInt, FieldKind::FInt, FieldKind::FInt];

#[derive(Debug, Default)]
pub struct PrimProtocol {
    id: PacketId,
}

impl PrimProtocol {
    fn fields(
        engine: &mut CommandEngine<Self>,
        command: PrimCommand,
        shape: &[FieldKind],
    ) -> Result<Vec<crate::protocol::FieldValue>, CommandError> {
        let payload = engine.process_command(command, &[])?;
        Ok(decode_answer(&split_fields(&payload, FS), shape)?)
    }

    fn run(engine: &mut CommandEngine<Self>, command: PrimCommand) -> bool {
        engine.process_command(command, &[]).is_ok()
    }
}

impl Protocol for PrimProtocol {
    type Command = PrimCommand;

    fn encode(&self, command: PrimCommand, data: &[u8]) -> Result<Vec<u8>, CommandError> {
        let mut frame = vec![STX];
        frame.extend_from_slice(PREFIX);
        frame.push(self.id.next());
        frame.extend_from_slice(&hex_byte(command.code()));
        frame.extend_from_slice(data);
        frame.push(FS);
        frame.push(ETX);
        let crc = sum16(&frame[1..]);
        frame.extend_from_slice(format!("{:04X}", crc).as_bytes());
        Ok(frame)
    }

    fn unpack(&self, command: PrimCommand, answer: &[u8]) -> Result<Envelope, AnswerError> {
        if answer.len() < MIN_ANSWER_SIZE {
            return Err(AnswerError::TooShort {
                expected: MIN_ANSWER_SIZE,
                actual: answer.len(),
            });
        }

        let etx = answer.len() - 5;
        if answer[0] != STX || answer[etx] != ETX {
            return Err(AnswerError::InvalidFrame("no STX/ETX".to_string()));
        }

        let expected = sum16(&answer[1..=etx]);
        let actual = parse_hex(&answer[etx + 1..])?;
        if expected != actual {
            return Err(AnswerError::Checksum { expected, actual });
        }

        let id = self.id.current();
        if answer[1] != id {
            return Err(AnswerError::InvalidFrame(format!(
                "packet id {:02X}, need {:02X}",
                answer[1], id
            )));
        }

        let echoed = parse_hex(&answer[2..4])?;
        if echoed != u16::from(command.code()) {
            return Err(AnswerError::CommandMismatch {
                expected: format!("{:02X}", command.code()),
                actual: format!("{:02X}", echoed),
            });
        }

        if answer[4] != FS || answer[7] != FS {
            return Err(AnswerError::InvalidFrame("missing field separator".to_string()));
        }
        let error = parse_hex(&answer[5..7])? as ErrorCode;

        Ok(Envelope {
            error,
            payload: answer[8..etx].to_vec(),
        })
    }

    fn timeout(&self, command: PrimCommand) -> Duration {
        match command {
            PrimCommand::XReport | PrimCommand::ZReport => Duration::from_secs(30),
            PrimCommand::GetKkmInfo => Duration::from_millis(500),
            _ => Duration::from_secs(3),
        }
    }

    fn error_description(&self, code: ErrorCode) -> String {
        ERROR_DESCRIPTIONS
            .get(&code)
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("Unknown error 0x{:02X}", code))
    }

    fn is_unprocessable(&self, command: PrimCommand, code: ErrorCode) -> bool {
        matches!(
            (command, code),
            (PrimCommand::CancelDocument, errors::INVALID_STATE)
                | (PrimCommand::OpenSession, errors::NEED_BEGIN_SESSION)
                | (PrimCommand::ZReport, errors::NEED_Z_REPORT)
        )
    }

    fn process_answer(
        &self,
        engine: &mut CommandEngine<Self>,
        _command: PrimCommand,
        code: ErrorCode,
    ) -> bool {
        match code {
            errors::INVALID_STATE => Self::run(engine, PrimCommand::CancelDocument),
            errors::NEED_BEGIN_SESSION => Self::run(engine, PrimCommand::OpenSession),
            errors::NEED_Z_REPORT => Self::run(engine, PrimCommand::ZReport),
            _ => false,
        }
    }
}

impl FiscalProtocol for PrimProtocol {
    const SERIES: &'static str = "Prim";
    const MODELS: &'static [&'static str] = &["PRIM-08TK", "PRIM-21K", "PRIM-88TK"];
    const PRIORITY: DetectPriority = DetectPriority::Low;

    fn identify(engine: &mut CommandEngine<Self>) -> Result<String, CommandError> {
        let fields = Self::fields(engine, PrimCommand::GetKkmInfo, KKM_INFO)?;
        Ok(fields[0].as_text().unwrap_or_default().to_string())
    }

    fn read_state(engine: &mut CommandEngine<Self>) -> Result<FrState, CommandError> {
        let fields = Self::fields(engine, PrimCommand::GetStatus, STATUS)?;
        let session = fields[0].as_int().unwrap_or_default();
        Ok(FrState {
            session_opened: session != 0,
            session_expired: session == 2,
            document_opened: fields[1].as_int() == Some(1),
            paper_end: fields[2].as_int() == Some(1),
            printing: false,
        })
    }

    fn x_report(engine: &mut CommandEngine<Self>) -> Result<(), CommandError> {
        engine.process_command(PrimCommand::XReport, &[]).map(drop)
    }

    fn z_report(engine: &mut CommandEngine<Self>) -> Result<(), CommandError> {
        engine.process_command(PrimCommand::ZReport, &[]).map(drop)
    }

    fn cancel_document(engine: &mut CommandEngine<Self>) -> Result<(), CommandError> {
        engine.process_command(PrimCommand::CancelDocument, &[]).map(drop)
    }
}

/// Answer frame echoing the id and command of `request`
pub fn answer_frame(request: &[u8], error: ErrorCode, fields: &[&str]) -> Vec<u8> {
    let mut frame = vec![STX, request[5], request[6], request[7], FS];
    frame.extend_from_slice(&hex_byte(error));
    for field in fields {
        frame.push(FS);
        frame.extend_from_slice(field.as_bytes());
    }
    frame.push(FS);
    frame.push(ETX);
    let crc = sum16(&frame[1..]);
    frame.extend_from_slice(format!("{:04X}", crc).as_bytes());
    frame
}

/// Command code of an encoded request
pub fn request_command(request: &[u8]) -> Option<u8> {
    request
        .get(6..8)
        .and_then(|digits| parse_hex(digits).ok())
        .map(|code| code as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use kiosk_core::Port;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use crate::transport::MockPort;

    /// Port answering each command code from a script, in order
    fn scripted(script: Vec<(u8, ErrorCode, Vec<&'static str>)>) -> Arc<MockPort> {
        let script = Mutex::new(script.into_iter().collect::<std::collections::VecDeque<_>>());
        let port = MockPort::new("COM2").with_responder(move |request| {
            let code = request_command(request)?;
            let mut script = script.lock();
            let (expected, error, fields) = script.pop_front()?;
            assert_eq!(code, expected, "unexpected command");
            Some(answer_frame(request, error, &fields))
        });
        let port = Arc::new(port);
        port.open().unwrap();
        port
    }

    fn engine(port: &Arc<MockPort>) -> CommandEngine<PrimProtocol> {
        CommandEngine::new(PrimProtocol::default(), Arc::clone(port) as Arc<dyn Port>, "FR 0")
    }

    #[test]
    fn test_encode_frame() {
        let protocol = PrimProtocol::default();
        let frame = protocol.encode(PrimCommand::GetStatus, &[]).unwrap();
        assert_eq!(&frame[..8], b"\x02AERF\x2011");
        assert_eq!(&frame[8..10], &[FS, ETX]);
        let crc = sum16(&frame[1..10]);
        assert_eq!(&frame[10..], format!("{:04X}", crc).as_bytes());
    }

    #[test]
    fn test_unpack_checks_id_and_command() {
        let protocol = PrimProtocol::default();
        let request = protocol.encode(PrimCommand::GetStatus, &[]).unwrap();
        let answer = answer_frame(&request, 0, &["1", "0", "0"]);

        let envelope = protocol.unpack(PrimCommand::GetStatus, &answer).unwrap();
        assert_eq!(split_fields(&envelope.payload, FS), vec!["1", "0", "0"]);

        assert!(matches!(
            protocol.unpack(PrimCommand::XReport, &answer),
            Err(AnswerError::CommandMismatch { .. })
        ));

        protocol.encode(PrimCommand::GetStatus, &[]).unwrap();
        assert!(matches!(
            protocol.unpack(PrimCommand::GetStatus, &answer),
            Err(AnswerError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_need_begin_session_opens_session() {
        let port = scripted(vec![
            (0x30, errors::NEED_BEGIN_SESSION, vec![]),
            (0x2B, 0, vec![]),
            (0x30, 0, vec![]),
        ]);
        let mut engine = engine(&port);

        assert_eq!(PrimProtocol::x_report(&mut engine), Ok(()));
        assert_eq!(port.sent().len(), 3);
    }

    #[test]
    fn test_invalid_state_cancels_document() {
        let port = scripted(vec![
            (0x31, errors::INVALID_STATE, vec![]),
            (0x17, 0, vec![]),
            (0x31, 0, vec![]),
        ]);
        let mut engine = engine(&port);

        assert_eq!(PrimProtocol::z_report(&mut engine), Ok(()));
    }

    #[test]
    fn test_unprocessable_cancel() {
        let port = scripted(vec![(0x17, errors::INVALID_STATE, vec![])]);
        let mut engine = engine(&port);

        let result = PrimProtocol::cancel_document(&mut engine);
        assert_eq!(result.err().and_then(|e| e.device_code()), Some(errors::INVALID_STATE));
        assert_eq!(port.sent().len(), 1);
    }

    #[test]
    fn test_identify_and_state() {
        let port = scripted(vec![
            (0x14, 0, vec!["PRIM-21K", "0012345", "v1.2"]),
            (0x11, 0, vec!["2", "1", "0"]),
        ]);
        let mut engine = engine(&port);

        assert_eq!(PrimProtocol::identify(&mut engine), Ok("PRIM-21K".to_string()));
        let state = PrimProtocol::read_state(&mut engine).unwrap();
        assert_eq!(
            state,
            FrState {
                session_opened: true,
                session_expired: true,
                document_opened: true,
                paper_end: false,
                printing: false,
            }
        );
    }

    #[test]
    fn test_empty_model_is_answer_failure() {
        let port = scripted(vec![(0x14, 0, vec!["", "0012345", "v1.2"])]);
        let mut engine = engine(&port);

        assert_eq!(
            PrimProtocol::identify(&mut engine),
            Err(CommandError::Answer(AnswerError::EmptyField(0)))
        );
    }
}
