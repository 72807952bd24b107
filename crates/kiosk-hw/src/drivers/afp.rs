//! AFP fiscal registrators
//!
//! Text frame: `STX ID CMD(2 hex) (FS FIELD)* ETX CRC(2 hex)`, CRC is the
//! XOR of everything between STX and the CRC.
//! Answer: `STX ID CMD(2 hex) ERR(2 hex) (FS FIELD)* ETX CRC(2 hex)`.
//! Answer fields are decoded against a typed shape per command.

use std::collections::HashMap;
use std::time::Duration;

use kiosk_core::DetectPriority;
use once_cell::sync::Lazy;

use super::fiscal::{FiscalProtocol, FiscalRegistrator, FrState};
use crate::error::{AnswerError, CommandError, ErrorCode};
use crate::protocol::frame::{
    ascii::{ETX, FS, STX},
    hex_byte, lrc, parse_hex, PacketId,
};
use crate::protocol::{
    decode_answer, split_fields, CommandEngine, Envelope, FieldKind, FieldValue, Protocol,
};

pub type AfpFr = FiscalRegistrator<AfpProtocol>;

/// STX ID CMD(2) ERR(2) ETX CRC(2)
const MIN_ANSWER_SIZE: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfpCommand {
    GetStatus,
    GetFrData,
    GetDateTime,
    XReport,
    ZReport,
    OpenSession,
    CancelDocument,
}

impl AfpCommand {
    pub fn code(self) -> u8 {
        match self {
            AfpCommand::GetStatus => 0x01,
            AfpCommand::GetFrData => 0x02,
            AfpCommand::GetDateTime => 0x13,
            AfpCommand::XReport => 0x20,
            AfpCommand::ZReport => 0x21,
            AfpCommand::OpenSession => 0x23,
            AfpCommand::CancelDocument => 0x32,
        }
    }

    /// Typed shape of the answer fields
    pub fn shape(self) -> &'static [FieldKind] {
        match self {
            AfpCommand::GetStatus => &[FieldKind::FInt, FieldKind::FInt, FieldKind::FInt],
            AfpCommand::GetFrData => &[FieldKind::FString, FieldKind::FString, FieldKind::Date],
            AfpCommand::GetDateTime => &[FieldKind::Date, FieldKind::Time],
            _ => &[],
        }
    }
}

pub mod errors {
    use crate::error::ErrorCode;

    pub const UNKNOWN_COMMAND: ErrorCode = 0x01;
    pub const WRONG_STATE: ErrorCode = 0x05;
    pub const PAPER_END: ErrorCode = 0x08;
    pub const NEED_Z_REPORT: ErrorCode = 0x16;
}

static ERROR_DESCRIPTIONS: Lazy<HashMap<ErrorCode, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (errors::UNKNOWN_COMMAND, "Unknown command"),
        (errors::WRONG_STATE, "Wrong FR state for the command"),
        (errors::PAPER_END, "Paper end"),
        (errors::NEED_Z_REPORT, "Fiscal session exceeded 24 hours"),
    ])
});

#[derive(Debug, Default)]
pub struct AfpProtocol {
    id: PacketId,
}

impl AfpProtocol {
    /// Run `command` and decode its answer shape
    pub fn request(
        engine: &mut CommandEngine<Self>,
        command: AfpCommand,
        fields: &[&str],
    ) -> Result<Vec<FieldValue>, CommandError> {
        let mut data = Vec::new();
        for field in fields {
            data.push(FS);
            data.extend_from_slice(field.as_bytes());
        }
        let payload = engine.process_command(command, &data)?;
        Ok(decode_answer(&split_fields(&payload, FS), command.shape())?)
    }

    fn run(engine: &mut CommandEngine<Self>, command: AfpCommand) -> bool {
        engine.process_command(command, &[]).is_ok()
    }

    fn document_opened(engine: &mut CommandEngine<Self>) -> bool {
        matches!(Self::read_state(engine), Ok(state) if state.document_opened)
    }

    /// Device clock
    pub fn date_time(engine: &mut CommandEngine<Self>) -> Result<chrono::NaiveDateTime, CommandError> {
        let fields = Self::request(engine, AfpCommand::GetDateTime, &[])?;
        match (fields[0].as_date(), fields[1].as_time()) {
            (Some(date), Some(time)) => Ok(date.and_time(time)),
            _ => Err(AnswerError::InvalidField {
                index: 0,
                value: format!("{:?}", fields),
            }
            .into()),
        }
    }
}

impl Protocol for AfpProtocol {
    type Command = AfpCommand;

    fn encode(&self, command: AfpCommand, data: &[u8]) -> Result<Vec<u8>, CommandError> {
        let mut frame = vec![STX, self.id.next()];
        frame.extend_from_slice(&hex_byte(command.code()));
        frame.extend_from_slice(data);
        frame.push(ETX);
        let crc = lrc(&frame[1..]);
        frame.extend_from_slice(&hex_byte(crc));
        Ok(frame)
    }

    fn unpack(&self, command: AfpCommand, answer: &[u8]) -> Result<Envelope, AnswerError> {
        if answer.len() < MIN_ANSWER_SIZE {
            return Err(AnswerError::TooShort {
                expected: MIN_ANSWER_SIZE,
                actual: answer.len(),
            });
        }

        let etx = answer.len() - 3;
        if answer[0] != STX || answer[etx] != ETX {
            return Err(AnswerError::InvalidFrame("no STX/ETX".to_string()));
        }

        let expected = u16::from(lrc(&answer[1..=etx]));
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

        let error = parse_hex(&answer[4..6])? as ErrorCode;
        let fields = &answer[6..etx];
        let payload = fields.strip_prefix(&[FS]).unwrap_or(fields);

        Ok(Envelope {
            error,
            payload: payload.to_vec(),
        })
    }

    fn timeout(&self, command: AfpCommand) -> Duration {
        match command {
            AfpCommand::XReport | AfpCommand::ZReport => Duration::from_secs(30),
            AfpCommand::GetFrData => Duration::from_millis(500),
            _ => Duration::from_secs(5),
        }
    }

    fn error_description(&self, code: ErrorCode) -> String {
        ERROR_DESCRIPTIONS
            .get(&code)
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("Unknown error 0x{:02X}", code))
    }

    fn is_unprocessable(&self, command: AfpCommand, code: ErrorCode) -> bool {
        code == errors::NEED_Z_REPORT
            && matches!(command, AfpCommand::ZReport | AfpCommand::OpenSession)
    }

    fn process_answer(
        &self,
        engine: &mut CommandEngine<Self>,
        command: AfpCommand,
        code: ErrorCode,
    ) -> bool {
        match code {
            errors::NEED_Z_REPORT => {
                Self::run(engine, AfpCommand::ZReport) && Self::run(engine, AfpCommand::OpenSession)
            }
            errors::WRONG_STATE => {
                command != AfpCommand::CancelDocument
                    && Self::document_opened(engine)
                    && Self::run(engine, AfpCommand::CancelDocument)
            }
            _ => false,
        }
    }
}

impl FiscalProtocol for AfpProtocol {
    const SERIES: &'static str = "AFP";
    const MODELS: &'static [&'static str] = &["MStar-TK2", "MStar-TK", "Iskra-PTK"];
    const PRIORITY: DetectPriority = DetectPriority::Normal;

    fn identify(engine: &mut CommandEngine<Self>) -> Result<String, CommandError> {
        let fields = Self::request(engine, AfpCommand::GetFrData, &[])?;
        Ok(fields[0].as_text().unwrap_or_default().to_string())
    }

    fn read_state(engine: &mut CommandEngine<Self>) -> Result<FrState, CommandError> {
        let fields = Self::request(engine, AfpCommand::GetStatus, &[])?;
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
        engine.process_command(AfpCommand::XReport, &[]).map(drop)
    }

    fn z_report(engine: &mut CommandEngine<Self>) -> Result<(), CommandError> {
        engine.process_command(AfpCommand::ZReport, &[]).map(drop)
    }

    fn cancel_document(engine: &mut CommandEngine<Self>) -> Result<(), CommandError> {
        engine.process_command(AfpCommand::CancelDocument, &[]).map(drop)
    }
}

/// Answer frame echoing the id and command of `request`
pub fn answer_frame(request: &[u8], error: ErrorCode, fields: &[&str]) -> Vec<u8> {
    let mut frame = vec![STX, request[1], request[2], request[3]];
    frame.extend_from_slice(&hex_byte(error));
    for field in fields {
        frame.push(FS);
        frame.extend_from_slice(field.as_bytes());
    }
    frame.push(ETX);
    let crc = lrc(&frame[1..]);
    frame.extend_from_slice(&hex_byte(crc));
    frame
}

/// Command code of an encoded request
pub fn request_command(request: &[u8]) -> Option<u8> {
    request
        .get(2..4)
        .and_then(|digits| parse_hex(digits).ok())
        .map(|code| code as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;

    use chrono::{NaiveDate, NaiveTime};
    use kiosk_core::Port;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use crate::transport::MockPort;

    fn scripted(script: Vec<(u8, ErrorCode, Vec<&'static str>)>) -> Arc<MockPort> {
        let script = Mutex::new(script.into_iter().collect::<VecDeque<_>>());
        let port = MockPort::new("COM3").with_responder(move |request| {
            let code = request_command(request)?;
            let (expected, error, fields) = script.lock().pop_front()?;
            assert_eq!(code, expected, "unexpected command");
            Some(answer_frame(request, error, &fields))
        });
        let port = Arc::new(port);
        port.open().unwrap();
        port
    }

    fn engine(port: &Arc<MockPort>) -> CommandEngine<AfpProtocol> {
        CommandEngine::new(AfpProtocol::default(), Arc::clone(port) as Arc<dyn Port>, "FR 0")
    }

    #[test]
    fn test_frame_layout() {
        let protocol = AfpProtocol::default();
        let request = protocol.encode(AfpCommand::GetFrData, &[]).unwrap();
        assert_eq!(&request[..4], b"\x02\x2002");
        assert_eq!(request[4], ETX);

        let answer = answer_frame(&request, 0, &["MStar-TK2", "00001"]);
        let envelope = protocol.unpack(AfpCommand::GetFrData, &answer).unwrap();
        assert_eq!(envelope.error, 0);
        assert_eq!(split_fields(&envelope.payload, FS), vec!["MStar-TK2", "00001"]);

        let mut corrupted = answer.clone();
        corrupted[5] = b'9';
        assert!(matches!(
            protocol.unpack(AfpCommand::GetFrData, &corrupted),
            Err(AnswerError::Checksum { .. })
        ));
    }

    #[test]
    fn test_identify_decodes_typed_shape() {
        let port = scripted(vec![(0x02, 0, vec!["MStar-TK2", "00001", "150324"])]);
        let mut engine = engine(&port);
        assert_eq!(AfpProtocol::identify(&mut engine), Ok("MStar-TK2".to_string()));
    }

    #[test]
    fn test_missing_fields_is_answer_failure() {
        let port = scripted(vec![(0x02, 0, vec!["MStar-TK2"])]);
        let mut engine = engine(&port);
        assert_eq!(
            AfpProtocol::identify(&mut engine),
            Err(CommandError::Answer(AnswerError::MissingFields {
                expected: 3,
                actual: 1
            }))
        );
    }

    #[test]
    fn test_date_time() {
        let port = scripted(vec![(0x13, 0, vec!["010124", "235959"])]);
        let mut engine = engine(&port);
        let expected = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap());
        assert_eq!(AfpProtocol::date_time(&mut engine), Ok(expected));
    }

    #[test]
    fn test_need_z_report_reopens_session() {
        let port = scripted(vec![
            (0x20, errors::NEED_Z_REPORT, vec![]),
            (0x21, 0, vec![]),
            (0x23, 0, vec![]),
            (0x20, 0, vec![]),
        ]);
        let mut engine = engine(&port);

        assert_eq!(AfpProtocol::x_report(&mut engine), Ok(()));
        assert_eq!(port.sent().len(), 4);
    }

    #[test]
    fn test_wrong_state_cancels_open_document() {
        let port = scripted(vec![
            (0x20, errors::WRONG_STATE, vec![]),
            (0x01, 0, vec!["1", "1", "0"]),
            (0x32, 0, vec![]),
            (0x20, 0, vec![]),
        ]);
        let mut engine = engine(&port);

        assert_eq!(AfpProtocol::x_report(&mut engine), Ok(()));
    }

    #[test]
    fn test_wrong_state_without_document_fails() {
        let port = scripted(vec![
            (0x20, errors::WRONG_STATE, vec![]),
            (0x01, 0, vec!["1", "0", "0"]),
        ]);
        let mut engine = engine(&port);

        let result = AfpProtocol::x_report(&mut engine);
        assert_eq!(result.err().and_then(|e| e.device_code()), Some(errors::WRONG_STATE));
    }

    #[test]
    fn test_wrong_state_on_cancel_is_not_compensated() {
        let port = scripted(vec![(0x32, errors::WRONG_STATE, vec![])]);
        let mut engine = engine(&port);

        assert!(AfpProtocol::cancel_document(&mut engine).is_err());
        assert_eq!(port.sent().len(), 1);
    }
}
