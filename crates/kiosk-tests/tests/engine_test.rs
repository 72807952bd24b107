//! Bounded error compensation of the command engine
//!
//! The scripted printers below answer per command code, so the tests see
//! exactly which commands the engine issued while compensating.

use std::collections::HashMap;
use std::sync::Arc;

use kiosk_core::Port;
use kiosk_hw::drivers::shtrih::{answer_frame, errors, ShtrihCommand, ShtrihProtocol};
use kiosk_hw::{CommandEngine, ErrorCode, MockPort};
use pretty_assertions::assert_eq;
use rstest::rstest;

const COMMANDS: [ShtrihCommand; 7] = [
    ShtrihCommand::GetShortStatus,
    ShtrihCommand::GetLongStatus,
    ShtrihCommand::XReport,
    ShtrihCommand::ZReport,
    ShtrihCommand::CancelDocument,
    ShtrihCommand::ContinuePrinting,
    ShtrihCommand::GetDeviceType,
];

/// Printer answering every command with a fixed error code (0 when absent)
fn scripted_printer(errors: &[(ShtrihCommand, ErrorCode)]) -> Arc<MockPort> {
    let script: HashMap<u8, ErrorCode> = errors
        .iter()
        .map(|(command, code)| (command.code(), *code))
        .collect();
    let port = MockPort::new("COM3").with_responder(move |request| {
        let command = COMMANDS.into_iter().find(|c| c.code() == request[2])?;
        let code = script.get(&command.code()).copied().unwrap_or(0);
        answer_frame(command, code, &[]).ok()
    });
    port.open().unwrap();
    Arc::new(port)
}

fn engine(port: &Arc<MockPort>) -> CommandEngine<ShtrihProtocol> {
    CommandEngine::new(
        ShtrihProtocol::default(),
        Arc::clone(port) as Arc<dyn Port>,
        "FiscalRegistrator on COM3",
    )
}

fn sent_codes(port: &MockPort) -> Vec<u8> {
    port.sent().iter().map(|request| request[2]).collect()
}

#[rstest]
#[case::open_document(errors::DOCUMENT_IS_OPENED, ShtrihCommand::CancelDocument)]
#[case::expired_session(errors::NEED_Z_REPORT, ShtrihCommand::ZReport)]
#[case::interrupted_printing(errors::NEED_EXTENTION_PRINTING, ShtrihCommand::ContinuePrinting)]
fn test_repeated_error_is_compensated_once(#[case] code: ErrorCode, #[case] compensation: ShtrihCommand) {
    let port = scripted_printer(&[(ShtrihCommand::XReport, code)]);
    let mut engine = engine(&port);

    let err = engine.process_command(ShtrihCommand::XReport, &[]).unwrap_err();

    assert_eq!(err.device_code(), Some(code));
    assert_eq!(sent_codes(&port), vec![0x40, compensation.code(), 0x40]);
    assert!(engine.processing_errors().is_empty());
}

#[test]
fn test_failed_compensation_fails_command() {
    let port = scripted_printer(&[
        (ShtrihCommand::XReport, errors::DOCUMENT_IS_OPENED),
        (ShtrihCommand::CancelDocument, errors::DOCUMENT_IS_OPENED),
    ]);
    let mut engine = engine(&port);

    let err = engine.process_command(ShtrihCommand::XReport, &[]).unwrap_err();

    assert_eq!(err.device_code(), Some(errors::DOCUMENT_IS_OPENED));
    // Cancel answering the same code is never compensated again
    assert_eq!(sent_codes(&port), vec![0x40, 0x88]);
    assert!(engine.processing_errors().is_empty());
}

#[test]
fn test_nested_compensation_recovers() {
    let port = Arc::new(MockPort::new("COM3"));
    port.open().unwrap();
    for (command, code) in [
        (ShtrihCommand::XReport, errors::DOCUMENT_IS_OPENED),
        (ShtrihCommand::CancelDocument, errors::NEED_Z_REPORT),
        (ShtrihCommand::ZReport, 0),
        (ShtrihCommand::CancelDocument, 0),
        (ShtrihCommand::XReport, 0),
    ] {
        port.push_answer(Ok(answer_frame(command, code, &[]).unwrap()));
    }
    let mut engine = engine(&port);

    assert_eq!(engine.process_command(ShtrihCommand::XReport, &[]), Ok(Vec::new()));
    assert_eq!(sent_codes(&port), vec![0x40, 0x88, 0x41, 0x88, 0x40]);
    assert_eq!(engine.last_error(), 0);
    assert!(engine.processing_errors().is_empty());
}

#[test]
fn test_unknown_error_is_not_compensated() {
    let port = scripted_printer(&[(ShtrihCommand::XReport, 0x33)]);
    let mut engine = engine(&port);

    let err = engine.process_command(ShtrihCommand::XReport, &[]).unwrap_err();

    assert_eq!(err.device_code(), Some(0x33));
    assert_eq!(sent_codes(&port), vec![0x40]);
    assert_eq!(engine.last_error(), 0x33);
}
