//! Status debounce of a polled bill acceptor

use std::sync::Arc;

use kiosk_core::{Config, Device, StatusCode, TransportError, WarningLevel};
use kiosk_hw::drivers::ccnet::{self, VALIDATOR_STATUS_GROUP};
use kiosk_hw::drivers::status_codes::{ccnet as codes, device as common};
use kiosk_hw::{CcnetValidator, ComPortDevice, MockPort, PortRegistry};
use kiosk_tests::{config, CCNET_COM, COM_PORT_PATH};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_test::{assert_pending, assert_ready, task};

/// Validator on COM1 answering polls with `states` in order
fn validator(states: &[StatusCode]) -> CcnetValidator {
    let port = Arc::new(MockPort::new("COM1"));
    for &state in states {
        port.push_answer(Ok(ccnet::frame(&[state as u8]).unwrap()));
    }
    let registry = PortRegistry::new();
    registry.insert(port);
    let resource = ComPortDevice::new(
        COM_PORT_PATH,
        config(json!({ "system_name": "COM1" })),
        Arc::new(registry),
    );

    let device = CcnetValidator::new(CCNET_COM, Config::new());
    device.attach_required_device(Arc::new(resource));
    device.set_log_name("BillAcceptor on COM1");
    device
}

#[test]
fn test_only_changes_are_reported() {
    let device = validator(&[codes::IDLING, codes::IDLING, codes::ACCEPTING, codes::IDLING]);
    let mut receiver = device.subscribe_status();

    let first = device.poll().unwrap();
    assert_eq!(first.codes, vec![codes::IDLING]);
    assert!(first.previous.is_empty());
    assert_eq!(first.group, VALIDATOR_STATUS_GROUP);

    assert!(device.poll().is_none());

    let accepting = device.poll().unwrap();
    assert_eq!(accepting.codes, vec![codes::ACCEPTING]);
    assert_eq!(accepting.previous, vec![codes::IDLING]);

    let back = device.poll().unwrap();
    assert_eq!(back.codes, vec![codes::IDLING]);
    assert_eq!(back.previous, vec![codes::ACCEPTING]);

    let received: Vec<Vec<StatusCode>> = (0..3)
        .map(|_| receiver.try_recv().unwrap().codes)
        .collect();
    assert_eq!(
        received,
        vec![vec![codes::IDLING], vec![codes::ACCEPTING], vec![codes::IDLING]]
    );
}

#[test]
fn test_subscriber_waits_for_next_change() {
    let device = validator(&[codes::IDLING, codes::IDLING]);
    let mut receiver = device.subscribe_status();
    device.poll();

    {
        let mut next = task::spawn(receiver.recv());
        let event = assert_ready!(next.poll()).unwrap();
        assert_eq!(event.device, "BillAcceptor on COM1");
        assert_eq!(event.level, WarningLevel::Ok);
    }

    device.poll();
    let mut next = task::spawn(receiver.recv());
    assert_pending!(next.poll());
}

#[test]
fn test_lost_validator_is_an_error_until_it_answers() {
    let port = Arc::new(MockPort::new("COM1"));
    port.push_answer(Ok(ccnet::frame(&[codes::IDLING as u8]).unwrap()));
    port.push_answer(Err(TransportError::Timeout("200ms".to_string())));
    port.push_answer(Err(TransportError::Timeout("200ms".to_string())));
    port.push_answer(Ok(ccnet::frame(&[codes::IDLING as u8]).unwrap()));
    let registry = PortRegistry::new();
    registry.insert(port);
    let device = CcnetValidator::new(CCNET_COM, Config::new());
    device.attach_required_device(Arc::new(ComPortDevice::new(
        COM_PORT_PATH,
        config(json!({ "system_name": "COM1" })),
        Arc::new(registry),
    )));

    assert_eq!(device.poll().unwrap().level, WarningLevel::Ok);

    let lost = device.poll().unwrap();
    assert_eq!(lost.codes, vec![common::NOT_AVAILABLE]);
    assert_eq!(lost.level, WarningLevel::Error);
    assert!(device.poll().is_none());

    let back = device.poll().unwrap();
    assert_eq!(back.codes, vec![codes::IDLING]);
    assert_eq!(back.previous, vec![common::NOT_AVAILABLE]);
}
