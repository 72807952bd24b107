//! Detection over scripted ports

use std::sync::Arc;

use kiosk_core::{keys, DeviceState};
use kiosk_devmgr::DeviceHandle;
use kiosk_hw::MockPort;
use kiosk_tests::{ccnet_port, shtrih_port, LoaderEvent, Rig, CCNET_COM, SHTRIH_COM, SHTRIH_MODEL};
use pretty_assertions::assert_eq;
use serde_json::Value;
use serial_test::serial;

fn detected_names(rig: &Rig, found: &[DeviceHandle]) -> Vec<String> {
    let mut names: Vec<String> = found
        .iter()
        .filter_map(|device| rig.manager.device_log_name(device))
        .collect();
    names.sort();
    names
}

#[test]
#[serial]
fn test_devices_found_on_their_ports() {
    let rig = Rig::new(vec![ccnet_port("COM1"), shtrih_port("COM3")]);

    let found = rig.manager.detect("COM");

    assert_eq!(
        detected_names(&rig, &found),
        vec!["BillAcceptor on COM1", "FiscalRegistrator on COM3"]
    );
    for device in &found {
        assert_eq!(rig.manager.device_state(device), DeviceState::Ready);
    }
    assert!(rig.free_ports().is_empty());
    assert_eq!(rig.manager.acquired_devices().len(), 4);
    assert!(rig.manager.is_detected(SHTRIH_COM));
    assert!(rig.manager.is_detected(CCNET_COM));
}

#[test]
#[serial]
fn test_identified_model_is_persisted() {
    let rig = Rig::new(vec![shtrih_port("COM3")]);

    let found = rig.manager.detect("FiscalRegistrator.COM");

    assert_eq!(found.len(), 1);
    let saved = rig.loader.store().load(SHTRIH_COM);
    assert_eq!(saved.get(keys::MODEL_NAME), Some(&Value::from(SHTRIH_MODEL)));
    assert!(!saved.contains_key(keys::SEARCHING_TYPE));
}

#[test]
#[serial]
fn test_silent_ports_leave_nothing_behind() {
    let rig = Rig::new(vec![Arc::new(MockPort::new("COM1")), Arc::new(MockPort::new("COM2"))]);

    let found = rig.manager.detect("COM");

    assert!(found.is_empty());
    assert!(rig.manager.acquired_devices().is_empty());
    assert_eq!(rig.free_ports(), vec!["COM1", "COM2"]);

    let events = rig.loader.events();
    let created = events.iter().filter(|e| matches!(e, LoaderEvent::Created(_))).count();
    let destroyed = events.iter().filter(|e| matches!(e, LoaderEvent::Destroyed(_))).count();
    assert!(created > 0);
    assert_eq!(created, destroyed);
}

#[test]
#[serial]
fn test_redetection_skips_taken_ports() {
    let rig = Rig::new(vec![shtrih_port("COM3")]);
    assert_eq!(rig.manager.detect("COM").len(), 1);
    rig.loader.clear_events();

    assert!(rig.manager.detect("COM").is_empty());
    assert!(rig.loader.events().is_empty());

    rig.manager.release_all();
    let found = rig.manager.detect("COM");
    assert_eq!(detected_names(&rig, &found), vec!["FiscalRegistrator on COM3"]);
}
