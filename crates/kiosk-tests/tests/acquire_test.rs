//! Acquisition tests over the static driver set
//!
//! Run with: cargo test -p kiosk-tests --test acquire_test

use kiosk_core::{keys, DeviceError, DeviceState, Port};
use kiosk_tests::{
    shtrih_port, LoaderEvent, Rig, CCNET_COM, COM_PORT_PATH, PRIM_COM, SHTRIH_COM,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn rig() -> Rig {
    Rig::new(vec![shtrih_port("COM1"), shtrih_port("COM3")])
}

// =============================================================================
// Dependency wiring
// =============================================================================

#[test]
fn test_resource_acquired_with_dependent() {
    let rig = rig();
    rig.store("fr0", json!({ "system_name": "COM3" }));

    let fr = rig.manager.acquire_device(SHTRIH_COM, "fr0").unwrap();

    assert_eq!(
        rig.loader.events(),
        vec![
            LoaderEvent::Created(SHTRIH_COM.to_string()),
            LoaderEvent::Created(COM_PORT_PATH.to_string()),
        ]
    );

    let devices = rig.manager.acquired_devices();
    assert_eq!(devices.len(), 2);
    let port = devices
        .iter()
        .find(|d| d.driver_path() == COM_PORT_PATH)
        .unwrap();
    assert_eq!(
        fr.device().configuration().get(keys::REQUIRED_DEVICE),
        Some(&Value::from(port.id().to_string()))
    );
    assert_eq!(rig.manager.device_state(&fr), DeviceState::Acquired);
    assert_eq!(
        rig.manager.device_log_name(&fr).as_deref(),
        Some("FiscalRegistrator on COM3")
    );
    assert_eq!(rig.free_ports(), vec!["COM1"]);
}

#[test]
fn test_release_frees_dependent_before_resource() {
    let rig = rig();
    rig.store("fr0", json!({ "system_name": "COM3" }));
    let fr = rig.manager.acquire_device(SHTRIH_COM, "fr0").unwrap();

    let resource = rig
        .manager
        .acquired_devices()
        .into_iter()
        .find(|d| d.driver_path() == COM_PORT_PATH)
        .unwrap();
    let com3 = resource.device().port().unwrap();
    com3.open().unwrap();

    rig.loader.clear_events();
    assert!(rig.manager.release_device(&fr));

    assert_eq!(
        rig.loader.events(),
        vec![
            LoaderEvent::Destroyed(SHTRIH_COM.to_string()),
            LoaderEvent::Destroyed(COM_PORT_PATH.to_string()),
        ]
    );
    assert!(rig.manager.acquired_devices().is_empty());
    assert!(!com3.is_open());
    assert_eq!(rig.manager.device_state(&fr), DeviceState::Released);
    assert!(!rig.manager.release_device(&fr));
}

// =============================================================================
// System names
// =============================================================================

#[test]
fn test_second_printer_on_com3_is_rejected() {
    let rig = rig();
    rig.store("fr0", json!({ "system_name": "COM3" }));
    rig.store("fr1", json!({ "system_name": "COM3" }));

    rig.manager.acquire_device(SHTRIH_COM, "fr0").unwrap();
    assert!(!rig.free_ports().contains(&"COM3".to_string()));

    rig.loader.clear_events();
    let err = rig.manager.acquire_device(PRIM_COM, "fr1").unwrap_err();

    assert_eq!(
        err.root_cause(),
        &DeviceError::ResourceUnavailable("COM3".to_string())
    );
    assert!(err.to_string().contains("COM3"));

    // Nothing created for the failed request stays alive
    let events = rig.loader.events();
    let created = events
        .iter()
        .filter(|e| matches!(e, LoaderEvent::Created(_)))
        .count();
    let destroyed = events
        .iter()
        .filter(|e| matches!(e, LoaderEvent::Destroyed(_)))
        .count();
    assert_eq!(created, destroyed);
    assert_eq!(rig.manager.acquired_devices().len(), 2);
}

#[test]
fn test_released_system_name_is_reusable() {
    let rig = rig();
    rig.store("fr0", json!({ "system_name": "COM3" }));
    rig.store("bill0", json!({ "system_name": "COM3" }));

    let fr = rig.manager.acquire_device(SHTRIH_COM, "fr0").unwrap();
    assert!(rig.manager.acquire_device(CCNET_COM, "bill0").is_err());

    rig.manager.release_device(&fr);
    assert_eq!(rig.free_ports(), vec!["COM1", "COM3"]);

    let bill = rig.manager.acquire_device(CCNET_COM, "bill0").unwrap();
    assert_eq!(
        rig.manager.device_log_name(&bill).as_deref(),
        Some("BillAcceptor on COM3")
    );
    assert_eq!(rig.free_ports(), vec!["COM1"]);
}

#[test]
fn test_unknown_system_name_is_registered() {
    let rig = rig();
    rig.store("fr0", json!({ "system_name": "COM9" }));

    let fr = rig.manager.acquire_device(SHTRIH_COM, "fr0").unwrap();

    assert_eq!(
        rig.manager.device_log_name(&fr).as_deref(),
        Some("FiscalRegistrator on COM9")
    );
    assert_eq!(rig.free_ports(), vec!["COM1", "COM3"]);
}

#[test]
fn test_release_all_keeps_nothing() {
    let rig = rig();
    rig.store("fr0", json!({ "system_name": "COM1" }));
    rig.store("bill0", json!({ "system_name": "COM3" }));
    rig.manager.acquire_device(SHTRIH_COM, "fr0").unwrap();
    rig.manager.acquire_device(CCNET_COM, "bill0").unwrap();

    assert_eq!(rig.manager.release_all(), 2);
    assert!(rig.manager.acquired_devices().is_empty());
    assert_eq!(rig.free_ports(), vec!["COM1", "COM3"]);
}

#[test]
fn test_unknown_driver() {
    let rig = rig();
    assert_eq!(
        rig.manager
            .acquire_device("Common.Driver.CardReader.USB.Generic", "")
            .unwrap_err(),
        DeviceError::PluginNotFound("Common.Driver.CardReader.USB.Generic".to_string())
    );
}
