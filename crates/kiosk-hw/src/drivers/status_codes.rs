//! Status code tables of the driver families

use kiosk_core::{StatusCode, StatusCodeTable, WarningLevel};
use once_cell::sync::Lazy;

/// Codes shared by every device
pub mod device {
    use super::StatusCode;

    pub const OK: StatusCode = 1000;
    pub const NOT_AVAILABLE: StatusCode = 1001;
    pub const UNKNOWN: StatusCode = 1002;
}

/// Fiscal registrator codes
pub mod fr {
    use super::StatusCode;

    pub const SESSION_CLOSED: StatusCode = 2000;
    pub const SESSION_EXPIRED: StatusCode = 2001;
    pub const DOCUMENT_OPENED: StatusCode = 2002;
    pub const PAPER_END: StatusCode = 2003;
    pub const PRINTING: StatusCode = 2004;
}

/// CCNet validator codes; the poll state byte is used as is
pub mod ccnet {
    use super::StatusCode;

    pub const POWER_UP: StatusCode = 0x10;
    pub const POWER_UP_WITH_BILL_IN_VALIDATOR: StatusCode = 0x11;
    pub const POWER_UP_WITH_BILL_IN_STACKER: StatusCode = 0x12;
    pub const INITIALIZE: StatusCode = 0x13;
    pub const IDLING: StatusCode = 0x14;
    pub const ACCEPTING: StatusCode = 0x15;
    pub const STACKING: StatusCode = 0x17;
    pub const RETURNING: StatusCode = 0x18;
    pub const UNIT_DISABLED: StatusCode = 0x19;
    pub const HOLDING: StatusCode = 0x1A;
    pub const BUSY: StatusCode = 0x1B;
    pub const REJECTING: StatusCode = 0x1C;
    pub const DROP_CASSETTE_FULL: StatusCode = 0x41;
    pub const DROP_CASSETTE_OUT_OF_POSITION: StatusCode = 0x42;
    pub const VALIDATOR_JAMMED: StatusCode = 0x43;
    pub const DROP_CASSETTE_JAMMED: StatusCode = 0x44;
    pub const CHEATED: StatusCode = 0x45;
    pub const PAUSE: StatusCode = 0x46;
    pub const FAILURE: StatusCode = 0x47;
    pub const ESCROW: StatusCode = 0x80;
    pub const STACKED: StatusCode = 0x81;
    pub const RETURNED: StatusCode = 0x82;
    /// Synthetic: bill stuck in the exit channel after a jam
    pub const STICK_IN_EXIT_CHANNEL: StatusCode = 0x1100;

    pub fn is_power_up(code: StatusCode) -> bool {
        matches!(
            code,
            POWER_UP | POWER_UP_WITH_BILL_IN_VALIDATOR | POWER_UP_WITH_BILL_IN_STACKER
        )
    }
}

/// Fiscal registrator table
pub static FR_STATUS_TABLE: Lazy<StatusCodeTable> = Lazy::new(|| {
    use WarningLevel::*;

    StatusCodeTable::new([
        (device::OK, Ok, "OK"),
        (device::NOT_AVAILABLE, Error, "Device is not available"),
        (device::UNKNOWN, Warning, "Unknown device state"),
        (fr::SESSION_CLOSED, Ok, "Fiscal session is closed"),
        (fr::SESSION_EXPIRED, Warning, "Fiscal session exceeded 24 hours"),
        (fr::DOCUMENT_OPENED, Warning, "Document is opened"),
        (fr::PAPER_END, Error, "Paper end"),
        (fr::PRINTING, Ok, "Printing"),
    ])
});

/// CCNet validator table
pub static CCNET_STATUS_TABLE: Lazy<StatusCodeTable> = Lazy::new(|| {
    use ccnet::*;
    use WarningLevel::*;

    StatusCodeTable::new([
        (device::NOT_AVAILABLE, Error, "Device is not available"),
        (POWER_UP, Warning, "Power up"),
        (POWER_UP_WITH_BILL_IN_VALIDATOR, Warning, "Power up with bill in validator"),
        (POWER_UP_WITH_BILL_IN_STACKER, Warning, "Power up with bill in stacker"),
        (INITIALIZE, Ok, "Initialize"),
        (IDLING, Ok, "Idling"),
        (ACCEPTING, Ok, "Accepting"),
        (STACKING, Ok, "Stacking"),
        (RETURNING, Ok, "Returning"),
        (UNIT_DISABLED, Ok, "Unit disabled"),
        (HOLDING, Ok, "Holding"),
        (BUSY, Ok, "Busy"),
        (REJECTING, Warning, "Rejecting"),
        (DROP_CASSETTE_FULL, Error, "Drop cassette full"),
        (DROP_CASSETTE_OUT_OF_POSITION, Error, "Drop cassette out of position"),
        (VALIDATOR_JAMMED, Error, "Validator jammed"),
        (DROP_CASSETTE_JAMMED, Error, "Drop cassette jammed"),
        (CHEATED, Warning, "Cheated"),
        (PAUSE, Warning, "Pause"),
        (FAILURE, Error, "Failure"),
        (ESCROW, Ok, "Escrow position"),
        (STACKED, Ok, "Bill stacked"),
        (RETURNED, Ok, "Bill returned"),
        (STICK_IN_EXIT_CHANNEL, Error, "Bill stuck in exit channel"),
    ])
});
