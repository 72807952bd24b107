//! Frame checksums and text helpers

use std::sync::atomic::{AtomicU8, Ordering};

use crc::{Crc, CRC_16_KERMIT};

use crate::error::{AnswerError, CommandError};

/// Control characters used by the text framings
pub mod ascii {
    pub const STX: u8 = 0x02;
    pub const ETX: u8 = 0x03;
    pub const FS: u8 = 0x1C;
}

const KERMIT: Crc<u16> = Crc::<u16>::new(&CRC_16_KERMIT);

/// XOR of all bytes
pub fn lrc(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// Length byte of a frame whose length field counts `length` bytes
pub fn length_byte(length: usize) -> Result<u8, CommandError> {
    u8::try_from(length).map_err(|_| CommandError::TooLong {
        max: usize::from(u8::MAX),
        actual: length,
    })
}

/// Wrapping byte sum
pub fn sum16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)))
}

/// CRC-16/KERMIT
pub fn crc16_kermit(data: &[u8]) -> u16 {
    KERMIT.checksum(data)
}

/// Command byte as two upper-case hex digits
pub fn hex_byte(value: u8) -> [u8; 2] {
    let text = format!("{:02X}", value);
    let bytes = text.as_bytes();
    [bytes[0], bytes[1]]
}

/// Parse two or four hex digits
pub fn parse_hex(digits: &[u8]) -> Result<u16, AnswerError> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| u16::from_str_radix(s, 16).ok())
        .ok_or_else(|| AnswerError::InvalidFrame(format!("not hex: {:02X?}", digits)))
}

/// Join text fields with a leading separator before each one
pub fn join_fields(fields: &[&str], separator: u8) -> Vec<u8> {
    let mut data = Vec::new();
    for field in fields {
        data.push(separator);
        data.extend_from_slice(field.as_bytes());
    }
    data
}

/// Packet id of the text framings, cycling through `0x20..=0xFF`
#[derive(Debug, Default)]
pub struct PacketId(AtomicU8);

impl PacketId {
    pub const FIRST: u8 = 0x20;

    fn successor(id: u8) -> u8 {
        if id < Self::FIRST || id == u8::MAX {
            Self::FIRST
        } else {
            id + 1
        }
    }

    /// Advance and return the id of the next request
    pub fn next(&self) -> u8 {
        let previous = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| {
                Some(Self::successor(id))
            })
            .unwrap_or_default();
        Self::successor(previous)
    }

    /// Id of the last request
    pub fn current(&self) -> u8 {
        self.0.load(Ordering::SeqCst)
    }
}
