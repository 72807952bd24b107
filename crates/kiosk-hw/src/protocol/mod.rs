//! Protocol layer shared by all driver families
//!
//! - [`engine`]: command/error-recovery loop with the processing-error stack
//! - [`answer`]: typed decoding of text answer fields
//! - [`frame`]: checksums used by the driver framings

pub mod answer;
pub mod engine;
pub mod frame;

pub use answer::{decode_answer, split_fields, FieldKind, FieldValue};
pub use engine::{CommandEngine, Envelope, Protocol};
