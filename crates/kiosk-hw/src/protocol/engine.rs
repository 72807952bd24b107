//! Protocol command engine
//!
//! Every driver family funnels its commands through [`CommandEngine`]:
//!
//! 1. encode the command and exchange it with the port
//! 2. validate the answer envelope (shape, echoed command)
//! 3. on a nonzero device error, push it on the processing-error stack,
//!    let the family's compensation hook repair the device state and
//!    re-issue the original command
//!
//! A code that is already on top of the stack fails the command, so
//! recovery depth is bounded by the distinct codes seen in one call chain.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kiosk_core::Port;
use tracing::{debug, info, warn};

use crate::error::{AnswerError, CommandError, ErrorCode};

/// Validated answer: device error code plus the remaining payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub error: ErrorCode,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn ok(payload: Vec<u8>) -> Self {
        Self { error: 0, payload }
    }
}

/// Wire protocol and compensation table of one driver family
pub trait Protocol: Send + Sync + Sized + 'static {
    type Command: Copy + Eq + fmt::Debug + Send + Sync;

    /// Serialize `command` with its data into a request frame
    fn encode(&self, command: Self::Command, data: &[u8]) -> Result<Vec<u8>, CommandError>;

    /// Validate an answer frame and split it into error code and payload
    fn unpack(&self, command: Self::Command, answer: &[u8]) -> Result<Envelope, AnswerError>;

    /// Answer timeout of `command`
    fn timeout(&self, command: Self::Command) -> Duration;

    fn error_description(&self, code: ErrorCode) -> String;

    /// Errors that must never be compensated for `command`
    fn is_unprocessable(&self, _command: Self::Command, _code: ErrorCode) -> bool {
        false
    }

    /// How many times a request is repeated after an invalid answer
    fn answer_repeats(&self) -> usize {
        0
    }

    /// Errors that are harmless in the current device state
    fn is_not_error(
        &self,
        _engine: &mut CommandEngine<Self>,
        _command: Self::Command,
        _code: ErrorCode,
    ) -> bool {
        false
    }

    /// Compensating action for `code`; `true` re-issues `command`
    fn process_answer(
        &self,
        engine: &mut CommandEngine<Self>,
        command: Self::Command,
        code: ErrorCode,
    ) -> bool;
}

/// Per-device command state
pub struct CommandEngine<P: Protocol> {
    protocol: Arc<P>,
    port: Arc<dyn Port>,
    device: String,
    last_error: ErrorCode,
    last_command: Option<P::Command>,
    processing_errors: Vec<ErrorCode>,
}

impl<P: Protocol> CommandEngine<P> {
    pub fn new(protocol: P, port: Arc<dyn Port>, device: &str) -> Self {
        Self {
            protocol: Arc::new(protocol),
            port,
            device: device.to_string(),
            last_error: 0,
            last_command: None,
            processing_errors: Vec::new(),
        }
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn port(&self) -> &Arc<dyn Port> {
        &self.port
    }

    pub fn device_name(&self) -> &str {
        &self.device
    }

    pub fn set_device_name(&mut self, device: &str) {
        self.device = device.to_string();
    }

    pub fn last_error(&self) -> ErrorCode {
        self.last_error
    }

    pub fn last_command(&self) -> Option<P::Command> {
        self.last_command
    }

    /// Errors currently being compensated, oldest first
    pub fn processing_errors(&self) -> &[ErrorCode] {
        &self.processing_errors
    }

    /// Run `command` with recovery; returns the answer payload
    pub fn process_command(
        &mut self,
        command: P::Command,
        data: &[u8],
    ) -> Result<Vec<u8>, CommandError> {
        let depth = self.processing_errors.len();
        let result = self.run(command, data);
        // Codes pushed by this call are resolved or abandoned now
        self.processing_errors.truncate(depth);
        result
    }

    fn run(&mut self, command: P::Command, data: &[u8]) -> Result<Vec<u8>, CommandError> {
        loop {
            let envelope = self.exchange(command, data)?;

            self.last_error = envelope.error;
            self.last_command = Some(command);

            if envelope.error == 0 {
                return Ok(envelope.payload);
            }

            let code = envelope.error;
            let description = self.protocol.error_description(code);
            warn!(
                device = %self.device,
                command = ?command,
                error = code,
                "Error: {}",
                description
            );

            let protocol = Arc::clone(&self.protocol);
            if protocol.is_not_error(self, command, code) {
                self.last_error = 0;
                return Ok(envelope.payload);
            }

            if self.processing_errors.last() == Some(&code) {
                warn!(
                    device = %self.device,
                    error = code,
                    "Error repeated while being processed"
                );
                return Err(self.device_failure(command, code, description));
            }

            if protocol.is_unprocessable(command, code) {
                return Err(self.device_failure(command, code, description));
            }

            self.processing_errors.push(code);
            info!(
                device = %self.device,
                command = ?command,
                error = code,
                "Processing error: {}",
                description
            );

            if !protocol.process_answer(self, command, code) {
                warn!(
                    device = %self.device,
                    error = code,
                    "Failed to process error: {}",
                    description
                );
                return Err(self.device_failure(command, code, description));
            }

            debug!(device = %self.device, command = ?command, "Error processed, repeating command");
        }
    }

    /// One request/answer exchange, repeating on invalid answers when the
    /// protocol allows it
    fn exchange(&mut self, command: P::Command, data: &[u8]) -> Result<Envelope, CommandError> {
        self.last_error = 0;
        let request = self.protocol.encode(command, data).map_err(|e| {
            warn!(device = %self.device, command = ?command, error = %e, "Failed to encode request");
            e
        })?;
        let timeout = self.protocol.timeout(command);
        let repeats = self.protocol.answer_repeats();

        let mut attempt = 0;
        loop {
            if attempt > 0 {
                debug!(device = %self.device, iteration = attempt + 1, "Repeating request");
            }

            let answer = self.port.send_receive(&request, timeout).map_err(|e| {
                warn!(device = %self.device, command = ?command, error = %e, "Transport failure");
                CommandError::Transport(e)
            })?;

            match self.protocol.unpack(command, &answer) {
                Ok(envelope) => return Ok(envelope),
                Err(e) => {
                    warn!(
                        device = %self.device,
                        command = ?command,
                        answer = %hex::encode(&answer),
                        error = %e,
                        "Invalid answer"
                    );
                    if attempt >= repeats {
                        return Err(CommandError::Answer(e));
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn device_failure(
        &mut self,
        command: P::Command,
        code: ErrorCode,
        description: String,
    ) -> CommandError {
        self.last_error = code;
        self.last_command = Some(command);
        CommandError::Device { code, description }
    }
}
