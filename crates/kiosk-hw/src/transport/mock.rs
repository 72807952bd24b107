//! Mock port for testing

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use kiosk_core::{Port, PortSettings, TransportError};
use parking_lot::{Mutex, RwLock};

use crate::config::MockPortConfig;

type Responder = Box<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Mock port answering from scripted data
///
/// Answers are looked up in order: queued answers, the responder closure,
/// then the request/response table (exact match first, then prefix).
pub struct MockPort {
    name: String,
    open: AtomicBool,
    baud_rate: AtomicU32,
    /// Baud rate the simulated device listens on; others time out
    device_baud_rate: Option<u32>,
    queued: Mutex<VecDeque<Result<Vec<u8>, TransportError>>>,
    responder: RwLock<Option<Responder>>,
    /// Predefined responses for testing (request -> response mapping)
    responses: RwLock<Vec<(Vec<u8>, Vec<u8>)>>,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl MockPort {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            open: AtomicBool::new(false),
            baud_rate: AtomicU32::new(PortSettings::default().baud_rate),
            device_baud_rate: None,
            queued: Mutex::new(VecDeque::new()),
            responder: RwLock::new(None),
            responses: RwLock::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &MockPortConfig) -> Self {
        let mut port = Self::new(&config.name);
        port.device_baud_rate = config.device_baud_rate;
        for entry in &config.responses {
            match entry.decode() {
                Some((request, response)) => port.add_response(request, response),
                None => tracing::warn!(
                    port = %config.name,
                    request = %entry.request,
                    "Skipping mock response that is not valid hex"
                ),
            }
        }
        port
    }

    /// Only answer while the line runs at `baud_rate`
    pub fn with_device_baud_rate(mut self, baud_rate: u32) -> Self {
        self.device_baud_rate = Some(baud_rate);
        self
    }

    /// Answer every request through `responder`
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        *self.responder.write() = Some(Box::new(responder));
        self
    }

    /// Add a mock response for a given request
    pub fn add_response(&self, request: Vec<u8>, response: Vec<u8>) {
        self.responses.write().push((request, response));
    }

    /// Queue an answer returned before any other lookup
    pub fn push_answer(&self, answer: Result<Vec<u8>, TransportError>) {
        self.queued.lock().push_back(answer);
    }

    /// Requests written so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate.load(Ordering::SeqCst)
    }

    fn find_response(&self, request: &[u8]) -> Option<Vec<u8>> {
        if let Some(responder) = self.responder.read().as_ref() {
            if let Some(answer) = responder(request) {
                return Some(answer);
            }
        }

        let responses = self.responses.read();

        // First try exact match
        if let Some((_, resp)) = responses.iter().find(|(req, _)| req == request) {
            return Some(resp.clone());
        }

        // Then try prefix match for variable-length requests
        responses
            .iter()
            .find(|(req, _)| request.starts_with(req))
            .map(|(_, resp)| resp.clone())
    }
}

impl Port for MockPort {
    fn system_name(&self) -> String {
        self.name.clone()
    }

    fn open(&self) -> Result<(), TransportError> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn apply_settings(&self, settings: PortSettings) -> Result<(), TransportError> {
        self.baud_rate.store(settings.baud_rate, Ordering::SeqCst);
        Ok(())
    }

    fn send_receive(&self, request: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        self.sent.lock().push(request.to_vec());
        tracing::trace!(port = %self.name, request = %hex::encode(request), "Mock port: sent");

        if let Some(answer) = self.queued.lock().pop_front() {
            return answer;
        }

        if let Some(expected) = self.device_baud_rate {
            if expected != self.baud_rate() {
                return Err(TransportError::Timeout(format!("no answer within {:?}", timeout)));
            }
        }

        self.find_response(request)
            .ok_or_else(|| TransportError::Timeout(format!("no answer within {:?}", timeout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_port_rejects_requests() {
        let port = MockPort::new("COM1");
        assert_eq!(
            port.send_receive(&[0x01], Duration::from_millis(10)),
            Err(TransportError::ConnectionClosed)
        );
    }

    #[test]
    fn test_lookup_order() {
        let port = MockPort::new("COM1");
        port.open().unwrap();
        port.add_response(vec![0x10], vec![0xAA]);
        port.add_response(vec![0x20, 0x01], vec![0xBB]);
        port.push_answer(Ok(vec![0xCC]));

        let timeout = Duration::from_millis(10);
        assert_eq!(port.send_receive(&[0x10], timeout), Ok(vec![0xCC]));
        assert_eq!(port.send_receive(&[0x10], timeout), Ok(vec![0xAA]));
        assert_eq!(port.send_receive(&[0x20, 0x01, 0x05], timeout), Ok(vec![0xBB]));
        assert!(matches!(
            port.send_receive(&[0x30], timeout),
            Err(TransportError::Timeout(_))
        ));
        assert_eq!(port.sent().len(), 4);
    }

    #[test]
    fn test_device_baud_rate_gate() {
        let port = MockPort::new("COM1").with_device_baud_rate(115200);
        port.open().unwrap();
        port.add_response(vec![0x10], vec![0xAA]);

        let timeout = Duration::from_millis(10);
        assert!(port.send_receive(&[0x10], timeout).is_err());
        port.apply_settings(PortSettings { baud_rate: 115200 }).unwrap();
        assert_eq!(port.send_receive(&[0x10], timeout), Ok(vec![0xAA]));
    }
}
