//! Mock byte channel for testing
//!
//! Records every frame written, serves reads from an rx queue the test controls, and can
//! run a responder that turns each received command line into reply bytes. Clones share
//! state, so a test keeps one handle while the protocol client owns the other.

use super::Adapter;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Responder = Box<dyn FnMut(&str) -> Option<Vec<u8>> + Send>;

struct MockState {
    written: Vec<Vec<u8>>,
    rx: VecDeque<u8>,
    responder: Option<Responder>,
    read_chunk: usize,
    fail_next_write: bool,
}

/// In-memory [`Adapter`].
///
/// # Example
///
/// ```
/// use fluoro_daq::adapters::MockAdapter;
///
/// let adapter = MockAdapter::with_responder(|line| {
///     (line == "AT").then(|| b"OK\r\n".to_vec())
/// });
/// assert_eq!(adapter.pending_rx(), 0);
/// ```
#[derive(Clone)]
pub struct MockAdapter {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    /// Silent device: writes are recorded, nothing is ever received unless pushed.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                written: Vec::new(),
                rx: VecDeque::new(),
                responder: None,
                read_chunk: 64,
                fail_next_write: false,
            })),
        }
    }

    /// Device that answers each command line (terminator stripped) with the returned bytes.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&str) -> Option<Vec<u8>> + Send + 'static,
    {
        let adapter = Self::new();
        adapter.state().responder = Some(Box::new(responder));
        adapter
    }

    /// Limit how many bytes a single `read` hands out.
    pub fn with_read_chunk(self, bytes: usize) -> Self {
        self.state().read_chunk = bytes.max(1);
        self
    }

    /// Make bytes available to the next reads.
    pub fn push_rx(&self, bytes: &[u8]) {
        self.state().rx.extend(bytes.iter().copied());
    }

    /// Bytes received but not yet read.
    pub fn pending_rx(&self) -> usize {
        self.state().rx.len()
    }

    /// Every frame written, byte for byte.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state().written.clone()
    }

    /// Written frames as text with the line terminator removed.
    pub fn written_commands(&self) -> Vec<String> {
        self.state()
            .written
            .iter()
            .map(|frame| command_line(frame))
            .collect()
    }

    /// Make the next write fail.
    pub fn inject_write_failure(&self) {
        self.state().fail_next_write = true;
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn command_line(frame: &[u8]) -> String {
    String::from_utf8_lossy(frame)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_write) {
            return Err(anyhow!("Injected write failure"));
        }

        state.written.push(bytes.to_vec());
        let line = command_line(bytes);
        let reply = state.responder.as_mut().and_then(|respond| respond(&line));
        if let Some(reply) = reply {
            state.rx.extend(reply);
        }
        Ok(())
    }

    async fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut state = self.state();
        let n = buffer.len().min(state.read_chunk).min(state.rx.len());
        for (slot, byte) in buffer.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_responder_feeds_rx() {
        let mut adapter = MockAdapter::with_responder(|line| match line {
            "AT" => Some(b"OK\r\n".to_vec()),
            _ => None,
        });

        adapter.write(b"AT\r\n").await.unwrap();
        adapter.write(b"ATX\r\n").await.unwrap();
        assert_eq!(adapter.pending_rx(), 4);
        assert_eq!(adapter.written_commands(), vec!["AT", "ATX"]);

        let mut buf = [0u8; 16];
        assert_eq!(adapter.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf[..4], b"OK\r\n");
        assert_eq!(adapter.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_chunk_limit() {
        let mut adapter = MockAdapter::new().with_read_chunk(3);
        adapter.push_rx(b"12345");

        let mut buf = [0u8; 16];
        assert_eq!(adapter.read(&mut buf).await.unwrap(), 3);
        assert_eq!(adapter.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"45");
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let mut adapter = MockAdapter::new();
        adapter.inject_write_failure();
        assert!(adapter.write(b"AT\r\n").await.is_err());
        assert!(adapter.write(b"AT\r\n").await.is_ok());
        assert_eq!(adapter.written().len(), 1);
    }
}
