//! Recording playback sink for tests.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::{AppendCompletion, BufferedRange, PlaybackSink, SinkError};

/// Index of an endpoint created on a [`MockSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockEndpoint(usize);

struct MockEndpointState {
    mime_type: String,
    appended: Vec<Bytes>,
}

struct MockSinkState {
    duration: Option<f64>,
    position: f64,
    buffered: Vec<BufferedRange>,
    endpoints: Vec<MockEndpointState>,
    pending: VecDeque<oneshot::Sender<Result<(), SinkError>>>,
    auto_complete: bool,
    unsupported_prefixes: Vec<String>,
    position_tx: Option<mpsc::UnboundedSender<f64>>,
    position_rx: Option<mpsc::UnboundedReceiver<f64>>,
}

/// Playback sink double with manually released appends.
///
/// Clones share state, so a test keeps one clone while the controller owns
/// another. Position changes sent before the controller subscribes are
/// buffered.
#[derive(Clone)]
pub struct MockSink {
    state: Arc<Mutex<MockSinkState>>,
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSink {
    /// Sink whose appends stay pending until [`MockSink::complete_next`].
    pub fn new() -> Self {
        let (position_tx, position_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(MockSinkState {
                duration: None,
                position: 0.0,
                buffered: Vec::new(),
                endpoints: Vec::new(),
                pending: VecDeque::new(),
                auto_complete: false,
                unsupported_prefixes: Vec::new(),
                position_tx: Some(position_tx),
                position_rx: Some(position_rx),
            })),
        }
    }

    /// Sink whose appends complete immediately.
    pub fn auto_completing() -> Self {
        let sink = Self::new();
        sink.state.lock().auto_complete = true;
        sink
    }

    /// Refuses endpoints whose MIME type starts with `prefix`.
    pub fn with_unsupported_mime(self, prefix: &str) -> Self {
        self.state
            .lock()
            .unsupported_prefixes
            .push(prefix.to_string());
        self
    }

    /// Moves the playhead and notifies the subscriber.
    pub fn set_position(&self, position: f64) {
        let mut state = self.state.lock();
        state.position = position;
        if let Some(tx) = &state.position_tx {
            let _ = tx.send(position);
        }
    }

    /// Reported buffered ranges for every endpoint, current and future.
    pub fn set_buffered(&self, ranges: &[(f64, f64)]) {
        self.state.lock().buffered = ranges
            .iter()
            .map(|&(start, end)| BufferedRange::new(start, end))
            .collect();
    }

    /// Ends the position stream, which stops a running controller.
    pub fn close(&self) {
        self.state.lock().position_tx = None;
    }

    /// Releases the oldest pending append successfully.
    pub fn complete_next(&self) -> bool {
        self.release_next(Ok(()))
    }

    /// Releases the oldest pending append with a failure.
    pub fn fail_next(&self, reason: &str) -> bool {
        self.release_next(Err(SinkError::AppendFailed {
            reason: reason.to_string(),
        }))
    }

    fn release_next(&self, result: Result<(), SinkError>) -> bool {
        let pending = self.state.lock().pending.pop_front();
        match pending {
            Some(release) => {
                let _ = release.send(result);
                true
            }
            None => false,
        }
    }

    pub fn duration(&self) -> Option<f64> {
        self.state.lock().duration
    }

    pub fn pending_appends(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// MIME types of created endpoints, in creation order.
    pub fn endpoint_mime_types(&self) -> Vec<String> {
        self.state
            .lock()
            .endpoints
            .iter()
            .map(|endpoint| endpoint.mime_type.clone())
            .collect()
    }

    /// Total appended payloads across all endpoints.
    pub fn append_count(&self) -> usize {
        self.state
            .lock()
            .endpoints
            .iter()
            .map(|endpoint| endpoint.appended.len())
            .sum()
    }

    /// Payloads appended to the endpoint with the given MIME type.
    pub fn appended(&self, mime_type: &str) -> Vec<Bytes> {
        self.state
            .lock()
            .endpoints
            .iter()
            .filter(|endpoint| endpoint.mime_type == mime_type)
            .flat_map(|endpoint| endpoint.appended.iter().cloned())
            .collect()
    }
}

impl PlaybackSink for MockSink {
    type Endpoint = MockEndpoint;

    fn set_duration(&mut self, seconds: f64) {
        self.state.lock().duration = Some(seconds);
    }

    fn create_endpoint(&mut self, mime_type: &str) -> Result<MockEndpoint, SinkError> {
        let mut state = self.state.lock();
        if state
            .unsupported_prefixes
            .iter()
            .any(|prefix| mime_type.starts_with(prefix.as_str()))
        {
            return Err(SinkError::UnsupportedMimeType {
                mime_type: mime_type.to_string(),
            });
        }

        state.endpoints.push(MockEndpointState {
            mime_type: mime_type.to_string(),
            appended: Vec::new(),
        });
        Ok(MockEndpoint(state.endpoints.len() - 1))
    }

    fn append(&mut self, endpoint: &MockEndpoint, data: Bytes) -> AppendCompletion {
        let mut state = self.state.lock();
        let Some(target) = state.endpoints.get_mut(endpoint.0) else {
            return async { Err(SinkError::Closed) }.boxed();
        };
        target.appended.push(data);

        if state.auto_complete {
            return async { Ok(()) }.boxed();
        }

        let (release, completion) = oneshot::channel();
        state.pending.push_back(release);
        async move { completion.await.unwrap_or(Err(SinkError::Closed)) }.boxed()
    }

    fn buffered_ranges(&self, _endpoint: &MockEndpoint) -> Vec<BufferedRange> {
        self.state.lock().buffered.clone()
    }

    fn current_position(&self) -> f64 {
        self.state.lock().position
    }

    fn position_changes(&mut self) -> mpsc::UnboundedReceiver<f64> {
        let mut state = self.state.lock();
        match state.position_rx.take() {
            Some(rx) => rx,
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                state.position_tx = Some(tx);
                rx
            }
        }
    }
}
