//! Scripted transport for tests.
//!
//! Used by unit tests across the workspace to drive the pipeline without a
//! network: responses are played back in order, and every call is recorded
//! for inspection.

use std::cell::RefCell;
use std::collections::VecDeque;

use bidforge_shared::Message;

use crate::client::{ChatParams, Transport, TransportError};

/// One recorded call to [`ScriptedTransport::send`].
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    pub model: String,
    pub messages: Vec<Message>,
    pub params: ChatParams,
}

/// Transport that plays back a fixed script of responses.
///
/// Single-threaded by design (interior mutability via `RefCell`), matching
/// the pipeline's sequential execution model.
pub struct ScriptedTransport {
    responses: RefCell<VecDeque<Result<String, TransportError>>>,
    calls: RefCell<Vec<ScriptedCall>>,
}

impl ScriptedTransport {
    /// Script the given responses, played back in order.
    pub fn new(responses: impl IntoIterator<Item = Result<String, TransportError>>) -> Self {
        Self {
            responses: RefCell::new(responses.into_iter().collect()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// A transport that fails every call (script exhausted immediately).
    pub fn empty() -> Self {
        Self::new([])
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    /// The model targeted by each call, in order.
    pub fn models_called(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.model.clone()).collect()
    }

    /// All recorded calls.
    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.borrow().clone()
    }
}

impl Transport for ScriptedTransport {
    async fn send(
        &self,
        model: &str,
        messages: &[Message],
        params: &ChatParams,
    ) -> Result<String, TransportError> {
        self.calls.borrow_mut().push(ScriptedCall {
            model: model.to_string(),
            messages: messages.to_vec(),
            params: *params,
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Transient("script exhausted".into())))
    }
}
