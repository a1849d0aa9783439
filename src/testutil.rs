//! Shared unit-test fixtures.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::TransportError;
use crate::http::{HttpTransport, TransportRequest, TransportResponse};

/// Scripted HTTP transport: pops one canned outcome per attempt and records
/// every request it saw. Once the script runs out it answers 200.
pub(crate) struct MockTransport {
    script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    calls: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    pub(crate) fn new(script: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn last_call(&self) -> TransportRequest {
        self.calls.lock().unwrap().last().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.calls.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(status(200)))
    }
}

/// Empty-bodied response with the given status.
pub(crate) fn status(code: u16) -> TransportResponse {
    TransportResponse {
        status: code,
        body: String::new(),
    }
}

/// JSON-bodied response with the given status.
pub(crate) fn json_response(code: u16, body: &str) -> TransportResponse {
    TransportResponse {
        status: code,
        body: body.to_string(),
    }
}
