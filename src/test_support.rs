use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::gateway::{AuthGateway, ConfirmCodeResponse, GatewayError, GatewayResult};

/// Scripted gateway double shared by the unit tests.
///
/// Results queue up in call order; an empty queue answers success. A gate
/// installed via [`MockGateway::gate_next_request`] (or the confirm variant)
/// holds that call's response until the test releases it, letting tests pick
/// the order in which in-flight responses land. Each call reserves its
/// scripted result before parking at the gate.
pub struct MockGateway {
    request_results: Mutex<VecDeque<GatewayResult<()>>>,
    confirm_results: Mutex<VecDeque<GatewayResult<ConfirmCodeResponse>>>,
    request_gates: Mutex<VecDeque<async_channel::Receiver<()>>>,
    confirm_gates: Mutex<VecDeque<async_channel::Receiver<()>>>,
    request_calls: Mutex<Vec<String>>,
    confirm_calls: Mutex<Vec<(String, String)>>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            request_results: Mutex::new(VecDeque::new()),
            confirm_results: Mutex::new(VecDeque::new()),
            request_gates: Mutex::new(VecDeque::new()),
            confirm_gates: Mutex::new(VecDeque::new()),
            request_calls: Mutex::new(Vec::new()),
            confirm_calls: Mutex::new(Vec::new()),
        })
    }

    pub fn confirmation(token: &str, created_at: i64) -> ConfirmCodeResponse {
        ConfirmCodeResponse {
            token: token.to_string(),
            created_at,
            user_uuid: None,
            invitation: None,
        }
    }

    pub fn push_request_ok(&self) {
        self.request_results.lock().unwrap().push_back(Ok(()));
    }

    pub fn push_request_err(&self, message: &str) {
        self.request_results
            .lock()
            .unwrap()
            .push_back(Err(GatewayError::new(message)));
    }

    pub fn push_confirm_ok(&self, response: ConfirmCodeResponse) {
        self.confirm_results.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_confirm_err(&self, message: &str) {
        self.confirm_results
            .lock()
            .unwrap()
            .push_back(Err(GatewayError::new(message)));
    }

    /// Holds the next code request open until the returned sender fires.
    pub fn gate_next_request(&self) -> async_channel::Sender<()> {
        let (release, gate) = async_channel::bounded(1);
        self.request_gates.lock().unwrap().push_back(gate);
        release
    }

    /// Holds the next confirmation open until the returned sender fires.
    pub fn gate_next_confirm(&self) -> async_channel::Sender<()> {
        let (release, gate) = async_channel::bounded(1);
        self.confirm_gates.lock().unwrap().push_back(gate);
        release
    }

    pub fn request_calls(&self) -> Vec<String> {
        self.request_calls.lock().unwrap().clone()
    }

    pub fn confirm_calls(&self) -> Vec<(String, String)> {
        self.confirm_calls.lock().unwrap().clone()
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl AuthGateway for MockGateway {
    async fn post_code_request(&self, phone: &str) -> GatewayResult<()> {
        self.request_calls.lock().unwrap().push(phone.to_string());
        let result = self
            .request_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));
        let gate = self.request_gates.lock().unwrap().pop_front();
        if let Some(gate) = gate {
            let _ = gate.recv().await;
        }
        result
    }

    async fn post_code_confirm(
        &self,
        phone: &str,
        code: &str,
    ) -> GatewayResult<ConfirmCodeResponse> {
        self.confirm_calls
            .lock()
            .unwrap()
            .push((phone.to_string(), code.to_string()));
        let result = self
            .confirm_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Self::confirmation("test-token", 1714564800)));
        let gate = self.confirm_gates.lock().unwrap().pop_front();
        if let Some(gate) = gate {
            let _ = gate.recv().await;
        }
        result
    }
}
