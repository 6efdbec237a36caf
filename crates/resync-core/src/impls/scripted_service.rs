//! Deterministic in-process generation service (tests, `--simulate`).
//!
//! Succeeds by default. Failures are scripted up front:
//! - `push_submit_error` / `push_status_error` / `push_download_error`:
//!   consumed one per call
//! - `fail_prompt`: every submission with that prompt fails
//! - `fail_operations`: operations finish with an error

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::domain::{ArtifactPayload, GenerationRequest, ServiceError};
use crate::ports::{
    ArtifactDescriptor, Credential, GenerationService, OperationHandle, OperationStatus,
    Submission,
};

const VIDEO_BYTES: &[u8] = b"scripted-video";

#[derive(Debug, Default)]
struct ScriptState {
    submit_errors: VecDeque<ServiceError>,
    status_errors: VecDeque<ServiceError>,
    download_errors: VecDeque<ServiceError>,
    failing_prompts: HashMap<String, ServiceError>,
    operation_error: Option<String>,
    /// Status checks each operation reports as running before it is done.
    polls_until_done: u32,
    operations: HashMap<String, u32>,
    submitted: Vec<String>,
    status_checks: usize,
    downloads: usize,
    next_operation: u64,
}

#[derive(Debug, Default)]
pub struct ScriptedService {
    state: Mutex<ScriptState>,
    latency: Duration,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every submission takes this long.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_polls_until_done(self, polls: u32) -> Self {
        self.lock().polls_until_done = polls;
        self
    }

    pub fn push_submit_error(&self, error: ServiceError) {
        self.lock().submit_errors.push_back(error);
    }

    pub fn push_status_error(&self, error: ServiceError) {
        self.lock().status_errors.push_back(error);
    }

    pub fn push_download_error(&self, error: ServiceError) {
        self.lock().download_errors.push_back(error);
    }

    pub fn fail_prompt(&self, prompt: impl Into<String>, error: ServiceError) {
        self.lock().failing_prompts.insert(prompt.into(), error);
    }

    pub fn clear_prompt(&self, prompt: &str) {
        self.lock().failing_prompts.remove(prompt);
    }

    pub fn fail_operations(&self, message: impl Into<String>) {
        self.lock().operation_error = Some(message.into());
    }

    /// Prompts of every submission received, in order (failed ones included).
    pub fn submitted(&self) -> Vec<String> {
        self.lock().submitted.clone()
    }

    pub fn status_checks(&self) -> usize {
        self.lock().status_checks
    }

    pub fn downloads(&self) -> usize {
        self.lock().downloads
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn completed_payload(request: &GenerationRequest) -> ArtifactPayload {
    match request {
        GenerationRequest::GenerateImage(params) => {
            ArtifactPayload::image("image/jpeg", STANDARD.encode(params.prompt.as_bytes()))
        }
        GenerationRequest::EditImage(params) => {
            ArtifactPayload::image(params.image.mime_type.clone(), params.image.data_base64.clone())
        }
        GenerationRequest::GenerateScript(params) => ArtifactPayload::script(format!(
            "{} script about {}",
            params.platform.as_str(),
            params.topic
        )),
        GenerationRequest::GenerateVideo(_) | GenerationRequest::ExtendVideo(_) => {
            ArtifactPayload::video("video/mp4", VIDEO_BYTES, "scripted://video")
        }
    }
}

#[async_trait]
impl GenerationService for ScriptedService {
    async fn submit(
        &self,
        request: &GenerationRequest,
        _credential: &Credential,
    ) -> Result<Submission, ServiceError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.lock();
        state.submitted.push(request.prompt_text().to_string());

        if let Some(error) = state.submit_errors.pop_front() {
            return Err(error);
        }
        if let Some(error) = state.failing_prompts.get(request.prompt_text()) {
            return Err(error.clone());
        }

        if request.request_type().is_async() {
            state.next_operation += 1;
            let name = format!("operations/scripted-{}", state.next_operation);
            state.operations.insert(name.clone(), 0);
            Ok(Submission::Pending(OperationHandle::new(name)))
        } else {
            Ok(Submission::Completed(completed_payload(request)))
        }
    }

    async fn operation_status(
        &self,
        handle: &OperationHandle,
        _credential: &Credential,
    ) -> Result<OperationStatus, ServiceError> {
        let mut state = self.lock();
        state.status_checks += 1;

        if let Some(error) = state.status_errors.pop_front() {
            return Err(error);
        }

        let polls_until_done = state.polls_until_done;
        let operation_error = state.operation_error.clone();
        let Some(checks) = state.operations.get_mut(handle.name()) else {
            return Err(ServiceError::fatal(format!("unknown operation {handle}")));
        };
        *checks += 1;
        if *checks <= polls_until_done {
            return Ok(OperationStatus::running());
        }

        Ok(match operation_error {
            Some(message) => OperationStatus {
                done: true,
                result: None,
                error: Some(message),
            },
            None => OperationStatus::finished(ArtifactDescriptor {
                uri: format!("scripted://{}", handle.name()),
                mime_type: Some("video/mp4".to_string()),
            }),
        })
    }

    async fn download(
        &self,
        _descriptor: &ArtifactDescriptor,
        _credential: &Credential,
    ) -> Result<Vec<u8>, ServiceError> {
        let mut state = self.lock();
        state.downloads += 1;
        match state.download_errors.pop_front() {
            Some(error) => Err(error),
            None => Ok(VIDEO_BYTES.to_vec()),
        }
    }
}
