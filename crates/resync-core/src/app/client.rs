//! GenerationClient - `GenerationService` へのリトライ付きアダプタ

use std::sync::Arc;

use thiserror::Error;

use crate::app::retry::{RetryPolicy, with_retry};
use crate::domain::{
    ArtifactPayload, EditParams, ExtendParams, GenerationError, GenerationRequest, ImageParams,
    RetryError, Retryable, ScriptParams, ServiceError, VideoParams,
};
use crate::ports::{
    ArtifactDescriptor, Credential, CredentialProvider, GenerationService, OperationHandle,
    OperationStatus, Submission,
};

pub const DEFAULT_SERVICE_ID: &str = "gemini";

/// GenerationClient はサービス呼び出しをすべてリトライポリシーで包む
///
/// # ルール
/// - 資格情報はリモート呼び出しのたびに（リトライの各試行も含めて）取得し直す。
///   キャッシュしない
/// - `download` は一回だけ試行する
/// - ストアには触らない
pub struct GenerationClient {
    service: Arc<dyn GenerationService>,
    credentials: Arc<dyn CredentialProvider>,
    policy: RetryPolicy,
    service_id: String,
}

impl GenerationClient {
    pub fn new(
        service: Arc<dyn GenerationService>,
        credentials: Arc<dyn CredentialProvider>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            service,
            credentials,
            policy,
            service_id: DEFAULT_SERVICE_ID.to_string(),
        }
    }

    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = service_id.into();
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn credential(&self) -> Result<Credential, AttemptError> {
        self.credentials
            .lookup(&self.service_id)
            .ok_or_else(|| AttemptError::MissingCredential(self.service_id.clone()))
    }

    /// 任意のリクエスト種別を送信する
    pub async fn submit(&self, request: &GenerationRequest) -> Result<Submission, GenerationError> {
        with_retry(&self.policy, || async move {
            let credential = self.credential()?;
            Ok::<_, AttemptError>(self.service.submit(request, &credential).await?)
        })
        .await
        .map_err(into_generation_error)
    }

    pub async fn generate_image(&self, params: ImageParams) -> Result<ArtifactPayload, GenerationError> {
        self.submit_sync(GenerationRequest::GenerateImage(params)).await
    }

    pub async fn edit_image(&self, params: EditParams) -> Result<ArtifactPayload, GenerationError> {
        self.submit_sync(GenerationRequest::EditImage(params)).await
    }

    pub async fn generate_script(&self, params: ScriptParams) -> Result<ArtifactPayload, GenerationError> {
        self.submit_sync(GenerationRequest::GenerateScript(params)).await
    }

    pub async fn generate_video(&self, params: VideoParams) -> Result<OperationHandle, GenerationError> {
        self.submit_async(GenerationRequest::GenerateVideo(params)).await
    }

    pub async fn extend_video(&self, params: ExtendParams) -> Result<OperationHandle, GenerationError> {
        self.submit_async(GenerationRequest::ExtendVideo(params)).await
    }

    pub async fn operation_status(
        &self,
        handle: &OperationHandle,
    ) -> Result<OperationStatus, GenerationError> {
        with_retry(&self.policy, || async move {
            let credential = self.credential()?;
            Ok::<_, AttemptError>(self.service.operation_status(handle, &credential).await?)
        })
        .await
        .map_err(into_generation_error)
    }

    pub async fn download(&self, descriptor: &ArtifactDescriptor) -> Result<Vec<u8>, GenerationError> {
        let credential = self
            .credential()
            .map_err(|err| into_generation_error(RetryError::Fatal(err)))?;
        self.service
            .download(descriptor, &credential)
            .await
            .map_err(GenerationError::Service)
    }

    async fn submit_sync(&self, request: GenerationRequest) -> Result<ArtifactPayload, GenerationError> {
        match self.submit(&request).await? {
            Submission::Completed(payload) => Ok(payload),
            Submission::Pending(handle) => Err(GenerationError::UnexpectedResponse(format!(
                "{} returned operation {handle} instead of a result",
                request.request_type()
            ))),
        }
    }

    async fn submit_async(&self, request: GenerationRequest) -> Result<OperationHandle, GenerationError> {
        match self.submit(&request).await? {
            Submission::Pending(handle) => Ok(handle),
            Submission::Completed(_) => Err(GenerationError::UnexpectedResponse(format!(
                "{} returned a result instead of an operation",
                request.request_type()
            ))),
        }
    }
}

/// 一回のリモート呼び出し（資格情報の取得を含む）の失敗
#[derive(Debug, Error)]
enum AttemptError {
    #[error("no credential configured for service '{0}'")]
    MissingCredential(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl Retryable for AttemptError {
    fn is_transient(&self) -> bool {
        match self {
            AttemptError::MissingCredential(_) => false,
            AttemptError::Service(err) => err.is_transient(),
        }
    }
}

fn into_generation_error(err: RetryError<AttemptError>) -> GenerationError {
    match err {
        RetryError::Fatal(AttemptError::MissingCredential(service_id))
        | RetryError::Exhausted {
            last: AttemptError::MissingCredential(service_id),
            ..
        } => GenerationError::MissingCredential(service_id),
        RetryError::Fatal(AttemptError::Service(err)) => GenerationError::Service(err),
        RetryError::Exhausted {
            attempts,
            last: AttemptError::Service(last),
        } => GenerationError::Exhausted { attempts, last },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{AspectRatio, ServiceError, VideoAspectRatio, VideoResolution};
    use crate::impls::ScriptedService;
    use crate::ports::StaticCredentials;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn client_for(service: Arc<ScriptedService>) -> GenerationClient {
        GenerationClient::new(
            service,
            Arc::new(StaticCredentials::new().with(DEFAULT_SERVICE_ID, "test-key")),
            RetryPolicy::default().without_jitter(),
        )
    }

    fn image(prompt: &str) -> ImageParams {
        ImageParams {
            prompt: prompt.into(),
            aspect_ratio: AspectRatio::Square,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_once_per_attempt() {
        let service = Arc::new(ScriptedService::new());
        service.push_submit_error(ServiceError::transient("model overloaded"));
        let client = client_for(service.clone());

        let payload = client.generate_image(image("P")).await.unwrap();

        assert!(!payload.is_empty());
        assert_eq!(service.submitted(), vec!["P", "P"]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_last_error() {
        let service = Arc::new(ScriptedService::new());
        service.fail_prompt("P", ServiceError::transient("model overloaded"));
        let client = client_for(service.clone());

        let err = client.generate_image(image("P")).await.unwrap_err();

        assert!(matches!(err, GenerationError::Exhausted { attempts: 3, .. }));
        assert_eq!(service.submitted().len(), 3);
    }

    #[tokio::test]
    async fn missing_credential_is_fatal_and_sends_nothing() {
        let service = Arc::new(ScriptedService::new());
        let client = GenerationClient::new(
            service.clone(),
            Arc::new(StaticCredentials::new()),
            RetryPolicy::default(),
        );

        let err = client.generate_image(image("P")).await.unwrap_err();

        assert_eq!(err, GenerationError::MissingCredential("gemini".into()));
        assert!(service.submitted().is_empty());
    }

    /// Hands out a different key on every lookup.
    #[derive(Default)]
    struct RotatingCredentials {
        lookups: AtomicUsize,
    }

    impl CredentialProvider for RotatingCredentials {
        fn lookup(&self, _service_id: &str) -> Option<Credential> {
            let n = self.lookups.fetch_add(1, Ordering::SeqCst);
            Some(Credential::new(format!("key-{n}")))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_reads_the_credential_again() {
        let service = Arc::new(ScriptedService::new());
        service.push_submit_error(ServiceError::transient("model overloaded"));
        service.push_status_error(ServiceError::transient("service unavailable"));
        let credentials = Arc::new(RotatingCredentials::default());
        let client = GenerationClient::new(
            service.clone(),
            credentials.clone(),
            RetryPolicy::default().without_jitter(),
        );

        let handle = client
            .generate_video(VideoParams {
                prompt: "waves".into(),
                image: None,
                aspect_ratio: VideoAspectRatio::Landscape,
                resolution: VideoResolution::Hd,
            })
            .await
            .unwrap();
        assert_eq!(credentials.lookups.load(Ordering::SeqCst), 2);

        client.operation_status(&handle).await.unwrap();
        assert_eq!(credentials.lookups.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn video_returns_operation_handle() {
        let service = Arc::new(ScriptedService::new());
        let client = client_for(service);

        let handle = client
            .generate_video(VideoParams {
                prompt: "waves".into(),
                image: None,
                aspect_ratio: VideoAspectRatio::Landscape,
                resolution: VideoResolution::Hd,
            })
            .await
            .unwrap();

        assert!(handle.name().starts_with("operations/"));
    }

    #[tokio::test]
    async fn download_is_attempted_once() {
        let service = Arc::new(ScriptedService::new());
        service.push_download_error(ServiceError::transient("connection reset, try again later"));
        let client = client_for(service.clone());
        let descriptor = ArtifactDescriptor {
            uri: "scripted://operations/x".into(),
            mime_type: None,
        };

        let err = client.download(&descriptor).await.unwrap_err();

        assert!(matches!(err, GenerationError::Service(_)));
        assert_eq!(service.downloads(), 1);
    }
}
