//! ドメインモデル（id、リクエスト、成果物、エラー）

pub mod artifact;
pub mod errors;
pub mod ids;
pub mod request;

pub use artifact::{ArtifactKind, ArtifactPatch, ArtifactPayload, ArtifactRecord, ArtifactStatus};
pub use errors::{ErrorKind, GenerationError, RetryError, Retryable, ServiceError, StoreError};
pub use ids::{ArtifactId, Id, IdMarker, ParseIdError, PassId};
pub use request::{
    AspectRatio, DeadLetterRecord, EditParams, ExtendParams, GenerationRequest, ImageParams, MediaInput,
    ParseParamError, QueuedRequestRecord, RequestType, ScriptParams, ScriptPlatform,
    VideoAspectRatio, VideoParams, VideoResolution,
};
