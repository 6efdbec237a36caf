//! Generation requests and the queued-request record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::artifact::ArtifactKind;
use super::ids::ArtifactId;

/// Image aspect ratios accepted by the image model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "4:3")]
    Wide,
    #[serde(rename = "3:4")]
    Tall,
}

impl AspectRatio {
    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Wide => "4:3",
            AspectRatio::Tall => "3:4",
        }
    }
}

/// Video aspect ratios accepted by the video model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoAspectRatio {
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
}

impl VideoAspectRatio {
    pub fn as_str(self) -> &'static str {
        match self {
            VideoAspectRatio::Landscape => "16:9",
            VideoAspectRatio::Portrait => "9:16",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoResolution {
    #[serde(rename = "720p")]
    Hd,
    #[serde(rename = "1080p")]
    FullHd,
}

impl VideoResolution {
    pub fn as_str(self) -> &'static str {
        match self {
            VideoResolution::Hd => "720p",
            VideoResolution::FullHd => "1080p",
        }
    }
}

/// Target platform of a video script; decides its length and pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScriptPlatform {
    TikTok,
    YouTube,
}

impl ScriptPlatform {
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptPlatform::TikTok => "TikTok",
            ScriptPlatform::YouTube => "YouTube",
        }
    }
}

/// Error for the `FromStr` impls of the parameter enums.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported {what} '{value}'")]
pub struct ParseParamError {
    what: &'static str,
    value: String,
}

impl ParseParamError {
    fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}

impl FromStr for AspectRatio {
    type Err = ParseParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1:1" => Ok(AspectRatio::Square),
            "16:9" => Ok(AspectRatio::Landscape),
            "9:16" => Ok(AspectRatio::Portrait),
            "4:3" => Ok(AspectRatio::Wide),
            "3:4" => Ok(AspectRatio::Tall),
            other => Err(ParseParamError::new("aspect ratio", other)),
        }
    }
}

impl FromStr for VideoAspectRatio {
    type Err = ParseParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "16:9" => Ok(VideoAspectRatio::Landscape),
            "9:16" => Ok(VideoAspectRatio::Portrait),
            other => Err(ParseParamError::new("video aspect ratio", other)),
        }
    }
}

impl FromStr for VideoResolution {
    type Err = ParseParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "720p" => Ok(VideoResolution::Hd),
            "1080p" => Ok(VideoResolution::FullHd),
            other => Err(ParseParamError::new("video resolution", other)),
        }
    }
}

impl FromStr for ScriptPlatform {
    type Err = ParseParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tiktok" => Ok(ScriptPlatform::TikTok),
            "youtube" => Ok(ScriptPlatform::YouTube),
            _ => Err(ParseParamError::new("script platform", s)),
        }
    }
}

/// Inline media sent along with a request (base64 encoded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInput {
    pub data_base64: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageParams {
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditParams {
    pub prompt: String,
    pub image: MediaInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoParams {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<MediaInput>,
    pub aspect_ratio: VideoAspectRatio,
    pub resolution: VideoResolution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendParams {
    pub prompt: String,
    /// Service URI of the video being extended.
    pub video_uri: String,
    pub aspect_ratio: VideoAspectRatio,
    pub resolution: VideoResolution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptParams {
    pub topic: String,
    pub platform: ScriptPlatform,
}

/// Discriminant of a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    GenerateImage,
    EditImage,
    GenerateVideo,
    ExtendVideo,
    GenerateScript,
}

impl RequestType {
    /// Asynchronous types return an operation handle that must be polled.
    pub fn is_async(self) -> bool {
        matches!(self, RequestType::GenerateVideo | RequestType::ExtendVideo)
    }

    pub fn artifact_kind(self) -> ArtifactKind {
        match self {
            RequestType::GenerateImage | RequestType::EditImage => ArtifactKind::Image,
            RequestType::GenerateVideo | RequestType::ExtendVideo => ArtifactKind::Video,
            RequestType::GenerateScript => ArtifactKind::Script,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::GenerateImage => "generate_image",
            RequestType::EditImage => "edit_image",
            RequestType::GenerateVideo => "generate_video",
            RequestType::ExtendVideo => "extend_video",
            RequestType::GenerateScript => "generate_script",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Everything needed to replay a request against the generation service.
///
/// Persisted adjacently tagged: `{"request_type": ..., "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request_type", content = "payload", rename_all = "snake_case")]
pub enum GenerationRequest {
    GenerateImage(ImageParams),
    EditImage(EditParams),
    GenerateVideo(VideoParams),
    ExtendVideo(ExtendParams),
    GenerateScript(ScriptParams),
}

impl GenerationRequest {
    pub fn request_type(&self) -> RequestType {
        match self {
            GenerationRequest::GenerateImage(_) => RequestType::GenerateImage,
            GenerationRequest::EditImage(_) => RequestType::EditImage,
            GenerationRequest::GenerateVideo(_) => RequestType::GenerateVideo,
            GenerationRequest::ExtendVideo(_) => RequestType::ExtendVideo,
            GenerationRequest::GenerateScript(_) => RequestType::GenerateScript,
        }
    }

    /// The text shown for the placeholder artifact.
    pub fn prompt_text(&self) -> &str {
        match self {
            GenerationRequest::GenerateImage(p) => &p.prompt,
            GenerationRequest::EditImage(p) => &p.prompt,
            GenerationRequest::GenerateVideo(p) => &p.prompt,
            GenerationRequest::ExtendVideo(p) => &p.prompt,
            GenerationRequest::GenerateScript(p) => &p.topic,
        }
    }
}

/// A durable work item awaiting delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequestRecord {
    /// Same id as the paired artifact.
    pub id: ArtifactId,
    pub request: GenerationRequest,
    pub created_at: DateTime<Utc>,
    /// Failed sync attempts so far.
    #[serde(default)]
    pub retry_count: u32,
}

impl QueuedRequestRecord {
    pub fn new(id: ArtifactId, request: GenerationRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            request,
            created_at,
            retry_count: 0,
        }
    }

    pub fn request_type(&self) -> RequestType {
        self.request.request_type()
    }
}

/// A queued request that was given up on, kept so it can be resurrected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub record: QueuedRequestRecord,
    /// Message of the last failure, or the reason given when abandoned.
    pub reason: String,
}

impl DeadLetterRecord {
    pub fn id(&self) -> ArtifactId {
        self.record.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn request_is_persisted_adjacently_tagged() {
        let request = GenerationRequest::GenerateImage(ImageParams {
            prompt: "P".into(),
            aspect_ratio: AspectRatio::Landscape,
        });

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "request_type": "generate_image",
                "payload": { "prompt": "P", "aspect_ratio": "16:9" }
            })
        );
    }

    #[test]
    fn legacy_record_without_retry_count_defaults_to_zero() {
        let value = json!({
            "id": "01HZY3A7Q4M5N6P7R8S9T0V1W2",
            "request": {
                "request_type": "generate_script",
                "payload": { "topic": "story", "platform": "TikTok" }
            },
            "created_at": "2024-01-01T12:00:00Z"
        });

        let record: QueuedRequestRecord = serde_json::from_value(value).unwrap();
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.request_type(), RequestType::GenerateScript);
    }

    #[rstest]
    #[case::image(RequestType::GenerateImage, false, ArtifactKind::Image)]
    #[case::edit(RequestType::EditImage, false, ArtifactKind::Image)]
    #[case::video(RequestType::GenerateVideo, true, ArtifactKind::Video)]
    #[case::extend(RequestType::ExtendVideo, true, ArtifactKind::Video)]
    #[case::script(RequestType::GenerateScript, false, ArtifactKind::Script)]
    fn request_type_traits(
        #[case] request_type: RequestType,
        #[case] is_async: bool,
        #[case] kind: ArtifactKind,
    ) {
        assert_eq!(request_type.is_async(), is_async);
        assert_eq!(request_type.artifact_kind(), kind);
    }

    #[rstest]
    #[case("TikTok", ScriptPlatform::TikTok)]
    #[case("youtube", ScriptPlatform::YouTube)]
    fn platform_parsing_ignores_case(#[case] raw: &str, #[case] expected: ScriptPlatform) {
        assert_eq!(raw.parse::<ScriptPlatform>().unwrap(), expected);
    }

    #[test]
    fn unknown_aspect_ratio_is_rejected() {
        let err = "2:1".parse::<AspectRatio>().unwrap_err();
        assert!(err.to_string().contains("2:1"));
    }
}
