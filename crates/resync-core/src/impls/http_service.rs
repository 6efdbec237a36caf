//! Generation service over the Generative Language REST API.
//!
//! | Request | Model | Method |
//! |---|---|---|
//! | generate_image | `imagen-4.0-generate-001` | `:predict` |
//! | edit_image | `gemini-2.5-flash-image` | `:generateContent` |
//! | generate_script | `gemini-2.5-flash` | `:generateContent` |
//! | generate_video / extend_video | `veo-3.1-generate-preview` | `:predictLongRunning` |
//!
//! Request building and response parsing are plain functions over
//! `serde_json::Value`; only `send` touches the network.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::domain::{ArtifactPayload, GenerationRequest, ServiceError};
use crate::ports::{
    ArtifactDescriptor, Credential, GenerationService, OperationHandle, OperationStatus,
    Submission,
};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const IMAGE_MODEL: &str = "imagen-4.0-generate-001";
const EDIT_MODEL: &str = "gemini-2.5-flash-image";
const SCRIPT_MODEL: &str = "gemini-2.5-flash";
const VIDEO_MODEL: &str = "veo-3.1-generate-preview";

const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct HttpGenerationService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGenerationService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::fatal(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ServiceError> {
        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ServiceError::from_status(status.as_u16(), error_message(&body)))
    }

    async fn post_json(
        &self,
        path: &str,
        body: &Value,
        credential: &Credential,
    ) -> Result<Value, ServiceError> {
        let url = format!("{}/{path}", self.base_url);
        tracing::debug!(%url, "posting generation request");
        let response = self
            .send(
                self.client
                    .post(&url)
                    .header(API_KEY_HEADER, credential.expose())
                    .json(body),
            )
            .await?;
        response.json().await.map_err(classify_transport)
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn submit(
        &self,
        request: &GenerationRequest,
        credential: &Credential,
    ) -> Result<Submission, ServiceError> {
        let (path, body) = build_request(request);
        let response = self.post_json(&path, &body, credential).await?;

        match request {
            GenerationRequest::GenerateImage(_) => parse_predicted_image(&response).map(Submission::Completed),
            GenerationRequest::EditImage(_) => parse_inline_image(&response).map(Submission::Completed),
            GenerationRequest::GenerateScript(_) => parse_text(&response).map(Submission::Completed),
            GenerationRequest::GenerateVideo(_) | GenerationRequest::ExtendVideo(_) => {
                parse_operation_name(&response).map(Submission::Pending)
            }
        }
    }

    async fn operation_status(
        &self,
        handle: &OperationHandle,
        credential: &Credential,
    ) -> Result<OperationStatus, ServiceError> {
        let url = format!("{}/{}", self.base_url, handle.name());
        let response = self
            .send(self.client.get(&url).header(API_KEY_HEADER, credential.expose()))
            .await?;
        let body: Value = response.json().await.map_err(classify_transport)?;
        Ok(parse_operation_status(&body))
    }

    async fn download(
        &self,
        descriptor: &ArtifactDescriptor,
        credential: &Credential,
    ) -> Result<Vec<u8>, ServiceError> {
        let response = self
            .send(
                self.client
                    .get(&descriptor.uri)
                    .header(API_KEY_HEADER, credential.expose()),
            )
            .await?;
        let bytes = response.bytes().await.map_err(classify_transport)?;
        Ok(bytes.to_vec())
    }
}

fn classify_transport(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() || err.is_connect() {
        ServiceError::transient(format!("request failed: {err}"))
    } else {
        ServiceError::from_message(format!("request failed: {err}"))
    }
}

/// Pull `error.message` (and `error.status`) out of an error body.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    let error = &value["error"];
    match (error["status"].as_str(), error["message"].as_str()) {
        (Some(status), Some(message)) => format!("{status}: {message}"),
        (None, Some(message)) => message.to_string(),
        _ => body.trim().to_string(),
    }
}

/// Endpoint path (relative to the base url) and JSON body for a request.
pub(crate) fn build_request(request: &GenerationRequest) -> (String, Value) {
    match request {
        GenerationRequest::GenerateImage(params) => (
            format!("models/{IMAGE_MODEL}:predict"),
            json!({
                "instances": [{ "prompt": params.prompt }],
                "parameters": {
                    "sampleCount": 1,
                    "aspectRatio": params.aspect_ratio.as_str(),
                    "outputOptions": { "mimeType": "image/jpeg" },
                },
            }),
        ),
        GenerationRequest::EditImage(params) => (
            format!("models/{EDIT_MODEL}:generateContent"),
            json!({
                "contents": [{
                    "parts": [
                        { "inlineData": { "data": params.image.data_base64, "mimeType": params.image.mime_type } },
                        { "text": params.prompt },
                    ],
                }],
                "generationConfig": { "responseModalities": ["IMAGE"] },
            }),
        ),
        GenerationRequest::GenerateScript(params) => (
            format!("models/{SCRIPT_MODEL}:generateContent"),
            json!({
                "contents": [{
                    "parts": [{ "text": script_prompt(&params.topic, params.platform.as_str()) }],
                }],
            }),
        ),
        GenerationRequest::GenerateVideo(params) => {
            let mut instance = json!({ "prompt": params.prompt });
            if let Some(image) = &params.image {
                instance["image"] = json!({
                    "bytesBase64Encoded": image.data_base64,
                    "mimeType": image.mime_type,
                });
            }
            (
                format!("models/{VIDEO_MODEL}:predictLongRunning"),
                json!({
                    "instances": [instance],
                    "parameters": {
                        "aspectRatio": params.aspect_ratio.as_str(),
                        "resolution": params.resolution.as_str(),
                    },
                }),
            )
        }
        GenerationRequest::ExtendVideo(params) => (
            format!("models/{VIDEO_MODEL}:predictLongRunning"),
            json!({
                "instances": [{
                    "prompt": params.prompt,
                    "video": { "uri": params.video_uri },
                }],
                "parameters": {
                    "aspectRatio": params.aspect_ratio.as_str(),
                    "resolution": params.resolution.as_str(),
                },
            }),
        ),
    }
}

fn script_prompt(topic: &str, platform: &str) -> String {
    format!(
        "Write a short video script for {platform} about: {topic}. \
         Include a hook, numbered scenes with visuals and narration, and a call to action."
    )
}

pub(crate) fn parse_predicted_image(response: &Value) -> Result<ArtifactPayload, ServiceError> {
    let prediction = &response["predictions"][0];
    let data = prediction["bytesBase64Encoded"]
        .as_str()
        .filter(|d| !d.is_empty())
        .ok_or_else(|| ServiceError::fatal("image generation returned no images"))?;
    let mime_type = prediction["mimeType"].as_str().unwrap_or("image/jpeg");
    Ok(ArtifactPayload::image(mime_type, data))
}

fn candidate_parts(response: &Value) -> &[Value] {
    response["candidates"][0]["content"]["parts"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
}

pub(crate) fn parse_inline_image(response: &Value) -> Result<ArtifactPayload, ServiceError> {
    candidate_parts(response)
        .iter()
        .find_map(|part| {
            let inline = part.get("inlineData")?;
            let data = inline["data"].as_str()?;
            let mime_type = inline["mimeType"].as_str().unwrap_or("image/png");
            Some(ArtifactPayload::image(mime_type, data))
        })
        .ok_or_else(|| ServiceError::fatal("image editing returned no image data"))
}

pub(crate) fn parse_text(response: &Value) -> Result<ArtifactPayload, ServiceError> {
    let text: String = candidate_parts(response)
        .iter()
        .filter_map(|part| part["text"].as_str())
        .collect();
    if text.trim().is_empty() {
        return Err(ServiceError::fatal("script generation returned no text"));
    }
    Ok(ArtifactPayload::script(text))
}

pub(crate) fn parse_operation_name(response: &Value) -> Result<OperationHandle, ServiceError> {
    response["name"]
        .as_str()
        .map(OperationHandle::new)
        .ok_or_else(|| ServiceError::fatal("video generation returned no operation name"))
}

pub(crate) fn parse_operation_status(response: &Value) -> OperationStatus {
    let done = response["done"].as_bool().unwrap_or(false);
    let error = response["error"]["message"].as_str().map(str::to_string);
    let video = &response["response"]["generateVideoResponse"]["generatedSamples"][0]["video"];
    let result = video["uri"].as_str().map(|uri| ArtifactDescriptor {
        uri: uri.to_string(),
        mime_type: video["mimeType"].as_str().map(str::to_string),
    });
    OperationStatus { done, result, error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AspectRatio, ExtendParams, ImageParams, ScriptParams, ScriptPlatform, VideoAspectRatio,
        Retryable, VideoParams, VideoResolution,
    };

    #[test]
    fn image_request_targets_imagen_predict() {
        let (path, body) = build_request(&GenerationRequest::GenerateImage(ImageParams {
            prompt: "a lighthouse".into(),
            aspect_ratio: AspectRatio::Landscape,
        }));

        assert_eq!(path, "models/imagen-4.0-generate-001:predict");
        assert_eq!(body["instances"][0]["prompt"], "a lighthouse");
        assert_eq!(body["parameters"]["aspectRatio"], "16:9");
    }

    #[test]
    fn video_request_carries_optional_image() {
        let (path, body) = build_request(&GenerationRequest::GenerateVideo(VideoParams {
            prompt: "waves".into(),
            image: None,
            aspect_ratio: VideoAspectRatio::Portrait,
            resolution: VideoResolution::FullHd,
        }));

        assert_eq!(path, "models/veo-3.1-generate-preview:predictLongRunning");
        assert!(body["instances"][0].get("image").is_none());
        assert_eq!(body["parameters"]["resolution"], "1080p");
    }

    #[test]
    fn extend_request_references_source_video() {
        let (_, body) = build_request(&GenerationRequest::ExtendVideo(ExtendParams {
            prompt: "keep going".into(),
            video_uri: "https://host/files/v1".into(),
            aspect_ratio: VideoAspectRatio::Landscape,
            resolution: VideoResolution::Hd,
        }));

        assert_eq!(body["instances"][0]["video"]["uri"], "https://host/files/v1");
    }

    #[test]
    fn script_request_mentions_platform() {
        let (_, body) = build_request(&GenerationRequest::GenerateScript(ScriptParams {
            topic: "coffee".into(),
            platform: ScriptPlatform::TikTok,
        }));

        let text = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(text.contains("TikTok"));
        assert!(text.contains("coffee"));
    }

    #[test]
    fn parses_predicted_image() {
        let response = json!({"predictions": [{"bytesBase64Encoded": "AAAA", "mimeType": "image/jpeg"}]});
        assert_eq!(
            parse_predicted_image(&response).unwrap(),
            ArtifactPayload::image("image/jpeg", "AAAA")
        );
        assert!(!parse_predicted_image(&json!({"predictions": []})).unwrap_err().is_transient());
    }

    #[test]
    fn parses_inline_image_after_text_parts() {
        let response = json!({"candidates": [{"content": {"parts": [
            {"text": "here you go"},
            {"inlineData": {"data": "BBBB", "mimeType": "image/png"}}
        ]}}]});
        assert_eq!(
            parse_inline_image(&response).unwrap(),
            ArtifactPayload::image("image/png", "BBBB")
        );
    }

    #[test]
    fn joins_text_parts() {
        let response = json!({"candidates": [{"content": {"parts": [{"text": "Scene 1. "}, {"text": "Scene 2."}]}}]});
        assert_eq!(
            parse_text(&response).unwrap(),
            ArtifactPayload::script("Scene 1. Scene 2.")
        );
        assert!(parse_text(&json!({})).is_err());
    }

    #[test]
    fn parses_operation_lifecycle() {
        let running = json!({"name": "models/veo/operations/abc"});
        assert_eq!(parse_operation_name(&running).unwrap().name(), "models/veo/operations/abc");
        assert_eq!(parse_operation_status(&running), OperationStatus::running());

        let done = json!({
            "name": "models/veo/operations/abc",
            "done": true,
            "response": {"generateVideoResponse": {"generatedSamples": [{"video": {"uri": "https://host/v.mp4"}}]}}
        });
        let status = parse_operation_status(&done);
        assert!(status.done);
        assert_eq!(status.result.unwrap().uri, "https://host/v.mp4");

        let failed = json!({"done": true, "error": {"code": 3, "message": "prompt blocked"}});
        let status = parse_operation_status(&failed);
        assert_eq!(status.error.as_deref(), Some("prompt blocked"));
        assert_eq!(status.result, None);
    }

    #[test]
    fn error_bodies_keep_status_for_classification() {
        let body = r#"{"error": {"code": 503, "message": "The model is overloaded.", "status": "UNAVAILABLE"}}"#;
        assert_eq!(error_message(body), "UNAVAILABLE: The model is overloaded.");
        assert!(ServiceError::from_status(400, error_message(body)).is_transient());
        assert_eq!(error_message("plain text"), "plain text");
    }
}
