//! 成果物レコード: 生成リクエスト一件の、ユーザーに見える結果

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::ArtifactId;

/// 成果物の状態
///
/// 状態遷移:
/// - Queued -> Completed
/// - Queued -> Failed
/// - Failed -> Queued（明示的な resurrect のみ）
///
/// 表示は `status` だけで決める:
/// Queued = 再試行待ち、Failed = 断念（error_message を参照）、Completed = 完了
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Queued,
    Completed,
    Failed,
}

impl ArtifactStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ArtifactStatus::Completed | ArtifactStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactStatus::Queued => "queued",
            ArtifactStatus::Completed => "completed",
            ArtifactStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Image,
    Video,
    Script,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Image => "image",
            ArtifactKind::Video => "video",
            ArtifactKind::Script => "script",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Result data of a completed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactPayload {
    Image {
        mime_type: String,
        data_base64: String,
    },
    Video {
        mime_type: String,
        data_base64: String,
        /// Where the service hosted the video; needed to extend it later.
        source_uri: String,
    },
    Script {
        text: String,
    },
}

impl ArtifactPayload {
    pub fn image(mime_type: impl Into<String>, data_base64: impl Into<String>) -> Self {
        ArtifactPayload::Image {
            mime_type: mime_type.into(),
            data_base64: data_base64.into(),
        }
    }

    pub fn video(mime_type: impl Into<String>, bytes: &[u8], source_uri: impl Into<String>) -> Self {
        ArtifactPayload::Video {
            mime_type: mime_type.into(),
            data_base64: STANDARD.encode(bytes),
            source_uri: source_uri.into(),
        }
    }

    pub fn script(text: impl Into<String>) -> Self {
        ArtifactPayload::Script { text: text.into() }
    }

    pub fn kind(&self) -> ArtifactKind {
        match self {
            ArtifactPayload::Image { .. } => ArtifactKind::Image,
            ArtifactPayload::Video { .. } => ArtifactKind::Video,
            ArtifactPayload::Script { .. } => ArtifactKind::Script,
        }
    }

    /// `data:` URL for media payloads, `None` for scripts.
    pub fn data_url(&self) -> Option<String> {
        match self {
            ArtifactPayload::Image {
                mime_type,
                data_base64,
            }
            | ArtifactPayload::Video {
                mime_type,
                data_base64,
                ..
            } => Some(format!("data:{mime_type};base64,{data_base64}")),
            ArtifactPayload::Script { .. } => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ArtifactPayload::Image { data_base64, .. }
            | ArtifactPayload::Video { data_base64, .. } => data_base64.is_empty(),
            ArtifactPayload::Script { text } => text.is_empty(),
        }
    }
}

/// 要求された成果物一件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: ArtifactId,
    pub kind: ArtifactKind,
    pub prompt_text: String,
    pub status: ArtifactStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ArtifactPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    /// 同期キューで待っているリクエストのプレースホルダー
    pub fn queued(
        id: ArtifactId,
        kind: ArtifactKind,
        prompt_text: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            prompt_text: prompt_text.into(),
            status: ArtifactStatus::Queued,
            payload: None,
            error_message: None,
            created_at,
        }
    }

    pub fn completed(
        id: ArtifactId,
        prompt_text: impl Into<String>,
        payload: ArtifactPayload,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind: payload.kind(),
            prompt_text: prompt_text.into(),
            status: ArtifactStatus::Completed,
            payload: Some(payload),
            error_message: None,
            created_at,
        }
    }

    /// 部分更新を適用する。payload と error は同時に持たない
    pub fn apply(&mut self, patch: ArtifactPatch) {
        if let Some(prompt_text) = patch.prompt_text {
            self.prompt_text = prompt_text;
        }
        if let Some(payload) = patch.payload {
            self.payload = Some(payload);
        }
        if let Some(error_message) = patch.error_message {
            self.error_message = Some(error_message);
        }
        if let Some(status) = patch.status {
            self.status = status;
            match status {
                ArtifactStatus::Completed => self.error_message = None,
                ArtifactStatus::Failed => self.payload = None,
                ArtifactStatus::Queued => {
                    self.payload = None;
                    self.error_message = None;
                }
            }
        }
    }
}

/// Partial artifact update (`update(id, partialFields)`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactPatch {
    pub status: Option<ArtifactStatus>,
    pub payload: Option<ArtifactPayload>,
    pub error_message: Option<String>,
    pub prompt_text: Option<String>,
}

impl ArtifactPatch {
    pub fn completed(payload: ArtifactPayload) -> Self {
        Self {
            status: Some(ArtifactStatus::Completed),
            payload: Some(payload),
            ..Self::default()
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            status: Some(ArtifactStatus::Failed),
            error_message: Some(error_message.into()),
            ..Self::default()
        }
    }

    pub fn changes_status(&self) -> bool {
        self.status.is_some()
    }
}
