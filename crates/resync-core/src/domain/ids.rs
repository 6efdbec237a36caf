//! ドメイン識別子（型付き ID）
//!
//! id はすべて `Id<T>` で包んだ ULID。`T` はサイズ 0 のマーカー型。
//! ULID は作成時刻順に並ぶので、同じミリ秒に作られたレコードの順序も id で安定する。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// id の種類を表すマーカートレイト。表示用の接頭辞を持つ
pub trait IdMarker: Send + Sync + 'static {
    /// Prefix used by `Display` (e.g. "artifact-").
    fn prefix() -> &'static str;
}

/// 汎用 id 型
///
/// シリアライズは ULID 文字列のみ。`Display` は種類の接頭辞を付ける
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when a string is not a valid id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id '{0}'")]
pub struct ParseIdError(String);

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    /// Accepts both the prefixed display form and a bare ULID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self::from_ulid)
            .map_err(|_| ParseIdError(s.to_string()))
    }
}

// ========================================
// Markers
// ========================================

/// 成果物のマーカー。キュー済みリクエストは成果物と同じ id を使う
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Artifact {}

impl IdMarker for Artifact {
    fn prefix() -> &'static str {
        "artifact-"
    }
}

/// 同期パスのマーカー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pass {}

impl IdMarker for Pass {
    fn prefix() -> &'static str {
        "pass-"
    }
}

/// Identifier of an artifact and of its queued request while unresolved.
pub type ArtifactId = Id<Artifact>;

/// Identifier of one queue drain.
pub type PassId = Id<Pass>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_kind_prefix() {
        let artifact = ArtifactId::from_ulid(Ulid::new());
        let pass = PassId::from_ulid(Ulid::new());

        assert!(artifact.to_string().starts_with("artifact-"));
        assert!(pass.to_string().starts_with("pass-"));
    }

    #[test]
    fn parses_prefixed_and_bare_forms() {
        let ulid = Ulid::new();
        let id = ArtifactId::from_ulid(ulid);

        assert_eq!(id.to_string().parse::<ArtifactId>().unwrap(), id);
        assert_eq!(ulid.to_string().parse::<ArtifactId>().unwrap(), id);
        assert!("artifact-not-a-ulid".parse::<ArtifactId>().is_err());
    }

    #[test]
    fn serializes_as_bare_ulid() {
        let ulid = Ulid::new();
        let id = ArtifactId::from_ulid(ulid);

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{ulid}\""));

        let back: ArtifactId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let first = ArtifactId::from_ulid(Ulid::from_parts(1_000, 7));
        let second = ArtifactId::from_ulid(Ulid::from_parts(2_000, 1));
        assert!(first < second);
    }
}
