//! CredentialProvider port - サービス識別子で秘密情報を引く
//!
//! 呼び出しのたびに引く。コアは資格情報をキャッシュしない。

use std::collections::HashMap;
use std::fmt;

/// サービスの秘密情報。`Debug` は値を出さない
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// ログと CLI 向けの `abcd...wxyz` 形式の表示
    pub fn masked(&self) -> String {
        let secret = &self.0;
        let chars: Vec<char> = secret.chars().collect();
        if chars.len() <= 8 {
            let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
            format!("****{tail}")
        } else {
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{head}...{tail}")
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.masked())
    }
}

pub trait CredentialProvider: Send + Sync {
    fn lookup(&self, service_id: &str) -> Option<Credential>;
}

/// メモリ上の資格情報（テスト、組み込み用）
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    secrets: HashMap<String, Credential>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, service_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(service_id.into(), Credential::new(secret));
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn lookup(&self, service_id: &str) -> Option<Credential> {
        self.secrets.get(service_id).cloned()
    }
}
