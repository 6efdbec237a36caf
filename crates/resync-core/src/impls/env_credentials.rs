use crate::ports::{Credential, CredentialProvider};

/// Reads `<SERVICE>_API_KEY`, falling back to `API_KEY`.
///
/// The environment is read on every lookup, so a key exported after start-up
/// is picked up by the next call.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl EnvCredentials {
    pub fn variable_for(service_id: &str) -> String {
        let normalized: String = service_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{normalized}_API_KEY")
    }
}

impl CredentialProvider for EnvCredentials {
    fn lookup(&self, service_id: &str) -> Option<Credential> {
        [Self::variable_for(service_id), "API_KEY".to_string()]
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|value| !value.trim().is_empty())
            .map(Credential::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("gemini", "GEMINI_API_KEY")]
    #[case("veo-video", "VEO_VIDEO_API_KEY")]
    fn variable_names(#[case] service: &str, #[case] expected: &str) {
        assert_eq!(EnvCredentials::variable_for(service), expected);
    }

    #[test]
    fn unknown_service_without_fallback_is_none() {
        // unique name so parallel tests never collide on the variable
        let service = "resync-test-unset-service";
        if std::env::var("API_KEY").is_err() {
            assert!(EnvCredentials.lookup(service).is_none());
        }
    }
}
