//! Small cross-cutting helpers.

use std::time::SystemTime;

use crate::error::{EngineError, Result};

/// Resolves a possibly-relative action/redirect URL against the URL of
/// the document that is currently executing (§6: "standard URI reference
/// resolution"). A relative URL with no base fails with a URL error.
pub fn resolve_url(base: &str, candidate: &str) -> Result<String> {
    match url::Url::parse(candidate) {
        Ok(absolute) => Ok(absolute.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = url::Url::parse(base).map_err(|_| {
                EngineError::VerbExecution(format!(
                    "cannot resolve relative url `{candidate}`: base `{base}` is not absolute"
                ))
            })?;
            let resolved = base.join(candidate).map_err(|_| {
                EngineError::VerbExecution(format!(
                    "cannot resolve relative url `{candidate}` against `{base}`"
                ))
            })?;
            Ok(resolved.to_string())
        }
        Err(e) => Err(EngineError::VerbExecution(format!(
            "malformed url `{candidate}`: {e}"
        ))),
    }
}

pub fn rfc3339(t: SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_action_url() {
        let resolved = resolve_url("https://example.com/voice/answer", "/voice/gather").unwrap();
        assert_eq!(resolved, "https://example.com/voice/gather");
    }

    #[test]
    fn absolute_url_passes_through() {
        let resolved = resolve_url("https://example.com/a", "https://other.example/b").unwrap();
        assert_eq!(resolved, "https://other.example/b");
    }

    #[test]
    fn relative_without_base_fails() {
        assert!(resolve_url("not-a-url", "/gather").is_err());
    }
}
