//! API key resolution for the model and hosting endpoints.
//!
//! A key can come from three places, checked in this order:
//!
//! 1. **Direct value** in the config file (local testing)
//! 2. **File reference**, e.g. a mounted `/run/secrets/imgbb_key`
//! 3. **Environment variable**, e.g. `IMGBB_API_KEY`

use secrecy::SecretString;
use std::fs;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from the first non-empty source.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        return fs::read_to_string(&expanded)
            .map(|content| SecretString::from(content.trim().to_string()))
            .map_err(|e| SecretError::FileReadError {
                path: expanded,
                source: e,
            });
    }

    if let Some(name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(name) {
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Like [`resolve_secret`], but an unset env var or a missing source is `None`.
///
/// Used for keys that only some deployments need (the hosting key is absent
/// when nobody uploads chapters).
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) | Err(SecretError::EnvVarNotSet { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Expands a leading `~` to the home directory. `~user/...` is not supported.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_direct_value_takes_priority() {
        let secret = resolve_secret(Some("direct"), Some("/nonexistent"), Some("UNUSED")).unwrap();
        assert_eq!(secret.expose_secret(), "direct");
    }

    #[test]
    fn test_file_takes_priority_over_env() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "from-file").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let secret = resolve_secret(None, Some(&path), Some("CHAPTERFLOW_TEST_UNSET")).unwrap();
        assert_eq!(secret.expose_secret(), "from-file");
    }

    #[test]
    fn test_env_var_fallback() {
        // PATH is set in every test environment.
        let secret = resolve_secret(None, None, Some("PATH")).unwrap();
        assert!(!secret.expose_secret().is_empty());
    }

    #[test]
    fn test_empty_strings_are_skipped() {
        let err = resolve_secret(Some(""), Some(""), Some("")).unwrap_err();
        assert!(matches!(err, SecretError::NoSourceProvided));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = resolve_secret(None, Some("/nonexistent/key"), None).unwrap_err();
        assert!(matches!(err, SecretError::FileReadError { .. }));
    }

    #[test]
    fn test_optional_treats_unset_env_as_absent() {
        let secret =
            resolve_secret_optional(None, None, Some("CHAPTERFLOW_DEFINITELY_UNSET_KEY")).unwrap();
        assert!(secret.is_none());

        let secret = resolve_secret_optional(None, None, None).unwrap();
        assert!(secret.is_none());
    }

    #[test]
    fn test_optional_still_reports_unreadable_file() {
        assert!(resolve_secret_optional(None, Some("/nonexistent/key"), None).is_err());
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/run/secrets/key"), "/run/secrets/key");
        assert!(!expand_home("~/key").starts_with('~'));
    }
}
