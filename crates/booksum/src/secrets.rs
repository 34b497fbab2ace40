//! API key resolution from multiple sources.
//!
//! Sources are tried in priority order:
//!
//! 1. **Direct value** - for quick local runs (`"api_key": "..."`)
//! 2. **File reference** - for mounted secrets (`"api_key_file": "/run/secrets/gemini"`)
//! 3. **Env var reference** - for deployments (`"api_key_env_var": "GEMINI_API_KEY"`)

use secrecy::SecretString;
use std::fs;

use crate::config::AiConfig;

/// Error type for secret resolution failures.
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

/// Resolves a secret from the first non-empty source: direct value, file
/// contents, then environment variable.
///
/// ```ignore
/// use booksum::secrets::resolve_secret;
///
/// let key = resolve_secret(None, Some("~/.secrets/gemini"), Some("GEMINI_API_KEY"))?;
/// ```
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct {
        if !value.is_empty() {
            return Ok(SecretString::from(value.to_string()));
        }
    }

    if let Some(path) = file_path {
        if !path.is_empty() {
            let expanded = expand_home(path);
            return match fs::read_to_string(&expanded) {
                Ok(content) => Ok(SecretString::from(content.trim().to_string())),
                Err(e) => Err(SecretError::FileReadError {
                    path: expanded,
                    source: e,
                }),
            };
        }
    }

    if let Some(var_name) = env_var {
        if !var_name.is_empty() {
            return match std::env::var(var_name) {
                Ok(value) => Ok(SecretString::from(value.trim().to_string())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: var_name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: var_name.to_string(),
                }),
            };
        }
    }

    Err(SecretError::NoSourceProvided)
}

/// Resolves the generative AI API key from the `ai` config section.
pub fn resolve_api_key(config: &AiConfig) -> Result<SecretString> {
    resolve_secret(
        config.api_key.as_deref(),
        config.api_key_file.as_deref(),
        config.api_key_env_var.as_deref(),
    )
}

/// Expands a leading `~` to the user's home directory.
///
/// `~user/path` is not supported.
pub fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            if path == "~" {
                return home.to_string_lossy().into_owned();
            }
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_direct_value_takes_priority() {
        let secret = resolve_secret(Some("direct"), Some("/nonexistent"), Some("NOPE")).unwrap();
        assert_eq!(secret.expose_secret(), "direct");
    }

    #[test]
    fn test_file_value_is_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  from-file  ").unwrap();

        let path = file.path().to_string_lossy().to_string();
        let secret = resolve_secret(None, Some(&path), None).unwrap();
        assert_eq!(secret.expose_secret(), "from-file");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = resolve_secret(None, Some("/nonexistent/secret"), Some("IGNORED"));
        assert!(matches!(result, Err(SecretError::FileReadError { .. })));
    }

    #[test]
    #[serial]
    fn test_env_var_fallback() {
        std::env::set_var("BOOKSUM_TEST_API_KEY", "from-env\n");
        let secret = resolve_secret(None, None, Some("BOOKSUM_TEST_API_KEY")).unwrap();
        assert_eq!(secret.expose_secret(), "from-env");
        std::env::remove_var("BOOKSUM_TEST_API_KEY");
    }

    #[test]
    #[serial]
    fn test_env_var_not_set() {
        std::env::remove_var("BOOKSUM_TEST_MISSING_KEY");
        let result = resolve_secret(None, None, Some("BOOKSUM_TEST_MISSING_KEY"));
        assert!(matches!(result, Err(SecretError::EnvVarNotSet { .. })));
    }

    #[test]
    fn test_no_source() {
        assert!(matches!(
            resolve_secret(None, Some(""), None),
            Err(SecretError::NoSourceProvided)
        ));
        assert!(matches!(
            resolve_secret(None, None, None),
            Err(SecretError::NoSourceProvided)
        ));
    }

    #[test]
    fn test_resolve_api_key_from_config() {
        let config = AiConfig {
            api_key: Some("cfg-key".to_string()),
            ..AiConfig::default()
        };
        assert_eq!(resolve_api_key(&config).unwrap().expose_secret(), "cfg-key");
    }

    #[test]
    #[serial]
    fn test_expand_home() {
        let original = std::env::var_os("HOME");
        std::env::set_var("HOME", "/home/reader");
        assert_eq!(expand_home("~/books"), "/home/reader/books");
        assert_eq!(expand_home("~"), "/home/reader");
        assert_eq!(expand_home("/abs/path"), "/abs/path");
        assert_eq!(expand_home("~other/x"), "~other/x");
        match original {
            Some(home) => std::env::set_var("HOME", home),
            None => std::env::remove_var("HOME"),
        }
    }
}
