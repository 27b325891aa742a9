//! Hosted API credential resolution
//!
//! Walks the credential chain in order and stops at the first source that yields a key:
//! - explicit key argument
//! - explicit key-file path argument
//! - `$OPENAI_API_KEY`
//! - file named by `$OPENAI_API_KEY_PATH`

use std::fmt;
use std::path::{Path, PathBuf};

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_API_KEY_PATH: &str = "OPENAI_API_KEY_PATH";

/// Where a resolved key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Explicit,
    ExplicitPath,
    EnvKey,
    EnvPath,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::Explicit => "explicit",
            CredentialSource::ExplicitPath => "explicit_path",
            CredentialSource::EnvKey => "env_key",
            CredentialSource::EnvPath => "env_path",
        }
    }
}

/// An API key plus its origin
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    key: String,
    source: CredentialSource,
}

impl Credential {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }
}

// Keys never reach logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("key", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

/// Resolve against the process environment
pub fn resolve_credential(explicit: Option<&str>, explicit_path: Option<&Path>) -> Option<Credential> {
    resolve_credential_with(explicit, explicit_path, |key| std::env::var(key).ok())
}

/// Resolve against an injected environment lookup
pub fn resolve_credential_with<F>(
    explicit: Option<&str>,
    explicit_path: Option<&Path>,
    env: F,
) -> Option<Credential>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
        return Some(Credential {
            key: key.to_string(),
            source: CredentialSource::Explicit,
        });
    }

    if let Some(key) = explicit_path.and_then(read_key_file) {
        return Some(Credential {
            key,
            source: CredentialSource::ExplicitPath,
        });
    }

    if let Some(key) = env(ENV_API_KEY)
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
    {
        return Some(Credential {
            key,
            source: CredentialSource::EnvKey,
        });
    }

    let env_path = env(ENV_API_KEY_PATH)
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)?;
    read_key_file(&env_path).map(|key| Credential {
        key,
        source: CredentialSource::EnvPath,
    })
}

/// Read a key file; unreadable or blank files do not resolve
fn read_key_file(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let key = content.trim();
            if key.is_empty() {
                tracing::warn!(target: "llm", path = %path.display(), "Credential file is empty");
                None
            } else {
                Some(key.to_string())
            }
        }
        Err(e) => {
            tracing::warn!(
                target: "llm",
                path = %path.display(),
                error = %e,
                "Credential file could not be read"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn key_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn env_of(pairs: Vec<(&'static str, String)>) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<&'static str, String> = pairs.into_iter().collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_explicit_key_wins_over_everything() {
        let dir = tempfile::tempdir().unwrap();
        let explicit_path = key_file(&dir, "explicit", "sk-file");
        let env_path = key_file(&dir, "env", "sk-env-file");
        let env = env_of(vec![
            (ENV_API_KEY, "sk-env".to_string()),
            (ENV_API_KEY_PATH, env_path.display().to_string()),
        ]);

        let cred = resolve_credential_with(Some("sk-explicit"), Some(explicit_path.as_path()), env).unwrap();
        assert_eq!(cred.key(), "sk-explicit");
        assert_eq!(cred.source(), CredentialSource::Explicit);
    }

    #[test]
    fn test_explicit_path_beats_env() {
        let dir = tempfile::tempdir().unwrap();
        let explicit_path = key_file(&dir, "explicit", "  sk-file\n");
        let env = env_of(vec![(ENV_API_KEY, "sk-env".to_string())]);

        let cred = resolve_credential_with(None, Some(explicit_path.as_path()), env).unwrap();
        assert_eq!(cred.key(), "sk-file");
        assert_eq!(cred.source(), CredentialSource::ExplicitPath);
    }

    #[test]
    fn test_env_key_beats_env_path() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = key_file(&dir, "env", "sk-env-file");
        let env = env_of(vec![
            (ENV_API_KEY, "sk-env".to_string()),
            (ENV_API_KEY_PATH, env_path.display().to_string()),
        ]);

        let cred = resolve_credential_with(None, None, env).unwrap();
        assert_eq!(cred.key(), "sk-env");
        assert_eq!(cred.source(), CredentialSource::EnvKey);
    }

    #[test]
    fn test_env_path_is_last_resort() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = key_file(&dir, "env", "sk-env-file\n");
        let env = env_of(vec![(ENV_API_KEY_PATH, env_path.display().to_string())]);

        let cred = resolve_credential_with(None, None, env).unwrap();
        assert_eq!(cred.key(), "sk-env-file");
        assert_eq!(cred.source(), CredentialSource::EnvPath);
    }

    #[test]
    fn test_missing_explicit_file_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let env = env_of(vec![(ENV_API_KEY, "sk-env".to_string())]);

        let cred = resolve_credential_with(None, Some(missing.as_path()), env).unwrap();
        assert_eq!(cred.source(), CredentialSource::EnvKey);
    }

    #[test]
    fn test_blank_sources_do_not_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let blank = key_file(&dir, "blank", "   \n");
        let env = env_of(vec![(ENV_API_KEY, "".to_string())]);

        assert!(resolve_credential_with(Some(" "), Some(blank.as_path()), env).is_none());
    }

    #[test]
    fn test_nothing_anywhere() {
        assert!(resolve_credential_with(None, None, env_of(vec![])).is_none());
    }

    #[test]
    fn test_debug_redacts_key() {
        let cred = resolve_credential_with(Some("sk-secret"), None, env_of(vec![])).unwrap();
        let rendered = format!("{:?}", cred);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("redacted"));
    }
}
