//! Admin credentials
//!
//! The password is never stored in configuration. A credential carries a
//! reference to where the secret lives and it is only resolved at the moment
//! of authentication.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::AuthError;

/// Where to read a secret from
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretRef {
    /// Environment variable name
    Env(String),
    /// File whose contents (trailing newline trimmed) are the secret
    File(PathBuf),
}

impl SecretRef {
    /// Whether the reference points anywhere at all
    pub fn is_empty(&self) -> bool {
        match self {
            SecretRef::Env(name) => name.trim().is_empty(),
            SecretRef::File(path) => path.as_os_str().is_empty(),
        }
    }

    /// Read the secret value
    pub fn resolve(&self) -> Result<String, AuthError> {
        match self {
            SecretRef::Env(name) => std::env::var(name).map_err(|_| {
                AuthError::SecretUnavailable(format!("environment variable {} is not set", name))
            }),
            SecretRef::File(path) => std::fs::read_to_string(path)
                .map(|s| s.trim_end_matches(['\r', '\n']).to_string())
                .map_err(|e| {
                    AuthError::SecretUnavailable(format!("{}: {}", path.display(), e))
                }),
        }
    }
}

impl fmt::Debug for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretRef::Env(name) => write!(f, "env:{}", name),
            SecretRef::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

/// User with the clusterAdmin role and a reference to its password
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: SecretRef,
    /// Authentication database
    #[serde(default = "default_auth_source")]
    pub source: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: SecretRef) -> Self {
        Self {
            username: username.into(),
            password,
            source: default_auth_source(),
        }
    }
}

fn default_auth_source() -> String {
    crate::ADMIN_DATABASE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_secret_from_file_trims_newline() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "s3cret").unwrap();

        let secret = SecretRef::File(file.path().to_path_buf());
        assert_eq!(secret.resolve().unwrap(), "s3cret");
    }

    #[test]
    fn test_missing_env_secret() {
        let secret = SecretRef::Env("CHUNKSHIFT_TEST_SECRET_THAT_IS_NOT_SET".to_string());
        assert!(matches!(
            secret.resolve(),
            Err(AuthError::SecretUnavailable(_))
        ));
    }

    #[test]
    fn test_empty_reference() {
        assert!(SecretRef::Env("  ".to_string()).is_empty());
        assert!(SecretRef::File(PathBuf::new()).is_empty());
        assert!(!SecretRef::Env("MONGO_PASSWORD".to_string()).is_empty());
    }

    #[test]
    fn test_credentials_default_source() {
        let creds: Credentials =
            serde_json::from_str(r#"{"username":"admin","password":{"env":"PW"}}"#).unwrap();
        assert_eq!(creds.source, "admin");
        assert_eq!(creds.password, SecretRef::Env("PW".to_string()));
    }
}
