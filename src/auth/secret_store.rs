//! Secret store (C6): resolves an access-key to its secret-key. Two
//! implementations, both loaded once at startup — a reload path is out of
//! scope per spec.

use std::{collections::HashMap, fs, path::Path};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// One configured key pair.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyPair {
    pub access_key: String,
    pub secret_key: String,
}

pub trait SecretStore: Send + Sync {
    fn lookup(&self, access_key: &str) -> Option<String>;
}

fn validate_pairs(pairs: &[KeyPair]) -> Result<()> {
    for pair in pairs {
        if pair.access_key.trim().is_empty() || pair.secret_key.trim().is_empty() {
            bail!("access_key and secret_key must both be non-empty");
        }
    }
    Ok(())
}

/// Keys loaded directly from configuration (`auth.keys`).
pub struct InlineSecretStore {
    keys: HashMap<String, String>,
}

impl InlineSecretStore {
    pub fn new(pairs: Vec<KeyPair>) -> Result<Self> {
        validate_pairs(&pairs)?;
        Ok(Self {
            keys: pairs.into_iter().map(|p| (p.access_key, p.secret_key)).collect(),
        })
    }
}

impl SecretStore for InlineSecretStore {
    fn lookup(&self, access_key: &str) -> Option<String> {
        self.keys.get(access_key).cloned()
    }
}

/// Keys loaded once from a JSON file: `[{"access_key": "...", "secret_key": "..."}]`.
pub struct FileSecretStore {
    keys: HashMap<String, String>,
}

impl FileSecretStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading secret key file `{}`", path.display()))?;
        let pairs: Vec<KeyPair> = serde_json::from_str(&contents)
            .with_context(|| format!("parsing secret key file `{}`", path.display()))?;
        validate_pairs(&pairs)?;
        Ok(Self {
            keys: pairs.into_iter().map(|p| (p.access_key, p.secret_key)).collect(),
        })
    }
}

impl SecretStore for FileSecretStore {
    fn lookup(&self, access_key: &str) -> Option<String> {
        self.keys.get(access_key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_store_looks_up_known_key() {
        let store = InlineSecretStore::new(vec![KeyPair {
            access_key: "AKIA".into(),
            secret_key: "secret".into(),
        }])
        .unwrap();
        assert_eq!(store.lookup("AKIA").as_deref(), Some("secret"));
        assert_eq!(store.lookup("unknown"), None);
    }

    #[test]
    fn inline_store_rejects_empty_entries() {
        let err = InlineSecretStore::new(vec![KeyPair {
            access_key: "".into(),
            secret_key: "secret".into(),
        }])
        .unwrap_err();
        assert!(err.to_string().contains("non-empty"));
    }

    #[test]
    fn file_store_loads_json_array() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("keys.json");
        std::fs::write(
            &path,
            r#"[{"access_key":"AKIA","secret_key":"shh"}]"#,
        )
        .unwrap();
        let store = FileSecretStore::load(&path).unwrap();
        assert_eq!(store.lookup("AKIA").as_deref(), Some("shh"));
    }
}
