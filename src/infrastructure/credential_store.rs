use crate::infrastructure::error::EngineError;
use std::collections::HashMap;
use std::sync::Mutex;

/// Opaque key/secret store. The platform implementation is synchronous and
/// non-reentrant; all writes are sequenced through the session manager.
pub trait CredentialStore: Send + Sync {
    fn set(&self, key: &str, secret: &str) -> Result<(), EngineError>;
    fn get(&self, key: &str) -> Result<Option<String>, EngineError>;
    fn remove(&self, key: &str) -> Result<(), EngineError>;
}

#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service_name: String,
}

impl KeyringCredentialStore {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, EngineError> {
        keyring::Entry::new(&self.service_name, key)
            .map_err(|error| EngineError::Credential(error.to_string()))
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn set(&self, key: &str, secret: &str) -> Result<(), EngineError> {
        self.entry(key)?
            .set_password(secret)
            .map_err(|error| EngineError::Credential(error.to_string()))
    }

    fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(EngineError::Credential(error.to_string())),
        }
    }

    fn remove(&self, key: &str) -> Result<(), EngineError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(EngineError::Credential(error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl CredentialStore for InMemoryCredentialStore {
    fn set(&self, key: &str, secret: &str) -> Result<(), EngineError> {
        let mut secrets = self
            .secrets
            .lock()
            .map_err(|error| EngineError::Credential(format!("in-memory lock poisoned: {error}")))?;
        secrets.insert(key.to_string(), secret.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        let secrets = self
            .secrets
            .lock()
            .map_err(|error| EngineError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(secrets.get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<(), EngineError> {
        let mut secrets = self
            .secrets
            .lock()
            .map_err(|error| EngineError::Credential(format!("in-memory lock poisoned: {error}")))?;
        secrets.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_roundtrip() {
        let store = InMemoryCredentialStore::default();
        assert_eq!(store.get("session.access_token").expect("get"), None);

        store.set("session.access_token", "tok-1").expect("set");
        assert_eq!(
            store.get("session.access_token").expect("get"),
            Some("tok-1".to_string())
        );

        store.remove("session.access_token").expect("remove");
        assert_eq!(store.get("session.access_token").expect("get"), None);
    }

    #[test]
    fn remove_of_absent_key_is_ok() {
        let store = InMemoryCredentialStore::default();
        assert!(store.remove("never-set").is_ok());
    }
}
