use anyhow::{Context, Result};
use keyring::Entry;
use parking_lot::Mutex;

const SERVICE_NAME: &str = "tablemate";

/// Persistence medium for a bearer token.
pub trait TokenStorage: Send + Sync {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, token: &str) -> Result<()>;
    fn remove(&self) -> Result<()>;
}

/// Process-local storage. Never fails.
#[derive(Default)]
pub struct MemoryStorage {
    token: Mutex<Option<String>>,
}

impl TokenStorage for MemoryStorage {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.token.lock().clone())
    }

    fn save(&self, token: &str) -> Result<()> {
        *self.token.lock() = Some(token.to_string());
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        *self.token.lock() = None;
        Ok(())
    }
}

/// Token storage in the OS keychain, one entry per account.
pub struct KeyringStorage {
    account: String,
}

impl KeyringStorage {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &self.account).context("Failed to create keyring entry")
    }
}

impl TokenStorage for KeyringStorage {
    fn load(&self) -> Result<Option<String>> {
        match self.entry()?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve token from keychain"),
        }
    }

    fn save(&self, token: &str) -> Result<()> {
        self.entry()?
            .set_password(token)
            .context("Failed to store token in keychain")
    }

    fn remove(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }
}
