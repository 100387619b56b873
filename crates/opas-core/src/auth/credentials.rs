use keyring::Entry;

use crate::error::{OpasError, Result, StorageError};

const SERVICE_NAME: &str = "opas-admin";

/// Remembered admin passwords in the OS keychain.
pub struct CredentialStore;

impl CredentialStore {
    fn entry(username: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, username).map_err(keychain_error)
    }

    pub fn store(username: &str, password: &str) -> Result<()> {
        Self::entry(username)?
            .set_password(password)
            .map_err(keychain_error)
    }

    pub fn get_password(username: &str) -> Result<String> {
        Self::entry(username)?.get_password().map_err(keychain_error)
    }

    /// Forget the stored password. A missing entry is not an error.
    pub fn delete(username: &str) -> Result<()> {
        match Self::entry(username)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(keychain_error(e)),
        }
    }

    pub fn has_credentials(username: &str) -> bool {
        Self::entry(username)
            .map(|entry| entry.get_password().is_ok())
            .unwrap_or(false)
    }
}

fn keychain_error(e: keyring::Error) -> OpasError {
    OpasError::Storage(StorageError::Keychain(e.to_string()))
}
