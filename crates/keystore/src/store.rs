//! Account store

use std::fs;
use std::path::{Path, PathBuf};

use ed25519_dalek::SigningKey;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use veilnet_core::Identity;

use crate::paths::expand_path;
use crate::{KeystoreError, Result};

const KEY_FILE_EXT: &str = "key";

/// A provider account known to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Account {
    pub address: Identity,
}

/// Directory-backed keystore. Keys are 32-byte ed25519 secrets, one file
/// per account, named by the account's address.
#[derive(Debug)]
pub struct Keystore {
    dir: PathBuf,
    accounts: Vec<Account>,
}

impl Keystore {
    /// Open a keystore directory, creating it if missing, and load every
    /// account in it.
    pub fn open(dir: &Path) -> Result<Self> {
        let dir = expand_path(dir);
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(KeystoreError::CreateDir)?;
        }

        let mut accounts = Vec::new();
        let entries = fs::read_dir(&dir).map_err(KeystoreError::Read)?;
        for entry in entries {
            let path = entry.map_err(KeystoreError::Read)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(KEY_FILE_EXT) {
                warn!("Skipping non-key file in keystore: {:?}", path);
                continue;
            }
            let key = load_signing_key(&path)?;
            accounts.push(Account { address: address_of(&key) });
        }

        info!("Keystore opened with {} account(s) at {:?}", accounts.len(), dir);
        Ok(Self { dir, accounts })
    }

    /// Generate a new account, persist its key, and return it.
    pub fn generate(&mut self) -> Result<Account> {
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        let address = address_of(&key);

        let path = self.key_path(&address);
        fs::write(&path, key.to_bytes()).map_err(KeystoreError::Write)?;

        info!("Generated account {} at {:?}", address, path);
        let account = Account { address };
        self.accounts.push(account);
        Ok(account)
    }

    /// All accounts currently in the store.
    pub fn accounts(&self) -> Vec<Account> {
        self.accounts.clone()
    }

    /// Load the signing key for an account in this store.
    pub fn signing_key(&self, address: &Identity) -> Result<SigningKey> {
        load_signing_key(&self.key_path(address))
    }

    fn key_path(&self, address: &Identity) -> PathBuf {
        self.dir.join(format!("{}.{}", hex::encode(address.as_bytes()), KEY_FILE_EXT))
    }
}

/// Account address: first 20 bytes of SHA-256 over the ed25519 public key.
fn address_of(key: &SigningKey) -> Identity {
    let digest = Sha256::digest(key.verifying_key().to_bytes());
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest[..20]);
    Identity::from_bytes(bytes)
}

fn load_signing_key(path: &Path) -> Result<SigningKey> {
    let bytes = fs::read(path).map_err(KeystoreError::Read)?;
    let secret: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        KeystoreError::InvalidFormat {
            path: path.display().to_string(),
            reason: format!("expected 32 bytes, got {}", bytes.len()),
        }
    })?;
    Ok(SigningKey::from_bytes(&secret))
}
