//! Veilnet Keystore
//!
//! Directory-backed store of provider signing keys. Each key lives in its
//! own file holding the 32-byte ed25519 secret; the account address is the
//! first 20 bytes of SHA-256 over the public key. The settlement engine
//! reads the account list once at node start.

mod paths;
mod store;

pub use paths::{default_keystore_dir, expand_path};
pub use store::{Account, Keystore};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("failed to read keyfile: {0}")]
    Read(std::io::Error),

    #[error("failed to write keyfile: {0}")]
    Write(std::io::Error),

    #[error("failed to create keystore directory: {0}")]
    CreateDir(std::io::Error),

    #[error("invalid keyfile {path}: {reason}")]
    InvalidFormat { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, KeystoreError>;
