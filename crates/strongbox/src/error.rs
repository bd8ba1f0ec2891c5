use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Vault-specific errors
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Service not found: {0}")]
    NotFound(String),

    #[error("Service already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid service path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Vault not initialized - identity file {} is missing or empty", .0.display())]
    NotInitialized(PathBuf),

    #[error("Encryption failed for {service}: {reason}")]
    EncryptionFailed { service: String, reason: String },

    #[error("Decryption failed for {service}: {reason}")]
    DecryptionFailed { service: String, reason: String },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, VaultError>;

pub(crate) fn io_error(path: &std::path::Path) -> impl FnOnce(io::Error) -> VaultError + '_ {
    move |source| VaultError::Io {
        path: path.to_path_buf(),
        source,
    }
}
