//! Encryption gateway
//!
//! The store never touches key material. It hands plaintext and the vault's
//! recipient identity to a [`Gateway`] and gets ciphertext back, and the
//! other way round for reads.
//!
//! ## Implementations
//!
//! - [`GpgGateway`]: runs the gpg CLI non-interactively.
//! - [`MemoryGateway`]: reversible in-process transform for tests; can be
//!   told to fail.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

use strongbox_core::config::GpgSettings;

/// Failure reported by a gateway implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct GatewayError(pub String);

/// Opaque encrypt/decrypt transform keyed by a recipient identity
pub trait Gateway: Send + Sync {
    /// Encrypt plaintext for `recipient`.
    fn encrypt(&self, plaintext: &[u8], recipient: &str) -> Result<Vec<u8>, GatewayError>;

    /// Decrypt ciphertext that was addressed to `recipient`.
    fn decrypt(&self, ciphertext: &[u8], recipient: &str) -> Result<Vec<u8>, GatewayError>;

    /// A gateway that supplies `passphrase` instead of asking for one.
    fn with_passphrase(&self, passphrase: &str) -> Arc<dyn Gateway>;

    /// Backend name for display/logging.
    fn name(&self) -> &'static str;
}

/// Gateway backed by the gpg CLI
#[derive(Debug, Clone)]
pub struct GpgGateway {
    binary: String,
    args: Vec<String>,
    passphrase: Option<String>,
}

impl GpgGateway {
    pub fn new(settings: &GpgSettings) -> Self {
        Self {
            binary: settings.binary.clone(),
            args: settings.args.clone(),
            passphrase: None,
        }
    }

    /// Terminal gpg-agent should prompt on, when the caller did not set one
    fn tty() -> Option<String> {
        std::fs::read_link("/proc/self/fd/0")
            .ok()
            .map(|p| p.to_string_lossy().to_string())
            .filter(|p| p.starts_with("/dev/"))
    }

    /// Run gpg with the configured args plus `extra`, feeding `input` on stdin
    fn run(&self, extra: &[&str], input: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.args);

        // Passphrase travels on stdin ahead of the payload, never on argv
        let mut stdin_data = Vec::with_capacity(input.len());
        if let Some(passphrase) = &self.passphrase {
            cmd.args(["--pinentry-mode", "loopback", "--passphrase-fd", "0"]);
            stdin_data.extend_from_slice(passphrase.as_bytes());
            stdin_data.push(b'\n');
        }
        stdin_data.extend_from_slice(input);

        cmd.args(extra);

        if std::env::var_os("GPG_TTY").is_none() {
            if let Some(tty) = Self::tty() {
                cmd.env("GPG_TTY", tty);
            }
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| GatewayError(format!("failed to spawn {}: {}", self.binary, e)))?;

        // Feed stdin from another thread so a full stdout pipe cannot deadlock us
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError("gpg stdin unavailable".to_string()))?;
        let writer = std::thread::spawn(move || stdin.write_all(&stdin_data));

        let output = child
            .wait_with_output()
            .map_err(|e| GatewayError(format!("gpg command failed: {}", e)))?;

        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => return Err(GatewayError(format!("failed to write to gpg: {}", e))),
            Err(_) => return Err(GatewayError("gpg stdin writer panicked".to_string())),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GatewayError(format!(
                "gpg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }
}

impl Gateway for GpgGateway {
    fn encrypt(&self, plaintext: &[u8], recipient: &str) -> Result<Vec<u8>, GatewayError> {
        trace!(plaintext_len = plaintext.len(), "encrypting with gpg");

        let ciphertext = self.run(&["--encrypt", "--recipient", recipient], plaintext)?;
        if ciphertext.is_empty() {
            return Err(GatewayError("gpg produced no ciphertext".to_string()));
        }

        trace!(ciphertext_len = ciphertext.len(), "encrypted with gpg");
        Ok(ciphertext)
    }

    fn decrypt(&self, ciphertext: &[u8], _recipient: &str) -> Result<Vec<u8>, GatewayError> {
        // gpg picks the secret key from the keyring itself
        trace!(ciphertext_len = ciphertext.len(), "decrypting with gpg");
        self.run(&["--decrypt"], ciphertext)
    }

    fn with_passphrase(&self, passphrase: &str) -> Arc<dyn Gateway> {
        Arc::new(Self {
            passphrase: Some(passphrase.to_string()),
            ..self.clone()
        })
    }

    fn name(&self) -> &'static str {
        "gpg"
    }
}

const MEMORY_MAGIC: &[u8] = b"SBMEM1:";

/// In-process gateway for tests.
///
/// Ciphertext is tagged with the recipient, so decrypting for anyone else
/// fails. Clones share their failure switches.
#[derive(Debug, Clone, Default)]
pub struct MemoryGateway {
    fail_encrypt: Arc<AtomicBool>,
    fail_decrypt: Arc<AtomicBool>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent encrypt fail (or succeed again)
    pub fn fail_encrypt(&self, fail: bool) {
        self.fail_encrypt.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent decrypt fail (or succeed again)
    pub fn fail_decrypt(&self, fail: bool) {
        self.fail_decrypt.store(fail, Ordering::SeqCst);
    }

    fn scramble(data: &[u8]) -> Vec<u8> {
        data.iter().map(|b| b ^ 0x5a).collect()
    }
}

impl Gateway for MemoryGateway {
    fn encrypt(&self, plaintext: &[u8], recipient: &str) -> Result<Vec<u8>, GatewayError> {
        if self.fail_encrypt.load(Ordering::SeqCst) {
            return Err(GatewayError("encryption disabled".to_string()));
        }

        let mut out = MEMORY_MAGIC.to_vec();
        out.extend_from_slice(recipient.as_bytes());
        out.push(b'\n');
        out.extend(Self::scramble(plaintext));
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8], recipient: &str) -> Result<Vec<u8>, GatewayError> {
        if self.fail_decrypt.load(Ordering::SeqCst) {
            return Err(GatewayError("decryption disabled".to_string()));
        }

        let body = ciphertext
            .strip_prefix(MEMORY_MAGIC)
            .ok_or_else(|| GatewayError("not a memory ciphertext".to_string()))?;
        let split = body
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| GatewayError("truncated ciphertext".to_string()))?;

        let (tag, payload) = body.split_at(split);
        if tag != recipient.as_bytes() {
            return Err(GatewayError(format!(
                "no secret key for recipient {}",
                String::from_utf8_lossy(tag)
            )));
        }

        Ok(Self::scramble(&payload[1..]))
    }

    fn with_passphrase(&self, _passphrase: &str) -> Arc<dyn Gateway> {
        Arc::new(self.clone())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
