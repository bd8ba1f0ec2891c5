//! Service paths - the names secrets are stored under
//!
//! A service path is a `/`-delimited name such as `email/work`. Every
//! segment but the last becomes a directory inside the vault; the last
//! becomes `<name>.gpg`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::VaultError;
use crate::store::{CIPHERTEXT_EXTENSION, IDENTITY_FILE};

/// A validated service path that cannot escape the vault root
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServicePath(String);

impl ServicePath {
    /// Validate a service name
    pub fn parse(raw: &str) -> Result<Self, VaultError> {
        let invalid = |reason: &str| VaultError::InvalidPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("cannot be empty"));
        }
        if raw.starts_with('/') {
            return Err(invalid("must be relative to the vault"));
        }
        if raw.contains('\\') || raw.contains('\0') {
            return Err(invalid("contains a backslash or NUL byte"));
        }

        for segment in raw.split('/') {
            match segment {
                "" => return Err(invalid("contains an empty segment")),
                "." | ".." => return Err(invalid("contains a relative segment")),
                IDENTITY_FILE => return Err(invalid("clashes with the identity file")),
                _ => {}
            }
        }

        Ok(Self(raw.to_string()))
    }

    /// Build from a path already found inside the vault
    pub(crate) fn from_relative(rel: &Path) -> Self {
        let segments: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Self(segments.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Last segment (`work` for `email/work`)
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Directory part (`email` for `email/work`), if any
    pub fn parent(&self) -> Option<&str> {
        self.0.rsplit_once('/').map(|(dir, _)| dir)
    }

    /// Location of the encrypted file for this service under `root`
    pub fn file_in(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        if let Some(dir) = self.parent() {
            path.extend(dir.split('/'));
        }
        path.push(format!("{}.{}", self.name(), CIPHERTEXT_EXTENSION));
        path
    }
}

impl fmt::Display for ServicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServicePath {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for ServicePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        for raw in ["email", "email/work", "a/b/c/d", "my.bank", "api-key_2"] {
            let path = ServicePath::parse(raw).unwrap();
            assert_eq!(path.as_str(), raw);
        }
    }

    #[test]
    fn test_invalid_paths() {
        for raw in [
            "",
            "/etc/passwd",
            "email/",
            "email//work",
            "../escape",
            "a/../../b",
            "a/./b",
            "..",
            "win\\path",
            ".gpg-id",
        ] {
            assert!(
                matches!(ServicePath::parse(raw), Err(VaultError::InvalidPath { .. })),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parts() {
        let path: ServicePath = "email/work".parse().unwrap();
        assert_eq!(path.name(), "work");
        assert_eq!(path.parent(), Some("email"));
        assert_eq!(path.segments().collect::<Vec<_>>(), vec!["email", "work"]);

        let single: ServicePath = "bank".parse().unwrap();
        assert_eq!(single.name(), "bank");
        assert_eq!(single.parent(), None);
    }

    #[test]
    fn test_file_location() {
        let root = Path::new("/vault");
        let nested: ServicePath = "social/old/forum".parse().unwrap();
        assert_eq!(nested.file_in(root), PathBuf::from("/vault/social/old/forum.gpg"));

        let single: ServicePath = "bank".parse().unwrap();
        assert_eq!(single.file_in(root), PathBuf::from("/vault/bank.gpg"));
        assert!(single.file_in(root).starts_with(root));
    }

    #[test]
    fn test_from_relative() {
        let path = ServicePath::from_relative(Path::new("email/work"));
        assert_eq!(path.as_str(), "email/work");
        assert_eq!(path.to_string(), "email/work");
    }
}
