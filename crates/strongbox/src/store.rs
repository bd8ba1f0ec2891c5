//! Store - Encrypted secret records on disk
//!
//! Each secret is a separate gpg-encrypted file in the vault directory.
//! Service paths map 1:1 onto files: `email/work` lives at
//! `<vault>/email/work.gpg`, and intermediate segments are real directories.
//!
//! Writes are staged in a temporary sibling file and moved into place only
//! once complete, so a reader sees either no file or a whole ciphertext.
//! Mutations that create directories record what they created and remove it
//! again if a later step fails. Removing a secret prunes directories that
//! became empty, stopping at the vault root.
//!
//! There is no locking. One writer per vault is assumed; concurrent writers
//! must be serialized by the caller.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::error::{io_error, Result, VaultError};
use crate::gateway::Gateway;
use crate::service::ServicePath;

/// File extension marking encrypted content
pub const CIPHERTEXT_EXTENSION: &str = "gpg";

/// File holding the recipient identity, at the vault root
pub const IDENTITY_FILE: &str = ".gpg-id";

/// Whether a rename/copy may replace an existing destination.
///
/// Asking the user is the caller's job; the store only acts on the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overwrite {
    Deny,
    Allow,
}

/// Node of the display tree returned by [`Store::tree`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    Dir { name: String, children: Vec<TreeNode> },
    Entry { name: String },
}

impl TreeNode {
    pub fn name(&self) -> &str {
        match self {
            Self::Dir { name, .. } | Self::Entry { name } => name,
        }
    }
}

enum Created {
    Dir(PathBuf),
    File(PathBuf),
}

/// Filesystem changes made by one mutation, undone in reverse on failure
#[derive(Default)]
struct Rollback {
    created: Vec<Created>,
}

impl Rollback {
    /// Create `dir` and any missing ancestors below `root`, recording each one
    fn create_dirs(&mut self, root: &Path, dir: &Path) -> Result<()> {
        let mut missing = Vec::new();
        let mut current = Some(dir);
        while let Some(path) = current {
            if path == root || !path.starts_with(root) || path.exists() {
                break;
            }
            missing.push(path.to_path_buf());
            current = path.parent();
        }

        for path in missing.into_iter().rev() {
            fs::create_dir(&path).map_err(io_error(&path))?;
            debug!(path = %path.display(), "created directory");
            self.created.push(Created::Dir(path));
        }
        Ok(())
    }

    fn record_file(&mut self, path: &Path) {
        self.created.push(Created::File(path.to_path_buf()));
    }

    /// Remove everything recorded, newest first. Failures are logged, not returned,
    /// so the error that triggered the rollback is what reaches the caller.
    fn undo(self) {
        for created in self.created.into_iter().rev() {
            let (path, result) = match &created {
                Created::File(path) => (path, fs::remove_file(path)),
                Created::Dir(path) => (path, fs::remove_dir_all(path)),
            };
            match result {
                Ok(()) => info!(path = %path.display(), "rolled back"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => error!(path = %path.display(), error = %e, "rollback failed"),
            }
        }
    }
}

/// The secret record store
#[derive(Clone)]
pub struct Store {
    /// Root directory of the vault
    root: PathBuf,
    /// Encrypts and decrypts entry contents
    gateway: Arc<dyn Gateway>,
}

impl Store {
    /// Open the vault at `root`
    pub fn new(root: impl Into<PathBuf>, gateway: Arc<dyn Gateway>) -> Self {
        Self {
            root: root.into(),
            gateway,
        }
    }

    /// Create a new vault directory with its identity file.
    ///
    /// Fails if `root` already exists.
    pub fn init(root: impl Into<PathBuf>, identity: &str, gateway: Arc<dyn Gateway>) -> Result<Self> {
        let root = root.into();
        if identity.trim().is_empty() {
            return Err(VaultError::NotInitialized(root.join(IDENTITY_FILE)));
        }

        if let Some(parent) = root.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        fs::create_dir(&root).map_err(io_error(&root))?;

        let identity_path = root.join(IDENTITY_FILE);
        fs::write(&identity_path, identity).map_err(io_error(&identity_path))?;

        info!(path = %root.display(), "initialized vault");
        Ok(Self::new(root, gateway))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    /// Same vault, different gateway (e.g. one carrying a passphrase)
    pub fn with_gateway(&self, gateway: Arc<dyn Gateway>) -> Self {
        Self {
            root: self.root.clone(),
            gateway,
        }
    }

    /// Read the recipient identity. Missing or empty is a configuration error.
    pub fn identity(&self) -> Result<String> {
        let path = self.root.join(IDENTITY_FILE);
        match fs::read_to_string(&path) {
            Ok(content) if !content.trim().is_empty() => Ok(content.trim().to_string()),
            Ok(_) => Err(VaultError::NotInitialized(path)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(VaultError::NotInitialized(path)),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    fn entry_path(&self, service: &ServicePath) -> PathBuf {
        service.file_in(&self.root)
    }

    /// Check if a secret exists
    pub fn exists(&self, service: &ServicePath) -> bool {
        self.entry_path(service).is_file()
    }

    /// List every secret, in directory traversal order (not sorted)
    pub fn list(&self) -> Result<Vec<ServicePath>> {
        let mut services = vec![];

        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = entry.map_err(|e| VaultError::Io {
                path: e.path().unwrap_or(self.root.as_path()).to_path_buf(),
                source: e.into(),
            })?;

            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CIPHERTEXT_EXTENSION) {
                continue;
            }

            let rel = path
                .strip_prefix(&self.root)
                .unwrap_or(path)
                .with_extension("");
            services.push(ServicePath::from_relative(&rel));
        }

        Ok(services)
    }

    /// Nested, name-sorted view of the vault for display
    pub fn tree(&self) -> Result<Vec<TreeNode>> {
        self.tree_of(&self.root)
    }

    fn tree_of(&self, dir: &Path) -> Result<Vec<TreeNode>> {
        let mut entries = fs::read_dir(dir)
            .map_err(io_error(dir))?
            .collect::<io::Result<Vec<_>>>()
            .map_err(io_error(dir))?;
        entries.sort_by_key(|e| e.file_name());

        let mut nodes = vec![];
        for entry in entries {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            let file_type = entry.file_type().map_err(io_error(&path))?;

            if file_type.is_dir() {
                nodes.push(TreeNode::Dir {
                    name,
                    children: self.tree_of(&path)?,
                });
            } else if let Some(stem) = name.strip_suffix(&format!(".{}", CIPHERTEXT_EXTENSION)) {
                nodes.push(TreeNode::Entry {
                    name: stem.to_string(),
                });
            }
        }

        Ok(nodes)
    }

    fn encrypt(&self, service: &ServicePath, plaintext: &[u8]) -> Result<Vec<u8>> {
        let identity = self.identity()?;
        debug!(service = %service, gateway = self.gateway.name(), "encrypting");
        self.gateway
            .encrypt(plaintext, &identity)
            .map_err(|e| VaultError::EncryptionFailed {
                service: service.to_string(),
                reason: e.to_string(),
            })
    }

    fn decrypt(&self, service: &ServicePath, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let identity = self.identity()?;
        debug!(service = %service, gateway = self.gateway.name(), "decrypting");
        self.gateway
            .decrypt(ciphertext, &identity)
            .map_err(|e| VaultError::DecryptionFailed {
                service: service.to_string(),
                reason: e.to_string(),
            })
    }

    /// Write `contents` to a hidden temporary file in `dir`.
    ///
    /// The file is deleted automatically unless persisted.
    fn stage(dir: &Path, contents: &[u8]) -> Result<NamedTempFile> {
        let mut staged = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(io_error(dir))?;
        staged.write_all(contents).map_err(io_error(staged.path()))?;
        staged.as_file().sync_all().map_err(io_error(staged.path()))?;
        Ok(staged)
    }

    /// Move a staged file onto `target`, replacing it only when allowed
    fn commit(staged: NamedTempFile, service: &ServicePath, target: &Path, overwrite: Overwrite) -> Result<()> {
        let persisted = match overwrite {
            Overwrite::Allow => staged.persist(target),
            Overwrite::Deny => staged.persist_noclobber(target),
        };

        persisted.map(|_| ()).map_err(|e| {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                VaultError::AlreadyExists(service.to_string())
            } else {
                io_error(target)(e.error)
            }
        })
    }

    /// Store a new secret. Fails if one already exists at `service`.
    ///
    /// All or nothing: directories created along the way are removed again
    /// if any later step fails.
    pub fn insert(&self, service: &ServicePath, plaintext: &[u8]) -> Result<()> {
        let target = self.entry_path(service);
        if target.exists() {
            return Err(VaultError::AlreadyExists(service.to_string()));
        }

        let mut rollback = Rollback::default();
        match self.insert_steps(service, &target, plaintext, &mut rollback) {
            Ok(()) => {
                info!(service = %service, "inserted");
                Ok(())
            }
            Err(e) => {
                rollback.undo();
                Err(e)
            }
        }
    }

    fn insert_steps(
        &self,
        service: &ServicePath,
        target: &Path,
        plaintext: &[u8],
        rollback: &mut Rollback,
    ) -> Result<()> {
        // Fail on a missing identity before touching the disk
        self.identity()?;

        let dir = target.parent().unwrap_or(self.root.as_path());
        rollback.create_dirs(&self.root, dir)?;

        let ciphertext = self.encrypt(service, plaintext)?;
        let staged = Self::stage(dir, &ciphertext)?;
        Self::commit(staged, service, target, Overwrite::Deny)?;
        rollback.record_file(target);

        Ok(())
    }

    /// Retrieve and decrypt a secret
    pub fn read(&self, service: &ServicePath) -> Result<Vec<u8>> {
        let target = self.entry_path(service);
        let ciphertext = match fs::read(&target) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(VaultError::NotFound(service.to_string()))
            }
            Err(e) => return Err(io_error(&target)(e)),
        };

        self.decrypt(service, &ciphertext)
    }

    /// Replace the content of an existing secret
    pub fn update(&self, service: &ServicePath, plaintext: &[u8]) -> Result<()> {
        let target = self.entry_path(service);
        if !target.is_file() {
            return Err(VaultError::NotFound(service.to_string()));
        }

        let ciphertext = self.encrypt(service, plaintext)?;
        let dir = target.parent().unwrap_or(self.root.as_path());
        let staged = Self::stage(dir, &ciphertext)?;
        Self::commit(staged, service, &target, Overwrite::Allow)?;

        info!(service = %service, "updated");
        Ok(())
    }

    /// Decrypt, transform and re-encrypt a secret.
    ///
    /// `change` returns `None` to leave the secret untouched. Returns whether
    /// anything was written.
    pub fn edit<F, E>(&self, service: &ServicePath, change: F) -> std::result::Result<bool, E>
    where
        F: FnOnce(&[u8]) -> std::result::Result<Option<Vec<u8>>, E>,
        E: From<VaultError>,
    {
        let current = self.read(service)?;
        match change(&current)? {
            Some(updated) if updated != current => {
                self.update(service, &updated)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Delete a secret and prune directories it leaves empty.
    ///
    /// Returns `false` if there was nothing to delete.
    pub fn remove(&self, service: &ServicePath) -> Result<bool> {
        let target = self.entry_path(service);
        match fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(io_error(&target)(e)),
        }

        self.prune(target.parent())?;
        info!(service = %service, "removed");
        Ok(true)
    }

    /// Walk upward from `start`, removing empty directories, stopping strictly
    /// below the vault root
    fn prune(&self, start: Option<&Path>) -> Result<()> {
        let mut parent = start;
        while let Some(dir) = parent {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            let is_empty = fs::read_dir(dir)
                .map_err(io_error(dir))?
                .next()
                .is_none();
            if !is_empty {
                break;
            }

            fs::remove_dir(dir).map_err(io_error(dir))?;
            debug!(path = %dir.display(), "pruned empty directory");
            parent = dir.parent();
        }

        Ok(())
    }

    fn check_transfer(&self, from: &ServicePath, to: &ServicePath, overwrite: Overwrite) -> Result<(PathBuf, PathBuf)> {
        let source = self.entry_path(from);
        if !source.is_file() {
            return Err(VaultError::NotFound(from.to_string()));
        }

        let dest = self.entry_path(to);
        if dest.exists() && overwrite == Overwrite::Deny {
            return Err(VaultError::AlreadyExists(to.to_string()));
        }

        Ok((source, dest))
    }

    /// Create the directories above `dest`, then run `write` with the
    /// destination directory. Directories created here are removed if `write` fails.
    fn place(&self, dest: &Path, write: impl FnOnce(&Path) -> Result<()>) -> Result<()> {
        let mut rollback = Rollback::default();
        let dest_dir = dest.parent().unwrap_or(self.root.as_path());
        let placed = rollback.create_dirs(&self.root, dest_dir).and_then(|()| write(dest_dir));
        if let Err(e) = placed {
            rollback.undo();
            return Err(e);
        }
        Ok(())
    }

    /// Move a secret to a new name. The ciphertext is not touched.
    pub fn rename(&self, from: &ServicePath, to: &ServicePath, overwrite: Overwrite) -> Result<()> {
        let (source, dest) = self.check_transfer(from, to, overwrite)?;
        if source == dest {
            return Ok(());
        }

        self.place(&dest, |_| fs::rename(&source, &dest).map_err(io_error(&dest)))?;

        self.prune(source.parent())?;
        info!(from = %from, to = %to, "renamed");
        Ok(())
    }

    /// Duplicate a secret under a new name. The ciphertext is copied verbatim,
    /// so the copy stays addressed to the same recipient.
    pub fn copy(&self, from: &ServicePath, to: &ServicePath, overwrite: Overwrite) -> Result<()> {
        let (source, dest) = self.check_transfer(from, to, overwrite)?;
        if source == dest {
            return Ok(());
        }

        let ciphertext = fs::read(&source).map_err(io_error(&source))?;

        self.place(&dest, |dest_dir| {
            let staged = Self::stage(dest_dir, &ciphertext)?;
            Self::commit(staged, to, &dest, overwrite)
        })?;

        info!(from = %from, to = %to, "copied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use std::collections::BTreeSet;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    const IDENTITY: &str = "me@example.com";

    fn temp_store() -> (Store, MemoryGateway, TempDir) {
        let temp = TempDir::new().unwrap();
        let gateway = MemoryGateway::new();
        let store = Store::init(temp.path().join("vault"), IDENTITY, Arc::new(gateway.clone())).unwrap();
        (store, gateway, temp)
    }

    fn svc(raw: &str) -> ServicePath {
        ServicePath::parse(raw).unwrap()
    }

    /// Every path under the vault root, files with contents
    fn tree_snapshot(root: &Path) -> BTreeSet<(PathBuf, Option<Vec<u8>>)> {
        WalkDir::new(root)
            .into_iter()
            .map(|e| {
                let e = e.unwrap();
                let contents = e.file_type().is_file().then(|| fs::read(e.path()).unwrap());
                (e.path().to_path_buf(), contents)
            })
            .collect()
    }

    fn sorted(services: Vec<ServicePath>) -> Vec<String> {
        let mut names: Vec<String> = services.into_iter().map(|s| s.to_string()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_init() {
        let (store, _gateway, temp) = temp_store();
        assert_eq!(store.identity().unwrap(), IDENTITY);

        // Re-init refuses an existing directory
        let again = Store::init(temp.path().join("vault"), IDENTITY, Arc::new(MemoryGateway::new()));
        assert!(matches!(again, Err(VaultError::Io { .. })));
    }

    #[test]
    fn test_insert_read() {
        let (store, _gateway, _temp) = temp_store();

        store.insert(&svc("email/work"), b"p@ss").unwrap();
        assert_eq!(store.read(&svc("email/work")).unwrap(), b"p@ss");

        // On disk it is ciphertext, not the plaintext
        let raw = fs::read(store.root().join("email/work.gpg")).unwrap();
        assert_ne!(raw, b"p@ss");
    }

    #[test]
    fn test_single_segment_and_deep_paths() {
        let (store, _gateway, _temp) = temp_store();

        store.insert(&svc("bank"), b"1234").unwrap();
        store.insert(&svc("a/b/c/d"), b"deep").unwrap();

        assert!(store.root().join("bank.gpg").is_file());
        assert!(store.root().join("a/b/c/d.gpg").is_file());
        assert_eq!(store.read(&svc("a/b/c/d")).unwrap(), b"deep");
    }

    #[test]
    fn test_insert_existing_fails() {
        let (store, _gateway, _temp) = temp_store();
        store.insert(&svc("email/work"), b"one").unwrap();

        let result = store.insert(&svc("email/work"), b"two");
        assert!(matches!(result, Err(VaultError::AlreadyExists(_))));
        assert_eq!(store.read(&svc("email/work")).unwrap(), b"one");
    }

    #[test]
    fn test_failed_insert_leaves_tree_untouched() {
        let (store, gateway, _temp) = temp_store();
        store.insert(&svc("email/home"), b"keep").unwrap();
        let before = tree_snapshot(store.root());

        gateway.fail_encrypt(true);
        let nested = store.insert(&svc("social/old/forum"), b"x");
        assert!(matches!(nested, Err(VaultError::EncryptionFailed { .. })));
        let sibling = store.insert(&svc("email/work"), b"x");
        assert!(matches!(sibling, Err(VaultError::EncryptionFailed { .. })));
        let single = store.insert(&svc("bank"), b"x");
        assert!(matches!(single, Err(VaultError::EncryptionFailed { .. })));

        assert_eq!(tree_snapshot(store.root()), before);
        assert!(!store.root().join("social").exists());
    }

    #[test]
    fn test_missing_identity_is_not_initialized() {
        let (store, _gateway, _temp) = temp_store();
        store.insert(&svc("email/work"), b"p@ss").unwrap();
        fs::remove_file(store.root().join(IDENTITY_FILE)).unwrap();

        assert!(matches!(
            store.insert(&svc("new/entry"), b"x"),
            Err(VaultError::NotInitialized(_))
        ));
        assert!(!store.root().join("new").exists());
        assert!(matches!(
            store.read(&svc("email/work")),
            Err(VaultError::NotInitialized(_))
        ));

        fs::write(store.root().join(IDENTITY_FILE), "  \n").unwrap();
        assert!(matches!(store.identity(), Err(VaultError::NotInitialized(_))));
    }

    #[test]
    fn test_read_errors_are_distinct() {
        let (store, gateway, _temp) = temp_store();

        assert!(matches!(store.read(&svc("nope")), Err(VaultError::NotFound(_))));

        store.insert(&svc("email/work"), b"p@ss").unwrap();
        gateway.fail_decrypt(true);
        assert!(matches!(
            store.read(&svc("email/work")),
            Err(VaultError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn test_wrong_identity_fails_decryption() {
        let (store, _gateway, _temp) = temp_store();
        store.insert(&svc("email/work"), b"p@ss").unwrap();
        fs::write(store.root().join(IDENTITY_FILE), "someone-else").unwrap();

        assert!(matches!(
            store.read(&svc("email/work")),
            Err(VaultError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn test_update() {
        let (store, _gateway, _temp) = temp_store();

        assert!(matches!(
            store.update(&svc("email/work"), b"x"),
            Err(VaultError::NotFound(_))
        ));
        assert!(!store.root().join("email").exists());

        store.insert(&svc("email/work"), b"old").unwrap();
        store.update(&svc("email/work"), b"new").unwrap();
        assert_eq!(store.read(&svc("email/work")).unwrap(), b"new");
    }

    #[test]
    fn test_failed_update_keeps_old_content() {
        let (store, gateway, _temp) = temp_store();
        store.insert(&svc("email/work"), b"old").unwrap();
        let before = tree_snapshot(store.root());

        gateway.fail_encrypt(true);
        assert!(store.update(&svc("email/work"), b"new").is_err());
        assert_eq!(tree_snapshot(store.root()), before);
    }

    #[test]
    fn test_edit() {
        let (store, _gateway, _temp) = temp_store();
        store.insert(&svc("email/work"), b"user\npass").unwrap();

        let changed = store
            .edit::<_, VaultError>(&svc("email/work"), |current| {
                let mut next = current.to_vec();
                next.extend_from_slice(b"\nnote");
                Ok(Some(next))
            })
            .unwrap();
        assert!(changed);
        assert_eq!(store.read(&svc("email/work")).unwrap(), b"user\npass\nnote");

        let unchanged = store
            .edit::<_, VaultError>(&svc("email/work"), |current| Ok(Some(current.to_vec())))
            .unwrap();
        assert!(!unchanged);

        let missing = store.edit::<_, VaultError>(&svc("nope"), |_| Ok(None));
        assert!(matches!(missing, Err(VaultError::NotFound(_))));
    }

    #[test]
    fn test_list() {
        let (store, _gateway, _temp) = temp_store();
        assert!(store.list().unwrap().is_empty());

        store.insert(&svc("email/work"), b"1").unwrap();
        store.insert(&svc("email/home"), b"2").unwrap();
        store.insert(&svc("bank"), b"3").unwrap();
        fs::write(store.root().join("email/notes.txt"), "not a secret").unwrap();

        assert_eq!(
            sorted(store.list().unwrap()),
            vec!["bank", "email/home", "email/work"]
        );
    }

    #[test]
    fn test_tree() {
        let (store, _gateway, _temp) = temp_store();
        store.insert(&svc("email/work"), b"1").unwrap();
        store.insert(&svc("bank"), b"2").unwrap();

        let tree = store.tree().unwrap();
        assert_eq!(
            tree,
            vec![
                TreeNode::Entry { name: "bank".to_string() },
                TreeNode::Dir {
                    name: "email".to_string(),
                    children: vec![TreeNode::Entry { name: "work".to_string() }],
                },
            ]
        );
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (store, _gateway, _temp) = temp_store();
        store.insert(&svc("bank"), b"1").unwrap();

        assert!(store.remove(&svc("bank")).unwrap());
        assert!(!store.exists(&svc("bank")));
        assert!(!store.remove(&svc("bank")).unwrap());
        assert!(store.root().is_dir());
    }

    #[test]
    fn test_remove_prunes_empty_ancestors() {
        let (store, _gateway, _temp) = temp_store();
        store.insert(&svc("social/old/forum"), b"1").unwrap();

        store.remove(&svc("social/old/forum")).unwrap();
        assert!(!store.root().join("social").exists());
        assert!(store.root().join(IDENTITY_FILE).is_file());
    }

    #[test]
    fn test_remove_keeps_non_empty_directories() {
        let (store, _gateway, _temp) = temp_store();
        store.insert(&svc("email/work"), b"1").unwrap();
        store.insert(&svc("email/home"), b"2").unwrap();

        store.remove(&svc("email/work")).unwrap();
        assert!(store.root().join("email").is_dir());
        assert!(store.exists(&svc("email/home")));
    }

    #[test]
    fn test_rename() {
        let (store, _gateway, _temp) = temp_store();
        store.insert(&svc("email/work"), b"p@ss").unwrap();

        store
            .rename(&svc("email/work"), &svc("archive/2020/job"), Overwrite::Deny)
            .unwrap();
        assert!(!store.exists(&svc("email/work")));
        assert!(!store.root().join("email").exists());
        assert_eq!(store.read(&svc("archive/2020/job")).unwrap(), b"p@ss");
    }

    #[test]
    fn test_rename_conflicts() {
        let (store, _gateway, _temp) = temp_store();

        assert!(matches!(
            store.rename(&svc("a"), &svc("b"), Overwrite::Deny),
            Err(VaultError::NotFound(_))
        ));

        store.insert(&svc("a"), b"first").unwrap();
        store.insert(&svc("b"), b"second").unwrap();
        assert!(matches!(
            store.rename(&svc("a"), &svc("b"), Overwrite::Deny),
            Err(VaultError::AlreadyExists(_))
        ));
        assert_eq!(store.read(&svc("b")).unwrap(), b"second");

        store.rename(&svc("a"), &svc("b"), Overwrite::Allow).unwrap();
        assert!(!store.exists(&svc("a")));
        assert_eq!(store.read(&svc("b")).unwrap(), b"first");
    }

    #[test]
    fn test_copy() {
        let (store, _gateway, _temp) = temp_store();
        store.insert(&svc("email/work"), b"p@ss").unwrap();

        store.copy(&svc("email/work"), &svc("backup/work"), Overwrite::Deny).unwrap();
        assert_eq!(store.read(&svc("email/work")).unwrap(), b"p@ss");
        assert_eq!(store.read(&svc("backup/work")).unwrap(), b"p@ss");
        assert_eq!(
            fs::read(store.root().join("email/work.gpg")).unwrap(),
            fs::read(store.root().join("backup/work.gpg")).unwrap()
        );

        assert!(matches!(
            store.copy(&svc("email/work"), &svc("backup/work"), Overwrite::Deny),
            Err(VaultError::AlreadyExists(_))
        ));
        assert!(matches!(
            store.copy(&svc("missing"), &svc("x"), Overwrite::Allow),
            Err(VaultError::NotFound(_))
        ));

        store.insert(&svc("other"), b"different").unwrap();
        store.copy(&svc("other"), &svc("backup/work"), Overwrite::Allow).unwrap();
        assert_eq!(store.read(&svc("backup/work")).unwrap(), b"different");
    }

    #[test]
    fn test_failed_placement_removes_created_directories() {
        let (store, _gateway, _temp) = temp_store();
        store.insert(&svc("email/home"), b"keep").unwrap();
        let before = tree_snapshot(store.root());

        let dest = store.entry_path(&svc("social/old/forum"));
        let result = store.place(&dest, |dir| {
            assert!(dir.is_dir());
            let _staged = Store::stage(dir, b"ciphertext")?;
            Err(io_error(&dest)(io::Error::new(io::ErrorKind::Other, "disk full")))
        });

        assert!(matches!(result, Err(VaultError::Io { .. })));
        assert_eq!(tree_snapshot(store.root()), before);
        assert!(!store.root().join("social").exists());
    }

    #[test]
    fn test_failed_rename_removes_created_directories() {
        let (store, _gateway, _temp) = temp_store();
        store.insert(&svc("email/work"), b"p@ss").unwrap();
        let locked = store.root().join("email");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        // Permission bits do not bind a privileged user
        if fs::write(locked.join("writable"), b"").is_ok() {
            fs::remove_file(locked.join("writable")).unwrap();
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let before = tree_snapshot(store.root());
        let result = store.rename(&svc("email/work"), &svc("archive/2024/work"), Overwrite::Deny);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(result, Err(VaultError::Io { .. })));
        assert_eq!(tree_snapshot(store.root()), before);
        assert!(!store.root().join("archive").exists());
        assert_eq!(store.read(&svc("email/work")).unwrap(), b"p@ss");
    }

    #[test]
    fn test_failed_copy_removes_created_directories() {
        let (store, _gateway, _temp) = temp_store();
        store.insert(&svc("email/work"), b"p@ss").unwrap();
        let locked = store.root().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        if fs::write(locked.join("writable"), b"").is_ok() {
            fs::remove_file(locked.join("writable")).unwrap();
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let before = tree_snapshot(store.root());
        let result = store.copy(&svc("email/work"), &svc("locked/new/work"), Overwrite::Deny);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(result, Err(VaultError::Io { .. })));
        assert_eq!(tree_snapshot(store.root()), before);
    }

    #[test]
    fn test_staging_files_do_not_linger() {
        let (store, _gateway, _temp) = temp_store();
        store.insert(&svc("email/work"), b"1").unwrap();
        store.update(&svc("email/work"), b"2").unwrap();
        store.copy(&svc("email/work"), &svc("email/copy"), Overwrite::Deny).unwrap();

        let leftovers: Vec<_> = WalkDir::new(store.root())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_email_scenario() {
        let (store, _gateway, _temp) = temp_store();

        store.insert(&svc("email/work"), b"p@ss").unwrap();
        assert!(sorted(store.list().unwrap()).contains(&"email/work".to_string()));
        assert_eq!(store.read(&svc("email/work")).unwrap(), b"p@ss");

        store.rename(&svc("email/work"), &svc("email/job"), Overwrite::Deny).unwrap();
        assert!(!store.exists(&svc("email/work")));
        assert_eq!(store.read(&svc("email/job")).unwrap(), b"p@ss");

        store.remove(&svc("email/job")).unwrap();
        assert!(!store.root().join("email").exists());
    }
}
