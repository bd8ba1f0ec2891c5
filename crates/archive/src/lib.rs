//! archive - Vault snapshots for strongbox
//!
//! Serializes a vault directory into a single gzip-compressed tar archive
//! and restores one back onto disk. Entries are stored under paths relative
//! to the vault root, directories included (empty ones too), so a restore
//! reproduces the tree exactly. Encrypted entries are copied byte for byte;
//! nothing is ever decrypted.
//!
//! Archives are named `<vault>_<YYYY-MM-DD_HH-MM-SS>.tar.gz`.

use chrono::{DateTime, Local};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, BufReader, Read, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// File extension of every archive
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

/// Archive errors
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to walk {}: {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Archive {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn corrupt(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Corrupt {
        path: path.to_path_buf(),
        source,
    }
}

/// What a restore wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub directories: usize,
    pub files: usize,
    /// Members that were not a regular file or directory, or had unsafe paths
    pub skipped: usize,
}

/// Generate the archive file stem for a vault at a point in time
pub fn archive_stem(vault_root: &Path, now: DateTime<Local>) -> String {
    let base = vault_root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "vault".to_string());

    format!("{}_{}", base, now.format("%Y-%m-%d_%H-%M-%S"))
}

/// Create a file for the archive without clobbering an earlier one.
///
/// Two snapshots in the same second get `-1`, `-2`, ... suffixes.
fn create_unique(dir: &Path, stem: &str) -> Result<(File, PathBuf)> {
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("{}.{}", stem, ARCHIVE_EXTENSION)
        } else {
            format!("{}-{}.{}", stem, attempt, ARCHIVE_EXTENSION)
        };
        let path = dir.join(name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(io_error(&path)(e)),
        }
    }
}

/// Snapshot `vault_root` into a new archive inside `destination_dir`.
///
/// Aborts on the first error. A partially written archive is left in place
/// for the caller to discard. When the destination lies inside the vault the
/// archive being written is left out of itself.
pub fn archive(vault_root: &Path, destination_dir: &Path) -> Result<PathBuf> {
    let metadata = fs::metadata(vault_root).map_err(io_error(vault_root))?;
    if !metadata.is_dir() {
        return Err(io_error(vault_root)(io::Error::new(
            io::ErrorKind::InvalidInput,
            "vault root is not a directory",
        )));
    }

    fs::create_dir_all(destination_dir).map_err(io_error(destination_dir))?;
    let (file, archive_path) = create_unique(destination_dir, &archive_stem(vault_root, Local::now()))?;
    info!(path = %archive_path.display(), "creating archive");

    // Matched by inode so any spelling of the destination is caught
    let own = file.metadata().map_err(io_error(&archive_path))?;
    let is_own_archive = |entry: &walkdir::DirEntry| {
        entry
            .metadata()
            .map(|m| m.dev() == own.dev() && m.ino() == own.ino())
            .unwrap_or(false)
    };

    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for entry in WalkDir::new(vault_root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|source| ArchiveError::Walk {
            root: vault_root.to_path_buf(),
            source,
        })?;
        let path = entry.path();

        // Entries always live under the root we walk
        let rel_path = path.strip_prefix(vault_root).unwrap_or(path);

        let file_type = entry.file_type();
        if file_type.is_file() && is_own_archive(&entry) {
            debug!(path = %path.display(), "skipping the archive being written");
            continue;
        }
        if file_type.is_dir() {
            builder
                .append_dir(rel_path, path)
                .map_err(io_error(path))?;
        } else if file_type.is_file() {
            builder
                .append_path_with_name(path, rel_path)
                .map_err(io_error(path))?;
        } else {
            warn!(path = %path.display(), "skipping non-regular file");
            continue;
        }
        debug!(member = %rel_path.display(), "archived");
    }

    let encoder = builder.into_inner().map_err(io_error(&archive_path))?;
    let file = encoder.finish().map_err(io_error(&archive_path))?;
    file.sync_all().map_err(io_error(&archive_path))?;

    Ok(archive_path)
}

/// Reduce an archive member path to a safe relative path.
///
/// `None` for absolute paths or anything climbing out with `..`.
fn sanitize(member: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in member.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}

fn apply_mode(path: &Path, mode: u32) {
    if let Err(e) = fs::set_permissions(path, Permissions::from_mode(mode)) {
        warn!(path = %path.display(), error = %e, "could not restore permissions");
    }
}

/// Extract `archive_path` into `target_dir`, overwriting existing files.
///
/// Directories are created with their stored mode, regular files are written
/// with their stored content and mode. Any other member type is logged and
/// skipped.
pub fn restore(archive_path: &Path, target_dir: &Path) -> Result<RestoreSummary> {
    let file = File::open(archive_path).map_err(io_error(archive_path))?;
    fs::create_dir_all(target_dir).map_err(io_error(target_dir))?;
    info!(
        archive = %archive_path.display(),
        target = %target_dir.display(),
        "restoring archive"
    );

    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut summary = RestoreSummary::default();

    for entry in archive.entries().map_err(corrupt(archive_path))? {
        let mut entry = entry.map_err(corrupt(archive_path))?;
        let member = entry.path().map_err(corrupt(archive_path))?.into_owned();
        let mode = entry.header().mode().map_err(corrupt(archive_path))? & 0o7777;
        let entry_type = entry.header().entry_type();

        let Some(rel_path) = sanitize(&member) else {
            warn!(member = %member.display(), "skipping member outside the target");
            summary.skipped += 1;
            continue;
        };
        let dest = target_dir.join(&rel_path);

        if entry_type.is_dir() {
            if rel_path.as_os_str().is_empty() {
                continue;
            }
            fs::create_dir_all(&dest).map_err(io_error(&dest))?;
            apply_mode(&dest, mode);
            summary.directories += 1;
        } else if entry_type.is_file() && !rel_path.as_os_str().is_empty() {
            let mut contents = Vec::new();
            entry
                .read_to_end(&mut contents)
                .map_err(corrupt(archive_path))?;

            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(io_error(parent))?;
            }
            let mut out = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(mode)
                .open(&dest)
                .map_err(io_error(&dest))?;
            out.write_all(&contents).map_err(io_error(&dest))?;
            apply_mode(&dest, mode);
            summary.files += 1;
        } else {
            warn!(
                member = %member.display(),
                kind = ?entry_type,
                "skipping unsupported archive member"
            );
            summary.skipped += 1;
        }
    }

    Ok(summary)
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1}G", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}M", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}K", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}
