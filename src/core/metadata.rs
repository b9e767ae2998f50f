//! Metadata extraction for a single file on disk.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use super::record::FileRecord;
use crate::error::{IndexError, Result};

const CHUNK_SIZE: usize = 4096;

/// Build a fresh [`FileRecord`] for `path`.
///
/// The path is canonicalized first, so the record key is always absolute.
pub fn extract(path: &Path) -> Result<FileRecord> {
    let path = fs::canonicalize(path).map_err(|e| IndexError::from_io(path, e))?;
    let metadata = fs::metadata(&path).map_err(|e| IndexError::from_io(&path, e))?;
    if !metadata.is_file() {
        return Err(IndexError::io(
            &path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }

    let modified = metadata.modified().map_err(|e| IndexError::io(&path, e))?;
    let checksum = checksum(&path)?;

    Ok(FileRecord {
        extension: extension_of(&path),
        size: metadata.len(),
        modified_at: DateTime::<Local>::from(modified).naive_local(),
        checksum,
        display_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path,
    })
}

/// Stream the file through BLAKE3 and return the hex digest.
pub fn checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| IndexError::from_io(path, e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| IndexError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Lowercased extension with its leading dot, or an empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

/// Absolute form of a path that may no longer exist.
///
/// Deleted files cannot be canonicalized, so the parent is resolved instead
/// and the file name joined back on.
pub fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        if let Ok(parent) = fs::canonicalize(parent) {
            return parent.join(name);
        }
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
