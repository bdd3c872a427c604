//! Collision-free destination paths.
//!
//! The returned path is free at the moment of the check only. Two runs writing
//! into the same directory at once can still race between resolve and move.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Returns `candidate` if nothing exists there, otherwise the first free
/// `stem_N.ext` sibling with N counting up from 1.
pub fn resolve(candidate: &Path) -> PathBuf {
    resolve_with(candidate, |_| false)
}

/// Like [`resolve`], but also treats any path for which `is_taken` returns true
/// as occupied.
pub fn resolve_with<F>(candidate: &Path, is_taken: F) -> PathBuf
where
    F: Fn(&Path) -> bool,
{
    let occupied = |path: &Path| path.exists() || is_taken(path);

    if !occupied(candidate) {
        return candidate.to_path_buf();
    }

    let stem = candidate
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    let extension = candidate.extension();
    let parent = candidate.parent().unwrap_or_else(|| Path::new(""));

    let mut counter: u64 = 1;
    loop {
        let mut name = OsString::with_capacity(stem.len() + 8);
        name.push(&stem);
        name.push(format!("_{}", counter));
        if let Some(ext) = extension {
            name.push(".");
            name.push(ext);
        }
        let path = parent.join(name);
        if !occupied(&path) {
            return path;
        }
        counter += 1;
    }
}
