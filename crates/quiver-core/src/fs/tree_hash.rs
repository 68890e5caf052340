//! Deterministic tree hashing for installed skill content.
//!
//! The hash is stored on every registry record so `sync` and `scan` can tell
//! whether an installed directory changed behind the registry's back.

use anyhow::Context;
use std::fs;
use std::path::Path;

/// Compute deterministic tree hash of a directory
///
/// # Algorithm
/// - Recursive directory traversal, entries sorted by name
/// - Files: `blake3(relative_path || 0x00 || content)`
/// - Directories: `relative_path || 0xFF`, then their children
/// - Symlinks: `relative_path || 0xFE || link target` (not followed)
/// - `.git` directories are skipped
/// - Output: hex string
///
/// # Example
/// ```no_run
/// use quiver_core::fs::tree_hash::hash_tree;
/// use std::path::Path;
///
/// let hash = hash_tree(Path::new("/path/to/skill"))?;
/// assert_eq!(hash.len(), 64);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn hash_tree(path: &Path) -> anyhow::Result<String> {
    let mut hasher = blake3::Hasher::new();
    hash_dir_recursive(&mut hasher, path, "")?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn hash_dir_recursive(hasher: &mut blake3::Hasher, dir: &Path, base: &str) -> anyhow::Result<()> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    let mut sorted_entries: Vec<_> = entries
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read directory entries: {}", dir.display()))?;
    sorted_entries.sort_by_key(|e| e.file_name());

    for entry in sorted_entries {
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if name_str == ".git" {
            continue;
        }
        let rel_path = if base.is_empty() {
            name_str.to_string()
        } else {
            format!("{}/{}", base, name_str)
        };

        let ty = entry
            .file_type()
            .with_context(|| format!("Failed to stat file: {}", entry.path().display()))?;

        if ty.is_dir() {
            hasher.update(rel_path.as_bytes());
            hasher.update(&[0xFF]);
            hash_dir_recursive(hasher, &entry.path(), &rel_path)?;
        } else if ty.is_file() {
            hasher.update(rel_path.as_bytes());
            hasher.update(&[0x00]);
            let content = fs::read(entry.path())
                .with_context(|| format!("Failed to read file: {}", entry.path().display()))?;
            hasher.update(&content);
        } else if ty.is_symlink() {
            let target = fs::read_link(entry.path())
                .with_context(|| format!("Failed to read link: {}", entry.path().display()))?;
            hasher.update(rel_path.as_bytes());
            hasher.update(&[0xFE]);
            hasher.update(target.to_string_lossy().as_bytes());
        } else {
            anyhow::bail!(
                "Unsupported filesystem entry type: {}",
                entry.path().display()
            );
        }
    }

    Ok(())
}
