//! Recursive directory copy used for staging and installation.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

/// Which entries a copy skips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyFilter {
    /// Copy everything except `.git`
    #[default]
    SkipGit,
    /// Skip every dot-prefixed entry (and therefore `.git`)
    SkipHidden,
}

impl CopyFilter {
    fn skips(self, name: &str) -> bool {
        match self {
            Self::SkipGit => name == ".git",
            Self::SkipHidden => name.starts_with('.'),
        }
    }
}

/// Copy `src` into `dst`, creating `dst` and any missing parents.
///
/// Symlinks are copied as links on unix and resolved elsewhere.
pub fn copy_tree(src: &Path, dst: &Path, filter: CopyFilter) -> anyhow::Result<()> {
    copy_tree_excluding(src, dst, filter, &[])
}

/// Like [`copy_tree`], skipping every source path listed in `exclude`.
pub fn copy_tree_excluding(
    src: &Path,
    dst: &Path,
    filter: CopyFilter,
    exclude: &[PathBuf],
) -> anyhow::Result<()> {
    fs::create_dir_all(dst)
        .with_context(|| format!("Failed to create directory: {}", dst.display()))?;

    for entry in
        fs::read_dir(src).with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        if filter.skips(&name.to_string_lossy()) {
            continue;
        }
        let from = entry.path();
        if exclude.iter().any(|x| x == &from) {
            continue;
        }
        let to = dst.join(&name);
        let ty = entry.file_type()?;

        if ty.is_dir() {
            copy_tree_excluding(&from, &to, filter, exclude)?;
        } else if ty.is_symlink() {
            copy_symlink(&from, &to)?;
        } else {
            fs::copy(&from, &to).with_context(|| {
                format!("Failed to copy {} to {}", from.display(), to.display())
            })?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> anyhow::Result<()> {
    let target = fs::read_link(from)?;
    std::os::unix::fs::symlink(&target, to)
        .with_context(|| format!("Failed to create symlink: {}", to.display()))
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> anyhow::Result<()> {
    if from.is_dir() {
        copy_tree(from, to, CopyFilter::SkipGit)
    } else {
        fs::copy(from, to)
            .map(|_| ())
            .with_context(|| format!("Failed to copy {}", from.display()))
    }
}

/// Total size in bytes of regular files under `path`.
pub fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.file_type() {
            Ok(ty) if ty.is_dir() => dir_size(&entry.path()),
            Ok(ty) if ty.is_file() => entry.metadata().map(|m| m.len()).unwrap_or(0),
            _ => 0,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copy_skips_git_but_keeps_dotfiles() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join(".git")).unwrap();
        fs::create_dir_all(src.join("scripts")).unwrap();
        fs::write(src.join(".git/HEAD"), "x").unwrap();
        fs::write(src.join(".env.example"), "A=1").unwrap();
        fs::write(src.join("scripts/run.sh"), "echo").unwrap();

        let dst = temp.path().join("dst");
        copy_tree(&src, &dst, CopyFilter::SkipGit).unwrap();

        assert!(!dst.join(".git").exists());
        assert!(dst.join(".env.example").exists());
        assert!(dst.join("scripts/run.sh").exists());
    }

    #[test]
    fn excluded_subtrees_are_not_copied() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("suite");
        fs::create_dir_all(src.join("skills/pdf")).unwrap();
        fs::write(src.join("SKILL.md"), "suite").unwrap();
        fs::write(src.join("skills/pdf/SKILL.md"), "pdf").unwrap();

        let dst = temp.path().join("dst");
        copy_tree_excluding(&src, &dst, CopyFilter::SkipGit, &[src.join("skills/pdf")]).unwrap();
        assert!(dst.join("SKILL.md").exists());
        assert!(dst.join("skills").is_dir());
        assert!(!dst.join("skills/pdf").exists());
    }

    #[test]
    fn skip_hidden_drops_dotfiles() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join(".cache")).unwrap();
        fs::write(src.join("README.md"), "# hi").unwrap();

        let dst = temp.path().join("dst");
        copy_tree(&src, &dst, CopyFilter::SkipHidden).unwrap();
        assert!(!dst.join(".cache").exists());
        assert!(dst.join("README.md").exists());
    }

    #[test]
    fn dir_size_sums_nested_files() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("a/b")).unwrap();
        fs::write(temp.path().join("a/one"), [0u8; 10]).unwrap();
        fs::write(temp.path().join("a/b/two"), [0u8; 5]).unwrap();
        assert_eq!(dir_size(temp.path()), 15);
        assert_eq!(dir_size(&temp.path().join("missing")), 0);
    }
}
