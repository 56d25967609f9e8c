// paths.rs - Per-user directories for logs and the model cache.

use std::path::{Path, PathBuf};

use anyhow::Context;

/// `$HOME`, falling back to `%USERPROFILE%` on Windows. Empty values count as unset.
pub fn home_dir() -> Option<PathBuf> {
    ["HOME", "USERPROFILE"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// `rel` under the home directory, created if missing.
pub fn ensure_home_subdir(rel: &str) -> anyhow::Result<PathBuf> {
    let home = home_dir().context("cannot determine home directory (neither HOME nor USERPROFILE is set)")?;
    ensure_subdir(&home, rel)
}

fn ensure_subdir(base: &Path, rel: &str) -> anyhow::Result<PathBuf> {
    let dir = base.join(rel);
    std::fs::create_dir_all(&dir).with_context(|| format!("failed creating {}", dir.display()))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_subdir_creates_nested_dirs() {
        let home = tempfile::tempdir().unwrap();
        let dir = ensure_subdir(home.path(), ".review_embed/models/Qwen--Qwen3-Embedding-4B").unwrap();
        assert!(dir.is_dir());
        assert!(dir.starts_with(home.path()));

        // Already present is fine.
        assert_eq!(ensure_subdir(home.path(), ".review_embed/models/Qwen--Qwen3-Embedding-4B").unwrap(), dir);
    }

    #[test]
    fn test_ensure_subdir_fails_under_a_file() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join("blocker"), b"").unwrap();
        assert!(ensure_subdir(home.path(), "blocker/logs").is_err());
    }
}
