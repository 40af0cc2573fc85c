use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// RAII guard for temporary directories that ensures cleanup
pub struct TempDirGuard {
    temp_dir: tempfile::TempDir,
}

impl TempDirGuard {
    /// Create a prefixed scratch directory inside `root`, creating `root` if needed.
    pub fn new_in(root: &Path, prefix: &str) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("Failed to create temporary root {}", root.display()))?;
        let temp_dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(root)
            .context("Failed to create temporary directory")?;
        Ok(Self { temp_dir })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Detach the directory from the guard; it will no longer be removed on drop.
    pub fn keep(self) -> PathBuf {
        self.temp_dir.keep()
    }
}

/// Reduce an archive member name to a safe basename.
///
/// Directory components are dropped and anything outside
/// `[A-Za-z0-9._-]` (plus space) becomes `_`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Move a file, falling back to copy and remove across filesystems.
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    debug!(
        "rename {} -> {} failed, copying instead",
        from.display(),
        to.display()
    );
    fs::copy(from, to)
        .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
    fs::remove_file(from).with_context(|| format!("Failed to remove {}", from.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_dir_guard_cleanup() {
        let root = tempfile::TempDir::new().unwrap();
        let path = {
            let guard = TempDirGuard::new_in(root.path(), "unupx_").unwrap();
            assert!(guard.path().exists());
            assert!(guard
                .path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("unupx_"));
            guard.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_temp_dir_guard_cleanup_on_error_path() {
        let root = tempfile::TempDir::new().unwrap();
        let mut seen = PathBuf::new();
        let result: Result<()> = (|| {
            let guard = TempDirGuard::new_in(root.path(), "unnsis_")?;
            seen = guard.path().to_path_buf();
            fs::write(guard.path().join("partial"), b"x")?;
            anyhow::bail!("tool crashed")
        })();
        assert!(result.is_err());
        assert!(!seen.exists());
    }

    #[test]
    fn test_temp_dir_guard_keep() {
        let root = tempfile::TempDir::new().unwrap();
        let guard = TempDirGuard::new_in(&root.path().join("nested"), "keep_").unwrap();
        let kept = guard.keep();
        assert!(kept.is_dir());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a.exe"), "a.exe");
        assert_eq!(sanitize_filename("dir/sub/payload.exe"), "payload.exe");
        assert_eq!(sanitize_filename("..\\..\\evil.dll"), "evil.dll");
        assert_eq!(sanitize_filename("in$voice|2024?.js"), "in_voice_2024_.js");
        assert_eq!(sanitize_filename("../"), "unnamed");
        assert_eq!(sanitize_filename(""), "unnamed");
    }

    #[test]
    fn test_move_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let from = dir.path().join("a");
        let to = dir.path().join("b");
        fs::write(&from, b"payload").unwrap();
        move_file(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"payload");
    }
}
