//! On-disk artifact storage rooted per-mirror (`spec.md` §4.3).

use crate::error::BlobError;
use std::path::{Component, Path, PathBuf};

const TARGET: &str = "regmirror::blob_store";

#[cfg(unix)]
const DIR_MODE: u32 = 0o755;
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

/// A thin wrapper over `tokio::fs`; every method takes an absolute path
/// already resolved against a mirror's `blob_path` by the caller (P2: no
/// handler reads or writes outside `mirror.blob_path`).
#[derive(Debug, Default, Clone, Copy)]
pub struct BlobStore;

impl BlobStore {
    pub fn new() -> Self {
        Self
    }

    /// Confirms `path` stays within `root` after lexical normalisation —
    /// catches `..` segments a caller-built relative path might smuggle in.
    pub fn guard_within(root: &Path, path: &Path) -> Result<(), BlobError> {
        let mut depth: i64 = 0;
        for component in path.strip_prefix(root).unwrap_or(path).components() {
            match component {
                Component::ParentDir => depth -= 1,
                Component::Normal(_) => depth += 1,
                _ => {}
            }
            if depth < 0 {
                return Err(BlobError::PathEscape(path.to_path_buf()));
            }
        }
        Ok(())
    }

    pub async fn ensure_dir(&self, path: &Path) -> Result<(), BlobError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|source| BlobError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        #[cfg(unix)]
        self.chmod(path, DIR_MODE).await?;
        Ok(())
    }

    pub async fn put(&self, abs_path: &Path, bytes: &[u8]) -> Result<(), BlobError> {
        if let Some(parent) = abs_path.parent() {
            self.ensure_dir(parent).await?;
        }
        tracing::debug!(target: TARGET, path = %abs_path.display(), len = bytes.len(), "writing blob");
        tokio::fs::write(abs_path, bytes)
            .await
            .map_err(|source| BlobError::Io {
                path: abs_path.to_path_buf(),
                source,
            })?;
        #[cfg(unix)]
        self.chmod(abs_path, FILE_MODE).await?;
        Ok(())
    }

    pub async fn get(&self, abs_path: &Path) -> Result<Vec<u8>, BlobError> {
        tokio::fs::read(abs_path).await.map_err(|source| BlobError::Io {
            path: abs_path.to_path_buf(),
            source,
        })
    }

    /// Idempotent: a missing file is not an error (`spec.md` §4.3, §4.7).
    pub async fn remove(&self, abs_path: &Path) -> Result<(), BlobError> {
        match tokio::fs::remove_file(abs_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(BlobError::Io {
                path: abs_path.to_path_buf(),
                source,
            }),
        }
    }

    /// Recursive move, used by admin when `blob_path` changes.
    pub async fn move_tree(&self, src: &Path, dst: &Path) -> Result<(), BlobError> {
        if let Some(parent) = dst.parent() {
            self.ensure_dir(parent).await?;
        }
        match tokio::fs::rename(src, dst).await {
            Ok(()) => Ok(()),
            Err(_) => {
                // Cross-device rename isn't atomic; fall back to copy + remove.
                copy_dir_recursive(src, dst).await?;
                rda::remove_dir_all(src).map_err(|source| BlobError::Io {
                    path: src.to_path_buf(),
                    source,
                })
            }
        }
    }

    #[cfg(unix)]
    async fn chmod(&self, path: &Path, mode: u32) -> Result<(), BlobError> {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(mode);
        tokio::fs::set_permissions(path, perms)
            .await
            .map_err(|source| BlobError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

async fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<(), BlobError> {
    tokio::fs::create_dir_all(dst).await.map_err(|source| BlobError::Io {
        path: dst.to_path_buf(),
        source,
    })?;
    for entry in walkdir::WalkDir::new(src).into_iter().filter_map(Result::ok) {
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target: PathBuf = dst.join(rel);
        if entry.file_type().is_dir() {
            tokio::fs::create_dir_all(&target)
                .await
                .map_err(|source| BlobError::Io { path: target.clone(), source })?;
        } else {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| BlobError::Io { path: parent.to_path_buf(), source })?;
            }
            tokio::fs::copy(entry.path(), &target)
                .await
                .map_err(|source| BlobError::Io { path: target.clone(), source })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new();
        let path = dir.path().join("pkg/-/pkg-1.0.0.tgz");
        store.put(&path, b"tarball bytes").await.unwrap();
        assert_eq!(store.get(&path).await.unwrap(), b"tarball bytes");
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new();
        let path = dir.path().join("missing.bin");
        store.remove(&path).await.unwrap();
        store.remove(&path).await.unwrap();
    }

    #[test]
    fn guard_within_rejects_parent_escape() {
        let root = Path::new("/cache/npm");
        assert!(BlobStore::guard_within(root, Path::new("/cache/npm/foo/bar")).is_ok());
        assert!(BlobStore::guard_within(root, Path::new("../../etc/passwd")).is_err());
    }

    #[tokio::test]
    async fn move_tree_relocates_contents() {
        let base = tempfile::tempdir().unwrap();
        let src = base.path().join("src");
        let dst = base.path().join("dst");
        let store = BlobStore::new();
        store.put(&src.join("a/b.txt"), b"hi").await.unwrap();
        store.move_tree(&src, &dst).await.unwrap();
        assert_eq!(store.get(&dst.join("a/b.txt")).await.unwrap(), b"hi");
    }
}
