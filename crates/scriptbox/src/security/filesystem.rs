//! Filesystem access confined to the sandbox root.

use serde::Serialize;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, SandboxError};
use crate::policy::{FsConsent, FsOperation, SandboxPolicy};

/// One entry returned by [`FileSystemGuard::list_directory`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntryInfo {
    /// File or directory name
    pub name: String,
    /// Whether the entry is a directory
    pub is_directory: bool,
    /// Size in bytes (0 for directories)
    pub size: u64,
}

/// Validates script-supplied paths against the sandbox root and performs the
/// filesystem operations exposed to scripts.
#[derive(Debug, Clone)]
pub struct FileSystemGuard {
    root: PathBuf,
    consent: Option<FsConsent>,
}

impl FileSystemGuard {
    /// Create a guard from the sandbox policy.
    ///
    /// A relative root is anchored at the current working directory.
    pub fn new(policy: &SandboxPolicy) -> Result<Self> {
        let root = if policy.sandbox_root.is_absolute() {
            policy.sandbox_root.clone()
        } else {
            std::env::current_dir()?.join(&policy.sandbox_root)
        };
        let root = normalize(&root).ok_or_else(|| {
            SandboxError::Config(format!(
                "sandbox root {} cannot be normalized",
                policy.sandbox_root.display()
            ))
        })?;

        Ok(Self {
            root,
            consent: policy.fs_consent.clone(),
        })
    }

    /// The normalized sandbox root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a script-supplied path to a host path, enforcing containment.
    ///
    /// Absolute paths are always rejected. A relative path whose normalized form
    /// leaves the root is rejected unless the consent callback approves this
    /// exact (path, operation) pair.
    pub fn resolve(&self, requested: &str, op: FsOperation) -> Result<PathBuf> {
        let requested_path = Path::new(requested);
        if requested.is_empty() {
            return Err(SandboxError::InvalidArgument("path is empty".to_string()));
        }
        if requested_path.has_root()
            || requested_path
                .components()
                .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
        {
            tracing::warn!(path = %requested, %op, "absolute path rejected");
            return Err(SandboxError::SecurityViolation(format!(
                "absolute paths are not allowed: {}",
                requested
            )));
        }

        let resolved = normalize(&self.root.join(requested_path));
        match resolved {
            Some(path) if path.starts_with(&self.root) => Ok(path),
            escaped => {
                let approved = self
                    .consent
                    .as_ref()
                    .is_some_and(|c| c.approves(requested_path, op));
                match escaped {
                    Some(path) if approved => {
                        tracing::info!(path = %requested, %op, "sandbox escape approved by consent callback");
                        Ok(path)
                    }
                    _ => {
                        tracing::warn!(path = %requested, %op, "path escapes sandbox root");
                        Err(SandboxError::SecurityViolation(format!(
                            "path '{}' escapes the sandbox root",
                            requested
                        )))
                    }
                }
            }
        }
    }

    /// Read a file as UTF-8 text.
    pub async fn read_text(&self, path: &str) -> Result<String> {
        let full = self.resolve(path, FsOperation::ReadText)?;
        Ok(tokio::fs::read_to_string(full).await?)
    }

    /// Write text to a file, creating parent directories as needed.
    pub async fn write_text(&self, path: &str, content: &str) -> Result<()> {
        let full = self.resolve(path, FsOperation::WriteText)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(full, content).await?;
        Ok(())
    }

    /// List the entries of a directory, sorted by name.
    pub async fn list_directory(&self, path: &str) -> Result<Vec<DirEntryInfo>> {
        let full = self.resolve(path, FsOperation::ListDirectory)?;
        let mut reader = tokio::fs::read_dir(full).await?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let meta = entry.metadata().await?;
            entries.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_directory: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Whether a file or directory exists.
    pub async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path, FsOperation::Exists)?;
        Ok(tokio::fs::try_exists(full).await?)
    }

    /// Delete a file, or a directory and everything below it.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path, FsOperation::Delete)?;
        if full == self.root {
            return Err(SandboxError::SecurityViolation(
                "refusing to delete the sandbox root".to_string(),
            ));
        }
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&full).await?,
            Ok(_) => tokio::fs::remove_file(&full).await?,
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Create a directory and any missing parents.
    pub async fn create_directory(&self, path: &str) -> Result<()> {
        let full = self.resolve(path, FsOperation::CreateDirectory)?;
        tokio::fs::create_dir_all(full).await?;
        Ok(())
    }
}

/// Lexically normalize an absolute path: drop `.` and fold `..`.
///
/// Symlinks are not resolved. Returns `None` if `..` climbs above the filesystem root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() || out.as_os_str().is_empty() {
                    return None;
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(root: &Path) -> FileSystemGuard {
        FileSystemGuard::new(&SandboxPolicy::new(root)).unwrap()
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize(Path::new("/a/b/../c/./d")),
            Some(PathBuf::from("/a/c/d"))
        );
        assert_eq!(normalize(Path::new("/a/..")), Some(PathBuf::from("/")));
        assert_eq!(normalize(Path::new("/..")), None);
    }

    #[test]
    fn test_resolve_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let guard = guard(dir.path());
        let resolved = guard.resolve("a/./b/../c.txt", FsOperation::ReadText).unwrap();
        assert_eq!(resolved, guard.root().join("a/c.txt"));
    }

    #[test]
    fn test_resolve_rejects_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let guard = guard(dir.path());
        let err = guard.resolve("/etc/passwd", FsOperation::ReadText).unwrap_err();
        assert!(err.is_security_violation());
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let guard = guard(dir.path());
        let err = guard
            .resolve("../../etc/passwd", FsOperation::ReadText)
            .unwrap_err();
        assert!(err.is_security_violation());

        // Climbing out and back in stays contained.
        let name = guard.root().file_name().unwrap().to_string_lossy().into_owned();
        let back_in = format!("../{}/file.txt", name);
        assert!(guard.resolve(&back_in, FsOperation::ReadText).is_ok());
    }

    #[test]
    fn test_consent_is_per_operation() {
        let dir = tempfile::tempdir().unwrap();
        let policy = SandboxPolicy::new(dir.path()).fs_consent(|path, op| {
            path == Path::new("../shared/notes.txt") && op == FsOperation::ReadText
        });
        let guard = FileSystemGuard::new(&policy).unwrap();

        assert!(guard
            .resolve("../shared/notes.txt", FsOperation::ReadText)
            .is_ok());
        assert!(guard
            .resolve("../shared/notes.txt", FsOperation::Delete)
            .unwrap_err()
            .is_security_violation());
        assert!(guard
            .resolve("../other.txt", FsOperation::ReadText)
            .unwrap_err()
            .is_security_violation());
    }

    #[test]
    fn test_absolute_rejected_even_with_consent() {
        let dir = tempfile::tempdir().unwrap();
        let policy = SandboxPolicy::new(dir.path()).fs_consent(|_, _| true);
        let guard = FileSystemGuard::new(&policy).unwrap();
        assert!(guard
            .resolve("/etc/passwd", FsOperation::ReadText)
            .unwrap_err()
            .is_security_violation());
    }

    #[tokio::test]
    async fn test_file_operations() {
        let dir = tempfile::tempdir().unwrap();
        let guard = guard(dir.path());

        guard.write_text("notes/today.txt", "hello").await.unwrap();
        assert!(guard.exists("notes/today.txt").await.unwrap());
        assert_eq!(guard.read_text("notes/today.txt").await.unwrap(), "hello");

        guard.create_directory("notes/archive/2024").await.unwrap();
        let entries = guard.list_directory("notes").await.unwrap();
        assert_eq!(
            entries,
            vec![
                DirEntryInfo {
                    name: "archive".to_string(),
                    is_directory: true,
                    size: 0
                },
                DirEntryInfo {
                    name: "today.txt".to_string(),
                    is_directory: false,
                    size: 5
                },
            ]
        );

        guard.delete("notes").await.unwrap();
        assert!(!guard.exists("notes").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_root_refused() {
        let dir = tempfile::tempdir().unwrap();
        let guard = guard(dir.path());
        let err = guard.delete("a/..").await.unwrap_err();
        assert!(err.is_security_violation());
        assert!(dir.path().exists());
    }
}
