// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Directory name used when the request names no workspace.
const SHARED_WORKSPACE: &str = "shared_workspace";

/// Parent directory for named workspaces.
const NAMED_WORKSPACE_DIR: &str = "workspace";

/// Failure categories for workspace resolution.
///
/// The distinction matters for the HTTP layer: permission and disk problems
/// are operator errors worth alerting on, while `NotADirectory` usually
/// means a stray file is squatting on the workspace path.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("permission denied creating workspace {0}")]
    PermissionDenied(PathBuf),
    #[error("workspace path {0} exists but is not a directory")]
    NotADirectory(PathBuf),
    #[error("disk full creating workspace {0}")]
    DiskFull(PathBuf),
    #[error("creating workspace {path}: {source}")]
    Other {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Resolve (and create if needed) the child's working directory.
///
/// No name → `<base>/shared_workspace`; a name → `<base>/workspace/<name>`.
/// The name's charset is enforced by request validation upstream; this
/// function assumes it is already safe to join.
/// An existing directory is success, not an error.
pub fn resolve_workspace(base: &Path, name: Option<&str>) -> Result<PathBuf, WorkspaceError> {
    let path = match name {
        None => base.join(SHARED_WORKSPACE),
        Some(n) => base.join(NAMED_WORKSPACE_DIR).join(n),
    };

    match std::fs::create_dir_all(&path) {
        Ok(()) => {}
        Err(e) => return Err(map_io_error(e, path)),
    }

    // create_dir_all succeeds silently if a symlink-to-file or similar sits
    // at the leaf on some platforms; verify we really got a directory.
    if !path.is_dir() {
        return Err(WorkspaceError::NotADirectory(path));
    }

    let absolute = path
        .canonicalize()
        .map_err(|e| map_io_error(e, path.clone()))?;
    debug!(workspace = %absolute.display(), "resolved workspace");
    Ok(absolute)
}

fn map_io_error(e: std::io::Error, path: PathBuf) -> WorkspaceError {
    use std::io::ErrorKind;
    #[cfg(unix)]
    if e.raw_os_error() == Some(libc::ENOSPC) {
        return WorkspaceError::DiskFull(path);
    }
    match e.kind() {
        ErrorKind::PermissionDenied => WorkspaceError::PermissionDenied(path),
        // A file squatting on the workspace path surfaces as either kind,
        // depending on where in the walk create_dir_all hits it.
        ErrorKind::NotADirectory | ErrorKind::AlreadyExists => {
            WorkspaceError::NotADirectory(path)
        }
        _ => WorkspaceError::Other { path, source: e },
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_name_resolves_to_shared_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let path = resolve_workspace(tmp.path(), None).unwrap();
        assert!(path.ends_with("shared_workspace"));
        assert!(path.is_dir());
        assert!(path.is_absolute());
    }

    #[test]
    fn named_workspace_nests_under_workspace_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let path = resolve_workspace(tmp.path(), Some("proj-1")).unwrap();
        assert!(path.ends_with("workspace/proj-1"));
        assert!(path.is_dir());
    }

    #[test]
    fn existing_directory_is_success() {
        let tmp = tempfile::tempdir().unwrap();
        let first = resolve_workspace(tmp.path(), Some("again")).unwrap();
        let second = resolve_workspace(tmp.path(), Some("again")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn file_squatting_on_path_is_not_a_directory() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("workspace")).unwrap();
        std::fs::write(tmp.path().join("workspace/taken"), b"file").unwrap();
        let err = resolve_workspace(tmp.path(), Some("taken")).unwrap_err();
        assert!(
            matches!(
                err,
                WorkspaceError::NotADirectory(_) | WorkspaceError::Other { .. }
            ),
            "unexpected error: {err:?}"
        );
    }

    #[cfg(unix)]
    #[test]
    fn unwritable_base_maps_to_permission_denied() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let locked = tmp.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500)).unwrap();

        // Running as root bypasses mode bits; skip in that case.
        if unsafe { libc::geteuid() } == 0 {
            return;
        }

        let err = resolve_workspace(&locked, Some("denied")).unwrap_err();
        assert!(matches!(err, WorkspaceError::PermissionDenied(_)));

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o700)).unwrap();
    }
}
