//! Path resolution between absolute target paths and show-relative record
//! paths, plus the containment check run before destructive record
//! operations.

use std::path::{Component, Path, PathBuf};

/// Lexically normalizes a path: drops `.` components and resolves `..`
/// against preceding components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Converts an absolute path to its show-relative form. The input comes back
/// unchanged when either side is empty or the path does not live under the
/// show folder.
pub fn to_relative(path: &Path, show_folder: &Path) -> PathBuf {
    if path.as_os_str().is_empty() || show_folder.as_os_str().is_empty() {
        return path.to_path_buf();
    }

    let absolute = if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&show_folder.join(path))
    };

    match absolute.strip_prefix(normalize(show_folder)) {
        Ok(relative) => relative.to_path_buf(),
        Err(_) => path.to_path_buf(),
    }
}

/// Resolves a show-relative path to its absolute form. Empty inputs and
/// already-absolute paths come back unchanged; this never fails to the
/// caller.
pub fn to_absolute(path: &Path, show_folder: &Path) -> PathBuf {
    if path.as_os_str().is_empty() || show_folder.as_os_str().is_empty() {
        return path.to_path_buf();
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    normalize(&show_folder.join(path))
}

/// Checks that `path` is a descendant of `root` on the real filesystem.
/// Any canonicalization failure counts as "not within root".
pub fn is_within_root(path: &Path, root: &Path) -> bool {
    let Ok(canonical_path) = path.canonicalize() else {
        log::warn!("Cannot canonicalize {}, treating as outside root.", path.display());
        return false;
    };
    let Ok(canonical_root) = root.canonicalize() else {
        log::warn!("Cannot canonicalize root {}, treating as outside root.", root.display());
        return false;
    };
    canonical_path.starts_with(&canonical_root)
}
