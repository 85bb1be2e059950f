//! # Paths Module
//!
//! Resolves user-supplied file paths against the server base directory and owns the
//! `.masterchef/` state layout:
//!
//! ```text
//! <base_dir>/.masterchef/
//!   materialized/   GitOps environment documents
//!   resume/         configs derived from checkpoint resumes
//!   sessions/       runtime session recordings
//!   objects/        object store (backups, exports)
//! ```
//!
//! Directories are created lazily with mode `0o755`, files with `0o644`.

use crate::managers::{ManagerError, ManagerResult};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const STATE_DIR: &str = ".masterchef";
pub const CONFIG_PATH_NOT_FOUND: &str = "config_path not found";

/// Subdirectory of the state root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateDir {
    Materialized,
    Resume,
    Sessions,
    Objects,
}

impl StateDir {
    pub fn as_str(self) -> &'static str {
        match self {
            StateDir::Materialized => "materialized",
            StateDir::Resume => "resume",
            StateDir::Sessions => "sessions",
            StateDir::Objects => "objects",
        }
    }
}

/// Trim, join relative paths to `base`, and require the file to exist.
pub fn resolve_config_path(base: &Path, raw: &str) -> ManagerResult<PathBuf> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ManagerError::Invalid("config_path is required".to_string()));
    }
    let candidate = Path::new(trimmed);
    let resolved = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    };
    if !resolved.exists() {
        debug!(path = %resolved.display(), "config path missing");
        return Err(ManagerError::Invalid(CONFIG_PATH_NOT_FOUND.to_string()));
    }
    Ok(resolved)
}

/// Keep `[A-Za-z0-9._-]`, replace everything else with `_`.
pub fn sanitize_stem(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// `<base>/.masterchef/<dir>`, created on first use.
pub fn state_dir(base: &Path, dir: StateDir) -> io::Result<PathBuf> {
    let path = base.join(STATE_DIR).join(dir.as_str());
    create_dir_all(&path)?;
    Ok(path)
}

/// `mkdir -p` with `0o755` on every created directory.
pub fn create_dir_all(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }
    match fs::create_dir(path) {
        Ok(()) => set_mode(path, 0o755),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// Write `bytes` to `path` with `0o644`, creating parents with `0o755`.
pub fn write_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    set_mode(path, 0o644)
}

/// Write `<base>/.masterchef/<dir>/<sanitized name>.json`; returns the path.
pub fn write_state_json(
    base: &Path,
    dir: StateDir,
    name: &str,
    value: &serde_json::Value,
) -> ManagerResult<PathBuf> {
    let root = state_dir(base, dir)?;
    let path = root.join(format!("{}.json", sanitize_stem(name)));
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| ManagerError::Internal(format!("encoding state file: {e}")))?;
    write_file(&path, &bytes)?;
    debug!(path = %path.display(), bytes = bytes.len(), "state file written");
    Ok(path)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path_resolves_against_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("site.yaml"), "resources: []").unwrap();
        let resolved = resolve_config_path(dir.path(), "  site.yaml ").unwrap();
        assert_eq!(resolved, dir.path().join("site.yaml"));
    }

    #[test]
    fn test_absolute_path_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("abs.json");
        fs::write(&file, "{}").unwrap();
        let other = tempfile::tempdir().unwrap();
        let resolved = resolve_config_path(other.path(), file.to_str().unwrap()).unwrap();
        assert_eq!(resolved, file);
    }

    #[test]
    fn test_missing_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_config_path(dir.path(), "missing.yaml").unwrap_err();
        assert_eq!(err.to_string(), CONFIG_PATH_NOT_FOUND);
    }

    #[test]
    fn test_sanitize_stem() {
        assert_eq!(sanitize_stem("prod"), "prod");
        assert_eq!(sanitize_stem("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_stem("   "), "unnamed");
        assert_eq!(sanitize_stem("a b/c"), "a_b_c");
    }

    #[cfg(unix)]
    #[test]
    fn test_state_files_have_expected_modes() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = write_state_json(
            dir.path(),
            StateDir::Materialized,
            "staging",
            &serde_json::json!({"env": "staging"}),
        )
        .unwrap();
        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        let dir_mode = fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(file_mode, 0o644);
        assert_eq!(dir_mode, 0o755);
        assert!(path.ends_with(".masterchef/materialized/staging.json"));
    }
}
