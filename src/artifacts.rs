use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use crate::{error::ForgeError, ui};

/// Creates `path` with `content`. An existing file is never overwritten.
pub fn write_once(path: &Path, content: &str) -> Result<(), ForgeError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

/// Best-effort diagnostic snapshot; a failure is logged and shown, never fatal.
pub fn snapshot(path: PathBuf, what: &str, content: Option<String>) -> Option<PathBuf> {
    let Some(content) = content else {
        ui::print_warning(&format!("No {} available to snapshot.", what));
        return None;
    };
    match write_once(&path, &content) {
        Ok(()) => {
            info!(path = %path.display(), "{} snapshot written", what);
            ui::print_info(&format!("{} snapshot: {}", what, path.display()));
            Some(path)
        }
        Err(e) => {
            warn!(path = %path.display(), "{} snapshot failed: {}", what, e);
            ui::print_warning(&format!("Could not write {} snapshot: {}", what, e));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn existing_artifact_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs/polyforge_mounts_20260101_000000.txt");
        write_once(&path, "first").unwrap();
        assert!(write_once(&path, "second").is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "first");
    }

    #[test]
    fn missing_content_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("uuid.txt");
        assert!(snapshot(path.clone(), "UUID map", None).is_none());
        assert!(!path.exists());
    }
}
