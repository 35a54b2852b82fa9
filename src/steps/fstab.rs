use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::Path,
};

use tracing::info;

use crate::error::ForgeError;

pub const FIXED_OPTIONS: &str = "defaults";
pub const USB_OPTIONS: &str = "defaults,noauto";

/// One `/etc/fstab` line keyed by filesystem UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    pub uuid: String,
    pub mount_point: String,
    pub fs_type: String,
    pub options: String,
}

impl FstabEntry {
    pub fn new(uuid: &str, mount_point: &str, fs_type: &str, options: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            mount_point: mount_point.to_string(),
            fs_type: fs_type.to_string(),
            options: options.to_string(),
        }
    }

    /// `UUID=<uuid> <mountpoint> <fstype> <options> 0 2`
    pub fn line(&self) -> String {
        format!(
            "UUID={} {} {} {} 0 2",
            self.uuid,
            self.mount_point.replace(' ', "\\040"),
            self.fs_type,
            self.options
        )
    }
}

/// True when an active (uncommented) line already mounts `uuid`.
pub fn contains_uuid(content: &str, uuid: &str) -> bool {
    let wanted = format!("UUID={}", uuid);
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.starts_with('#'))
        .any(|l| l.split_whitespace().next() == Some(wanted.as_str()))
}

/// Reads `path`; a missing file counts as empty.
pub fn read(path: &Path) -> Result<String, ForgeError> {
    match fs::read_to_string(path) {
        Ok(c) => Ok(c),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(ForgeError::Io(e)),
    }
}

/// Appends `entries` to `path`. Existing lines are never touched.
pub fn append(path: &Path, entries: &[FstabEntry]) -> Result<(), ForgeError> {
    if entries.is_empty() {
        return Ok(());
    }

    let existing = read(path)?;
    let mut block = String::new();
    if !existing.is_empty() && !existing.ends_with('\n') {
        block.push('\n');
    }
    for entry in entries {
        block.push_str(&entry.line());
        block.push('\n');
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(block.as_bytes())?;
    file.sync_all()?;
    info!(count = entries.len(), path = %path.display(), "fstab lines appended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn line_uses_uuid_and_pass_two() {
        let entry = FstabEntry::new("abcd-1234", "/data/unknown_500_hdd", "ext4", FIXED_OPTIONS);
        assert_eq!(entry.line(), "UUID=abcd-1234 /data/unknown_500_hdd ext4 defaults 0 2");
    }

    #[test]
    fn commented_lines_do_not_count() {
        let content = "# UUID=abcd /data/old ext4 defaults 0 2\nUUID=ef01 / ext4 defaults 0 1\n";
        assert!(!contains_uuid(content, "abcd"));
        assert!(contains_uuid(content, "ef01"));
        assert!(!contains_uuid(content, "ef0"));
    }

    #[test]
    fn append_keeps_existing_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fstab");
        fs::write(&path, "UUID=root / ext4 defaults 0 1").unwrap();

        append(
            &path,
            &[FstabEntry::new("usb1", "/mnt/usb_sandisk_32_usb", "ext4", USB_OPTIONS)],
        )
        .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "UUID=root / ext4 defaults 0 1\nUUID=usb1 /mnt/usb_sandisk_32_usb ext4 defaults,noauto 0 2\n"
        );
    }

    #[test]
    fn missing_fstab_reads_empty_and_is_created_on_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fstab");
        assert_eq!(read(&path).unwrap(), "");
        append(&path, &[FstabEntry::new("a", "/data/a", "ext4", FIXED_OPTIONS)]).unwrap();
        assert!(contains_uuid(&read(&path).unwrap(), "a"));
    }
}
