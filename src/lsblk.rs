use std::collections::HashMap;

use crate::{cmd, error::ForgeError};

// ── Data types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub name: String,        // sdb
    pub size: String,        // 500G
    pub model: String,       // WDC WD5000AAKX, or UNKNOWN
    pub transport: Option<String>, // usb, sata, nvme
    pub fs_type: Option<String>,
    pub uuid: Option<String>,
    /// Mount points of the disk itself and any of its partitions.
    pub mount_points: Vec<String>,
}

impl BlockDevice {
    pub fn path(&self) -> String {
        format!("/dev/{}", self.name)
    }

    pub fn is_mounted(&self) -> bool {
        !self.mount_points.is_empty()
    }

    pub fn is_usb(&self) -> bool {
        self.transport.as_deref() == Some("usb")
    }

    /// One-line label shown in prompts and summaries.
    pub fn display(&self) -> String {
        format!("{:<12}  {:>8}   {}", self.path(), self.size, self.model)
    }
}

/// Physical disks split by whether anything on them is mounted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockInventory {
    pub mounted: Vec<BlockDevice>,
    pub unmounted: Vec<BlockDevice>,
}

impl BlockInventory {
    pub fn find(&self, name: &str) -> Option<&BlockDevice> {
        self.mounted
            .iter()
            .chain(self.unmounted.iter())
            .find(|d| d.name == name)
    }

    /// Device names of every disk, sorted.
    pub fn drive_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .mounted
            .iter()
            .chain(self.unmounted.iter())
            .map(|d| d.name.clone())
            .collect();
        names.sort();
        names
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

const COLUMNS: &str = "NAME,PKNAME,SIZE,TYPE,MODEL,TRAN,FSTYPE,UUID,MOUNTPOINT";

/// Runs `lsblk` and folds partitions into their parent disks.
pub fn inventory() -> Result<BlockInventory, ForgeError> {
    let output = cmd::run_capture("lsblk", &["--pairs", "--output", COLUMNS])
        .map_err(|e| ForgeError::degraded("block devices", e))?;
    Ok(parse_inventory(&output))
}

/// Reads the filesystem UUID of `device` via `blkid`.
pub fn read_uuid(device: &str) -> Result<String, ForgeError> {
    let out = cmd::run_capture("blkid", &["-s", "UUID", "-o", "value", device])?;
    let uuid = out.trim();
    if uuid.is_empty() {
        return Err(ForgeError::disk(device, "blkid reported no UUID"));
    }
    Ok(uuid.to_string())
}

pub fn parse_inventory(output: &str) -> BlockInventory {
    let mut disks: Vec<BlockDevice> = Vec::new();
    let mut parent_of: HashMap<String, String> = HashMap::new();
    let mut child_mounts: Vec<(String, String)> = Vec::new();

    for line in output.lines() {
        let m = parse_pairs(line);
        let get = |key: &str| m.get(key).map(String::as_str).unwrap_or("");
        let name = get("NAME").to_string();
        if name.is_empty() {
            continue;
        }

        match get("TYPE") {
            "disk" => disks.push(BlockDevice {
                name: name.clone(),
                size: get("SIZE").to_string(),
                model: {
                    let s = get("MODEL").trim();
                    if s.is_empty() { "UNKNOWN".to_string() } else { s.to_string() }
                },
                transport: non_empty(get("TRAN")),
                fs_type: non_empty(get("FSTYPE")),
                uuid: non_empty(get("UUID")),
                mount_points: non_empty(get("MOUNTPOINT")).into_iter().collect(),
            }),
            _ => {
                let parent = get("PKNAME").to_string();
                if !parent.is_empty() {
                    parent_of.insert(name.clone(), parent.clone());
                    if let Some(point) = non_empty(get("MOUNTPOINT")) {
                        child_mounts.push((parent, point));
                    }
                }
            }
        }
    }

    // Nested children (LVM on a partition, crypt on LVM, ...) count toward
    // the disk at the top of the chain.
    for (mut owner, point) in child_mounts {
        while let Some(up) = parent_of.get(&owner) {
            owner = up.clone();
        }
        if let Some(disk) = disks.iter_mut().find(|d| d.name == owner) {
            disk.mount_points.push(point);
        }
    }

    let (mounted, unmounted) = disks.into_iter().partition(BlockDevice::is_mounted);
    BlockInventory { mounted, unmounted }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() { None } else { Some(s.to_string()) }
}

// ── lsblk --pairs parser ──────────────────────────────────────────────────────
//
// Each line looks like:   NAME="sda1" PKNAME="sda" SIZE="512M" TYPE="part" MOUNTPOINT="/boot"

fn parse_pairs(line: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let mut rest = line.trim();

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].split_whitespace().last().unwrap_or("").to_string();
        rest = &rest[eq + 1..];

        if !rest.starts_with('"') {
            break;
        }
        rest = &rest[1..]; // skip opening "

        let Some(close) = rest.find('"') else { break };
        let value = rest[..close].to_string();
        rest = &rest[close + 1..]; // skip closing "

        if !key.is_empty() {
            map.insert(key, value);
        }
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"NAME="sda" PKNAME="" SIZE="238.5G" TYPE="disk" MODEL="Samsung SSD 860" TRAN="sata" FSTYPE="" UUID="" MOUNTPOINT=""
NAME="sda1" PKNAME="sda" SIZE="512M" TYPE="part" MODEL="" TRAN="" FSTYPE="vfat" UUID="AB12-CD34" MOUNTPOINT="/boot/efi"
NAME="sda2" PKNAME="sda" SIZE="238G" TYPE="part" MODEL="" TRAN="" FSTYPE="ext4" UUID="1111" MOUNTPOINT="/"
NAME="sdb" PKNAME="" SIZE="500G" TYPE="disk" MODEL="WDC WD5000AAKX" TRAN="sata" FSTYPE="" UUID="" MOUNTPOINT=""
NAME="sdc" PKNAME="" SIZE="28.9G" TYPE="disk" MODEL="" TRAN="usb" FSTYPE="" UUID="" MOUNTPOINT=""
NAME="nvme0n1" PKNAME="" SIZE="1T" TYPE="disk" MODEL="" TRAN="nvme" FSTYPE="LVM2_member" UUID="" MOUNTPOINT=""
NAME="vg-home" PKNAME="nvme0n1" SIZE="1T" TYPE="lvm" MODEL="" TRAN="" FSTYPE="ext4" UUID="2222" MOUNTPOINT="/home"
NAME="loop0" PKNAME="" SIZE="60M" TYPE="loop" MODEL="" TRAN="" FSTYPE="squashfs" UUID="" MOUNTPOINT="/snap/core""#;

    #[test]
    fn partitions_fold_into_their_disk() {
        let inv = parse_inventory(SAMPLE);
        let sda = inv.find("sda").unwrap();
        assert!(sda.is_mounted());
        assert_eq!(sda.mount_points, vec!["/boot/efi", "/"]);
    }

    #[test]
    fn raw_disks_are_unmounted() {
        let inv = parse_inventory(SAMPLE);
        let names: Vec<&str> = inv.unmounted.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["sdb", "sdc"]);
        assert!(inv.find("sdc").unwrap().is_usb());
    }

    #[test]
    fn logical_volumes_mark_the_disk_mounted() {
        let inv = parse_inventory(SAMPLE);
        assert!(inv.mounted.iter().any(|d| d.name == "nvme0n1"));
    }

    #[test]
    fn missing_model_falls_back_to_unknown() {
        let inv = parse_inventory(SAMPLE);
        assert_eq!(inv.find("sdc").unwrap().model, "UNKNOWN");
        assert_eq!(inv.find("sdb").unwrap().model, "WDC WD5000AAKX");
    }

    #[test]
    fn loop_devices_are_ignored() {
        let inv = parse_inventory(SAMPLE);
        assert!(inv.find("loop0").is_none());
        assert_eq!(inv.drive_names(), vec!["nvme0n1", "sda", "sdb", "sdc"]);
    }

    #[test]
    fn pairs_parser_handles_empty_values() {
        let m = parse_pairs(r#"NAME="sdb" MODEL="" SIZE="500G""#);
        assert_eq!(m.get("MODEL").map(String::as_str), Some(""));
        assert_eq!(m.get("SIZE").map(String::as_str), Some("500G"));
    }
}
