//! Unmounted disks → formatted, mounted, fstab-registered volumes.
//!
//! Each disk moves `Discovered → Skipped` when the operator declines, or
//! `Discovered → Formatting → Mounted` when they accept. A failure on one
//! disk leaves it `Discovered` and the loop moves on to the next.

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use console::style;
use tracing::{debug, info, warn};

use crate::{
    cmd,
    config::{Config, ConfigDelta, MountRecord, UsbBackupTarget},
    error::ForgeError,
    lsblk::{self, BlockDevice},
    paths::Paths,
    probe::Probe,
    prompt::Operator,
    steps::fstab::{self, FstabEntry},
    store::ConfigStore,
    ui,
};

pub const FS_TYPE: &str = "ext4";
const EXT4_LABEL_MAX: usize = 16;

// ── Mutating disk operations ──────────────────────────────────────────────────

/// Everything that changes a disk or the mount table goes through here.
pub trait DiskOps {
    fn format(&mut self, device: &str, label: &str) -> Result<(), ForgeError>;
    fn mount(&mut self, device: &str, target: &Path) -> Result<(), ForgeError>;
    fn read_uuid(&self, device: &str) -> Result<String, ForgeError>;
    fn fstab_has(&self, uuid: &str) -> Result<bool, ForgeError>;
    fn append_fstab(&mut self, entries: &[FstabEntry]) -> Result<(), ForgeError>;
    fn ensure_dir(&mut self, dir: &Path) -> Result<(), ForgeError>;
}

/// `mkfs.ext4`, `mount`, `blkid` and the real fstab.
#[derive(Debug)]
pub struct SystemDiskOps {
    fstab: PathBuf,
}

impl SystemDiskOps {
    pub fn new(fstab: impl Into<PathBuf>) -> Self {
        Self { fstab: fstab.into() }
    }
}

impl DiskOps for SystemDiskOps {
    fn format(&mut self, device: &str, label: &str) -> Result<(), ForgeError> {
        cmd::run_with_spinner(
            "mkfs.ext4",
            &["-F", "-L", label, device],
            &format!("Formatting {} as ext4…", device),
            &format!("{} formatted (label {}).", device, label),
        )
        .map_err(|e| ForgeError::disk(device, e))
    }

    fn mount(&mut self, device: &str, target: &Path) -> Result<(), ForgeError> {
        self.ensure_dir(target)?;
        let target_str = target.to_string_lossy().into_owned();
        cmd::run_with_spinner(
            "mount",
            &[device, target_str.as_str()],
            &format!("Mounting {} → {}…", device, target_str),
            &format!("{} mounted at {}.", device, target_str),
        )
        .map_err(|e| ForgeError::disk(device, e))
    }

    fn read_uuid(&self, device: &str) -> Result<String, ForgeError> {
        lsblk::read_uuid(device).map_err(|e| match e {
            e @ ForgeError::DiskOpFailed { .. } => e,
            other => ForgeError::disk(device, other),
        })
    }

    fn fstab_has(&self, uuid: &str) -> Result<bool, ForgeError> {
        Ok(fstab::contains_uuid(&fstab::read(&self.fstab)?, uuid))
    }

    fn append_fstab(&mut self, entries: &[FstabEntry]) -> Result<(), ForgeError> {
        fstab::append(&self.fstab, entries)
    }

    fn ensure_dir(&mut self, dir: &Path) -> Result<(), ForgeError> {
        fs::create_dir_all(dir)?;
        Ok(())
    }
}

// ── Targets, labels and mount points ──────────────────────────────────────────

/// What a committed device becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Permanent data volume under the data root, mounted at boot.
    Fixed,
    /// Backup target under the USB root, mounted on demand.
    Usb,
}

impl Target {
    fn suffix(self) -> &'static str {
        match self {
            Target::Fixed => "HDD",
            Target::Usb => "USB",
        }
    }

    fn fstab_options(self) -> &'static str {
        match self {
            Target::Fixed => fstab::FIXED_OPTIONS,
            Target::Usb => fstab::USB_OPTIONS,
        }
    }

    pub fn mount_base(self, paths: &Paths, label: &str) -> PathBuf {
        let lower = label.to_lowercase();
        match self {
            Target::Fixed => paths.data_root.join(lower),
            Target::Usb => paths.usb_root.join(format!("usb_{}", lower)),
        }
    }

    fn delta(self, record: &MountRecord, label: &str) -> ConfigDelta {
        match self {
            Target::Fixed => ConfigDelta::AddMount(record.clone()),
            Target::Usb => ConfigDelta::AddUsbBackup(UsbBackupTarget {
                label: label.to_string(),
                mount_point: record.mount_point.clone(),
                uuid: record.uuid.clone(),
            }),
        }
    }
}

/// `<MODEL>_<SIZE>_<HDD|USB>`, uppercase letters, digits and underscores only.
pub fn label(model: &str, size: &str, target: Target) -> String {
    let model = match sanitize(model) {
        m if m.is_empty() => "UNKNOWN".to_string(),
        m => m,
    };
    let size = sanitize(&size.replace(['G', '.'], ""));
    if size.is_empty() {
        format!("{}_{}", model, target.suffix())
    } else {
        format!("{}_{}_{}", model, size, target.suffix())
    }
}

/// The ext4 label field holds at most 16 bytes.
pub fn fs_label(label: &str) -> String {
    label.chars().take(EXT4_LABEL_MAX).collect()
}

fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_uppercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

/// `base`, or `base_2`, `base_3`, … when `base` is already taken.
pub fn free_mount_point(base: &Path, taken: &BTreeSet<String>) -> PathBuf {
    let is_free = |p: &Path| !taken.contains(p.to_string_lossy().as_ref());
    if is_free(base) {
        return base.to_path_buf();
    }
    let mut n = 2;
    loop {
        let candidate = PathBuf::from(format!("{}_{}", base.display(), n));
        if is_free(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn recorded_mount_point(config: &Config, uuid: &str) -> Option<String> {
    config
        .mounts
        .iter()
        .find(|m| m.uuid == uuid)
        .map(|m| m.mount_point.clone())
        .or_else(|| {
            config
                .usb_backups
                .iter()
                .find(|u| u.uuid == uuid)
                .map(|u| u.mount_point.clone())
        })
}

// ── Per-disk state ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskState {
    Discovered,
    Skipped,
    Formatting,
    Mounted,
}

/// How `commit` brought a disk to `Mounted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Committed {
    /// Freshly formatted, mounted and recorded.
    Formatted(MountRecord),
    /// Its UUID was already recorded; mounted at the recorded point as-is.
    Remounted(MountRecord),
    /// Found mounted but unrecorded; registered without formatting.
    Adopted(MountRecord),
    /// Mounted, but the UUID could not be read back, so nothing was recorded.
    Unrecorded { mount_point: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskReport {
    pub device: String,
    pub state: DiskState,
    pub mount_point: Option<String>,
    pub note: Option<String>,
}

impl DiskReport {
    fn new(disk: &BlockDevice) -> Self {
        Self {
            device: disk.path(),
            state: DiskState::Discovered,
            mount_point: None,
            note: None,
        }
    }
}

fn transition(report: &mut DiskReport, to: DiskState) {
    debug!(device = %report.device, from = ?report.state, to = ?to, "disk state");
    report.state = to;
}

// ── Provisioner ───────────────────────────────────────────────────────────────

pub struct DiskProvisioner<'a> {
    probe: &'a dyn Probe,
    ops: &'a mut dyn DiskOps,
    paths: &'a Paths,
}

impl<'a> DiskProvisioner<'a> {
    pub fn new(probe: &'a dyn Probe, ops: &'a mut dyn DiskOps, paths: &'a Paths) -> Self {
        Self { probe, ops, paths }
    }

    /// Fixed disks with nothing mounted. USB devices are handled separately.
    pub fn discover(&self) -> Vec<BlockDevice> {
        self.probe
            .block_devices()
            .unmounted
            .into_iter()
            .filter(|d| !d.is_usb())
            .collect()
    }

    /// Asks the operator about one disk. Declining is the safe default.
    pub fn offer(
        &self,
        operator: &mut dyn Operator,
        disk: &BlockDevice,
        target: Target,
    ) -> Result<bool, ForgeError> {
        let label = label(&disk.model, &disk.size, target);
        println!();
        println!("  {}", style(disk.display()).white().bold());

        let question = match (target, disk.mount_points.first()) {
            (Target::Usb, Some(point)) => format!(
                "Register USB device {} (mounted at {}) as a backup target?",
                disk.path(),
                point
            ),
            (Target::Usb, None) => format!(
                "Format USB device {} as backup target {}? ALL DATA ON IT WILL BE LOST",
                disk.path(),
                label
            ),
            (Target::Fixed, _) => format!(
                "Format {} as {} and mount it at {}? ALL DATA ON IT WILL BE LOST",
                disk.path(),
                FS_TYPE,
                target.mount_base(self.paths, &label).display()
            ),
        };
        operator.confirm(&question, false)
    }

    /// Brings one accepted disk to `Mounted`, re-checking the machine first
    /// so a rerun never formats a disk that an earlier run already claimed.
    pub fn commit(
        &mut self,
        store: &mut dyn ConfigStore,
        disk: &BlockDevice,
        target: Target,
    ) -> Result<Committed, ForgeError> {
        let device = disk.path();
        let inventory = self.probe.block_devices();
        let current = inventory
            .find(&disk.name)
            .cloned()
            .ok_or_else(|| ForgeError::disk(&device, "device is no longer present"))?;
        let config = match store.snapshot() {
            Some(c) => c.clone(),
            None => store.load()?,
        };

        if let Some(uuid) = current.uuid.as_deref() {
            if let Some(point) = recorded_mount_point(&config, uuid) {
                if !current.mount_points.contains(&point) {
                    self.ops.mount(&device, Path::new(&point))?;
                }
                let record = self.record(uuid, &point, target);
                self.ensure_fstab(&device, &record, target)?;
                info!(device = %device, uuid, mount_point = %point, "recorded disk remounted");
                return Ok(Committed::Remounted(record));
            }
        }

        if let Some(point) = current.mount_points.first().cloned() {
            let uuid = self.ops.read_uuid(&device)?;
            let record = self.record(&uuid, &point, target);
            let name = label(&current.model, &current.size, target);
            store.merge(target.delta(&record, &name))?;
            self.ensure_fstab(&device, &record, target)?;
            info!(device = %device, uuid = %uuid, mount_point = %point, "mounted disk adopted");
            return Ok(Committed::Adopted(record));
        }

        let name = label(&current.model, &current.size, target);
        let point = free_mount_point(&target.mount_base(self.paths, &name), &self.taken(&config));
        let point_str = point.to_string_lossy().into_owned();

        self.ops.format(&device, &fs_label(&name))?;
        self.ops.mount(&device, &point)?;

        let uuid = match self.ops.read_uuid(&device) {
            Ok(u) => u,
            Err(e) => {
                warn!(device = %device, mount_point = %point_str, "mounted but UUID unreadable: {}", e);
                return Ok(Committed::Unrecorded {
                    mount_point: point_str,
                    reason: e.to_string(),
                });
            }
        };

        let record = self.record(&uuid, &point_str, target);
        store.merge(target.delta(&record, &name))?;
        self.ensure_fstab(&device, &record, target)?;
        info!(device = %device, uuid = %uuid, mount_point = %point_str, "disk formatted and recorded");
        Ok(Committed::Formatted(record))
    }

    /// Appends the entries fstab does not already carry. Returns how many
    /// lines were written.
    pub fn register_fstab(&mut self, entries: &[FstabEntry]) -> Result<usize, ForgeError> {
        let mut fresh = Vec::new();
        for entry in entries {
            if !self.ops.fstab_has(&entry.uuid)? {
                fresh.push(entry.clone());
            }
        }
        self.ops.append_fstab(&fresh)?;
        Ok(fresh.len())
    }

    /// Offers and commits each candidate in turn. Only a failure to persist
    /// the config stops the loop.
    pub fn provision(
        &mut self,
        store: &mut dyn ConfigStore,
        operator: &mut dyn Operator,
        target: Target,
        candidates: Vec<BlockDevice>,
    ) -> Result<Vec<DiskReport>, ForgeError> {
        let mut reports = Vec::with_capacity(candidates.len());

        for disk in candidates {
            let mut report = DiskReport::new(&disk);

            if !self.offer(operator, &disk, target)? {
                transition(&mut report, DiskState::Skipped);
                ui::print_info(&format!("{} left untouched.", report.device));
                reports.push(report);
                continue;
            }

            if !disk.is_mounted() {
                transition(&mut report, DiskState::Formatting);
            }
            match self.commit(store, &disk, target) {
                Ok(Committed::Unrecorded { mount_point, reason }) => {
                    transition(&mut report, DiskState::Mounted);
                    ui::print_warning(&format!(
                        "{} is mounted at {} but NOT recorded ({}). Register it by hand.",
                        report.device, mount_point, reason
                    ));
                    report.mount_point = Some(mount_point);
                    report.note = Some(format!("unrecorded: {}", reason));
                }
                Ok(Committed::Formatted(r)) | Ok(Committed::Remounted(r)) | Ok(Committed::Adopted(r)) => {
                    transition(&mut report, DiskState::Mounted);
                    ui::print_success(&format!("{} ready at {}.", report.device, r.mount_point));
                    report.mount_point = Some(r.mount_point);
                }
                Err(e @ ForgeError::FatalState { .. }) => return Err(e),
                Err(e) => {
                    transition(&mut report, DiskState::Discovered);
                    warn!(device = %report.device, "disk provisioning failed: {}", e);
                    ui::print_error(&e.to_string());
                    report.note = Some(e.to_string());
                }
            }
            reports.push(report);
        }

        Ok(reports)
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn record(&self, uuid: &str, point: &str, target: Target) -> MountRecord {
        let entry = FstabEntry::new(uuid, point, FS_TYPE, target.fstab_options());
        MountRecord {
            uuid: uuid.to_string(),
            mount_point: point.to_string(),
            fs_type: FS_TYPE.to_string(),
            fstab_line: entry.line(),
        }
    }

    fn ensure_fstab(
        &mut self,
        device: &str,
        record: &MountRecord,
        target: Target,
    ) -> Result<(), ForgeError> {
        let entry = FstabEntry::new(
            &record.uuid,
            &record.mount_point,
            &record.fs_type,
            target.fstab_options(),
        );
        self.register_fstab(&[entry])
            .map(|_| ())
            .map_err(|e| ForgeError::disk(device, format!("fstab not updated: {}", e)))
    }

    fn taken(&self, config: &Config) -> BTreeSet<String> {
        self.probe
            .mount_points()
            .into_iter()
            .chain(config.mounts.iter().map(|m| m.mount_point.clone()))
            .chain(config.usb_backups.iter().map(|u| u.mount_point.clone()))
            .collect()
    }
}
