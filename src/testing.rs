//! In-memory stand-ins for the machine, the store, the operator and the
//! service layer. Every mutating call is counted.

use std::{
    cell::{Cell, Ref, RefCell},
    collections::{BTreeMap, BTreeSet, VecDeque},
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
    rc::Rc,
};

use crate::{
    config::{Config, ConfigDelta, FirewallTool, Service, StateCache},
    error::{ForgeError, ProvisionError},
    lsblk::{BlockDevice, BlockInventory},
    probe::{Distro, Probe, Resources, SecurityModules},
    prompt::Operator,
    provision::{Provisioner, ServiceRecord},
    steps::{
        disks::DiskOps,
        fstab::{self, FstabEntry},
    },
    store::ConfigStore,
    units::ServiceManager,
};

// ── Machine ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FakeDisk {
    pub device: BlockDevice,
    fail_format: bool,
    hide_uuid: bool,
}

#[derive(Debug)]
pub struct MachineState {
    pub disks: Vec<FakeDisk>,
    /// Device names passed to `format`, in order.
    pub formatted: Vec<String>,
    /// `(device, mount point)` per `mount` call.
    pub mounted: Vec<(String, String)>,
    pub fstab: String,
    pub fstab_appends: usize,
    pub dirs: Vec<PathBuf>,
    pub interfaces: BTreeMap<String, Ipv4Addr>,
    pub listening: BTreeSet<u16>,
    pub internet: bool,
    pub distro: Distro,
    pub security: SecurityModules,
    pub firewall_rules: Option<String>,
}

impl MachineState {
    pub fn fstab_lines(&self) -> Vec<String> {
        self.fstab
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(String::from)
            .collect()
    }

    /// Every call that would have changed the real machine.
    pub fn mutations(&self) -> usize {
        self.formatted.len() + self.mounted.len() + self.fstab_appends + self.dirs.len()
    }

    fn disk_mut(&mut self, name: &str) -> Option<&mut FakeDisk> {
        self.disks.iter_mut().find(|d| d.device.name == name)
    }
}

/// One simulated host shared by its probe and its disk operations.
#[derive(Debug, Clone)]
pub struct FakeMachine {
    state: Rc<RefCell<MachineState>>,
}

impl FakeMachine {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MachineState {
                disks: Vec::new(),
                formatted: Vec::new(),
                mounted: Vec::new(),
                fstab: String::new(),
                fstab_appends: 0,
                dirs: Vec::new(),
                interfaces: BTreeMap::new(),
                listening: BTreeSet::new(),
                internet: false,
                distro: Distro::Debian,
                security: SecurityModules::default(),
                firewall_rules: None,
            })),
        }
    }

    pub fn probe(&self) -> FakeProbe {
        FakeProbe {
            state: Rc::clone(&self.state),
        }
    }

    pub fn disk_ops(&self) -> FakeDiskOps {
        FakeDiskOps {
            state: Rc::clone(&self.state),
        }
    }

    pub fn state(&self) -> Ref<'_, MachineState> {
        self.state.borrow()
    }

    pub fn add_disk(&self, name: &str, size: &str, model: &str) {
        self.push_disk(name, size, model, Some("sata"));
    }

    pub fn add_usb(&self, name: &str, size: &str, model: &str) {
        self.push_disk(name, size, model, Some("usb"));
    }

    fn push_disk(&self, name: &str, size: &str, model: &str, transport: Option<&str>) {
        self.state.borrow_mut().disks.push(FakeDisk {
            device: BlockDevice {
                name: name.into(),
                size: size.into(),
                model: model.into(),
                transport: transport.map(String::from),
                fs_type: None,
                uuid: None,
                mount_points: Vec::new(),
            },
            fail_format: false,
            hide_uuid: false,
        });
    }

    /// Something outside this program mounted the disk.
    pub fn mount_externally(&self, name: &str, point: &str, uuid: &str) {
        let mut state = self.state.borrow_mut();
        if let Some(d) = state.disk_mut(name) {
            d.device.mount_points.push(point.to_string());
            d.device.uuid = Some(uuid.to_string());
            d.device.fs_type = Some("ext4".into());
        }
    }

    pub fn set_uuid(&self, name: &str, uuid: &str) {
        if let Some(d) = self.state.borrow_mut().disk_mut(name) {
            d.device.uuid = Some(uuid.to_string());
            d.device.fs_type = Some("ext4".into());
        }
    }

    pub fn fail_format(&self, name: &str) {
        if let Some(d) = self.state.borrow_mut().disk_mut(name) {
            d.fail_format = true;
        }
    }

    /// Undoes `fail_format`, as if the operator fixed the disk.
    pub fn heal_format(&self, name: &str) {
        if let Some(d) = self.state.borrow_mut().disk_mut(name) {
            d.fail_format = false;
        }
    }

    /// `read_uuid` fails for this disk.
    pub fn hide_uuid(&self, name: &str) {
        if let Some(d) = self.state.borrow_mut().disk_mut(name) {
            d.hide_uuid = true;
        }
    }

    pub fn add_interface(&self, name: &str, ip: [u8; 4]) {
        self.state
            .borrow_mut()
            .interfaces
            .insert(name.to_string(), Ipv4Addr::from(ip));
    }

    pub fn set_internet(&self, up: bool) {
        self.state.borrow_mut().internet = up;
    }

    pub fn listen(&self, port: u16) {
        self.state.borrow_mut().listening.insert(port);
    }

    pub fn set_security(&self, selinux: Option<&str>, apparmor: bool) {
        self.state.borrow_mut().security = SecurityModules {
            selinux: selinux.map(String::from),
            apparmor,
        };
    }

    pub fn set_firewall_rules(&self, listing: &str) {
        self.state.borrow_mut().firewall_rules = Some(listing.to_string());
    }
}

#[derive(Debug, Clone)]
pub struct FakeProbe {
    state: Rc<RefCell<MachineState>>,
}

impl Probe for FakeProbe {
    fn reachability(&self) -> bool {
        self.state.borrow().internet
    }

    fn dns(&self) -> Option<IpAddr> {
        self.state
            .borrow()
            .internet
            .then_some(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)))
    }

    fn resources(&self) -> Resources {
        Resources {
            ram_gb: Some(8.0),
            free_disk_gb: Some(120.0),
        }
    }

    fn distro(&self) -> Distro {
        self.state.borrow().distro
    }

    fn time_synced(&self) -> Option<bool> {
        Some(true)
    }

    fn live_boot(&self) -> bool {
        false
    }

    fn block_devices(&self) -> BlockInventory {
        let mut inv = BlockInventory::default();
        for d in &self.state.borrow().disks {
            if d.device.is_mounted() {
                inv.mounted.push(d.device.clone());
            } else {
                inv.unmounted.push(d.device.clone());
            }
        }
        inv
    }

    fn interfaces(&self) -> BTreeMap<String, Ipv4Addr> {
        self.state.borrow().interfaces.clone()
    }

    fn is_listening(&self, port: u16) -> bool {
        self.state.borrow().listening.contains(&port)
    }

    fn mount_table(&self) -> Option<String> {
        let mut table = String::from("/dev/sda2 / ext4 rw 0 0\n");
        for d in &self.state.borrow().disks {
            for point in &d.device.mount_points {
                table.push_str(&format!(
                    "{} {} ext4 rw 0 0\n",
                    d.device.path(),
                    point.replace(' ', "\\040")
                ));
            }
        }
        Some(table)
    }

    fn uuid_table(&self) -> Option<String> {
        let lines: Vec<String> = self
            .state
            .borrow()
            .disks
            .iter()
            .filter_map(|d| d.device.uuid.as_ref().map(|u| format!("{}: UUID=\"{}\"", d.device.path(), u)))
            .collect();
        Some(lines.join("\n"))
    }

    fn security_modules(&self) -> SecurityModules {
        self.state.borrow().security.clone()
    }

    fn firewall_rules(&self, _tool: FirewallTool) -> Option<String> {
        self.state.borrow().firewall_rules.clone()
    }
}

#[derive(Debug, Clone)]
pub struct FakeDiskOps {
    state: Rc<RefCell<MachineState>>,
}

fn short(device: &str) -> &str {
    device.strip_prefix("/dev/").unwrap_or(device)
}

impl DiskOps for FakeDiskOps {
    fn format(&mut self, device: &str, _label: &str) -> Result<(), ForgeError> {
        let name = short(device).to_string();
        let mut state = self.state.borrow_mut();
        let disk = state
            .disk_mut(&name)
            .ok_or_else(|| ForgeError::disk(device, "no such device"))?;
        if disk.fail_format {
            return Err(ForgeError::disk(device, "mkfs.ext4 exited with code 1"));
        }
        disk.device.fs_type = Some("ext4".into());
        disk.device.uuid = (!disk.hide_uuid).then(|| format!("uuid-{}", name));
        state.formatted.push(name);
        Ok(())
    }

    fn mount(&mut self, device: &str, target: &Path) -> Result<(), ForgeError> {
        let name = short(device).to_string();
        let point = target.to_string_lossy().into_owned();
        let mut state = self.state.borrow_mut();
        let disk = state
            .disk_mut(&name)
            .ok_or_else(|| ForgeError::disk(device, "no such device"))?;
        disk.device.mount_points.push(point.clone());
        state.mounted.push((name, point));
        Ok(())
    }

    fn read_uuid(&self, device: &str) -> Result<String, ForgeError> {
        let state = self.state.borrow();
        let disk = state
            .disks
            .iter()
            .find(|d| d.device.name == short(device))
            .ok_or_else(|| ForgeError::disk(device, "no such device"))?;
        if disk.hide_uuid {
            return Err(ForgeError::disk(device, "blkid returned no UUID"));
        }
        disk.device
            .uuid
            .clone()
            .ok_or_else(|| ForgeError::disk(device, "blkid returned no UUID"))
    }

    fn fstab_has(&self, uuid: &str) -> Result<bool, ForgeError> {
        Ok(fstab::contains_uuid(&self.state.borrow().fstab, uuid))
    }

    fn append_fstab(&mut self, entries: &[FstabEntry]) -> Result<(), ForgeError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut state = self.state.borrow_mut();
        for e in entries {
            state.fstab.push_str(&e.line());
            state.fstab.push('\n');
        }
        state.fstab_appends += 1;
        Ok(())
    }

    fn ensure_dir(&mut self, dir: &Path) -> Result<(), ForgeError> {
        self.state.borrow_mut().dirs.push(dir.to_path_buf());
        Ok(())
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStore {
    document: Option<Config>,
    snapshot: Option<Config>,
    pub state: Option<StateCache>,
    pub corrupt: bool,
    pub saves: usize,
    pub state_saves: usize,
    pub erased: bool,
}

impl MemoryStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(config: Config) -> Self {
        Self {
            document: Some(config),
            ..Self::default()
        }
    }

    /// The persisted document.
    pub fn current(&self) -> Option<&Config> {
        self.document.as_ref()
    }
}

impl ConfigStore for MemoryStore {
    fn load(&mut self) -> Result<Config, ForgeError> {
        if self.corrupt {
            return Err(ForgeError::ConfigCorrupt {
                path: PathBuf::from("/etc/polyforge/config.yaml"),
                reason: "did not parse".into(),
            });
        }
        let config = self
            .document
            .clone()
            .ok_or_else(|| ForgeError::ConfigMissing(PathBuf::from("/etc/polyforge/config.yaml")))?;
        self.snapshot = Some(config.clone());
        Ok(config)
    }

    fn save(&mut self, config: &Config) -> Result<(), ForgeError> {
        self.document = Some(config.clone());
        self.snapshot = Some(config.clone());
        self.corrupt = false;
        self.saves += 1;
        Ok(())
    }

    fn erase(&mut self) -> Result<(), ForgeError> {
        self.document = None;
        self.snapshot = None;
        self.state = None;
        self.corrupt = false;
        self.erased = true;
        Ok(())
    }

    fn snapshot(&self) -> Option<&Config> {
        self.snapshot.as_ref()
    }

    fn load_state(&mut self) -> Result<StateCache, ForgeError> {
        self.state
            .clone()
            .ok_or_else(|| ForgeError::ConfigMissing(PathBuf::from("/etc/polyforge/state-cache.yaml")))
    }

    fn save_state(&mut self, state: &StateCache) -> Result<(), ForgeError> {
        self.state = Some(state.clone());
        self.state_saves += 1;
        Ok(())
    }

    fn erase_state(&mut self) -> Result<(), ForgeError> {
        self.state = None;
        Ok(())
    }
}

// ── Operator ──────────────────────────────────────────────────────────────────

/// Answers from queues, then falls back: confirms get the fixed answer
/// (or the default when unattended), everything else its default.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    answer: bool,
    interactive: bool,
    confirms: VecDeque<bool>,
    inputs: VecDeque<String>,
    secrets: VecDeque<String>,
    selects: VecDeque<usize>,
    pub asked: Vec<String>,
}

impl ScriptedOperator {
    pub fn answering(yes: bool) -> Self {
        Self {
            answer: yes,
            interactive: true,
            ..Self::default()
        }
    }

    pub fn unattended() -> Self {
        Self::default()
    }

    pub fn with_confirms(mut self, answers: &[bool]) -> Self {
        self.confirms.extend(answers.iter().copied());
        self
    }

    pub fn with_inputs(mut self, answers: &[&str]) -> Self {
        self.inputs.extend(answers.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_secrets(mut self, answers: &[&str]) -> Self {
        self.secrets.extend(answers.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_selects(mut self, answers: &[usize]) -> Self {
        self.selects.extend(answers.iter().copied());
        self
    }
}

impl Operator for ScriptedOperator {
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, ForgeError> {
        self.asked.push(prompt.to_string());
        let fallback = if self.interactive { self.answer } else { default };
        Ok(self.confirms.pop_front().unwrap_or(fallback))
    }

    fn input(&mut self, prompt: &str, default: &str) -> Result<String, ForgeError> {
        self.asked.push(prompt.to_string());
        Ok(self.inputs.pop_front().unwrap_or_else(|| default.to_string()))
    }

    fn secret(&mut self, prompt: &str) -> Result<String, ForgeError> {
        self.asked.push(prompt.to_string());
        Ok(self.secrets.pop_front().unwrap_or_default())
    }

    fn select(&mut self, prompt: &str, _items: &[String], default: usize) -> Result<usize, ForgeError> {
        self.asked.push(prompt.to_string());
        Ok(self.selects.pop_front().unwrap_or(default))
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }
}

// ── Service layer ─────────────────────────────────────────────────────────────

/// Units known to exist are exactly the active ones.
#[derive(Debug, Default)]
pub struct FakeUnits {
    active: RefCell<BTreeSet<String>>,
    rebooted: Cell<bool>,
}

impl FakeUnits {
    pub fn with_active(units: &[&str]) -> Self {
        Self {
            active: RefCell::new(units.iter().map(|u| u.to_string()).collect()),
            rebooted: Cell::new(false),
        }
    }

    pub fn rebooted(&self) -> bool {
        self.rebooted.get()
    }
}

impl ServiceManager for FakeUnits {
    fn exists(&self, unit: &str) -> bool {
        self.active.borrow().contains(unit)
    }

    fn is_active(&self, unit: &str) -> bool {
        self.active.borrow().contains(unit)
    }

    fn enable_now(&self, unit: &str) -> Result<(), ForgeError> {
        self.active.borrow_mut().insert(unit.to_string());
        Ok(())
    }

    fn restart(&self, _unit: &str) -> Result<(), ForgeError> {
        Ok(())
    }

    fn disable_now(&self, unit: &str) -> Result<(), ForgeError> {
        self.active.borrow_mut().remove(unit);
        Ok(())
    }

    fn reload(&self) -> Result<(), ForgeError> {
        Ok(())
    }

    fn reboot(&self) -> Result<(), ForgeError> {
        self.rebooted.set(true);
        Ok(())
    }
}

/// Shared, ordered record of provisioner calls, e.g. `install plex`.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Rc<RefCell<Vec<String>>>);

impl CallLog {
    fn record(&self, call: &str, name: &str) {
        self.0.borrow_mut().push(format!("{} {}", call, name));
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        let prefix = format!("{} ", call);
        self.0.borrow().iter().filter(|e| e.starts_with(&prefix)).count()
    }
}

pub struct FakeProvisioner {
    name: String,
    service: Option<Service>,
    installed: bool,
    drifted: bool,
    failing: bool,
    deltas: Vec<ConfigDelta>,
    log: CallLog,
}

impl FakeProvisioner {
    /// Always wanted.
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            service: None,
            installed: false,
            drifted: false,
            failing: false,
            deltas: Vec::new(),
            log: log.clone(),
        }
    }

    /// Wanted while `service` is enabled.
    pub fn for_service(service: Service, log: &CallLog) -> Self {
        Self {
            service: Some(service),
            ..Self::new(service.as_str(), log)
        }
    }

    pub fn installed(mut self) -> Self {
        self.installed = true;
        self
    }

    /// Installed, but no longer matching the config.
    pub fn drifted(mut self) -> Self {
        self.installed = true;
        self.drifted = true;
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn with_delta(mut self, delta: ConfigDelta) -> Self {
        self.deltas.push(delta);
        self
    }

    fn outcome(&self) -> Result<(), ProvisionError> {
        if self.failing {
            Err(ProvisionError::Command {
                name: self.name.clone(),
                command: "fake".into(),
                code: 1,
            })
        } else {
            Ok(())
        }
    }
}

impl Provisioner for FakeProvisioner {
    fn name(&self) -> &str {
        &self.name
    }

    fn wanted(&self, config: &Config) -> bool {
        self.service.map_or(true, |s| config.is_enabled(s))
    }

    fn is_installed(&self) -> bool {
        self.installed
    }

    fn in_sync(&self, _config: &Config) -> bool {
        !self.drifted
    }

    fn install(&mut self, _config: &Config) -> Result<ServiceRecord, ProvisionError> {
        self.log.record("install", &self.name);
        self.outcome()?;
        self.installed = true;
        self.drifted = false;
        let mut record = ServiceRecord::new(&self.name);
        record.deltas = self.deltas.clone();
        Ok(record)
    }

    fn restart(&mut self) -> Result<(), ProvisionError> {
        self.log.record("restart", &self.name);
        self.outcome()
    }

    fn uninstall(&mut self) -> Result<(), ProvisionError> {
        self.log.record("uninstall", &self.name);
        self.outcome()?;
        self.installed = false;
        Ok(())
    }
}
