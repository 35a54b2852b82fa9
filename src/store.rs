use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::{
    config::{Config, ConfigDelta, StateCache},
    error::ForgeError,
};

// ── Store contract ────────────────────────────────────────────────────────────

/// Sole owner and writer of the config document and the state cache.
pub trait ConfigStore {
    /// Reads the config document and remembers it as the current snapshot.
    fn load(&mut self) -> Result<Config, ForgeError>;
    /// Atomically replaces the config document.
    fn save(&mut self, config: &Config) -> Result<(), ForgeError>;
    /// Deletes the config document and the state cache.
    fn erase(&mut self) -> Result<(), ForgeError>;
    /// The last document loaded or saved in this run.
    fn snapshot(&self) -> Option<&Config>;

    fn load_state(&mut self) -> Result<StateCache, ForgeError>;
    /// Replaces the state cache wholesale.
    fn save_state(&mut self, state: &StateCache) -> Result<(), ForgeError>;
    /// Drops the state cache so the next install runs every stage.
    fn erase_state(&mut self) -> Result<(), ForgeError>;

    /// Applies `delta` to the current snapshot and persists the result.
    /// Fields the delta does not touch are carried over unchanged.
    fn merge(&mut self, delta: ConfigDelta) -> Result<Config, ForgeError> {
        let mut next = match self.snapshot() {
            Some(current) => current.clone(),
            None => self.load()?,
        };
        delta.apply(&mut next)?;
        self.save(&next)?;
        Ok(next)
    }
}

// ── YAML files on disk ────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct FileStore {
    config_path: PathBuf,
    state_path: PathBuf,
    snapshot: Option<Config>,
}

impl FileStore {
    pub fn new(config_path: impl Into<PathBuf>, state_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            state_path: state_path.into(),
            snapshot: None,
        }
    }
}

impl ConfigStore for FileStore {
    fn load(&mut self) -> Result<Config, ForgeError> {
        let config: Config = read_document(&self.config_path)?;
        debug!(path = %self.config_path.display(), "config loaded");
        self.snapshot = Some(config.clone());
        Ok(config)
    }

    fn save(&mut self, config: &Config) -> Result<(), ForgeError> {
        write_atomic(&self.config_path, config)?;
        info!(path = %self.config_path.display(), "config saved");
        self.snapshot = Some(config.clone());
        Ok(())
    }

    fn erase(&mut self) -> Result<(), ForgeError> {
        remove_if_present(&self.config_path)?;
        remove_if_present(&self.state_path)?;
        self.snapshot = None;
        info!("config and state cache erased");
        Ok(())
    }

    fn snapshot(&self) -> Option<&Config> {
        self.snapshot.as_ref()
    }

    fn load_state(&mut self) -> Result<StateCache, ForgeError> {
        read_document(&self.state_path)
    }

    fn save_state(&mut self, state: &StateCache) -> Result<(), ForgeError> {
        write_atomic(&self.state_path, state)
    }

    fn erase_state(&mut self) -> Result<(), ForgeError> {
        remove_if_present(&self.state_path)?;
        debug!(path = %self.state_path.display(), "state cache dropped");
        Ok(())
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T, ForgeError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ForgeError::ConfigMissing(path.to_path_buf()))
        }
        Err(e) => return Err(ForgeError::Io(e)),
    };
    serde_yaml::from_str(&content).map_err(|e| ForgeError::ConfigCorrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Writes `value` next to `path` in a temp file, flushes it to disk, then
/// renames it over `path`. Readers see the old document or the new one.
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ForgeError> {
    let fatal = |reason: String| ForgeError::FatalState {
        path: path.to_path_buf(),
        reason,
    };

    let yaml = serde_yaml::to_string(value).map_err(|e| fatal(e.to_string()))?;
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| fatal(e.to_string()))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| fatal(e.to_string()))?;
    tmp.write_all(yaml.as_bytes())
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| fatal(e.to_string()))?;
    tmp.persist(path).map_err(|e| fatal(e.error.to_string()))?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<(), ForgeError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ForgeError::Io(e)),
    }
}
