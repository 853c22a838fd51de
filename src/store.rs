/*!
 # State persistence

 One JSON file maps device address to the last state sent to that device:

 ```json
 { "BE:16:FA:00:12:34": { "rgb": [255, 0, 0], "brightness": 200,
                          "colorTemp": 4000, "brightnessMode": "auto" } }
 ```

 Persistence is best effort. Reads degrade to "no prior state" and failed
 writes are logged; neither ever fails the command that triggered them.
*/

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::brightness::BrightnessMode;
use crate::{Error, Result};

/// Persisted state of one device. Absent fields fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb: Option<[u8; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness_mode: Option<BrightnessMode>,
}

impl PersistedRecord {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One lock per state file, shared by every store in the process
static FILE_LOCKS: Mutex<BTreeMap<PathBuf, Arc<Mutex<()>>>> = Mutex::new(BTreeMap::new());

/// Numbers temporary files so concurrent writers never share one
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn file_lock(path: &Path) -> Arc<Mutex<()>> {
    let key = std::env::current_dir()
        .map(|dir| dir.join(path))
        .unwrap_or_else(|_| path.to_path_buf());
    FILE_LOCKS.lock().entry(key).or_default().clone()
}

/// JSON file shared by every configured device
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock = file_lock(&path);
        Self { path, lock }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record for `address`, or an empty record when the file, the entry or
    /// its contents are missing or unreadable
    pub fn load(&self, address: &str) -> PersistedRecord {
        match self.try_load(address) {
            Ok(Some(record)) => {
                debug!("Loaded persisted state for {}: {:?}", address, record);
                record
            }
            Ok(None) => {
                debug!("No persisted state for {}", address);
                PersistedRecord::default()
            }
            Err(e) => {
                warn!("Ignoring persisted state for {}: {}", address, e);
                PersistedRecord::default()
            }
        }
    }

    /// Stores `record` under `address`, keeping every other entry. Failures are
    /// logged and swallowed.
    pub fn save(&self, address: &str, record: &PersistedRecord) {
        if let Err(e) = self.try_save(address, record) {
            warn!(
                "Could not save state for {} to {}: {}",
                address,
                self.path.display(),
                e
            );
        }
    }

    pub fn try_load(&self, address: &str) -> Result<Option<PersistedRecord>> {
        let _guard = self.lock.lock();
        let entries = match self.read_entries()? {
            Some(entries) => entries,
            None => return Ok(None),
        };

        entries
            .get(address)
            .map(|entry| serde_json::from_value(entry.clone()).map_err(Error::from))
            .transpose()
    }

    /// Read, merge and replace the file while holding its lock, so writers
    /// for different addresses never drop each other's entries
    pub fn try_save(&self, address: &str, record: &PersistedRecord) -> Result<()> {
        let _guard = self.lock.lock();
        let mut entries = match self.read_entries() {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                warn!(
                    "State file {} is unreadable ({}), starting a new one",
                    self.path.display(),
                    e
                );
                Map::new()
            }
        };

        entries.insert(address.to_string(), serde_json::to_value(record)?);
        let contents = serde_json::to_string_pretty(&Value::Object(entries))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // write-then-rename so a crash never leaves a truncated file behind
        let tmp = self.tmp_path();
        if let Err(e) = fs::write(&tmp, contents).and_then(|_| fs::rename(&tmp, &self.path)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        trace!("Saved state for {} to {}", address, self.path.display());
        Ok(())
    }

    /// `<file>.<pid>.<n>.tmp` next to the state file
    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("state"));
        name.push(format!(
            ".{}.{}.tmp",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        self.path.with_file_name(name)
    }

    fn read_entries(&self) -> Result<Option<Map<String, Value>>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Value>(&contents)? {
            Value::Object(entries) => Ok(Some(entries)),
            other => Err(Error::Persistence(format!(
                "expected a JSON object, found {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
