//! Persistent record of packages that have been built.
//!
//! Stored as JSON: `{ "built": { "<name>": { "version": .., "release": .. } } }`.
//! A name in the ledger counts as built and is never rebuilt; there is no
//! expiry and no invalidation when a dependency changes.

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltRecord {
    pub version: String,
    pub release: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    built: BTreeMap<String, BuiltRecord>,
}

#[derive(Debug)]
pub struct BuildLedger {
    path: PathBuf,
    state: Mutex<LedgerFile>,
}

impl BuildLedger {
    /// Load the ledger at `path`; a missing file is an empty ledger.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.is_file() {
            let bytes = fs::read(&path)
                .with_context(|| format!("reading build ledger '{}'", path.display()))?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing build ledger '{}'", path.display()))?
        } else {
            LedgerFile::default()
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().built.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<BuiltRecord> {
        self.lock().built.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().built.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a successful build and flush the whole ledger to disk.
    ///
    /// If the write fails the in-memory entry is rolled back, so memory never
    /// claims a package the file on disk doesn't.
    pub fn record(&self, name: &str, version: &str, release: &str) -> Result<()> {
        let mut state = self.lock();
        let previous = state.built.insert(
            name.to_string(),
            BuiltRecord {
                version: version.to_string(),
                release: release.to_string(),
            },
        );
        if let Err(err) = self.persist(&state) {
            match previous {
                Some(record) => state.built.insert(name.to_string(), record),
                None => state.built.remove(name),
            };
            return Err(err);
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, LedgerFile> {
        // A panic while holding the guard cannot leave the map half-written.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, state: &LedgerFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating ledger directory '{}'", parent.display()))?;
        }

        let _lock = LedgerLock::acquire(&lock_path(&self.path))?;

        let json = serde_json::to_vec_pretty(state).context("serializing build ledger")?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = File::create(&tmp)
            .with_context(|| format!("creating '{}'", tmp.display()))?;
        file.write_all(&json)
            .and_then(|()| file.write_all(b"\n"))
            .and_then(|()| file.sync_all())
            .with_context(|| format!("writing '{}'", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| {
            format!("replacing build ledger '{}'", self.path.display())
        })?;
        Ok(())
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

/// Exclusive file lock held for the duration of one ledger write.
#[derive(Debug)]
struct LedgerLock {
    file: File,
}

impl LedgerLock {
    fn acquire(path: &Path) -> Result<Self> {
        // The lock file is never unlinked: removing a file another process
        // still holds locked would let a third process lock a fresh inode.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("opening ledger lock '{}'", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("locking '{}'", path.display()))?;
        Ok(Self { file })
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let ledger = BuildLedger::load(tmp.path().join("state.json")).unwrap();
        assert!(ledger.is_empty());
        assert!(!ledger.contains("bash"));
    }

    #[test]
    fn record_persists_every_update() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state/state.json");
        let ledger = BuildLedger::load(&path).unwrap();

        ledger.record("bash", "5.2.26", "3.fc40").unwrap();
        let reloaded = BuildLedger::load(&path).unwrap();
        assert_eq!(
            reloaded.get("bash"),
            Some(BuiltRecord {
                version: "5.2.26".to_string(),
                release: "3.fc40".to_string()
            })
        );

        ledger.record("zsh", "5.9", "1.fc40").unwrap();
        assert_eq!(BuildLedger::load(&path).unwrap().len(), 2);
        assert!(tmp.path().join("state/state.json.lock").exists());
    }

    #[test]
    fn file_layout_has_built_map() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        BuildLedger::load(&path)
            .unwrap()
            .record("curl", "8.6.0", "1.fc40")
            .unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["built"]["curl"]["version"], "8.6.0");
        assert_eq!(value["built"]["curl"]["release"], "1.fc40");
    }

    #[test]
    fn reads_existing_ledger() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        fs::write(
            &path,
            r#"{"built": {"vim": {"version": "9.1", "release": "2.fc40"}}}"#,
        )
        .unwrap();
        let ledger = BuildLedger::load(&path).unwrap();
        assert!(ledger.contains("vim"));
    }

    #[test]
    fn failed_write_rolls_back_entry() {
        let tmp = TempDir::new().unwrap();
        // A plain file in place of the parent directory makes every write fail.
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, "file, not a directory").unwrap();
        let ledger = BuildLedger::load(blocker.join("state.json")).unwrap();

        assert!(ledger.record("bash", "5.2.26", "3.fc40").is_err());
        assert!(!ledger.contains("bash"));
        assert!(ledger.is_empty());
    }

    #[test]
    fn corrupt_ledger_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        fs::write(&path, "not json").unwrap();
        assert!(BuildLedger::load(&path).is_err());
    }
}
