use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ledger::{events::EventLog, snapshot::LedgerSnapshot, snapshot::SnapshotError, Ledger};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state file {0} already exists")]
    AlreadyInitialized(PathBuf),
    #[error("state file {0} does not exist; deploy first")]
    NotInitialized(PathBuf),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed state file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("state file {path} failed validation: {source}")]
    Invalid {
        path: PathBuf,
        source: SnapshotError,
    },
}

/// On-disk layout of the state file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateFile {
    pub snapshot: LedgerSnapshot,
    pub events: EventLog,
}

/// A ledger bound to its JSON state file.
pub struct Store {
    path: PathBuf,
    pub ledger: Ledger,
    pub events: EventLog,
}

impl Store {
    /// Writes a freshly issued ledger to `path`; an existing file is never
    /// overwritten. The path is claimed with `create_new` before anything is
    /// written, so two concurrent deploys cannot both succeed.
    pub fn create(path: &Path, ledger: Ledger, events: EventLog) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
        }
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| match source.kind() {
                ErrorKind::AlreadyExists => StoreError::AlreadyInitialized(path.to_path_buf()),
                _ => StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                },
            })?;
        let store = Self {
            path: path.to_path_buf(),
            ledger,
            events,
        };
        if let Err(err) = store.save() {
            // Release the claim so a retry is not refused.
            let _ = fs::remove_file(path);
            return Err(err);
        }
        Ok(store)
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::NotInitialized(path.to_path_buf()));
        }
        let raw = fs::read(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let state: StateFile = serde_json::from_slice(&raw).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let ledger = Ledger::restore(state.snapshot).map_err(|source| StoreError::Invalid {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), events = state.events.len(), "state loaded");
        Ok(Self {
            path: path.to_path_buf(),
            ledger,
            events: state.events,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes to a sibling temp file and renames it over the state file.
    pub fn save(&self) -> Result<(), StoreError> {
        let mut snapshot = self.ledger.snapshot();
        snapshot.meta.timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let state = StateFile {
            snapshot,
            events: self.events.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&state).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        let mut f = fs::File::create(&tmp).map_err(|source| self.io_error(source))?;
        f.write_all(&bytes).map_err(|source| self.io_error(source))?;
        f.sync_all().map_err(|source| self.io_error(source))?;
        fs::rename(&tmp, &self.path).map_err(|source| self.io_error(source))?;
        debug!(
            path = %self.path.display(),
            height = state.snapshot.meta.height,
            "state saved"
        );
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{address::Address, ledger::TokenMetadata};

    fn addr(b: u8) -> Address {
        Address::new([b; 20])
    }

    fn fresh(dir: &Path) -> Store {
        let mut events = EventLog::new();
        let ledger =
            Ledger::initialize(addr(1), 1_000, TokenMetadata::default(), &mut events).unwrap();
        Store::create(&dir.join("state.json"), ledger, events).unwrap()
    }

    #[test]
    fn create_then_load_round_trips_state_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = fresh(dir.path());
        store
            .ledger
            .transfer(&addr(1), &addr(2), 250, &mut store.events)
            .unwrap();
        store.save().unwrap();

        let loaded = Store::load(store.path()).unwrap();
        assert_eq!(loaded.ledger, store.ledger);
        assert_eq!(loaded.events, store.events);
        assert_eq!(loaded.events.len(), 2);
    }

    #[test]
    fn create_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = fresh(dir.path());
        let mut events = EventLog::new();
        let other = Ledger::initialize(addr(9), 5, TokenMetadata::default(), &mut events).unwrap();
        assert!(matches!(
            Store::create(store.path(), other, events),
            Err(StoreError::AlreadyInitialized(_))
        ));
        assert_eq!(Store::load(store.path()).unwrap().ledger.balance_of(&addr(1)), 1_000);
    }

    #[test]
    fn create_refuses_a_file_that_appears_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"someone else's file").unwrap();

        let mut events = EventLog::new();
        let ledger = Ledger::initialize(addr(1), 1_000, TokenMetadata::default(), &mut events).unwrap();
        assert!(matches!(
            Store::create(&path, ledger, events),
            Err(StoreError::AlreadyInitialized(_))
        ));
        assert_eq!(fs::read(&path).unwrap(), b"someone else's file");
    }

    #[test]
    fn load_reports_missing_and_tampered_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Store::load(&dir.path().join("nope.json")),
            Err(StoreError::NotInitialized(_))
        ));

        let store = fresh(dir.path());
        let raw = fs::read_to_string(store.path()).unwrap();
        let mut state: StateFile = serde_json::from_str(&raw).unwrap();
        state.snapshot.balances[0].amount = 999;
        fs::write(store.path(), serde_json::to_vec(&state).unwrap()).unwrap();
        assert!(matches!(
            Store::load(store.path()),
            Err(StoreError::Invalid { .. })
        ));
    }
}
