//! Persistent local state.
//!
//! A hook process lives for one event only, so every module's state value
//! is loaded from the backing store before the first handler runs and
//! saved back after the last one. Each value is stored as one JSON blob
//! under its registry namespace.
//!
//! Layout under the state directory:
//! ```text
//! {state_dir}/
//!   _root.json          - state registered on the root registry
//!   {namespace}.json    - e.g. peer.json, db/pool.json
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StateError;

const ROOT_STATE_NAME: &str = "_root";
const STATE_EXT: &str = "json";

/// Key-scoped durable storage for serialized state.
pub trait PersistentState {
    /// Returns the blob saved under `name`, or `None` if nothing was ever
    /// saved there.
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, StateError>;

    /// Replaces the blob saved under `name`.
    fn save(&self, name: &str, data: &[u8]) -> Result<(), StateError>;
}

/// One file per namespace under a directory.
#[derive(Debug, Clone)]
pub struct DiskState {
    dir: PathBuf,
}

impl DiskState {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file holding the state saved under `name`.
    pub fn path(&self, name: &str) -> Result<PathBuf, StateError> {
        if name.is_empty() {
            return Ok(self.dir.join(format!("{ROOT_STATE_NAME}.{STATE_EXT}")));
        }
        let relative = Path::new(name);
        let well_formed = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        // Leading `_` is reserved so no namespace can land on the root file.
        if !well_formed || name.starts_with('_') {
            return Err(StateError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{name}.{STATE_EXT}")))
    }
}

impl PersistentState for DiskState {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, StateError> {
        let path = self.path(name)?;
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StateError::Io { path, source }),
        }
    }

    /// Writes to a temporary file next to the target and renames it into
    /// place, so a crash never leaves a half-written blob behind.
    fn save(&self, name: &str, data: &[u8]) -> Result<(), StateError> {
        let path = self.path(name)?;
        let parent = path.parent().unwrap_or(&self.dir).to_path_buf();
        let io_err = |source| StateError::Io {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(&parent).map_err(io_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(io_err)?;
        tmp.write_all(data).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;
        tracing::debug!(name, path = %path.display(), "state saved");
        Ok(())
    }
}

/// In-memory state store for testing.
#[derive(Debug, Default)]
pub struct MemoryState {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    fail_saves: bool,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every save fails.
    pub fn failing_saves() -> Self {
        Self {
            blobs: Mutex::default(),
            fail_saves: true,
        }
    }

    /// Pre-loads `name` with raw bytes.
    pub fn insert(&self, name: &str, data: impl Into<Vec<u8>>) {
        self.blobs.lock().insert(name.to_string(), data.into());
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.blobs.lock().get(name).cloned()
    }

    /// Decodes the blob saved under `name`.
    pub fn get_json<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.get(name)
            .and_then(|data| serde_json::from_slice(&data).ok())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.blobs.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl PersistentState for MemoryState {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self.get(name))
    }

    fn save(&self, name: &str, data: &[u8]) -> Result<(), StateError> {
        if self.fail_saves {
            return Err(StateError::Io {
                path: PathBuf::from(name),
                source: std::io::Error::other("state store is read-only"),
            });
        }
        self.insert(name, data);
        Ok(())
    }
}

/// A module state value the dispatcher can load and save without knowing
/// its type.
pub(crate) trait StateSlot {
    fn decode(&self, data: &[u8]) -> Result<(), StateError>;
    fn encode(&self) -> Result<Vec<u8>, StateError>;
}

impl<T> StateSlot for Rc<RefCell<T>>
where
    T: Serialize + DeserializeOwned,
{
    fn decode(&self, data: &[u8]) -> Result<(), StateError> {
        let value = serde_json::from_slice(data)?;
        *self.borrow_mut() = value;
        Ok(())
    }

    fn encode(&self) -> Result<Vec<u8>, StateError> {
        Ok(serde_json::to_vec(&*self.borrow())?)
    }
}
