//! Durable state for stackform-managed resources
//!
//! Manages the `.stackform/state.json` file: the authoritative mapping from
//! instance address to remote identity and last-applied attributes. The
//! document carries a monotonically increasing `serial` so a plan computed
//! against one snapshot can detect that the state moved underneath it.
//!
//! Every commit is a single-entry read-modify-write under an async lock,
//! followed by a durable save (previous file kept as a backup), so a run
//! interrupted mid-apply resumes from accurate per-instance status.

pub mod error;

pub use error::{Result, StateError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackform_core::{Attributes, InstanceAddr, OutputMap, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".stackform";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Persisted record for one instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    /// Instance address this entry belongs to
    pub addr: InstanceAddr,

    /// Provider-assigned remote identifier
    pub remote_id: String,

    /// Attribute snapshot as reported by the provider at last apply
    pub attributes: Attributes,

    /// Desired configuration as applied, kept so the diff can tell an
    /// attribute that left the model apart from one the model never set
    #[serde(default)]
    pub configuration: Attributes,

    /// blake3 hash of the desired configuration at last successful apply
    pub config_hash: String,

    /// Remote id displaced by a create-before-destroy replacement whose
    /// teardown has not finished yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposed_id: Option<String>,

    /// Direct producers at last apply, kept so orphaned entries can still
    /// be destroyed in a safe order after they leave the model
    #[serde(default)]
    pub dependencies: Vec<InstanceAddr>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StateEntry {
    pub fn new(
        addr: InstanceAddr,
        remote_id: impl Into<String>,
        attributes: Attributes,
        config_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            addr,
            remote_id: remote_id.into(),
            attributes,
            configuration: Attributes::new(),
            config_hash: config_hash.into(),
            deposed_id: None,
            dependencies: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_configuration(mut self, configuration: Attributes) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<InstanceAddr>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Outputs other instances may reference: the attribute snapshot plus
    /// the remote identifier exposed as `id`.
    pub fn outputs(&self) -> Attributes {
        let mut out = self.attributes.clone();
        out.entry("id".to_string())
            .or_insert_with(|| Value::String(self.remote_id.clone()));
        out
    }
}

/// The whole state file: versioned, serial-numbered document keyed by
/// instance address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    pub version: u32,

    /// Incremented on every committed change
    pub serial: u64,

    pub updated_at: DateTime<Utc>,

    /// Entries keyed by rendered instance address
    pub entries: BTreeMap<String, StateEntry>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            updated_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }
}

impl StateDocument {
    pub fn get(&self, addr: &InstanceAddr) -> Option<&StateEntry> {
        self.entries.get(&addr.to_string())
    }

    pub fn contains(&self, addr: &InstanceAddr) -> bool {
        self.entries.contains_key(&addr.to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = &StateEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Known outputs per instance, for reference substitution
    pub fn outputs(&self) -> OutputMap {
        self.entries
            .values()
            .map(|e| (e.addr.clone(), e.outputs()))
            .collect()
    }
}

/// File-backed state store
///
/// The in-memory document is guarded by an async mutex; `commit` and
/// `remove` mutate one entry, bump the serial and persist before returning,
/// so concurrent instance completions never interleave writes.
pub struct StateStore {
    root: PathBuf,
    doc: Mutex<StateDocument>,
}

impl StateStore {
    /// Open (or initialize) the store under `root/.stackform/`
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let doc = Self::load_document(&root).await?;
        Ok(Self {
            root,
            doc: Mutex::new(doc),
        })
    }

    async fn load_document(root: &Path) -> Result<StateDocument> {
        let path = root.join(STATE_DIR).join(STATE_FILE);
        if !path.exists() {
            tracing::debug!("state file not found, starting empty");
            return Ok(StateDocument::default());
        }

        let content = fs::read_to_string(&path).await?;
        let doc: StateDocument = serde_json::from_str(&content)?;

        if doc.version > STATE_VERSION {
            return Err(StateError::VersionTooNew {
                found: doc.version,
                supported: STATE_VERSION,
            });
        }

        tracing::debug!(entries = doc.entries.len(), serial = doc.serial, "loaded state");
        Ok(doc)
    }

    fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(STATE_BACKUP)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("created state directory: {}", dir.display());
        }
        Ok(())
    }

    /// Current serial without copying entries
    pub async fn serial(&self) -> u64 {
        self.doc.lock().await.serial
    }

    /// Copy of the whole document, for diffing
    pub async fn snapshot(&self) -> StateDocument {
        self.doc.lock().await.clone()
    }

    pub async fn get(&self, addr: &InstanceAddr) -> Option<StateEntry> {
        self.doc.lock().await.get(addr).cloned()
    }

    /// Insert or replace one entry and persist. Returns the new serial.
    pub async fn commit(&self, entry: StateEntry) -> Result<u64> {
        let mut doc = self.doc.lock().await;
        doc.entries.insert(entry.addr.to_string(), entry);
        doc.serial += 1;
        doc.updated_at = Utc::now();
        self.persist(&doc).await?;
        Ok(doc.serial)
    }

    /// Remove one entry (after a successful destroy) and persist. Returns
    /// the new serial; a missing entry is a no-op.
    pub async fn remove(&self, addr: &InstanceAddr) -> Result<u64> {
        let mut doc = self.doc.lock().await;
        if doc.entries.remove(&addr.to_string()).is_some() {
            doc.serial += 1;
            doc.updated_at = Utc::now();
            self.persist(&doc).await?;
        }
        Ok(doc.serial)
    }

    async fn persist(&self, doc: &StateDocument) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let backup = self.backup_path();

        // Keep the previous file as a backup before writing
        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
        }

        let content = serde_json::to_string_pretty(doc)?;
        fs::write(&path, content).await?;

        tracing::debug!(entries = doc.entries.len(), serial = doc.serial, "saved state");
        Ok(())
    }

    /// Acquire the exclusive run lock
    pub async fn lock(&self) -> Result<StateLock> {
        self.ensure_state_dir().await?;
        let lock_path = self.lock_path();

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let info: LockInfo = serde_json::from_str(&content)?;

            // Stale if older than an hour
            let age = Utc::now().signed_duration_since(info.acquired_at);
            if age.num_hours() < 1 {
                return Err(StateError::Locked {
                    holder: info.holder,
                    since: info.acquired_at,
                });
            }
            tracing::warn!("removing stale lock held by {}", info.holder);
        }

        let info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&info)?;
        fs::write(&lock_path, content).await?;

        tracing::debug!("acquired state lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for the state lock
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            // Synchronous cleanup in drop - not ideal but necessary
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
