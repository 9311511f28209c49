//! Node process lifecycle: opens the local ledger database and
//! attachment store, and takes an OS advisory lock on the data
//! directory so a second process can never share it.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use tracing::info;

use crate::attachment_store::AttachmentStore;
use crate::contract::ContractRegistry;
use crate::error::NodeError;
use crate::resolver::SledTransactionStorage;

/// Filename of the liveness marker within a node's data directory; it
/// holds this process's PID for as long as the advisory lock is held.
pub const PROCESS_ID_FILE: &str = "process-id";

/// Installs a `tracing_subscriber::fmt` subscriber reading `RUST_LOG` so
/// the `#[instrument]` spans in `validator`/`resolver` actually emit
/// somewhere. Safe to call more than once per process — a process that
/// already has a global subscriber installed (by a second `NodeService`,
/// or by its own test harness) just keeps that one.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Everything a running node needs to serve the validator and resolver
/// against its local state: the transaction database, the attachment
/// store, and the registered contracts. Holds the data directory's
/// advisory lock for its lifetime.
pub struct NodeService {
    data_dir: PathBuf,
    db: sled::Db,
    attachment_store: AttachmentStore,
    registry: ContractRegistry,
    lock_file: File,
}

impl NodeService {
    /// Creates `data_dir` if needed and opens it, failing immediately if
    /// another live process already holds its lock rather than letting
    /// two processes corrupt the same `sled` database.
    pub fn open(data_dir: &Path, registry: ContractRegistry) -> Result<Self, NodeError> {
        init_tracing();
        fs::create_dir_all(data_dir)?;

        let lock_path = data_dir.join(PROCESS_ID_FILE);
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| NodeError::AlreadyLocked(lock_path.clone()))?;
        write!(&lock_file, "{}", std::process::id())?;

        let db = sled::open(data_dir.join("ledger.sled"))?;
        let attachment_store = AttachmentStore::open(data_dir.join("attachments"))?;

        info!(
            data_dir = %data_dir.display(),
            pid = std::process::id(),
            "node data directory opened"
        );

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            db,
            attachment_store,
            registry,
            lock_file,
        })
    }

    /// A fresh handle onto the local transaction store. Cheap: it just
    /// opens (or reopens) the underlying `sled::Tree`.
    pub fn transaction_storage(&self) -> SledTransactionStorage {
        SledTransactionStorage::new(
            self.db
                .open_tree("transactions")
                .expect("sled tree open never fails for a valid db handle"),
        )
    }

    pub fn attachment_store(&self) -> &AttachmentStore {
        &self.attachment_store
    }

    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl Drop for NodeService {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.lock_file);
    }
}
