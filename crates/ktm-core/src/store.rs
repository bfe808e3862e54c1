//! Durable tunnel state
//!
//! One directory holds a record pair per context:
//! `<ctx>.tunnel.json` and `<ctx>.network.json`. Every read path
//! reconciles against process liveness, so a record whose process has died
//! is deleted and reported absent.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StoreError;
use crate::lock::StateLock;
use crate::traits::ProcessControl;
use crate::types::{is_valid_context_name, NetworkRecord, ProcessHandle, TunnelRecord};

const TUNNEL_SUFFIX: &str = ".tunnel.json";
const NETWORK_SUFFIX: &str = ".network.json";
const LOGS_DIR: &str = "logs";

/// A tunnel record with its network record, if that one could be read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTunnel {
    pub tunnel: TunnelRecord,
    /// `None` when the network record is missing or unreadable
    pub network: Option<NetworkRecord>,
}

/// Directory-backed store of tunnel records
pub struct TunnelStore {
    dir: PathBuf,
    processes: Arc<dyn ProcessControl>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TunnelStore {
    /// Create a store rooted at `dir`
    ///
    /// The directory is created lazily on first write.
    pub fn new(dir: impl Into<PathBuf>, processes: Arc<dyn ProcessControl>) -> Self {
        Self {
            dir: dir.into(),
            processes,
            locks: DashMap::new(),
        }
    }

    /// Root directory of the store
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory holding per-context transport logs
    pub fn logs_dir(&self) -> PathBuf {
        self.dir.join(LOGS_DIR)
    }

    /// Path of the transport log for a context
    pub fn log_path(&self, context: &str) -> Result<PathBuf, StoreError> {
        validate(context)?;
        Ok(self.logs_dir().join(format!("{}.log", context)))
    }

    fn tunnel_path(&self, context: &str) -> Result<PathBuf, StoreError> {
        validate(context)?;
        Ok(self.dir.join(format!("{}{}", context, TUNNEL_SUFFIX)))
    }

    fn network_path(&self, context: &str) -> Result<PathBuf, StoreError> {
        validate(context)?;
        Ok(self.dir.join(format!("{}{}", context, NETWORK_SUFFIX)))
    }

    /// Acquire the in-process lock for one context
    ///
    /// `put` and `remove` expect the caller to hold this guard.
    pub async fn context_lock(&self, context: &str) -> OwnedMutexGuard<()> {
        self.context_mutex(context).lock_owned().await
    }

    fn context_mutex(&self, context: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(context.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the cross-process lock on the state directory
    pub async fn lock_state(&self) -> Result<StateLock, StoreError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || StateLock::acquire(&dir))
            .await
            .map_err(|e| StoreError::Lock(e.to_string()))?
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    /// Persist a record pair
    ///
    /// The network record is written first so a visible tunnel record
    /// always has its companion.
    pub async fn put(&self, tunnel: &TunnelRecord, network: &NetworkRecord) -> Result<(), StoreError> {
        let tunnel_path = self.tunnel_path(&tunnel.context_name)?;
        let network_path = self.network_path(&tunnel.context_name)?;

        fs::create_dir_all(&self.dir).await?;
        write_atomic(&network_path, network).await?;
        write_atomic(&tunnel_path, tunnel).await?;

        tracing::debug!(
            "Stored tunnel record for {} (port {}, pid {})",
            tunnel.context_name,
            tunnel.local_port,
            tunnel.handle
        );
        Ok(())
    }

    /// Read a context's records, reconciling against liveness
    ///
    /// Returns `Ok(None)` when no live tunnel exists and
    /// `Err(StoreError::Malformed)` when the tunnel record cannot be decoded.
    pub async fn get(&self, context: &str) -> Result<Option<StoredTunnel>, StoreError> {
        match self.read(context).await? {
            Some(stored) if self.processes.is_alive(stored.tunnel.handle) => Ok(Some(stored)),
            Some(stored) => {
                self.reconcile_stale(context, stored.tunnel.handle).await;
                Ok(None)
            }
            None => {
                self.remove_orphaned_network(context).await;
                Ok(None)
            }
        }
    }

    /// Read a context's records without any liveness check
    pub async fn read(&self, context: &str) -> Result<Option<StoredTunnel>, StoreError> {
        let tunnel_path = self.tunnel_path(context)?;
        let content = match fs::read_to_string(&tunnel_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let tunnel: TunnelRecord =
            serde_json::from_str(&content).map_err(|e| StoreError::Malformed {
                path: tunnel_path.clone(),
                reason: e.to_string(),
            })?;
        if tunnel.context_name != context {
            return Err(StoreError::Malformed {
                path: tunnel_path,
                reason: format!("record names context {:?}", tunnel.context_name),
            });
        }

        let network = self.read_network(context).await;
        Ok(Some(StoredTunnel { tunnel, network }))
    }

    async fn read_network(&self, context: &str) -> Option<NetworkRecord> {
        let path = self.network_path(context).ok()?;
        match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!("Ignoring malformed network record {:?}: {}", path, e);
                    None
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!("Failed to read network record {:?}: {}", path, e);
                None
            }
        }
    }

    /// Delete a context's record pair
    ///
    /// Returns whether a tunnel record existed. Malformed entries are
    /// removed too.
    pub async fn remove(&self, context: &str) -> Result<bool, StoreError> {
        let existed = remove_if_exists(&self.tunnel_path(context)?).await?;
        remove_if_exists(&self.network_path(context)?).await?;
        Ok(existed)
    }

    /// Drop a record found dead, unless a writer currently owns the context
    async fn reconcile_stale(&self, context: &str, handle: ProcessHandle) {
        let mutex = self.context_mutex(context);
        let Ok(_guard) = mutex.try_lock_owned() else {
            // Owner of the context lock will overwrite or remove it
            return;
        };
        match self.read(context).await {
            Ok(Some(stored)) if stored.tunnel.handle == handle => {
                tracing::info!("Removing stale tunnel record for {} (pid {} is gone)", context, handle);
                if let Err(e) = self.remove(context).await {
                    tracing::warn!("Failed to remove stale record for {}: {}", context, e);
                }
            }
            _ => {}
        }
    }

    /// Drop a network record whose tunnel record is gone, unless a writer
    /// currently owns the context
    async fn remove_orphaned_network(&self, context: &str) {
        let (Ok(network_path), Ok(tunnel_path)) = (self.network_path(context), self.tunnel_path(context))
        else {
            return;
        };
        if fs::metadata(&network_path).await.is_err() {
            return;
        }
        let mutex = self.context_mutex(context);
        let Ok(_guard) = mutex.try_lock_owned() else {
            return;
        };
        // A tunnel record may have landed before we took the lock
        if fs::metadata(&tunnel_path).await.is_ok() {
            return;
        }
        match remove_if_exists(&network_path).await {
            Ok(true) => tracing::info!("Removed orphaned network record for {}", context),
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to remove orphaned network record for {}: {}", context, e),
        }
    }

    /// Every context with any record on disk, malformed and orphaned ones included
    pub async fn contexts(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut contexts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let context = name
                .strip_suffix(TUNNEL_SUFFIX)
                .or_else(|| name.strip_suffix(NETWORK_SUFFIX));
            if let Some(context) = context {
                if is_valid_context_name(context) {
                    contexts.push(context.to_string());
                }
            }
        }
        contexts.sort();
        contexts.dedup();
        Ok(contexts)
    }

    /// All live tunnels, sorted by context name
    ///
    /// Malformed entries are skipped with a warning; dead ones are removed.
    pub async fn list_all(&self) -> Result<Vec<StoredTunnel>, StoreError> {
        let mut live = Vec::new();
        for context in self.contexts().await? {
            match self.get(&context).await {
                Ok(Some(stored)) => live.push(stored),
                Ok(None) => {}
                Err(StoreError::Malformed { path, reason }) => {
                    tracing::warn!("Skipping malformed tunnel record {:?}: {}", path, reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(live)
    }

    /// Local ports held by live tunnels
    pub async fn live_ports(&self) -> Result<HashSet<u16>, StoreError> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .map(|stored| stored.tunnel.local_port)
            .collect())
    }
}

fn validate(context: &str) -> Result<(), StoreError> {
    if is_valid_context_name(context) {
        Ok(())
    } else {
        Err(StoreError::InvalidContextName(context.to_string()))
    }
}

/// Write `value` as JSON via a temp file and rename
async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let content = serde_json::to_vec_pretty(value)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("record");
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));

    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(&content).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::current_time_secs;
    use crate::types::NetworkRequirement;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeProcesses {
        dead: StdMutex<HashSet<u32>>,
    }

    impl FakeProcesses {
        fn kill_externally(&self, pid: u32) {
            self.dead.lock().unwrap().insert(pid);
        }
    }

    impl ProcessControl for FakeProcesses {
        fn is_alive(&self, handle: ProcessHandle) -> bool {
            !self.dead.lock().unwrap().contains(&handle.pid())
        }

        fn terminate(&self, handle: ProcessHandle) -> io::Result<()> {
            self.kill_externally(handle.pid());
            Ok(())
        }

        fn kill(&self, handle: ProcessHandle) -> io::Result<()> {
            self.terminate(handle)
        }
    }

    fn record(context: &str, port: u16, pid: u32) -> TunnelRecord {
        TunnelRecord {
            context_name: context.to_string(),
            local_port: port,
            remote_addr: "10.0.0.5:6443".to_string(),
            ssh_host: "k3s-prod".to_string(),
            handle: ProcessHandle::new(pid),
            created_at: current_time_secs(),
        }
    }

    fn setup() -> (TempDir, Arc<FakeProcesses>, TunnelStore) {
        let dir = TempDir::new().unwrap();
        let processes = Arc::new(FakeProcesses::default());
        let store = TunnelStore::new(dir.path().join("tunnels"), processes.clone());
        (dir, processes, store)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (_dir, _processes, store) = setup();
        let tunnel = record("acme-prod", 16443, 100);
        let network = NetworkRecord::new(NetworkRequirement::Vpn);

        store.put(&tunnel, &network).await.unwrap();
        let stored = store.get("acme-prod").await.unwrap().unwrap();
        assert_eq!(stored.tunnel, tunnel);
        assert_eq!(stored.network, Some(network));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let (_dir, _processes, store) = setup();
        assert!(store.get("nothing").await.unwrap().is_none());
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dead_record_is_removed_on_read() {
        let (_dir, processes, store) = setup();
        store
            .put(&record("acme-prod", 16443, 100), &NetworkRecord::default())
            .await
            .unwrap();

        processes.kill_externally(100);
        assert!(store.get("acme-prod").await.unwrap().is_none());
        assert!(store.read("acme-prod").await.unwrap().is_none());
        assert!(!store.dir().join("acme-prod.network.json").exists());
    }

    #[tokio::test]
    async fn test_dead_record_kept_while_context_locked() {
        let (_dir, processes, store) = setup();
        store
            .put(&record("acme-prod", 16443, 100), &NetworkRecord::default())
            .await
            .unwrap();
        processes.kill_externally(100);

        let _guard = store.context_lock("acme-prod").await;
        assert!(store.get("acme-prod").await.unwrap().is_none());
        assert!(store.read("acme-prod").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_all_sorted_and_reconciled() {
        let (_dir, processes, store) = setup();
        for (ctx, port, pid) in [("b-two", 16444, 2), ("a-one", 16443, 1), ("c-three", 16445, 3)] {
            store
                .put(&record(ctx, port, pid), &NetworkRecord::default())
                .await
                .unwrap();
        }
        processes.kill_externally(3);

        let names: Vec<_> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.tunnel.context_name)
            .collect();
        assert_eq!(names, vec!["a-one", "b-two"]);
        assert_eq!(store.live_ports().await.unwrap(), HashSet::from([16443, 16444]));
    }

    #[tokio::test]
    async fn test_malformed_entry_skipped_in_listing() {
        let (_dir, _processes, store) = setup();
        store
            .put(&record("good-one", 16443, 1), &NetworkRecord::default())
            .await
            .unwrap();
        std::fs::write(store.dir().join("bad-one.tunnel.json"), "{ not json").unwrap();

        let listed = store.list_all().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].tunnel.context_name, "good-one");

        assert!(matches!(
            store.get("bad-one").await,
            Err(StoreError::Malformed { .. })
        ));
        assert_eq!(store.contexts().await.unwrap(), vec!["bad-one", "good-one"]);
    }

    #[tokio::test]
    async fn test_missing_network_record_reads_as_none() {
        let (_dir, _processes, store) = setup();
        store
            .put(&record("acme-prod", 16443, 1), &NetworkRecord::default())
            .await
            .unwrap();
        std::fs::remove_file(store.dir().join("acme-prod.network.json")).unwrap();

        let stored = store.get("acme-prod").await.unwrap().unwrap();
        assert!(stored.network.is_none());
    }

    #[tokio::test]
    async fn test_orphaned_network_record_is_removed_on_read() {
        let (_dir, _processes, store) = setup();
        std::fs::create_dir_all(store.dir()).unwrap();
        let orphan = store.dir().join("acme-prod.network.json");
        std::fs::write(&orphan, r#"{"requirement":{"kind":"vpn"}}"#).unwrap();

        assert!(store.get("acme-prod").await.unwrap().is_none());
        assert!(!orphan.exists());
        assert!(store.contexts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_orphaned_network_records_cleared_by_listing() {
        let (_dir, _processes, store) = setup();
        store
            .put(&record("acme-live", 16443, 1), &NetworkRecord::default())
            .await
            .unwrap();
        std::fs::write(store.dir().join("acme-gone.network.json"), "{}").unwrap();

        let listed = store.list_all().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(store.contexts().await.unwrap(), vec!["acme-live"]);
        assert!(store.dir().join("acme-live.network.json").exists());
    }

    #[tokio::test]
    async fn test_orphaned_network_record_kept_while_context_locked() {
        let (_dir, _processes, store) = setup();
        std::fs::create_dir_all(store.dir()).unwrap();
        let orphan = store.dir().join("acme-prod.network.json");
        std::fs::write(&orphan, "{}").unwrap();

        let _guard = store.context_lock("acme-prod").await;
        assert!(store.get("acme-prod").await.unwrap().is_none());
        assert!(orphan.exists());
    }

    #[tokio::test]
    async fn test_remove_reports_existence() {
        let (_dir, _processes, store) = setup();
        store
            .put(&record("acme-prod", 16443, 1), &NetworkRecord::default())
            .await
            .unwrap();

        assert!(store.remove("acme-prod").await.unwrap());
        assert!(!store.remove("acme-prod").await.unwrap());
        assert!(store.get("acme-prod").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_files() {
        let (_dir, _processes, store) = setup();
        store
            .put(&record("acme-prod", 16443, 1), &NetworkRecord::default())
            .await
            .unwrap();
        store
            .put(&record("acme-prod", 16444, 2), &NetworkRecord::default())
            .await
            .unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        assert_eq!(
            store.get("acme-prod").await.unwrap().unwrap().tunnel.local_port,
            16444
        );
    }

    #[tokio::test]
    async fn test_invalid_context_name_rejected() {
        let (_dir, _processes, store) = setup();
        assert!(matches!(
            store.get("../etc").await,
            Err(StoreError::InvalidContextName(_))
        ));
        assert!(store
            .put(&record("", 16443, 1), &NetworkRecord::default())
            .await
            .is_err());
    }
}
