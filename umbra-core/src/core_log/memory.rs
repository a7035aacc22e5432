/*
    memory.rs - In-process replicated logs and blob store

    A `MemoryNetwork` connects any number of `MemoryPeer`s. Each peer has
    its own "disk" (log state survives close/reopen) and an online flag.
    Replication is modelled per entry:
    - `load` pulls every entry a reachable replica holds that we lack,
      counting one fetch per entry
    - `append` pushes the new entry to every loaded, reachable replica

    Entries imported through the snapshot cache slot are not fetches,
    which is what lets tests observe how much per-entry traffic a
    snapshot saved.
*/

use super::blob::{BlobHash, BlobInfo, BlobStore, DEFAULT_BLOB_MODE};
use super::entry::{compute_heads, CacheSlot, EntryHash, LogEntry, LogExport, LogType};
use super::errors::{LogError, LogResult};
use super::events::{LogEvent, LogEvents};
use super::{LogFactory, ReplicatedLog};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;
use tracing::{debug, trace};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Persisted state of one log on one peer
#[derive(Default)]
struct LogState {
    entries: BTreeMap<(u64, EntryHash), LogEntry>,
    index: HashSet<EntryHash>,
    unfinished: Vec<EntryHash>,
    cache: HashMap<CacheSlot, Vec<u8>>,
    fetched: usize,
}

impl LogState {
    fn insert(&mut self, entry: LogEntry) -> bool {
        if !self.index.insert(entry.hash) {
            return false;
        }
        self.unfinished.retain(|h| *h != entry.hash);
        self.entries.insert(entry.sort_key(), entry);
        true
    }

    fn max_clock(&self) -> u64 {
        self.entries.keys().next_back().map(|(clock, _)| *clock).unwrap_or(0)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

struct LogShared {
    name: String,
    log_type: LogType,
    peer_id: String,
    state: Arc<Mutex<LogState>>,
    events: LogEvents,
    online: Arc<AtomicBool>,
    loaded: AtomicBool,
    closed: AtomicBool,
}

impl LogShared {
    fn serving(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self.loaded.load(Ordering::SeqCst)
            && self.online.load(Ordering::SeqCst)
    }

    /// Live replication of a single entry pushed by a peer
    fn receive(&self, entry: LogEntry) {
        if !self.serving() {
            return;
        }
        let have = {
            let mut state = lock(&self.state);
            if !state.insert(entry.clone()) {
                return;
            }
            state.fetched += 1;
            state.len()
        };
        trace!(log = %self.name, peer = %self.peer_id, hash = %entry.hash, "Received entry");
        self.events.emit(LogEvent::ReplicateProgress { entry, have, max: have });
        self.events.emit(LogEvent::Replicated { count: 1 });
    }
}

struct NetworkInner {
    logs: Mutex<HashMap<String, Vec<Weak<LogShared>>>>,
    blobs: Mutex<HashMap<BlobHash, Vec<u8>>>,
}

/// Shared medium connecting in-memory peers
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                logs: Mutex::new(HashMap::new()),
                blobs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create a peer attached to this network
    pub fn peer(&self, peer_id: impl Into<String>) -> MemoryPeer {
        let online = Arc::new(AtomicBool::new(true));
        MemoryPeer {
            id: peer_id.into(),
            network: self.clone(),
            disk: Arc::new(Mutex::new(HashMap::new())),
            online,
            blobs: Arc::new(MemoryBlobStore::new(self.clone())),
        }
    }

    /// Drop a blob from every holder except peers that already cached it
    pub fn forget_blob(&self, hash: &BlobHash) {
        lock(&self.inner.blobs).remove(hash);
    }

    fn register(&self, log: &Arc<LogShared>) {
        let mut logs = lock(&self.inner.logs);
        let replicas = logs.entry(log.name.clone()).or_default();
        replicas.retain(|weak| weak.strong_count() > 0);
        replicas.push(Arc::downgrade(log));
    }

    /// Serving replicas of `name` held by peers other than `exclude_peer`
    fn replicas(&self, name: &str, exclude_peer: &str) -> Vec<Arc<LogShared>> {
        let logs = lock(&self.inner.logs);
        logs.get(name)
            .map(|replicas| {
                replicas
                    .iter()
                    .filter_map(Weak::upgrade)
                    .filter(|log| log.peer_id != exclude_peer && log.serving())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// One node's view of a `MemoryNetwork`: a log factory plus a blob store
#[derive(Clone)]
pub struct MemoryPeer {
    id: String,
    network: MemoryNetwork,
    disk: Arc<Mutex<HashMap<String, Arc<Mutex<LogState>>>>>,
    online: Arc<AtomicBool>,
    blobs: Arc<MemoryBlobStore>,
}

impl MemoryPeer {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn blobs(&self) -> Arc<MemoryBlobStore> {
        self.blobs.clone()
    }

    /// Take this peer's logs on or off the network
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Entries this peer fetched one at a time for `name`
    pub fn fetch_count(&self, name: &str) -> usize {
        lock(&self.disk).get(name).map(|state| lock(state).fetched).unwrap_or(0)
    }

    /// Entries persisted for `name`
    pub fn entry_count(&self, name: &str) -> usize {
        lock(&self.disk).get(name).map(|state| lock(state).len()).unwrap_or(0)
    }
}

#[async_trait]
impl LogFactory for MemoryPeer {
    async fn open(&self, name: &str, log_type: LogType) -> LogResult<Arc<dyn ReplicatedLog>> {
        if name.is_empty() {
            return Err(LogError::Open {
                name: name.to_string(),
                reason: "empty log name".to_string(),
            });
        }
        let state = lock(&self.disk).entry(name.to_string()).or_default().clone();
        let shared = Arc::new(LogShared {
            name: name.to_string(),
            log_type,
            peer_id: self.id.clone(),
            state,
            events: LogEvents::default(),
            online: self.online.clone(),
            loaded: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.network.register(&shared);
        debug!(log = %name, peer = %self.id, "Opened memory log");
        Ok(Arc::new(MemoryLog { shared, network: self.network.clone() }))
    }
}

/// Handle to a log held by a `MemoryPeer`
pub struct MemoryLog {
    shared: Arc<LogShared>,
    network: MemoryNetwork,
}

impl MemoryLog {
    fn ensure_open(&self) -> LogResult<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(LogError::Closed(self.shared.name.clone()));
        }
        Ok(())
    }

    /// Import the snapshot and unfinished cache slots, all or nothing
    fn import_cache(&self) -> LogResult<usize> {
        let mut state = lock(&self.shared.state);

        let export = match state.cache.get(&CacheSlot::Snapshot) {
            Some(bytes) => Some(LogExport::from_bytes(bytes)?),
            None => None,
        };
        let unfinished: Vec<EntryHash> = match state.cache.get(&CacheSlot::Unfinished) {
            Some(bytes) => bincode::deserialize(bytes)?,
            None => Vec::new(),
        };

        let mut imported = 0;
        if let Some(export) = export {
            if export.log_id != self.shared.name {
                return Err(LogError::Decode(format!(
                    "cached snapshot is for {}, not {}",
                    export.log_id, self.shared.name
                )));
            }
            if let Some(bad) = export.entries.iter().find(|e| !e.verify_hash()) {
                return Err(LogError::Decode(format!("entry {} fails its hash", bad.hash)));
            }
            for entry in export.entries {
                if state.insert(entry) {
                    imported += 1;
                }
            }
        }
        for hash in unfinished {
            if !state.index.contains(&hash) && !state.unfinished.contains(&hash) {
                state.unfinished.push(hash);
            }
        }
        state.cache.remove(&CacheSlot::Snapshot);
        state.cache.remove(&CacheSlot::Unfinished);
        Ok(imported)
    }

    /// Fetch, one at a time, every entry reachable replicas hold and we lack
    fn catch_up(&self) -> usize {
        if !self.shared.online.load(Ordering::SeqCst) {
            return 0;
        }
        let replicas = self.network.replicas(&self.shared.name, &self.shared.peer_id);
        if replicas.is_empty() {
            return 0;
        }

        let known = lock(&self.shared.state).index.clone();
        let mut missing = BTreeMap::new();
        for replica in replicas {
            let remote = lock(&replica.state);
            for (key, entry) in remote.entries.iter() {
                if !known.contains(&entry.hash) {
                    missing.entry(*key).or_insert_with(|| entry.clone());
                }
            }
        }

        let max = known.len() + missing.len();
        let mut fetched = 0;
        for entry in missing.into_values() {
            let have = {
                let mut state = lock(&self.shared.state);
                if !state.insert(entry.clone()) {
                    continue;
                }
                state.fetched += 1;
                state.len()
            };
            fetched += 1;
            self.shared.events.emit(LogEvent::ReplicateProgress { entry, have, max });
        }
        fetched
    }
}

#[async_trait]
impl ReplicatedLog for MemoryLog {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn log_type(&self) -> LogType {
        self.shared.log_type
    }

    async fn load(&self) -> LogResult<()> {
        self.ensure_open()?;
        let imported = self.import_cache()?;
        self.shared.loaded.store(true, Ordering::SeqCst);
        let fetched = self.catch_up();
        debug!(
            log = %self.shared.name,
            peer = %self.shared.peer_id,
            imported,
            fetched,
            "Log loaded"
        );
        if imported + fetched > 0 {
            self.shared.events.emit(LogEvent::Replicated { count: imported + fetched });
        }
        self.shared.events.emit(LogEvent::Ready);
        Ok(())
    }

    async fn append(&self, payload: Vec<u8>) -> LogResult<LogEntry> {
        self.ensure_open()?;
        let entry = {
            let mut state = lock(&self.shared.state);
            let heads = compute_heads(state.entries.values());
            let clock = state.max_clock() + 1;
            let entry = LogEntry::new(&self.shared.name, &self.shared.peer_id, clock, heads, payload);
            state.insert(entry.clone());
            entry
        };
        self.shared.events.emit(LogEvent::Write(entry.clone()));

        if self.shared.online.load(Ordering::SeqCst) {
            for replica in self.network.replicas(&self.shared.name, &self.shared.peer_id) {
                replica.receive(entry.clone());
            }
        }
        Ok(entry)
    }

    async fn entries(&self) -> LogResult<Vec<LogEntry>> {
        self.ensure_open()?;
        Ok(lock(&self.shared.state).entries.values().cloned().collect())
    }

    async fn heads(&self) -> LogResult<Vec<EntryHash>> {
        self.ensure_open()?;
        Ok(compute_heads(lock(&self.shared.state).entries.values()))
    }

    async fn unfinished(&self) -> LogResult<Vec<EntryHash>> {
        self.ensure_open()?;
        Ok(lock(&self.shared.state).unfinished.clone())
    }

    async fn export(&self) -> LogResult<LogExport> {
        self.ensure_open()?;
        let state = lock(&self.shared.state);
        Ok(LogExport {
            log_id: self.shared.name.clone(),
            log_type: self.shared.log_type,
            heads: compute_heads(state.entries.values()),
            entries: state.entries.values().cloned().collect(),
        })
    }

    async fn set_cache(&self, slot: CacheSlot, bytes: Vec<u8>) -> LogResult<()> {
        self.ensure_open()?;
        lock(&self.shared.state).cache.insert(slot, bytes);
        Ok(())
    }

    async fn get_cache(&self, slot: CacheSlot) -> LogResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(lock(&self.shared.state).cache.get(&slot).cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.shared.events.subscribe()
    }

    async fn close(&self) -> LogResult<()> {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.loaded.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Blob store backed by the network's shared blob table
pub struct MemoryBlobStore {
    network: MemoryNetwork,
    local: Mutex<HashMap<BlobHash, Vec<u8>>>,
    reachable: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new(network: MemoryNetwork) -> Self {
        Self {
            network,
            local: Mutex::new(HashMap::new()),
            reachable: AtomicBool::new(true),
        }
    }

    /// While unreachable, fetches of blobs not held locally never resolve
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Store raw bytes under an arbitrary hash, bypassing content addressing
    pub fn insert_raw(&self, hash: BlobHash, bytes: Vec<u8>) {
        lock(&self.network.inner.blobs).insert(hash, bytes);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: Vec<u8>) -> LogResult<BlobInfo> {
        let hash = BlobHash::of(&bytes);
        let size = bytes.len() as u64;
        lock(&self.local).insert(hash.clone(), bytes.clone());
        lock(&self.network.inner.blobs).insert(hash.clone(), bytes);
        Ok(BlobInfo { hash, size, mode: DEFAULT_BLOB_MODE })
    }

    async fn get(&self, hash: &BlobHash) -> LogResult<Option<Vec<u8>>> {
        if let Some(bytes) = lock(&self.local).get(hash) {
            return Ok(Some(bytes.clone()));
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        let found = lock(&self.network.inner.blobs).get(hash).cloned();
        if let Some(bytes) = &found {
            lock(&self.local).insert(hash.clone(), bytes.clone());
        }
        Ok(found)
    }
}
