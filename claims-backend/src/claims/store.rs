//! In-memory claim map backed by markdown files
//!
//! Reads are served from the map. Every mutation updates the map
//! synchronously and enqueues a persist cycle on the write queue, which
//! re-renders every category file from the current map. Loads rebuild the
//! map from disk and back off while a write is pending.
//!
//! Until the map has absorbed the disk state, and while a load is reading,
//! mutated ids are tracked as dirty. The disk result is merged under them
//! instead of replacing them, and no cycle renders a file from a map that
//! is missing claims still on disk.

use chrono::Utc;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;

use super::categories::StorageLayout;
use super::file_ops::{self, Eviction, WritePolicy};
use super::format;
use super::notify::{FailureKind, FailureReport, FailureSink, LogFailureSink};
use super::observers::{ObserverRegistry, StoreEvent, SubscriptionId};
use super::reload::ReloadDebouncer;
use super::source_inference::SourceInference;
use super::verification::{JsonVerificationStore, VerificationStore};
use super::write_queue::WriteQueue;
use crate::config::StoreConfig;
use crate::error::ClaimStoreError;
use crate::models::{ClaimRecord, ClaimUpdate, claim_number, format_claim_id};

/// How a call to [`ClaimStore::load_claims`] was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// The map was rebuilt from disk
    Loaded,
    /// Another load was running; the current snapshot was returned
    AlreadyLoading,
    /// A write was pending; the current snapshot was returned and a reload scheduled
    Deferred,
    /// The map was rebuilt from disk, keeping claims changed while the load was reading
    Merged,
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub claims: Vec<ClaimRecord>,
    pub status: LoadStatus,
}

/// Result of writing one file in a persist cycle
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub attempts: u32,
    pub error: Option<String>,
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct EvictionOutcome {
    pub path: PathBuf,
    pub id: String,
    pub result: Eviction,
}

/// Per-file results of one persist cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub outcomes: Vec<FileOutcome>,
    pub evictions: Vec<EvictionOutcome>,
    /// A load was reading, so nothing was written; the load persists once it has merged
    pub deferred: bool,
}

impl CycleReport {
    pub fn failed(&self) -> Vec<&FileOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success()).collect()
    }

    pub fn failed_paths(&self) -> Vec<PathBuf> {
        self.failed().into_iter().map(|o| o.path.clone()).collect()
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(FileOutcome::is_success)
    }
}

/// Completion of an enqueued persist cycle. Dropping it is fine; the cycle
/// still runs.
pub struct PersistHandle {
    rx: oneshot::Receiver<Option<CycleReport>>,
}

impl PersistHandle {
    /// Wait for the cycle. `None` if the store was dropped or shut down first.
    pub async fn wait(self) -> Option<CycleReport> {
        self.rx.await.ok().flatten()
    }
}

/// Re-runs a full persist cycle after a write failure
#[derive(Clone)]
pub struct RetryHandle {
    store: Weak<StoreInner>,
}

impl RetryHandle {
    /// `None` once the store is gone
    pub fn retry(&self) -> Option<PersistHandle> {
        let inner = self.store.upgrade()?;
        log::info!("[CLAIMS] Retrying persist cycle");
        Some(inner.enqueue_persist())
    }
}

/// Collaborators the host can swap out
pub struct StoreCollaborators {
    pub sink: Arc<dyn FailureSink>,
    pub verification: Option<Arc<dyn VerificationStore>>,
}

impl Default for StoreCollaborators {
    fn default() -> Self {
        Self {
            sink: Arc::new(LogFailureSink),
            verification: None,
        }
    }
}

#[derive(Default)]
struct ClaimState {
    claims: HashMap<String, ClaimRecord>,
    /// id -> file the claim currently resolves to
    file_map: HashMap<String, PathBuf>,
    /// Ids mutated before the first load or during a read; they win over disk at merge
    dirty: HashSet<String>,
    /// A disk read is in flight and will be merged under this lock
    reading: bool,
    /// Disk state has been merged at least once
    loaded: bool,
}

impl ClaimState {
    fn mark_dirty(&mut self, id: &str) {
        if self.reading || !self.loaded {
            self.dirty.insert(id.to_string());
        }
    }
}

struct StoreInner {
    config: StoreConfig,
    weak: Weak<StoreInner>,
    state: RwLock<ClaimState>,
    /// Detected on first use and fixed for the session
    layout: RwLock<Option<StorageLayout>>,
    queue: Arc<WriteQueue>,
    debouncer: ReloadDebouncer,
    observers: ObserverRegistry,
    sink: Arc<dyn FailureSink>,
    verification: Option<Arc<dyn VerificationStore>>,
    /// (file, id) blocks to excise at the start of the next persist cycle
    pending_evictions: Mutex<Vec<(PathBuf, String)>>,
    loading: AtomicBool,
    /// Highest claim number seen this session
    id_high_water: AtomicU64,
}

/// Clears the loading flag when a load returns, however it returns
struct LoadGuard<'a>(&'a AtomicBool);

impl<'a> LoadGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Clears the reading flag if a read is dropped before it merges, and
/// persists whatever the stood-down cycles left unwritten
struct ReadGuard<'a> {
    inner: &'a StoreInner,
    armed: bool,
}

impl ReadGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.inner.state.write();
        state.reading = false;
        if !state.dirty.is_empty() {
            drop(self.inner.enqueue_persist());
        }
    }
}

/// Claims read from disk, not yet swapped in
struct DiskSnapshot {
    state: ClaimState,
    misplaced: Vec<(PathBuf, String)>,
}

/// Handle to the claims store. Cloning is cheap and every clone shares the
/// same map and write queue.
///
/// Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct ClaimStore {
    inner: Arc<StoreInner>,
}

impl ClaimStore {
    /// Store with the default log sink and, if configured, the JSON verification sidecar
    pub fn new(config: StoreConfig) -> Self {
        let verification = config
            .verification_file
            .clone()
            .map(|path| Arc::new(JsonVerificationStore::new(path)) as Arc<dyn VerificationStore>);
        Self::with_collaborators(
            config,
            StoreCollaborators {
                verification,
                ..Default::default()
            },
        )
    }

    pub fn with_collaborators(config: StoreConfig, collaborators: StoreCollaborators) -> Self {
        let debouncer = ReloadDebouncer::new(config.debounce());
        let inner = Arc::new_cyclic(|weak| StoreInner {
            config,
            weak: weak.clone(),
            state: RwLock::new(ClaimState::default()),
            layout: RwLock::new(None),
            queue: WriteQueue::start(),
            debouncer,
            observers: ObserverRegistry::new(),
            sink: collaborators.sink,
            verification: collaborators.verification,
            pending_evictions: Mutex::new(Vec::new()),
            loading: AtomicBool::new(false),
            id_high_water: AtomicU64::new(0),
        });
        Self { inner }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn layout(&self) -> StorageLayout {
        self.inner.layout()
    }

    /// Rebuild the in-memory map from disk
    pub async fn load_claims(&self) -> LoadOutcome {
        self.inner.load().await
    }

    pub fn get_claim(&self, id: &str) -> Option<ClaimRecord> {
        self.inner.state.read().claims.get(id).cloned()
    }

    /// Every claim, ordered by numeric id
    pub fn get_all_claims(&self) -> Vec<ClaimRecord> {
        self.inner.sorted_claims(|_| true)
    }

    pub fn get_claims_for_section(&self, section: &str) -> Vec<ClaimRecord> {
        self.inner.sorted_claims(|claim| claim.sections.contains(section))
    }

    /// File the claim is written to on the next persist cycle
    pub fn claim_file(&self, id: &str) -> Option<PathBuf> {
        self.inner.state.read().file_map.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.state.read().claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next unused id. Ids are never handed out twice in a session, even
    /// after the claim holding the highest one is deleted.
    pub fn generate_id(&self) -> String {
        let next = self.inner.id_high_water.fetch_add(1, Ordering::SeqCst) + 1;
        format_claim_id(next)
    }

    /// Insert or replace a claim
    pub fn save_claim(&self, mut claim: ClaimRecord) -> Result<PersistHandle, ClaimStoreError> {
        if let Err(e) = claim.validate() {
            self.inner.report_validation(&e);
            return Err(e);
        }

        let id = claim.id.clone();
        let layout = self.inner.layout();
        let handle = {
            let mut state = self.inner.state.write();
            if let Some(existing) = state.claims.get(&id) {
                claim.created_at = existing.created_at;
            }
            self.inner.upsert_locked(&mut state, claim, &layout)
        };

        self.inner.observers.emit(&StoreEvent::ClaimSaved { id });
        Ok(handle)
    }

    pub fn update_claim(&self, id: &str, update: ClaimUpdate) -> Result<PersistHandle, ClaimStoreError> {
        self.modify(id, |claim| update.apply(claim))
    }

    /// Adding a section the claim already has leaves the set unchanged
    pub fn add_section_to_claim(&self, id: &str, section: &str) -> Result<PersistHandle, ClaimStoreError> {
        let section = section.trim().to_string();
        if section.is_empty() {
            let e = ClaimStoreError::Validation(format!("empty section key for {}", id));
            self.inner.report_validation(&e);
            return Err(e);
        }
        self.modify(id, |claim| {
            claim.sections.insert(section);
        })
    }

    pub fn remove_section_from_claim(&self, id: &str, section: &str) -> Result<PersistHandle, ClaimStoreError> {
        let section = section.trim().to_string();
        self.modify(id, |claim| {
            claim.sections.remove(&section);
        })
    }

    pub fn set_verified(&self, id: &str, verified: bool) -> Result<PersistHandle, ClaimStoreError> {
        self.modify(id, |claim| claim.verified = verified)
    }

    pub fn delete_claim(&self, id: &str) -> Result<PersistHandle, ClaimStoreError> {
        let handle = {
            let mut state = self.inner.state.write();
            if state.claims.remove(id).is_none() {
                return Err(ClaimStoreError::NotFound(id.to_string()));
            }
            if let Some(path) = state.file_map.remove(id) {
                self.inner.schedule_eviction(path, id);
            }
            state.mark_dirty(id);
            self.inner.enqueue_persist()
        };

        log::info!("[CLAIMS] Deleted {}", id);
        self.inner.observers.emit(&StoreEvent::ClaimDeleted { id: id.to_string() });
        Ok(handle)
    }

    /// Enqueue a full persist cycle without changing anything
    pub fn persist(&self) -> PersistHandle {
        self.inner.enqueue_persist()
    }

    /// Wait for every write enqueued so far
    pub async fn flush(&self) {
        self.inner.queue.flush().await;
    }

    /// Coalesced reload after files changed outside the store
    pub fn notify_external_change(&self) {
        log::debug!("[RELOAD] External change reported");
        self.inner.schedule_reload();
    }

    /// Cancel a reload that is still waiting out its debounce window
    pub fn cancel_pending_reload(&self) -> bool {
        self.inner.debouncer.cancel()
    }

    pub fn is_reload_pending(&self) -> bool {
        self.inner.debouncer.is_pending()
    }

    /// True while a persist cycle is queued or running
    pub fn is_writing(&self) -> bool {
        self.inner.queue.is_busy()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.loading.load(Ordering::SeqCst)
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.observers.unsubscribe(id)
    }

    /// Drain pending writes, drop any scheduled reload and stop the queue
    pub async fn shutdown(&self) {
        self.inner.debouncer.cancel();
        self.inner.queue.flush().await;
        self.inner.queue.shutdown();
        log::info!("[CLAIMS] Store shut down");
    }

    /// Apply `change` to a copy of the claim and commit it if it still validates
    fn modify<F>(&self, id: &str, change: F) -> Result<PersistHandle, ClaimStoreError>
    where
        F: FnOnce(&mut ClaimRecord),
    {
        let layout = self.inner.layout();
        let result = {
            let mut state = self.inner.state.write();
            match state.claims.get(id).cloned() {
                None => Err(ClaimStoreError::NotFound(id.to_string())),
                Some(mut updated) => {
                    change(&mut updated);
                    updated.id = id.to_string();
                    match updated.validate() {
                        Ok(()) => Ok(self.inner.upsert_locked(&mut state, updated, &layout)),
                        Err(e) => Err(e),
                    }
                }
            }
        };

        match result {
            Ok(handle) => {
                self.inner.observers.emit(&StoreEvent::ClaimSaved { id: id.to_string() });
                Ok(handle)
            }
            Err(e) => {
                if matches!(e, ClaimStoreError::Validation(_)) {
                    self.inner.report_validation(&e);
                }
                Err(e)
            }
        }
    }
}

impl StoreInner {
    fn layout(&self) -> StorageLayout {
        let cached = self.layout.read().clone();
        if let Some(layout) = cached {
            return layout;
        }

        let mut slot = self.layout.write();
        slot.get_or_insert_with(|| {
            let layout = StorageLayout::detect(&self.config.knowledge_base_dir);
            log::info!("[CLAIMS] Using {:?} storage", layout);
            layout
        })
        .clone()
    }

    fn sorted_claims<F>(&self, keep: F) -> Vec<ClaimRecord>
    where
        F: Fn(&ClaimRecord) -> bool,
    {
        let mut claims: Vec<ClaimRecord> = self
            .state
            .read()
            .claims
            .values()
            .filter(|claim| keep(claim))
            .cloned()
            .collect();
        claims.sort_by(|a, b| {
            (a.number().unwrap_or(u64::MAX), &a.id).cmp(&(b.number().unwrap_or(u64::MAX), &b.id))
        });
        claims
    }

    /// Write a validated claim into the map and enqueue its persist cycle.
    ///
    /// The cycle is enqueued while the write lock is still held, so a load
    /// either sees the queue busy or starts reading first and finds the id
    /// marked dirty at merge.
    fn upsert_locked(
        &self,
        state: &mut ClaimState,
        mut claim: ClaimRecord,
        layout: &StorageLayout,
    ) -> PersistHandle {
        normalize_quotes(&mut claim);
        claim.modified_at = Utc::now();

        let target = layout.resolve(&claim.category);
        if let Some(previous) = state.file_map.get(&claim.id) {
            if *previous != target {
                log::info!(
                    "[CLAIMS] {} moves from {} to {}",
                    claim.id,
                    previous.display(),
                    target.display()
                );
                self.schedule_eviction(previous.clone(), &claim.id);
            }
        }

        if let Some(number) = claim.number() {
            self.id_high_water.fetch_max(number, Ordering::SeqCst);
        }
        state.mark_dirty(&claim.id);
        state.file_map.insert(claim.id.clone(), target);
        state.claims.insert(claim.id.clone(), claim);

        self.enqueue_persist()
    }

    fn schedule_eviction(&self, path: PathBuf, id: &str) {
        self.pending_evictions.lock().push((path, id.to_string()));
    }

    fn report_validation(&self, error: &ClaimStoreError) {
        log::warn!("[CLAIMS] Rejected mutation: {}", error);
        self.sink.report(FailureReport {
            kind: FailureKind::Validation,
            message: error.to_string(),
            failed_files: Vec::new(),
            retry: None,
        });
    }

    fn enqueue_persist(&self) -> PersistHandle {
        let weak = self.weak.clone();
        let rx = self.queue.enqueue(async move {
            let inner = weak.upgrade()?;
            Some(inner.persist_cycle().await)
        });
        PersistHandle { rx }
    }

    fn schedule_reload(&self) {
        self.debouncer.schedule(reload_task(self.weak.clone()));
    }

    /// Excise moved blocks, then re-render and write every category file
    async fn persist_cycle(&self) -> CycleReport {
        let layout = self.layout();

        // No load can start while this cycle runs: it finds the queue busy
        let needs_first_read = {
            let mut state = self.state.write();
            if state.reading {
                log::debug!("[CLAIMS] Load in progress, leaving the write to its merge");
                return CycleReport {
                    deferred: true,
                    ..Default::default()
                };
            }
            let first = !state.loaded;
            state.reading |= first;
            first
        };
        if needs_first_read {
            // Rendering before the disk state is in the map would drop claims never loaded
            let guard = ReadGuard {
                inner: self,
                armed: true,
            };
            let snapshot = self.read_snapshot(&layout).await;
            guard.disarm();
            self.merge_snapshot(snapshot, &layout, false);
        }

        let evictions = std::mem::take(&mut *self.pending_evictions.lock());

        let (files, verified) = {
            let state = self.state.read();
            let mut files: BTreeMap<PathBuf, Vec<ClaimRecord>> = BTreeMap::new();
            let mut verified = BTreeSet::new();
            for claim in state.claims.values() {
                files
                    .entry(layout.resolve(&claim.category))
                    .or_default()
                    .push(claim.clone());
                if claim.verified {
                    verified.insert(claim.id.clone());
                }
            }
            (files, verified)
        };

        let policy = self.config.write_policy();
        let mut report = CycleReport::default();

        for (path, id) in evictions {
            // A file rendered below is rewritten whole, which drops the block anyway
            if files.contains_key(&path) {
                continue;
            }
            match file_ops::evict_claim_block(&path, &id, policy).await {
                Ok(result) => {
                    log::debug!("[CLAIMS] Evicted {} from {}: {:?}", id, path.display(), result);
                    report.evictions.push(EvictionOutcome { path, id, result });
                }
                Err(e) => {
                    log::warn!("[CLAIMS] Could not remove {} from {}: {}", id, path.display(), e);
                }
            }
        }

        for (path, claims) in &files {
            let label = layout.header_label(path);
            let content = format::render_file(claims, label.as_deref());
            match file_ops::write_with_retry(path, &content, policy).await {
                Ok(attempts) => report.outcomes.push(FileOutcome {
                    path: path.clone(),
                    attempts,
                    error: None,
                }),
                Err(e) => {
                    log::error!("[CLAIMS] {}", e);
                    let attempts = match &e {
                        ClaimStoreError::WriteFailed { attempts, .. } => *attempts,
                        _ => 1,
                    };
                    report.outcomes.push(FileOutcome {
                        path: path.clone(),
                        attempts,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        if let Some(index) = layout.index_file() {
            write_master_index(&index, &layout, &files, policy).await;
        }

        if let Some(verification) = &self.verification {
            if let Err(e) = verification.save(&verified).await {
                log::warn!("[CLAIMS] Failed to save verification statuses: {}", e);
            }
        }

        self.finish_cycle(&report);
        report
    }

    fn finish_cycle(&self, report: &CycleReport) {
        let failed = report.failed_paths();
        if failed.is_empty() {
            log::debug!("[CLAIMS] Persist cycle wrote {} files", report.outcomes.len());
            self.observers.emit(&StoreEvent::PersistSucceeded {
                files: report.outcomes.iter().map(|o| o.path.clone()).collect(),
            });
            return;
        }

        log::error!(
            "[CLAIMS] Persist cycle failed for {} of {} files",
            failed.len(),
            report.outcomes.len()
        );
        self.observers.emit(&StoreEvent::PersistFailed {
            failed: failed.clone(),
        });
        self.sink.report(FailureReport {
            kind: FailureKind::WriteFailure,
            message: format!("{} file(s) could not be written", failed.len()),
            failed_files: failed,
            retry: Some(RetryHandle {
                store: self.weak.clone(),
            }),
        });
    }

    async fn load(&self) -> LoadOutcome {
        let Some(_guard) = LoadGuard::acquire(&self.loading) else {
            log::debug!("[RELOAD] Load already running, returning current snapshot");
            return self.outcome(LoadStatus::AlreadyLoading);
        };

        // Checked under the map lock, which every mutation holds while enqueueing
        let deferred = {
            let mut state = self.state.write();
            let busy = self.queue.is_busy();
            state.reading |= !busy;
            busy
        };
        if deferred {
            log::info!("[RELOAD] Write pending, deferring reload");
            self.schedule_reload();
            return self.outcome(LoadStatus::Deferred);
        }

        let guard = ReadGuard {
            inner: self,
            armed: true,
        };
        let layout = self.layout();
        let snapshot = self.read_snapshot(&layout).await;
        guard.disarm();
        if self.merge_snapshot(snapshot, &layout, true) > 0 {
            self.outcome(LoadStatus::Merged)
        } else {
            self.outcome(LoadStatus::Loaded)
        }
    }

    /// Claims on disk with verification statuses and inferred sources applied
    async fn read_snapshot(&self, layout: &StorageLayout) -> DiskSnapshot {
        let mut snapshot = read_from_disk(layout).await;

        match &self.verification {
            Some(verification) => match verification.load().await {
                Ok(ids) => {
                    for claim in snapshot.state.claims.values_mut() {
                        claim.verified = ids.contains(&claim.id);
                    }
                }
                Err(e) => log::warn!("[CLAIMS] Failed to load verification statuses: {}", e),
            },
            None => {
                // Without a store the flag only lives in memory; carry it over
                let state = self.state.read();
                for claim in snapshot.state.claims.values_mut() {
                    claim.verified = state
                        .claims
                        .get(&claim.id)
                        .map(|c| c.verified)
                        .unwrap_or(false);
                }
            }
        }

        if let Some(inference) =
            SourceInference::load(&self.config.literature_dir, self.config.source_match_threshold).await
        {
            let filled = inference.backfill(snapshot.state.claims.values_mut());
            if filled > 0 {
                log::info!("[SOURCES] Inferred sources for {} quotes", filled);
            }
        }

        snapshot
    }

    /// Swap the disk state into the map, keeping every dirty id's in-memory
    /// version (or its absence, for deletions). Clears the reading flag.
    ///
    /// Returns how many dirty ids were kept over disk. With `persist_kept`
    /// set, a cycle is enqueued when there were any, since the cycles those
    /// mutations enqueued stood down while the read was in flight.
    fn merge_snapshot(&self, snapshot: DiskSnapshot, layout: &StorageLayout, persist_kept: bool) -> usize {
        let DiskSnapshot {
            state: mut fresh,
            mut misplaced,
        } = snapshot;

        let (count, kept) = {
            let mut state = self.state.write();
            let dirty = std::mem::take(&mut state.dirty);
            for id in &dirty {
                let on_disk = fresh.file_map.remove(id);
                fresh.claims.remove(id);
                match state.claims.get(id) {
                    Some(claim) => {
                        let target = state
                            .file_map
                            .get(id)
                            .cloned()
                            .unwrap_or_else(|| layout.resolve(&claim.category));
                        if let Some(path) = on_disk.filter(|path| *path != target) {
                            misplaced.push((path, id.clone()));
                        }
                        fresh.file_map.insert(id.clone(), target);
                        fresh.claims.insert(id.clone(), claim.clone());
                    }
                    // Deleted while the read was in flight
                    None => {
                        if let Some(path) = on_disk {
                            misplaced.push((path, id.clone()));
                        }
                    }
                }
            }

            state.claims = fresh.claims;
            state.file_map = fresh.file_map;
            state.reading = false;
            state.loaded = true;

            if !misplaced.is_empty() {
                log::info!(
                    "[CLAIMS] {} stale blocks on disk, cleanup scheduled for the next write",
                    misplaced.len()
                );
                self.pending_evictions.lock().extend(misplaced);
            }
            if persist_kept && !dirty.is_empty() {
                drop(self.enqueue_persist());
            }
            (state.claims.len(), dirty.len())
        };

        let max_number = self
            .state
            .read()
            .claims
            .keys()
            .filter_map(|id| claim_number(id))
            .max()
            .unwrap_or(0);
        self.id_high_water.fetch_max(max_number, Ordering::SeqCst);

        if kept > 0 {
            log::info!("[RELOAD] Kept {} claims changed during the load", kept);
        }
        log::info!("[CLAIMS] Loaded {} claims", count);
        self.observers.emit(&StoreEvent::Loaded { count });
        kept
    }

    fn outcome(&self, status: LoadStatus) -> LoadOutcome {
        LoadOutcome {
            claims: self.sorted_claims(|_| true),
            status,
        }
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        self.queue.shutdown();
    }
}

fn reload_task(weak: Weak<StoreInner>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        if let Some(inner) = weak.upgrade() {
            let outcome = inner.load().await;
            log::debug!("[RELOAD] Scheduled reload finished: {:?}", outcome.status);
        }
    })
}

/// Rewrite the flat claims file as an overview of the shards. Left alone
/// while it still holds claim blocks, so an unsplit file is never lost.
async fn write_master_index(
    path: &Path,
    layout: &StorageLayout,
    files: &BTreeMap<PathBuf, Vec<ClaimRecord>>,
    policy: WritePolicy,
) {
    let shards: Vec<format::IndexedShard> = files
        .iter()
        .map(|(file, claims)| {
            let mut ids: Vec<&ClaimRecord> = claims.iter().collect();
            ids.sort_by_key(|c| (c.number().unwrap_or(u64::MAX), c.id.clone()));
            format::IndexedShard {
                label: layout.header_label(file).unwrap_or_default(),
                file_name: file
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default(),
                ids: ids.into_iter().map(|c| c.id.clone()).collect(),
            }
        })
        .collect();
    let content = format::render_master_index(&shards);

    match file_ops::read_claims_file(path).await {
        Ok(existing) if existing == content => return,
        Ok(existing) if format::contains_claim_blocks(&existing) => {
            log::warn!(
                "[CLAIMS] {} still holds claim blocks, not replacing it with the index",
                path.display()
            );
            return;
        }
        Ok(_) => {}
        Err(e) => {
            log::warn!("[CLAIMS] Could not read {}: {}", path.display(), e);
            return;
        }
    }

    if let Err(e) = file_ops::write_with_retry(path, &content, policy).await {
        log::warn!("[CLAIMS] Failed to write the master index: {}", e);
    }
}

/// Parse every claim file of the layout. Unreadable files and malformed
/// blocks are logged and skipped; the first copy of a duplicated id wins.
async fn read_from_disk(layout: &StorageLayout) -> DiskSnapshot {
    let files = match layout {
        StorageLayout::Sharded { dir } => match file_ops::list_shard_files(dir).await {
            Ok(files) => files,
            Err(e) => {
                log::warn!("[CLAIMS] Failed to list {}: {}", dir.display(), e);
                Vec::new()
            }
        },
        StorageLayout::Legacy { file } => vec![file.clone()],
    };

    let mut snapshot = DiskSnapshot {
        state: ClaimState::default(),
        misplaced: Vec::new(),
    };

    for path in files {
        let content = match file_ops::read_claims_file(&path).await {
            Ok(content) => content,
            Err(e) => {
                log::warn!("[CLAIMS] Skipping unreadable {}: {}", path.display(), e);
                continue;
            }
        };
        if content.trim().is_empty() {
            continue;
        }

        let mtime = file_ops::modified_at(&path).await;
        let parsed = format::parse_claims(&content);
        for skip in &parsed.skipped {
            log::warn!(
                "[CLAIMS] Skipped block at {}:{} ({}): {}",
                path.display(),
                skip.line,
                skip.header,
                skip.reason
            );
        }

        for mut claim in parsed.claims {
            if snapshot.state.claims.contains_key(&claim.id) {
                log::warn!(
                    "[CLAIMS] Duplicate {} in {}, keeping the first copy",
                    claim.id,
                    path.display()
                );
                continue;
            }
            if let Some(mtime) = mtime {
                claim.created_at = mtime;
                claim.modified_at = mtime;
            }

            let target = layout.resolve(&claim.category);
            if target != path {
                snapshot.misplaced.push((path.clone(), claim.id.clone()));
            }
            snapshot.state.file_map.insert(claim.id.clone(), target);
            snapshot.state.claims.insert(claim.id.clone(), claim);
        }
    }

    snapshot
}

/// Move inline `(Label):` prefixes out of quote text and normalize stored ones
fn normalize_quotes(claim: &mut ClaimRecord) {
    for quote in claim.quotes_mut() {
        match quote.position_prefix.take() {
            Some(prefix) => quote.position_prefix = format::normalize_position_prefix(&prefix),
            None => {
                let split = format::split_position_prefix(&quote.text);
                if split.position_prefix.is_some() {
                    quote.text = split.text;
                    quote.position_prefix = split.position_prefix;
                }
            }
        }
    }
}
