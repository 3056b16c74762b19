//! In-memory adapters
//!
//! Reference implementations of every platform adapter trait, suitable for
//! tests, tools and headless runs. Each one can be told to fail in the ways a
//! real platform does (full storage, offline service, declined prompt) so the
//! coordination logic can be exercised without a platform SDK.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    Account, Error, Result,
    account::AccountProvider,
    achievement::{AchievementBackend, AchievementDefinition, AchievementError, ProgressReport},
    saving::{ArchiveDiff, ReadArchive, SaveName, SaveScope, SavingError, StorageBackend, WriteArchive},
};

/// Tracks how many adapter calls overlap.
#[derive(Debug, Default)]
struct CallTracker {
    current: AtomicUsize,
    max: AtomicUsize,
    total: AtomicUsize,
}

impl CallTracker {
    fn enter(&self) -> CallGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        CallGuard { tracker: self }
    }
}

struct CallGuard<'a> {
    tracker: &'a CallTracker,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.tracker.current.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn simulate_latency(latency: Option<Duration>) {
    if let Some(latency) = latency {
        tokio::time::sleep(latency).await;
    }
}

type Files = BTreeMap<String, Vec<u8>>;
type ArchiveKey = (SaveScope, SaveName);

#[derive(Debug, Default)]
struct StorageState {
    archives: HashMap<ArchiveKey, Files>,
    fail_commits: usize,
    latency: Option<Duration>,
}

/// In-memory [`StorageBackend`].
///
/// Commits are applied atomically under one lock. Archive objects read the
/// live state, so a read handle sees commits made after it was opened.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<StorageState>>,
    calls: Arc<CallTracker>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a save directly, bypassing the saving system. An empty file map
    /// produces a save that reads back as corrupted.
    pub fn insert_archive<I, F, D>(&self, scope: &SaveScope, name: &SaveName, files: I)
    where
        I: IntoIterator<Item = (F, D)>,
        F: Into<String>,
        D: Into<Vec<u8>>,
    {
        let files = files
            .into_iter()
            .map(|(file, data)| (file.into(), data.into()))
            .collect();
        self.state
            .lock()
            .unwrap()
            .archives
            .insert((scope.clone(), name.clone()), files);
    }

    /// File names of a stored save, sorted.
    pub fn files(&self, scope: &SaveScope, name: &SaveName) -> Option<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .archives
            .get(&(scope.clone(), name.clone()))
            .map(|files| files.keys().cloned().collect())
    }

    pub fn contents(&self, scope: &SaveScope, name: &SaveName, file: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .archives
            .get(&(scope.clone(), name.clone()))
            .and_then(|files| files.get(file).cloned())
    }

    pub fn archive_count(&self) -> usize {
        self.state.lock().unwrap().archives.len()
    }

    /// Make the next `count` commits fail with a transient "storage full" error.
    pub fn fail_commits(&self, count: usize) {
        self.state.lock().unwrap().fail_commits = count;
    }

    /// Delay every call, so overlapping calls would become visible.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = Some(latency);
    }

    /// Highest number of adapter calls that were in flight at once.
    pub fn max_concurrent_calls(&self) -> usize {
        self.calls.max.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.total.load(Ordering::SeqCst)
    }

    fn latency(&self) -> Option<Duration> {
        self.state.lock().unwrap().latency
    }

    fn archive(&self, scope: &SaveScope, name: &SaveName) -> MemoryArchive {
        MemoryArchive {
            state: self.state.clone(),
            calls: self.calls.clone(),
            key: (scope.clone(), name.clone()),
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn enumerate_archives(&self, scope: &SaveScope) -> Result<Vec<SaveName>> {
        let _call = self.calls.enter();
        simulate_latency(self.latency()).await;
        let state = self.state.lock().unwrap();
        Ok(state
            .archives
            .keys()
            .filter(|(archive_scope, _)| archive_scope == scope)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn read_archive(
        &self,
        scope: &SaveScope,
        name: &SaveName,
    ) -> Result<Box<dyn ReadArchive>> {
        let _call = self.calls.enter();
        simulate_latency(self.latency()).await;
        if !self
            .state
            .lock()
            .unwrap()
            .archives
            .contains_key(&(scope.clone(), name.clone()))
        {
            return Err(SavingError::NotFound {
                name: name.to_string(),
            }
            .into());
        }
        Ok(Box::new(self.archive(scope, name)))
    }

    async fn write_archive(
        &self,
        scope: &SaveScope,
        name: &SaveName,
    ) -> Result<Box<dyn WriteArchive>> {
        let _call = self.calls.enter();
        simulate_latency(self.latency()).await;
        Ok(Box::new(self.archive(scope, name)))
    }

    async fn delete_archive(&self, scope: &SaveScope, name: &SaveName) -> Result<()> {
        let _call = self.calls.enter();
        simulate_latency(self.latency()).await;
        match self
            .state
            .lock()
            .unwrap()
            .archives
            .remove(&(scope.clone(), name.clone()))
        {
            Some(_) => Ok(()),
            None => Err(SavingError::NotFound {
                name: name.to_string(),
            }
            .into()),
        }
    }
}

struct MemoryArchive {
    state: Arc<Mutex<StorageState>>,
    calls: Arc<CallTracker>,
    key: ArchiveKey,
}

impl MemoryArchive {
    fn latency(&self) -> Option<Duration> {
        self.state.lock().unwrap().latency
    }

    fn file_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .archives
            .get(&self.key)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ReadArchive for MemoryArchive {
    async fn enumerate_files(&self) -> Result<Vec<String>> {
        let _call = self.calls.enter();
        simulate_latency(self.latency()).await;
        Ok(self.file_names())
    }

    async fn read_file(&self, file: &str) -> Result<Vec<u8>> {
        let _call = self.calls.enter();
        simulate_latency(self.latency()).await;
        let state = self.state.lock().unwrap();
        state
            .archives
            .get(&self.key)
            .and_then(|files| files.get(file).cloned())
            .ok_or_else(|| {
                SavingError::FileNotFound {
                    name: self.key.1.to_string(),
                    file: file.to_string(),
                }
                .into()
            })
    }
}

#[async_trait]
impl WriteArchive for MemoryArchive {
    async fn enumerate_files(&self) -> Result<Vec<String>> {
        let _call = self.calls.enter();
        simulate_latency(self.latency()).await;
        Ok(self.file_names())
    }

    async fn commit(&self, diff: ArchiveDiff) -> Result<()> {
        let _call = self.calls.enter();
        simulate_latency(self.latency()).await;
        let mut state = self.state.lock().unwrap();
        if state.fail_commits > 0 {
            state.fail_commits -= 1;
            return Err(Error::Transient {
                reason: "storage full".to_string(),
            });
        }
        let (written, deleted) = diff.into_parts();
        let files = state.archives.entry(self.key.clone()).or_default();
        files.retain(|file, _| !deleted.contains(file));
        files.extend(written);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct AchievementState {
    reports: Vec<ProgressReport>,
    fail_initialize: Option<String>,
    fail_updates: usize,
    rejected: HashSet<String>,
    updates: Vec<(String, u32)>,
    initialize_calls: usize,
    latency: Option<Duration>,
}

/// In-memory [`AchievementBackend`] that records every update it accepts.
#[derive(Debug, Default)]
pub struct MemoryAchievementBackend {
    state: Mutex<AchievementState>,
    calls: CallTracker,
}

impl MemoryAchievementBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports returned by every later platform probe.
    pub fn set_reports(&self, reports: Vec<ProgressReport>) {
        self.state.lock().unwrap().reports = reports;
    }

    /// Make the platform probe fail until [`Self::recover`] is called.
    pub fn fail_initialize(&self, reason: impl Into<String>) {
        self.state.lock().unwrap().fail_initialize = Some(reason.into());
    }

    pub fn recover(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_initialize = None;
        state.fail_updates = 0;
    }

    /// Make the next `count` updates fail with a platform error.
    pub fn fail_updates(&self, count: usize) {
        self.state.lock().unwrap().fail_updates = count;
    }

    /// Permanently refuse updates for `id`.
    pub fn reject(&self, id: impl Into<String>) {
        self.state.lock().unwrap().rejected.insert(id.into());
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = Some(latency);
    }

    /// Every accepted update, in the order it arrived.
    pub fn updates(&self) -> Vec<(String, u32)> {
        self.state.lock().unwrap().updates.clone()
    }

    /// Accepted progress values for one achievement.
    pub fn updates_for(&self, id: &str) -> Vec<u32> {
        self.state
            .lock()
            .unwrap()
            .updates
            .iter()
            .filter(|(update_id, _)| update_id == id)
            .map(|(_, progress)| *progress)
            .collect()
    }

    pub fn initialize_calls(&self) -> usize {
        self.state.lock().unwrap().initialize_calls
    }

    pub fn max_concurrent_calls(&self) -> usize {
        self.calls.max.load(Ordering::SeqCst)
    }

    /// Number of adapter calls running right now.
    pub fn calls_in_flight(&self) -> usize {
        self.calls.current.load(Ordering::SeqCst)
    }

    fn latency(&self) -> Option<Duration> {
        self.state.lock().unwrap().latency
    }
}

#[async_trait]
impl AchievementBackend for MemoryAchievementBackend {
    async fn initialize_system(
        &self,
        _definitions: &[AchievementDefinition],
    ) -> Result<Vec<ProgressReport>> {
        let _call = self.calls.enter();
        simulate_latency(self.latency()).await;
        let mut state = self.state.lock().unwrap();
        state.initialize_calls += 1;
        if let Some(reason) = &state.fail_initialize {
            return Err(Error::Transient {
                reason: reason.clone(),
            });
        }
        Ok(state.reports.clone())
    }

    async fn do_update(&self, definition: &AchievementDefinition, progress: u32) -> Result<()> {
        let _call = self.calls.enter();
        simulate_latency(self.latency()).await;
        let mut state = self.state.lock().unwrap();
        if state.rejected.contains(definition.id()) {
            return Err(AchievementError::Rejected {
                id: definition.id().to_string(),
                reason: "unknown to platform".to_string(),
            }
            .into());
        }
        if state.fail_updates > 0 {
            state.fail_updates -= 1;
            return Err(Error::Platform {
                reason: "achievement service unavailable".to_string(),
            });
        }
        state.updates.push((definition.id().to_string(), progress));
        Ok(())
    }
}

#[derive(Debug)]
enum Scripted {
    Account(Account),
    Declined,
    Transient(String),
}

impl Scripted {
    fn into_result(self, prompt: &str) -> Result<Account> {
        match self {
            Scripted::Account(account) => Ok(account),
            Scripted::Declined => Err(Error::UserDeclined {
                prompt: prompt.to_string(),
            }),
            Scripted::Transient(reason) => Err(Error::Transient { reason }),
        }
    }
}

/// [`AccountProvider`] that replays queued answers.
///
/// An empty queue answers with a platform error.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    primary: Mutex<VecDeque<Scripted>>,
    picker: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_primary(&self, account: &Account) {
        self.primary
            .lock()
            .unwrap()
            .push_back(Scripted::Account(account.clone()));
    }

    pub fn push_primary_declined(&self) {
        self.primary.lock().unwrap().push_back(Scripted::Declined);
    }

    pub fn push_primary_transient(&self, reason: impl Into<String>) {
        self.primary
            .lock()
            .unwrap()
            .push_back(Scripted::Transient(reason.into()));
    }

    pub fn push_pick(&self, account: &Account) {
        self.picker
            .lock()
            .unwrap()
            .push_back(Scripted::Account(account.clone()));
    }

    pub fn push_pick_declined(&self) {
        self.picker.lock().unwrap().push_back(Scripted::Declined);
    }

    /// Number of prompts answered so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self, queue: &Mutex<VecDeque<Scripted>>, prompt: &str) -> Result<Account> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match queue.lock().unwrap().pop_front() {
            Some(scripted) => scripted.into_result(prompt),
            None => Err(Error::Platform {
                reason: format!("no scripted answer for {prompt}"),
            }),
        }
    }
}

#[async_trait]
impl AccountProvider for ScriptedProvider {
    async fn establish_primary(&self) -> Result<Account> {
        self.answer(&self.primary, "sign-in prompt")
    }

    async fn show_picker(&self) -> Result<Account> {
        self.answer(&self.picker, "account picker")
    }
}
