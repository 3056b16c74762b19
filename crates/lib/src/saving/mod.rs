//! Exclusive access to named saves.
//!
//! A [`SavingSystem`] hands out at most one open handle per save name. A
//! [`ReadHandle`] reads the stored files; a [`WriteHandle`] stages writes and
//! deletes in memory and pushes them to the [`StorageBackend`] in one
//! [`WriteArchive::commit`] call. Nothing a write handle does is visible until
//! the commit succeeds.
//!
//! Every call into the storage backend runs under the system's I/O lock, so an
//! adapter never sees two concurrent calls from the same system.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use handle_trait::Handle;
use tracing::{debug, info};

use crate::{
    Account, ExclusiveLock, LifetimeToken, Result,
    account::SignOutCleanup,
    config::SavingConfig,
};

pub mod errors;
mod handle;
mod name;

pub use errors::SavingError;
pub use handle::{ReadHandle, WriteHandle};
pub use name::{DEFAULT_MAX_NAME_LEN, SaveName};

/// Which storage area a saving system works in.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SaveScope {
    /// Device-local saves not tied to any account.
    Local,
    /// Saves belonging to one platform identity, shared by every sign-in of it.
    Account(String),
}

impl SaveScope {
    /// Scope of the saves owned by `account`'s platform identity.
    pub fn account(account: &Account) -> Self {
        SaveScope::Account(account.platform_id().to_string())
    }
}

impl fmt::Display for SaveScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveScope::Local => f.write_str("local"),
            SaveScope::Account(platform_id) => write!(f, "account {platform_id}"),
        }
    }
}

/// Staged changes of a write handle.
///
/// A file is either written or deleted, never both: the later call wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchiveDiff {
    written: BTreeMap<String, Vec<u8>>,
    deleted: BTreeSet<String>,
}

impl ArchiveDiff {
    pub fn write(&mut self, file: impl Into<String>, data: Vec<u8>) {
        let file = file.into();
        self.deleted.remove(&file);
        self.written.insert(file, data);
    }

    pub fn delete(&mut self, file: impl Into<String>) {
        let file = file.into();
        self.written.remove(&file);
        self.deleted.insert(file);
    }

    pub fn written(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.written
    }

    pub fn deleted(&self) -> &BTreeSet<String> {
        &self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.written.is_empty() && self.deleted.is_empty()
    }

    /// The file set that results from applying this diff to `existing`.
    pub fn apply_to<I>(&self, existing: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = String>,
    {
        existing
            .into_iter()
            .filter(|file| !self.deleted.contains(file))
            .chain(self.written.keys().cloned())
            .collect()
    }

    pub fn into_parts(self) -> (BTreeMap<String, Vec<u8>>, BTreeSet<String>) {
        (self.written, self.deleted)
    }
}

/// A stored save opened for reading.
#[async_trait]
pub trait ReadArchive: Send + Sync {
    async fn enumerate_files(&self) -> Result<Vec<String>>;

    /// Fails with [`SavingError::FileNotFound`] for a missing file.
    async fn read_file(&self, file: &str) -> Result<Vec<u8>>;
}

/// A save opened for writing. Creating a new save is a write to a name that
/// does not exist yet.
#[async_trait]
pub trait WriteArchive: Send + Sync {
    /// Files currently stored, before any staged change.
    async fn enumerate_files(&self) -> Result<Vec<String>>;

    /// Apply the diff atomically: either all of it becomes visible or none.
    async fn commit(&self, diff: ArchiveDiff) -> Result<()>;
}

/// Platform storage adapter.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn enumerate_archives(&self, scope: &SaveScope) -> Result<Vec<SaveName>>;

    /// Fails with [`SavingError::NotFound`] if the save does not exist.
    async fn read_archive(&self, scope: &SaveScope, name: &SaveName)
    -> Result<Box<dyn ReadArchive>>;

    async fn write_archive(
        &self,
        scope: &SaveScope,
        name: &SaveName,
    ) -> Result<Box<dyn WriteArchive>>;

    /// Fails with [`SavingError::NotFound`] if the save does not exist.
    async fn delete_archive(&self, scope: &SaveScope, name: &SaveName) -> Result<()>;
}

/// What an open-handle table entry is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleMode {
    Read,
    Write,
    /// Held while a save is being deleted
    Deleting,
}

#[derive(Debug, Default)]
struct OpenTable {
    slots: HashMap<SaveName, (u64, HandleMode)>,
    next_id: u64,
}

pub(crate) struct SavingInner {
    storage: Arc<dyn StorageBackend>,
    scope: SaveScope,
    config: SavingConfig,
    open: Mutex<OpenTable>,
    /// Serializes every storage call
    pub(crate) io: ExclusiveLock,
    lifetime: LifetimeToken,
}

/// Owner of the open-handle table for one storage scope.
///
/// Cheap to clone. Handles keep their system alive; disposing the system
/// invalidates every handle that is still open.
#[derive(Clone, Handle)]
pub struct SavingSystem {
    pub(crate) inner: Arc<SavingInner>,
}

impl SavingSystem {
    /// Saving system for device-local saves.
    pub fn local(storage: Arc<dyn StorageBackend>, config: SavingConfig) -> Self {
        Self::build(
            storage,
            SaveScope::Local,
            config,
            LifetimeToken::new("saving system"),
        )
    }

    /// Saving system for one account's saves.
    ///
    /// The system is invalidated as soon as the account signs out and
    /// disposed during the account's cleanup.
    pub fn for_account(
        account: &Account,
        storage: Arc<dyn StorageBackend>,
        config: SavingConfig,
    ) -> Result<Self> {
        account.lifetime().check()?;
        let system = Self::build(
            storage,
            SaveScope::account(account),
            config,
            account.lifetime().child("saving system"),
        );
        account.register_cleanup(Arc::new(system.handle()))?;
        Ok(system)
    }

    fn build(
        storage: Arc<dyn StorageBackend>,
        scope: SaveScope,
        config: SavingConfig,
        lifetime: LifetimeToken,
    ) -> Self {
        Self {
            inner: Arc::new(SavingInner {
                storage,
                scope,
                config,
                open: Mutex::new(OpenTable::default()),
                io: ExclusiveLock::new("saving_io"),
                lifetime,
            }),
        }
    }

    pub fn scope(&self) -> &SaveScope {
        &self.inner.scope
    }

    pub fn lifetime(&self) -> &LifetimeToken {
        &self.inner.lifetime
    }

    /// Number of handles currently open.
    pub fn open_handle_count(&self) -> usize {
        self.inner.open.lock().unwrap().slots.len()
    }

    /// Whether a handle for `name` is open.
    pub fn is_open(&self, name: &str) -> bool {
        self.inner.open.lock().unwrap().slots.contains_key(name)
    }

    /// What the open handle for `name` is used for, if one is open.
    pub fn open_mode(&self, name: &str) -> Option<HandleMode> {
        self.inner
            .open
            .lock()
            .unwrap()
            .slots
            .get(name)
            .map(|(_, mode)| *mode)
    }

    /// Names of all stored saves.
    ///
    /// Fails with [`SavingError::HandlesOpen`] while any handle is open, so a
    /// half-committed save is never observed.
    pub async fn enumerate_names(&self) -> Result<Vec<SaveName>> {
        self.inner.lifetime.check()?;
        self.ensure_no_open_handles()?;
        let _io = self.inner.io.acquire().await;
        self.inner.lifetime.check()?;
        let mut names = self.inner.storage.enumerate_archives(&self.inner.scope).await?;
        names.sort();
        Ok(names)
    }

    /// Whether a save with this name is stored. Same restrictions as
    /// [`SavingSystem::enumerate_names`].
    pub async fn exists(&self, name: &str) -> Result<bool> {
        let name = self.validate(name)?;
        Ok(self.enumerate_names().await?.contains(&name))
    }

    /// Open a stored save for reading.
    ///
    /// A save without any file is reported as [`SavingError::Corrupted`].
    pub async fn open_readable(&self, name: &str) -> Result<ReadHandle> {
        self.inner.lifetime.check()?;
        let name = self.validate(name)?;
        let slot = self.reserve(name, HandleMode::Read)?;

        let _io = self.inner.io.acquire().await;
        self.inner.lifetime.check()?;
        let archive = self
            .inner
            .storage
            .read_archive(&self.inner.scope, slot.name())
            .await?;
        if archive.enumerate_files().await?.is_empty() {
            return Err(SavingError::Corrupted {
                name: slot.name().to_string(),
                reason: "save contains no files".to_string(),
            }
            .into());
        }
        debug!(save = %slot.name(), scope = %self.inner.scope, "Opened save for reading");
        Ok(ReadHandle::new(slot, archive, self.inner.lifetime.child("read handle")))
    }

    /// Open a save for writing, creating it on the first commit if needed.
    pub async fn open_writable(&self, name: &str) -> Result<WriteHandle> {
        self.inner.lifetime.check()?;
        let name = self.validate(name)?;
        let slot = self.reserve(name, HandleMode::Write)?;

        let _io = self.inner.io.acquire().await;
        self.inner.lifetime.check()?;
        let archive = self
            .inner
            .storage
            .write_archive(&self.inner.scope, slot.name())
            .await?;
        debug!(save = %slot.name(), scope = %self.inner.scope, "Opened save for writing");
        Ok(WriteHandle::new(
            slot,
            archive,
            self.inner.lifetime.child("write handle"),
        ))
    }

    /// Delete a stored save. Fails if a handle for it is open.
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.inner.lifetime.check()?;
        let name = self.validate(name)?;
        let slot = self.reserve(name, HandleMode::Deleting)?;

        let _io = self.inner.io.acquire().await;
        self.inner.lifetime.check()?;
        self.inner
            .storage
            .delete_archive(&self.inner.scope, slot.name())
            .await?;
        info!(save = %slot.name(), scope = %self.inner.scope, "Deleted save");
        Ok(())
    }

    /// Invalidate the system and every handle still open. Idempotent.
    ///
    /// Waits for an in-flight storage call to finish before clearing the
    /// open-handle table.
    pub async fn dispose(&self) {
        let first = self.inner.lifetime.dispose();
        let _io = self.inner.io.acquire().await;
        let abandoned = {
            let mut open = self.inner.open.lock().unwrap();
            let count = open.slots.len();
            open.slots.clear();
            count
        };
        if first || abandoned > 0 {
            debug!(scope = %self.inner.scope, abandoned, "Saving system disposed");
        }
    }

    fn validate(&self, name: &str) -> Result<SaveName> {
        SaveName::with_max_len(name, self.inner.config.max_name_len)
    }

    fn ensure_no_open_handles(&self) -> Result<()> {
        let count = self.open_handle_count();
        if count > 0 {
            return Err(SavingError::HandlesOpen { count }.into());
        }
        Ok(())
    }

    /// Claim the open-handle slot for `name`.
    fn reserve(&self, name: SaveName, mode: HandleMode) -> Result<OpenSlot> {
        let mut open = self.inner.open.lock().unwrap();
        if open.slots.contains_key(&name) {
            return Err(SavingError::AlreadyOpen {
                name: name.to_string(),
            }
            .into());
        }
        let id = open.next_id;
        open.next_id += 1;
        open.slots.insert(name.clone(), (id, mode));
        Ok(OpenSlot {
            system: self.handle(),
            name,
            id,
        })
    }
}

#[async_trait]
impl SignOutCleanup for SavingSystem {
    async fn clean_up_after_sign_out(&self) -> Result<()> {
        self.dispose().await;
        Ok(())
    }
}

impl fmt::Debug for SavingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SavingSystem")
            .field("scope", &self.inner.scope)
            .field("open_handles", &self.open_handle_count())
            .field("lifetime", &self.inner.lifetime)
            .finish()
    }
}

/// One entry of the open-handle table. Released on drop.
pub(crate) struct OpenSlot {
    system: SavingSystem,
    name: SaveName,
    id: u64,
}

impl OpenSlot {
    pub(crate) fn name(&self) -> &SaveName {
        &self.name
    }

    pub(crate) fn system(&self) -> &SavingSystem {
        &self.system
    }

    /// Remove the entry if it is still ours. Idempotent.
    pub(crate) fn release(&self) {
        let mut open = self.system.inner.open.lock().unwrap();
        if matches!(open.slots.get(&self.name), Some((id, _)) if *id == self.id) {
            open.slots.remove(&self.name);
        }
    }
}

impl Drop for OpenSlot {
    fn drop(&mut self) {
        self.release();
    }
}
