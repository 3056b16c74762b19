//! Read and write handles on an open save.

use std::fmt;

use tracing::{debug, info, warn};

use super::{ArchiveDiff, OpenSlot, ReadArchive, SavingError, SaveName, WriteArchive};
use crate::{LifetimeToken, Result};

/// Read access to one stored save.
///
/// Holds the save's open-handle slot until closed or dropped.
pub struct ReadHandle {
    slot: OpenSlot,
    archive: Box<dyn ReadArchive>,
    lifetime: LifetimeToken,
}

impl ReadHandle {
    pub(crate) fn new(slot: OpenSlot, archive: Box<dyn ReadArchive>, lifetime: LifetimeToken) -> Self {
        Self {
            slot,
            archive,
            lifetime,
        }
    }

    pub fn name(&self) -> &SaveName {
        self.slot.name()
    }

    pub fn is_valid(&self) -> bool {
        self.lifetime.is_valid()
    }

    /// Names of the files in the save, sorted.
    pub async fn enumerate_files(&self) -> Result<Vec<String>> {
        self.lifetime.check()?;
        let _io = self.slot.system().inner.io.acquire().await;
        self.lifetime.check()?;
        let mut files = self.archive.enumerate_files().await?;
        files.sort();
        Ok(files)
    }

    pub async fn file_exists(&self, file: &str) -> Result<bool> {
        Ok(self.enumerate_files().await?.iter().any(|f| f == file))
    }

    pub async fn read_file(&self, file: &str) -> Result<Vec<u8>> {
        self.lifetime.check()?;
        let _io = self.slot.system().inner.io.acquire().await;
        self.lifetime.check()?;
        self.archive.read_file(file).await
    }

    /// Release the save. Waits for an in-flight read; idempotent.
    pub async fn close(&self) {
        let _io = self.slot.system().inner.io.acquire().await;
        if self.lifetime.dispose() {
            self.slot.release();
            debug!(save = %self.slot.name(), "Read handle closed");
        }
    }
}

impl Drop for ReadHandle {
    fn drop(&mut self) {
        self.lifetime.dispose();
    }
}

impl fmt::Debug for ReadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadHandle")
            .field("name", self.slot.name())
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Staged write access to one save.
///
/// Writes and deletes only touch the in-memory [`ArchiveDiff`] until
/// [`WriteHandle::commit`]. Closing or dropping the handle without committing
/// discards them.
pub struct WriteHandle {
    slot: OpenSlot,
    archive: Box<dyn WriteArchive>,
    lifetime: LifetimeToken,
    diff: ArchiveDiff,
}

impl WriteHandle {
    pub(crate) fn new(
        slot: OpenSlot,
        archive: Box<dyn WriteArchive>,
        lifetime: LifetimeToken,
    ) -> Self {
        Self {
            slot,
            archive,
            lifetime,
            diff: ArchiveDiff::default(),
        }
    }

    pub fn name(&self) -> &SaveName {
        self.slot.name()
    }

    pub fn is_valid(&self) -> bool {
        self.lifetime.is_valid()
    }

    /// Changes staged so far.
    pub fn staged(&self) -> &ArchiveDiff {
        &self.diff
    }

    /// Stage a file write, replacing a staged delete of the same file.
    pub fn write_file(&mut self, file: impl Into<String>, data: impl Into<Vec<u8>>) -> Result<()> {
        self.lifetime.check()?;
        self.diff.write(file, data.into());
        Ok(())
    }

    /// Stage a file delete, replacing a staged write of the same file.
    pub fn delete_file(&mut self, file: impl Into<String>) -> Result<()> {
        self.lifetime.check()?;
        self.diff.delete(file);
        Ok(())
    }

    /// Files the save would contain if committed now, sorted.
    pub async fn enumerate_files(&self) -> Result<Vec<String>> {
        self.lifetime.check()?;
        let _io = self.slot.system().inner.io.acquire().await;
        self.lifetime.check()?;
        let existing = self.archive.enumerate_files().await?;
        Ok(self.diff.apply_to(existing).into_iter().collect())
    }

    /// Push the staged changes to storage and close the handle.
    ///
    /// Fails with [`SavingError::EmptyArchive`] if the save would end up with
    /// no files. The handle is closed whether or not the commit succeeds.
    pub async fn commit(&mut self) -> Result<()> {
        self.lifetime.check()?;
        let diff = std::mem::take(&mut self.diff);
        let _io = self.slot.system().inner.io.acquire().await;
        let result = self.push(diff).await;
        self.lifetime.dispose();
        self.slot.release();
        match &result {
            Ok(()) => info!(save = %self.slot.name(), "Save committed"),
            Err(e) => warn!(save = %self.slot.name(), "Save commit failed: {e}"),
        }
        result
    }

    async fn push(&self, diff: ArchiveDiff) -> Result<()> {
        self.lifetime.check()?;
        let existing = self.archive.enumerate_files().await?;
        if diff.apply_to(existing).is_empty() {
            return Err(SavingError::EmptyArchive {
                name: self.slot.name().to_string(),
            }
            .into());
        }
        self.archive.commit(diff).await
    }

    /// Discard staged changes and release the save. Idempotent.
    pub async fn close(&self) {
        let _io = self.slot.system().inner.io.acquire().await;
        if self.lifetime.dispose() {
            self.slot.release();
            debug!(save = %self.slot.name(), "Write handle closed without commit");
        }
    }
}

impl Drop for WriteHandle {
    fn drop(&mut self) {
        if self.lifetime.dispose() && !self.diff.is_empty() {
            debug!(save = %self.slot.name(), "Discarding uncommitted save changes");
        }
    }
}

impl fmt::Debug for WriteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteHandle")
            .field("name", self.slot.name())
            .field("valid", &self.is_valid())
            .field("staged", &self.diff)
            .finish()
    }
}
