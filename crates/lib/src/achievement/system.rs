//! The achievement system and its update loop.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, Weak},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use handle_trait::Handle;
use tokio::{
    sync::{Notify, Semaphore, SemaphorePermit, watch},
    task::JoinHandle,
};
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use super::{
    AchievementBackend, AchievementDefinition, AchievementError, AchievementProgress,
    ProgressReport,
    state::{PendingQueue, ProgressState},
};
use crate::{
    Account, Clock, Error, ExclusiveLock, LifetimeToken, Result, SystemClock,
    account::SignOutCleanup, config::AchievementConfig,
};

/// Lifecycle of the platform probe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AchievementStatus {
    Uninitialized,
    Initializing,
    Ready,
    /// The probe failed; only `force_reinitialize` recovers.
    Failed(String),
}

struct UpdateLoop {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct SystemInner {
    backend: Arc<dyn AchievementBackend>,
    /// Definitions in registration order
    definitions: Vec<AchievementDefinition>,
    index: HashMap<String, usize>,
    progress: Vec<ProgressState>,
    pending: Mutex<PendingQueue>,
    wake: Arc<Notify>,
    /// Held while updates are applied and while state is cleared
    resource: ExclusiveLock,
    /// Single-slot admission for (re)initialization
    admission: Semaphore,
    status: Mutex<AchievementStatus>,
    update_loop: Mutex<Option<UpdateLoop>>,
    config: AchievementConfig,
    clock: Arc<dyn Clock>,
    lifetime: LifetimeToken,
}

/// Coalescing, rate-limited achievement progress engine.
///
/// `AchievementSystem` is a cheap-to-clone handle. Its update loop only holds a
/// weak reference, so dropping every handle stops the loop.
#[derive(Clone, Handle)]
pub struct AchievementSystem {
    inner: Arc<SystemInner>,
}

impl AchievementSystem {
    /// Create a system for the given definitions.
    pub fn new(
        backend: Arc<dyn AchievementBackend>,
        definitions: Vec<AchievementDefinition>,
        config: AchievementConfig,
    ) -> Result<Self> {
        Self::build(
            backend,
            definitions,
            config,
            Arc::new(SystemClock),
            LifetimeToken::new("achievement system"),
        )
    }

    /// Create a system with a custom clock for pending-update timestamps.
    pub fn with_clock(
        backend: Arc<dyn AchievementBackend>,
        definitions: Vec<AchievementDefinition>,
        config: AchievementConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::build(
            backend,
            definitions,
            config,
            clock,
            LifetimeToken::new("achievement system"),
        )
    }

    /// Create a system bound to a signed-in account.
    ///
    /// Signing the account out invalidates the system immediately and shuts
    /// its loop down during the account's cleanup.
    pub fn for_account(
        account: &Account,
        backend: Arc<dyn AchievementBackend>,
        definitions: Vec<AchievementDefinition>,
        config: AchievementConfig,
    ) -> Result<Self> {
        account.lifetime().check()?;
        let system = Self::build(
            backend,
            definitions,
            config,
            Arc::new(SystemClock),
            account.lifetime().child("achievement system"),
        )?;
        account.register_cleanup(Arc::new(system.handle()))?;
        Ok(system)
    }

    fn build(
        backend: Arc<dyn AchievementBackend>,
        definitions: Vec<AchievementDefinition>,
        config: AchievementConfig,
        clock: Arc<dyn Clock>,
        lifetime: LifetimeToken,
    ) -> Result<Self> {
        let mut index = HashMap::with_capacity(definitions.len());
        for (position, definition) in definitions.iter().enumerate() {
            if definition.target() < 1 {
                return Err(AchievementError::InvalidTarget {
                    id: definition.id().to_string(),
                }
                .into());
            }
            if index.insert(definition.id().to_string(), position).is_some() {
                return Err(AchievementError::DuplicateDefinition {
                    id: definition.id().to_string(),
                }
                .into());
            }
        }

        let wake = Arc::new(Notify::new());
        // Wake the loop on invalidation so it can exit
        let loop_wake = wake.clone();
        lifetime.on_invalidate(move || loop_wake.notify_one()).detach();

        let progress = definitions.iter().map(|_| ProgressState::default()).collect();
        Ok(Self {
            inner: Arc::new(SystemInner {
                backend,
                definitions,
                index,
                progress,
                pending: Mutex::new(PendingQueue::default()),
                wake,
                resource: ExclusiveLock::new("achievement_resource"),
                admission: Semaphore::new(1),
                status: Mutex::new(AchievementStatus::Uninitialized),
                update_loop: Mutex::new(None),
                config,
                clock,
                lifetime,
            }),
        })
    }

    /// Run the platform probe and start the update loop.
    ///
    /// Fails with [`AchievementError::AlreadyInitialized`] if the system is
    /// initialized, and with the probe's own error if the probe fails, which
    /// leaves the system in [`AchievementStatus::Failed`].
    pub async fn initialize(&self) -> Result<()> {
        self.inner.lifetime.check()?;
        let _permit = self.admit().await?;
        self.initialize_admitted().await
    }

    /// Stop updates, clear all progress and run the probe again.
    ///
    /// Waits for any in-flight initialization first. The update loop is stopped
    /// before the resource lock is taken, so an update cycle that is itself
    /// waiting on the lock can finish instead of deadlocking.
    pub async fn force_reinitialize(&self) -> Result<()> {
        self.inner.lifetime.check()?;
        let _permit = self.admit().await?;
        self.stop_update_loop().await;
        self.inner.lifetime.check()?;
        {
            let _scope = self.inner.resource.acquire().await;
            self.inner.lifetime.check()?;
            self.inner.pending.lock().unwrap().clear();
            for state in &self.inner.progress {
                state.reset();
            }
            *self.inner.status.lock().unwrap() = AchievementStatus::Uninitialized;
        }
        info!("Achievement state cleared for reinitialization");
        self.initialize_admitted().await
    }

    async fn admit(&self) -> Result<SemaphorePermit<'_>> {
        self.inner
            .admission
            .acquire()
            .await
            .map_err(|_| Error::Invalidated {
                object: "achievement system",
            })
    }

    /// Run the probe. Shutdown may happen at any await point, so the lifetime
    /// is checked again before the backend is called and before the result is
    /// published.
    async fn initialize_admitted(&self) -> Result<()> {
        self.inner.lifetime.check()?;
        {
            let mut status = self.inner.status.lock().unwrap();
            match &*status {
                AchievementStatus::Uninitialized => *status = AchievementStatus::Initializing,
                AchievementStatus::Failed(reason) => {
                    return Err(AchievementError::InitializationFailed {
                        reason: reason.clone(),
                    }
                    .into());
                }
                AchievementStatus::Initializing | AchievementStatus::Ready => {
                    return Err(AchievementError::AlreadyInitialized.into());
                }
            }
        }

        let reports = match self
            .inner
            .backend
            .initialize_system(&self.inner.definitions)
            .await
        {
            Ok(reports) => reports,
            Err(e) => {
                error!("Achievement system initialization failed: {e}");
                *self.inner.status.lock().unwrap() = AchievementStatus::Failed(e.to_string());
                return Err(e);
            }
        };

        if let Err(e) = self.inner.lifetime.check() {
            debug!("Achievement system shut down during initialization");
            *self.inner.status.lock().unwrap() = AchievementStatus::Uninitialized;
            return Err(e);
        }

        for report in reports {
            if let Err(e) = self.apply_report(report) {
                warn!("Ignoring achievement report: {e}");
            }
        }

        *self.inner.status.lock().unwrap() = AchievementStatus::Ready;
        self.start_update_loop();
        info!(
            achievements = self.inner.definitions.len(),
            "Achievement system initialized"
        );
        Ok(())
    }

    fn apply_report(&self, report: ProgressReport) -> Result<()> {
        match report {
            ProgressReport::Unlocked { id } => {
                let (_, state) = self.lookup(&id)?;
                state.unlock();
            }
            ProgressReport::Invalid { id } => {
                let (_, state) = self.lookup(&id)?;
                state.invalidate();
                self.inner.pending.lock().unwrap().remove(&id);
            }
            ProgressReport::Native {
                id,
                progress,
                upper_bound,
            } => {
                self.set_native_progress(&id, progress, upper_bound)?;
            }
        }
        Ok(())
    }

    /// Report progress towards an achievement.
    ///
    /// The value is clamped to the target. It is dropped if the achievement is
    /// unlocked or invalid, if it is below the current floor, or if it is
    /// below one. Otherwise it is merged into the pending update for the
    /// achievement, keeping the higher value. Returns whether the pending
    /// update changed.
    pub fn update_progress(&self, id: &str, progress: u32) -> Result<bool> {
        self.inner.lifetime.check()?;
        if let AchievementStatus::Failed(reason) = &*self.inner.status.lock().unwrap() {
            return Err(AchievementError::InitializationFailed {
                reason: reason.clone(),
            }
            .into());
        }
        let (definition, state) = self.lookup(id)?;
        let progress = progress.min(definition.target());

        if state.is_closed() || progress < state.next_progress() || progress < 1 {
            trace!(id, progress, "Dropping achievement update");
            return Ok(false);
        }

        let now = self.inner.clock.now_millis();
        let queued = self.inner.pending.lock().unwrap().merge(id, progress, now);
        if queued {
            trace!(id, progress, "Achievement update queued");
            self.inner.wake.notify_one();
        }
        Ok(queued)
    }

    /// Record progress reported on the platform's own scale.
    ///
    /// Maps `progress` in `[0, upper_bound)` onto the achievement's target as
    /// `ceil(progress + 1) * target / upper_bound`, and raises the floor to the
    /// result without taking the resource lock. A lower report never undoes a
    /// higher one. Reaching the target marks the achievement unlocked.
    /// Returns the mapped value.
    pub fn set_native_progress(&self, id: &str, progress: f64, upper_bound: f64) -> Result<u32> {
        self.inner.lifetime.check()?;
        let (definition, state) = self.lookup(id)?;
        if !progress.is_finite() || !upper_bound.is_finite() || upper_bound <= 0.0 {
            return Err(AchievementError::InvalidNativeRange {
                id: id.to_string(),
                progress,
                upper_bound,
            }
            .into());
        }

        let target = definition.target();
        let scaled = (progress + 1.0).ceil() * f64::from(target) / upper_bound;
        let mapped = scaled.floor().clamp(0.0, f64::from(target)) as u32;

        if state.raise_floor(mapped) {
            debug!(id, mapped, "Native achievement progress raised floor");
        }
        if mapped >= target {
            state.unlock();
        }
        Ok(mapped)
    }

    /// Mark an achievement invalid. It will never be updated again.
    pub fn invalidate(&self, id: &str) -> Result<()> {
        let (_, state) = self.lookup(id)?;
        state.invalidate();
        self.inner.pending.lock().unwrap().remove(id);
        Ok(())
    }

    /// Apply up to `max_updates` pending updates now (`None` applies all),
    /// oldest first. Returns how many were taken from the queue.
    pub async fn flush(&self, max_updates: Option<usize>) -> Result<usize> {
        self.inner.lifetime.check()?;
        if *self.inner.status.lock().unwrap() != AchievementStatus::Ready {
            return Err(AchievementError::NotInitialized.into());
        }
        Ok(self.dispatch_batch(max_updates).await)
    }

    /// Take a batch off the queue and send it, under the resource lock.
    async fn dispatch_batch(&self, max_updates: Option<usize>) -> usize {
        let _scope = self.inner.resource.acquire().await;
        let batch = self.inner.pending.lock().unwrap().take_oldest(max_updates);
        let count = batch.len();
        for (id, progress) in batch {
            self.apply_update(&id, progress).await;
        }
        count
    }

    async fn apply_update(&self, id: &str, progress: u32) {
        if self.inner.lifetime.is_disposed() {
            return;
        }
        let Ok((definition, state)) = self.lookup(id) else {
            return;
        };
        // The floor may have moved since the update was queued
        if state.is_closed() || progress < state.next_progress() {
            trace!(id, progress, "Skipping stale achievement update");
            return;
        }

        match self.inner.backend.do_update(definition, progress).await {
            Ok(()) => {
                state.raise_floor(progress);
                if progress >= definition.target() {
                    state.unlock();
                    info!(id, "Achievement unlocked");
                } else {
                    debug!(id, progress, "Achievement progress stored");
                }
            }
            Err(Error::Achievement(err)) if err.is_rejected() => {
                warn!(id, "Achievement rejected by platform: {err}");
                state.invalidate();
            }
            Err(e) => {
                warn!(id, progress, "Achievement update dropped: {e}");
            }
        }
    }

    fn start_update_loop(&self) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(
            run_update_loop(
                Arc::downgrade(&self.inner),
                self.inner.wake.clone(),
                stop_rx,
                self.inner.config.update_interval,
                self.inner.config.batch_size.max(1),
            )
            .instrument(info_span!("achievement_updates")),
        );
        let previous = self.inner.update_loop.lock().unwrap().replace(UpdateLoop {
            stop: stop_tx,
            task,
        });
        if let Some(previous) = previous {
            let _ = previous.stop.send(true);
        }
        if !self.inner.pending.lock().unwrap().is_empty() {
            self.inner.wake.notify_one();
        }
    }

    /// Stop the update loop and wait for its current cycle to finish.
    async fn stop_update_loop(&self) {
        let update_loop = self.inner.update_loop.lock().unwrap().take();
        if let Some(update_loop) = update_loop {
            let _ = update_loop.stop.send(true);
            if let Err(e) = update_loop.task.await {
                warn!("Achievement update loop ended abnormally: {e}");
            }
        }
    }

    /// Invalidate the system and stop its update loop. Idempotent.
    ///
    /// Pending updates are discarded.
    pub async fn shutdown(&self) {
        self.inner.lifetime.dispose();
        if self.inner.admission.is_closed() {
            return;
        }
        self.inner.admission.close();
        self.stop_update_loop().await;
        self.inner.pending.lock().unwrap().clear();
        debug!("Achievement system shut down");
    }

    /// Current progress of one achievement.
    pub fn progress(&self, id: &str) -> Result<AchievementProgress> {
        let (definition, state) = self.lookup(id)?;
        Ok(AchievementProgress {
            id: definition.id().to_string(),
            target: definition.target(),
            next_progress: state.next_progress(),
            unlocked: state.is_unlocked(),
            invalid: state.is_invalid(),
            pending: self.inner.pending.lock().unwrap().get(id),
        })
    }

    /// Progress of every achievement, in definition order.
    pub fn snapshot(&self) -> Vec<AchievementProgress> {
        self.inner
            .definitions
            .iter()
            .filter_map(|definition| self.progress(definition.id()).ok())
            .collect()
    }

    /// Number of achievements with an update waiting to be sent.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }

    pub fn status(&self) -> AchievementStatus {
        self.inner.status.lock().unwrap().clone()
    }

    pub fn definitions(&self) -> &[AchievementDefinition] {
        &self.inner.definitions
    }

    pub fn lifetime(&self) -> &LifetimeToken {
        &self.inner.lifetime
    }

    fn lookup(&self, id: &str) -> Result<(&AchievementDefinition, &ProgressState)> {
        let position = *self
            .inner
            .index
            .get(id)
            .ok_or_else(|| AchievementError::NotFound { id: id.to_string() })?;
        Ok((
            &self.inner.definitions[position],
            &self.inner.progress[position],
        ))
    }
}

async fn run_update_loop(
    system: Weak<SystemInner>,
    wake: Arc<Notify>,
    mut stop: watch::Receiver<bool>,
    interval: Duration,
    batch_size: usize,
) {
    debug!("Starting achievement update loop");
    loop {
        let has_pending = match system.upgrade() {
            Some(inner) if inner.lifetime.is_valid() => !inner.pending.lock().unwrap().is_empty(),
            _ => break,
        };
        if *stop.borrow() {
            break;
        }
        if !has_pending {
            tokio::select! {
                _ = wake.notified() => continue,
                _ = stop.changed() => break,
            }
        }

        let started = Instant::now();
        {
            let Some(inner) = system.upgrade() else {
                break;
            };
            let sent = AchievementSystem { inner }
                .dispatch_batch(Some(batch_size))
                .await;
            trace!(sent, "Achievement batch dispatched");
        }

        let remaining = interval.saturating_sub(started.elapsed());
        tokio::select! {
            _ = tokio::time::sleep(remaining) => {}
            _ = stop.changed() => break,
        }
    }
    debug!("Achievement update loop stopped");
}

#[async_trait]
impl SignOutCleanup for AchievementSystem {
    async fn clean_up_after_sign_out(&self) -> Result<()> {
        self.shutdown().await;
        Ok(())
    }
}

impl fmt::Debug for AchievementSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AchievementSystem")
            .field("status", &self.status())
            .field("achievements", &self.inner.definitions.len())
            .field("pending", &self.pending_count())
            .field("lifetime", &self.inner.lifetime)
            .finish()
    }
}
