//! Daemon controller: owns the registrations and the shard tasks.
//!
//! # Example
//!
//! ```ignore
//! let daemon = ProjectionDaemon::builder(events.clone(), progression.clone())
//!     .with_config(DaemonConfig::default().with_leading_edge_buffer(Duration::from_millis(500)))
//!     .with_default_policy(
//!         ExceptionPolicy::new().rule(
//!             ErrorRule::on_any()
//!                 .retry(3, BackoffStrategy::default())
//!                 .then(TerminalAction::StopShard),
//!         ),
//!     )
//!     .on_fault(|fault| eprintln!("{} stopped: {}", fault.projection, fault.error))
//!     .register(OrderSummary::new())
//!     .build();
//!
//! daemon.start_all().await?;
//! daemon.wait_for_non_stale(Duration::from_secs(5)).await?;
//! daemon.stop_all().await;
//! ```

use crate::dispatch::DispatchTable;
use crate::fetcher::PageFetcher;
use crate::policy::ExceptionPolicy;
use crate::shard::{RunMode, Shard, ShardContext, ShardExit, ShardHandles};
use crate::signal::StopSignal;
use crate::status::{FaultHandler, ShardFault, ShardState, ShardStatus};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use strand_core::{
    DaemonConfig, DeadLetterStore, EventStore, EventTypeFilter, ProgressionStore, Projection,
    Result, Sequence, StrandError,
};
use tokio::task::JoinHandle;

/// Per-registration overrides
#[derive(Debug, Clone, Default)]
pub struct ProjectionOptions {
    /// Overrides the projection's own hint and the daemon default
    pub page_size: Option<usize>,
    /// Consulted before the daemon's default policy
    pub policy: Option<ExceptionPolicy>,
}

impl ProjectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_policy(mut self, policy: ExceptionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

struct Registration {
    projection: Arc<dyn Projection>,
    name: String,
    consumes: EventTypeFilter,
    options: ProjectionOptions,
}

impl Registration {
    fn new(projection: Arc<dyn Projection>, options: ProjectionOptions) -> Self {
        Self {
            name: projection.name().to_string(),
            consumes: projection.consumes(),
            projection,
            options,
        }
    }
}

struct ShardHandle {
    stop: Arc<StopSignal>,
    task: JoinHandle<ShardExit>,
}

struct DaemonInner {
    registrations: Vec<Registration>,
    shards: HashMap<String, ShardHandle>,
    daemon_stop: Arc<StopSignal>,
    running: bool,
}

impl DaemonInner {
    fn accepts_new_shards(&self) -> bool {
        self.running && !self.daemon_stop.is_triggered()
    }
}

/// Builder for [`ProjectionDaemon`]
pub struct ProjectionDaemonBuilder {
    event_store: Arc<dyn EventStore>,
    progression: Arc<dyn ProgressionStore>,
    dead_letters: Option<Arc<dyn DeadLetterStore>>,
    config: DaemonConfig,
    default_policy: ExceptionPolicy,
    on_fault: Option<FaultHandler>,
    registrations: Vec<(Arc<dyn Projection>, ProjectionOptions)>,
}

impl ProjectionDaemonBuilder {
    pub fn with_config(mut self, config: DaemonConfig) -> Self {
        self.config = config;
        self
    }

    /// Policy applied to every projection after its own rules
    pub fn with_default_policy(mut self, policy: ExceptionPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Record pages skipped under `SkipEvent`
    pub fn with_dead_letters(mut self, store: Arc<dyn DeadLetterStore>) -> Self {
        self.dead_letters = Some(store);
        self
    }

    /// Called for every terminal action and setup failure
    pub fn on_fault<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ShardFault) + Send + Sync + 'static,
    {
        self.on_fault = Some(Arc::new(handler));
        self
    }

    pub fn register(self, projection: impl Projection + 'static) -> Self {
        self.register_with(projection, ProjectionOptions::default())
    }

    pub fn register_with(
        self,
        projection: impl Projection + 'static,
        options: ProjectionOptions,
    ) -> Self {
        self.register_arc(Arc::new(projection), options)
    }

    pub fn register_arc(
        mut self,
        projection: Arc<dyn Projection>,
        options: ProjectionOptions,
    ) -> Self {
        self.registrations.push((projection, options));
        self
    }

    pub fn build(self) -> ProjectionDaemon {
        let fetcher = Arc::new(PageFetcher::new(
            self.event_store.clone(),
            self.config.leading_edge_buffer(),
        ));
        let ctx = Arc::new(ShardContext {
            fetcher,
            progression: self.progression,
            dead_letters: self.dead_letters,
            config: self.config,
            on_fault: self.on_fault,
        });

        let registrations: Vec<Registration> = self
            .registrations
            .into_iter()
            .map(|(projection, options)| Registration::new(projection, options))
            .collect();

        let statuses = registrations
            .iter()
            .map(|r| (r.name.clone(), Arc::new(RwLock::new(ShardStatus::new(&r.name)))))
            .collect();
        let dispatch = DispatchTable::build(
            registrations
                .iter()
                .map(|r| (r.name.as_str(), &r.consumes)),
        );

        ProjectionDaemon {
            event_store: self.event_store,
            ctx,
            default_policy: self.default_policy,
            inner: tokio::sync::Mutex::new(DaemonInner {
                registrations,
                shards: HashMap::new(),
                daemon_stop: Arc::new(StopSignal::new()),
                running: false,
            }),
            statuses: RwLock::new(statuses),
            dispatch: RwLock::new(dispatch),
        }
    }
}

/// Runs one shard per registered projection
///
/// Control operations (`start_all`, `stop_all`, `rebuild`, ...) are
/// serialized; status queries never block on them.
pub struct ProjectionDaemon {
    event_store: Arc<dyn EventStore>,
    ctx: Arc<ShardContext>,
    default_policy: ExceptionPolicy,
    inner: tokio::sync::Mutex<DaemonInner>,
    statuses: RwLock<BTreeMap<String, Arc<RwLock<ShardStatus>>>>,
    dispatch: RwLock<DispatchTable>,
}

impl ProjectionDaemon {
    pub fn builder(
        event_store: Arc<dyn EventStore>,
        progression: Arc<dyn ProgressionStore>,
    ) -> ProjectionDaemonBuilder {
        ProjectionDaemonBuilder {
            event_store,
            progression,
            dead_letters: None,
            config: DaemonConfig::default(),
            default_policy: ExceptionPolicy::default(),
            on_fault: None,
            registrations: Vec::new(),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.ctx.config
    }

    /// Register a projection; starts its shard at once if the daemon is running
    pub async fn register_projection(
        &self,
        projection: Arc<dyn Projection>,
        options: ProjectionOptions,
    ) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let registration = Registration::new(projection, options);
        self.validate_registration(&registration)?;
        if inner
            .registrations
            .iter()
            .any(|r| r.name == registration.name)
        {
            return Err(StrandError::Config(format!(
                "projection '{}' is already registered",
                registration.name
            )));
        }

        self.status_slot(&registration.name);
        tracing::info!(projection = %registration.name, "Registered projection");

        if inner.accepts_new_shards() {
            let handle = self.spawn_shard(
                &registration,
                RunMode::Continuous,
                inner.daemon_stop.clone(),
            );
            inner.shards.insert(registration.name.clone(), handle);
        }
        inner.registrations.push(registration);
        self.rebuild_dispatch(&inner.registrations);
        Ok(())
    }

    /// Validate every registration and start one shard per projection
    ///
    /// Fails without starting anything on a configuration error, or if
    /// shards from a previous start are still running.
    pub async fn start_all(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        self.validate_all(&inner.registrations)?;
        if inner.shards.values().any(|h| !h.task.is_finished()) {
            return Err(StrandError::InvalidState(
                "daemon is already running; call stop_all first".into(),
            ));
        }

        let finished: Vec<_> = inner.shards.drain().collect();
        for (name, handle) in finished {
            self.join_shard(&name, handle).await;
        }

        inner.daemon_stop = Arc::new(StopSignal::new());
        self.rebuild_dispatch(&inner.registrations);

        for registration in &inner.registrations {
            let handle = self.spawn_shard(
                registration,
                RunMode::Continuous,
                inner.daemon_stop.clone(),
            );
            inner.shards.insert(registration.name.clone(), handle);
        }
        inner.running = true;

        tracing::info!(shards = inner.shards.len(), "Projection daemon started");
        Ok(())
    }

    /// Signal every shard to stop and wait for them to exit
    ///
    /// In-flight applies run to completion, but their pages are not
    /// checkpointed; each shard resumes from its last committed sequence.
    pub async fn stop_all(&self) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        inner.daemon_stop.trigger();
        let handles: Vec<_> = inner.shards.drain().collect();
        for (name, handle) in handles {
            self.join_shard(&name, handle).await;
        }
        inner.running = false;

        tracing::info!("Projection daemon stopped");
    }

    /// Stop one shard and wait for it to exit
    pub async fn stop_shard(&self, name: &str) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        if !inner.registrations.iter().any(|r| r.name == name) {
            return Err(StrandError::NotFound(format!("projection '{}'", name)));
        }
        if let Some(handle) = inner.shards.remove(name) {
            handle.stop.trigger();
            self.join_shard(name, handle).await;
        }

        tracing::info!(projection = name, "Shard stopped on request");
        Ok(())
    }

    /// Restart a stopped shard from its checkpoint
    pub async fn start_shard(&self, name: &str) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        if !inner.running {
            return Err(StrandError::InvalidState(
                "daemon is not running; call start_all".into(),
            ));
        }
        if inner.daemon_stop.is_triggered() {
            return Err(StrandError::InvalidState(
                "daemon was stopped by a fault; restart it with stop_all and start_all".into(),
            ));
        }

        let registration = inner
            .registrations
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| StrandError::NotFound(format!("projection '{}'", name)))?;

        if let Some(existing) = inner.shards.remove(name) {
            if !existing.task.is_finished() {
                inner.shards.insert(name.to_string(), existing);
                return Err(StrandError::InvalidState(format!(
                    "shard '{}' is already running",
                    name
                )));
            }
            self.join_shard(name, existing).await;
        }

        let handle = self.spawn_shard(registration, RunMode::Continuous, inner.daemon_stop.clone());
        inner.shards.insert(name.to_string(), handle);
        Ok(())
    }

    /// Rebuild a projection from the start of the log
    ///
    /// Stops its shard, tears down its storage, resets the checkpoint, then
    /// replays every event up to the log head observed when the rebuild
    /// began. A failing teardown leaves the checkpoint untouched. If the
    /// daemon is running the shard resumes normal processing afterwards,
    /// whether or not the rebuild succeeded. Returns the checkpoint reached.
    pub async fn rebuild(&self, name: &str) -> Result<Sequence> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let registration = inner
            .registrations
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| StrandError::NotFound(format!("projection '{}'", name)))?;

        if let Some(handle) = inner.shards.remove(name) {
            handle.stop.trigger();
            self.join_shard(name, handle).await;
        }

        tracing::info!(projection = name, "Rebuilding projection");
        let daemon_stop = if inner.accepts_new_shards() {
            inner.daemon_stop.clone()
        } else {
            Arc::new(StopSignal::new())
        };
        let outcome = self.replay(registration, daemon_stop).await;

        // The shard follows the log again even when the rebuild failed
        if inner.accepts_new_shards() {
            let handle = self.spawn_shard(registration, RunMode::Continuous, inner.daemon_stop.clone());
            inner.shards.insert(name.to_string(), handle);
        }

        match &outcome {
            Ok(checkpoint) => {
                tracing::info!(projection = name, checkpoint, "Rebuild complete")
            }
            Err(err) => tracing::error!(projection = name, error = %err, "Rebuild failed"),
        }
        outcome
    }

    /// Tear down, reset and replay a stopped projection up to the current log head
    async fn replay(
        &self,
        registration: &Registration,
        daemon_stop: Arc<StopSignal>,
    ) -> Result<Sequence> {
        let name = registration.name.as_str();
        registration.projection.teardown().await?;
        self.ctx.progression.reset_checkpoint(name).await?;
        *self.status_slot(name).write() = ShardStatus::new(name);

        let target = self.event_store.current_max_sequence().await?;
        let handle = self.spawn_shard(registration, RunMode::CatchUp { target }, daemon_stop);
        match self.join_shard(name, handle).await {
            Some(ShardExit::CaughtUp) => {}
            exit => {
                return Err(StrandError::InvalidState(format!(
                    "rebuild of '{}' ended before reaching sequence {} ({:?})",
                    name, target, exit
                )));
            }
        }

        self.ctx.progression.get_checkpoint(name).await
    }

    /// Snapshot of every shard, ordered by projection name
    pub fn status(&self) -> Vec<ShardStatus> {
        self.statuses
            .read()
            .values()
            .map(|status| status.read().clone())
            .collect()
    }

    pub fn shard_status(&self, name: &str) -> Option<ShardStatus> {
        self.statuses
            .read()
            .get(name)
            .map(|status| status.read().clone())
    }

    /// Events between the log head and what a projection has processed
    pub async fn lag(&self, name: &str) -> Result<u64> {
        let status = self
            .shard_status(name)
            .ok_or_else(|| StrandError::NotFound(format!("projection '{}'", name)))?;
        let current_max = self.event_store.current_max_sequence().await?;
        Ok(status.lag(current_max))
    }

    /// Wait until every shard has processed the log head as of this call
    ///
    /// Fails with `Timeout` when the deadline passes and with
    /// `InvalidState` as soon as a shard that is behind has stopped.
    pub async fn wait_for_non_stale(&self, timeout: Duration) -> Result<()> {
        let target = self.event_store.current_max_sequence().await?;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let behind: Vec<ShardStatus> = self
                .status()
                .into_iter()
                .filter(|s| s.processed_through < target)
                .collect();

            if behind.is_empty() {
                return Ok(());
            }

            if let Some(stopped) = behind.iter().find(|s| !s.is_running()) {
                return Err(StrandError::InvalidState(format!(
                    "projection '{}' is {} at sequence {} and cannot reach {}",
                    stopped.projection, stopped.state, stopped.processed_through, target
                )));
            }

            if tokio::time::Instant::now() >= deadline {
                let names: Vec<String> = behind
                    .iter()
                    .map(|s| format!("{}@{}", s.projection, s.processed_through))
                    .collect();
                return Err(StrandError::Timeout(format!(
                    "projections behind sequence {}: {}",
                    target,
                    names.join(", ")
                )));
            }

            tokio::time::sleep(self.ctx.config.status_poll_interval()).await;
        }
    }

    /// Names of the projections that consume `event_type`
    pub fn projections_for(&self, event_type: &str) -> Vec<String> {
        self.dispatch.read().projections_for(event_type)
    }

    fn page_size(&self, registration: &Registration) -> usize {
        registration
            .options
            .page_size
            .or_else(|| registration.projection.page_size_hint())
            .unwrap_or(self.ctx.config.default_page_size)
    }

    fn validate_registration(&self, registration: &Registration) -> Result<()> {
        if registration.name.is_empty() {
            return Err(StrandError::Config("projection name must not be empty".into()));
        }
        if self.page_size(registration) == 0 {
            return Err(StrandError::Config(format!(
                "projection '{}' has page size 0",
                registration.name
            )));
        }
        if registration.consumes.is_empty() {
            return Err(StrandError::Config(format!(
                "projection '{}' consumes no event types",
                registration.name
            )));
        }
        Ok(())
    }

    fn validate_all(&self, registrations: &[Registration]) -> Result<()> {
        if registrations.is_empty() {
            return Err(StrandError::Config("no projections registered".into()));
        }
        self.ctx.fetcher.cutoff(Utc::now())?;

        let mut seen = HashSet::new();
        for registration in registrations {
            self.validate_registration(registration)?;
            if !seen.insert(registration.name.as_str()) {
                return Err(StrandError::Config(format!(
                    "projection '{}' is registered more than once",
                    registration.name
                )));
            }
        }
        Ok(())
    }

    fn status_slot(&self, name: &str) -> Arc<RwLock<ShardStatus>> {
        self.statuses
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(ShardStatus::new(name))))
            .clone()
    }

    fn rebuild_dispatch(&self, registrations: &[Registration]) {
        *self.dispatch.write() =
            DispatchTable::build(registrations.iter().map(|r| (r.name.as_str(), &r.consumes)));
    }

    fn spawn_shard(
        &self,
        registration: &Registration,
        mode: RunMode,
        daemon_stop: Arc<StopSignal>,
    ) -> ShardHandle {
        let policy = match &registration.options.policy {
            Some(policy) => policy.followed_by(&self.default_policy),
            None => self.default_policy.clone(),
        };
        let stop = Arc::new(StopSignal::new());
        let shard = Shard::new(
            registration.projection.clone(),
            self.page_size(registration),
            policy,
            mode,
            self.ctx.clone(),
            ShardHandles {
                stop: stop.clone(),
                daemon_stop,
                status: self.status_slot(&registration.name),
            },
        );

        ShardHandle {
            stop,
            task: tokio::spawn(shard.run()),
        }
    }

    /// Await a shard task; a panic marks the shard faulted
    async fn join_shard(&self, name: &str, handle: ShardHandle) -> Option<ShardExit> {
        match handle.task.await {
            Ok(exit) => Some(exit),
            Err(err) => {
                tracing::error!(projection = name, error = %err, "Shard task panicked");
                let status = self.status_slot(name);
                let mut status = status.write();
                status.state = ShardState::Faulted;
                status.current_page = None;
                status.last_error = Some(err.to_string());
                None
            }
        }
    }
}
