//! Per-projection processing loop.
//!
//! A shard owns one projection's checkpoint and runs
//! fetch → apply → commit until stopped. Store failures are retried with
//! the daemon's fetch backoff; projection failures go through the exception
//! policy. A stop request is honored between steps and never interrupts an
//! in-flight `apply`; the page that apply was working on is left
//! uncheckpointed and re-delivered on the next start.

use crate::fetcher::PageFetcher;
use crate::policy::{ExceptionPolicy, PolicyAction, TerminalAction};
use crate::signal::StopSignal;
use crate::status::{FaultHandler, PageBounds, ShardFault, ShardState, ShardStatus};
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strand_core::{
    observe, DaemonConfig, DeadLetterRecord, DeadLetterStore, EventPage, EventTypeFilter,
    ProgressionStore, Projection, Sequence, StrandError,
};

/// Collaborators shared by every shard of a daemon
pub(crate) struct ShardContext {
    pub fetcher: Arc<PageFetcher>,
    pub progression: Arc<dyn ProgressionStore>,
    pub dead_letters: Option<Arc<dyn DeadLetterStore>>,
    pub config: DaemonConfig,
    pub on_fault: Option<FaultHandler>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunMode {
    /// Follow the log until stopped
    Continuous,
    /// Exit once everything up to `target` has been processed
    CatchUp { target: Sequence },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShardExit {
    Stopped,
    CaughtUp,
    Terminal(TerminalAction),
    Faulted,
}

/// Signals and status slot a shard reports through
pub(crate) struct ShardHandles {
    pub stop: Arc<StopSignal>,
    pub daemon_stop: Arc<StopSignal>,
    pub status: Arc<RwLock<ShardStatus>>,
}

enum PageOutcome {
    Committed,
    Skipped,
    /// Stop requested before the page's checkpoint was written
    Abandoned,
    Terminal(TerminalAction),
}

pub(crate) struct Shard {
    projection: Arc<dyn Projection>,
    name: String,
    consumes: EventTypeFilter,
    page_size: usize,
    policy: ExceptionPolicy,
    mode: RunMode,
    ctx: Arc<ShardContext>,
    stop: Arc<StopSignal>,
    daemon_stop: Arc<StopSignal>,
    status: Arc<RwLock<ShardStatus>>,
    checkpoint: Sequence,
}

impl Shard {
    pub(crate) fn new(
        projection: Arc<dyn Projection>,
        page_size: usize,
        policy: ExceptionPolicy,
        mode: RunMode,
        ctx: Arc<ShardContext>,
        handles: ShardHandles,
    ) -> Self {
        Self {
            name: projection.name().to_string(),
            consumes: projection.consumes(),
            projection,
            page_size,
            policy,
            mode,
            ctx,
            stop: handles.stop,
            daemon_stop: handles.daemon_stop,
            status: handles.status,
            checkpoint: 0,
        }
    }

    pub(crate) async fn run(mut self) -> ShardExit {
        tracing::info!(
            projection = %self.name,
            mode = ?self.mode,
            page_size = self.page_size,
            "Shard starting"
        );
        self.update(|s| {
            s.state = ShardState::Idle;
            s.current_page = None;
            s.attempt_count = 0;
        });

        if let Err(err) = self.projection.ensure_storage_exists().await {
            return self.fault_setup(format!("ensure_storage_exists failed: {}", err));
        }

        let mut failures = 0u32;
        self.checkpoint = loop {
            match self.ctx.progression.get_checkpoint(&self.name).await {
                Ok(sequence) => break sequence,
                Err(err) => {
                    if !self
                        .wait_after_store_error("get_checkpoint", &mut failures, &err)
                        .await
                    {
                        return self.finish(ShardExit::Stopped);
                    }
                }
            }
        };

        let checkpoint = self.checkpoint;
        self.update(|s| {
            s.last_sequence = checkpoint;
            s.processed_through = s.processed_through.max(checkpoint);
            s.last_error = None;
        });
        tracing::debug!(projection = %self.name, checkpoint, "Loaded checkpoint");

        let mut fetch_failures = 0u32;
        loop {
            if self.stop_requested() {
                return self.finish(ShardExit::Stopped);
            }

            self.update(|s| s.state = ShardState::Fetching);
            let page = match self
                .ctx
                .fetcher
                .fetch_next_page(&self.consumes, self.checkpoint, self.page_size)
                .await
            {
                Ok(page) => {
                    fetch_failures = 0;
                    page
                }
                Err(err) => {
                    if !self
                        .wait_after_store_error("fetch_events", &mut fetch_failures, &err)
                        .await
                    {
                        return self.finish(ShardExit::Stopped);
                    }
                    continue;
                }
            };

            if page.is_empty() {
                let through = page.processed_through();
                self.update(|s| {
                    s.processed_through = s.processed_through.max(through);
                    s.last_error = None;
                });

                if let RunMode::CatchUp { target } = self.mode {
                    if page.high_water_mark >= target {
                        return self.finish(ShardExit::CaughtUp);
                    }
                }

                self.update(|s| s.state = ShardState::Cooldown);
                if !self.sleep_or_stop(self.ctx.config.fetching_cooldown()).await {
                    return self.finish(ShardExit::Stopped);
                }
                continue;
            }

            if self.stop_requested() {
                tracing::debug!(
                    projection = %self.name,
                    floor = page.floor,
                    ceiling = page.ceiling,
                    "Discarding fetched page after stop request"
                );
                return self.finish(ShardExit::Stopped);
            }

            match self.apply_page(&page).await {
                PageOutcome::Committed | PageOutcome::Skipped => {}
                PageOutcome::Abandoned => return self.finish(ShardExit::Stopped),
                PageOutcome::Terminal(action) => return self.finish(ShardExit::Terminal(action)),
            }

            if let RunMode::CatchUp { target } = self.mode {
                if self.checkpoint >= target {
                    return self.finish(ShardExit::CaughtUp);
                }
            }
        }
    }

    async fn apply_page(&mut self, page: &EventPage) -> PageOutcome {
        let bounds = PageBounds::from(page);
        let mut attempts = 0u32;

        loop {
            self.update(|s| {
                s.state = ShardState::Applying;
                s.current_page = Some(bounds);
                s.attempt_count = attempts;
            });

            let started = Instant::now();
            let err = match self.projection.apply(page).await {
                Ok(()) => {
                    let elapsed = started.elapsed();
                    observe::record_page_applied(&self.name, page.len(), elapsed);
                    tracing::debug!(
                        projection = %self.name,
                        floor = page.floor,
                        ceiling = page.ceiling,
                        events = page.len(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Applied page"
                    );

                    if self.stop_requested() {
                        self.abandon(page, "Stop requested during apply; page will be re-delivered");
                        return PageOutcome::Abandoned;
                    }
                    if !self.commit(page.ceiling).await {
                        return PageOutcome::Abandoned;
                    }
                    let applied = page.len() as u64;
                    self.update(|s| {
                        s.pages_applied += 1;
                        s.events_applied += applied;
                        s.attempt_count = 0;
                        s.current_page = None;
                        s.last_error = None;
                    });
                    return PageOutcome::Committed;
                }
                Err(err) => err,
            };

            attempts += 1;
            let message = format!("{:#}", err);
            let action = self.policy.resolve(&err, attempts, page);
            self.update(|s| {
                s.attempt_count = attempts;
                s.last_error = Some(message.clone());
            });

            match action {
                PolicyAction::Retry(delay) => {
                    observe::record_retry(&self.name);
                    tracing::warn!(
                        projection = %self.name,
                        floor = page.floor,
                        ceiling = page.ceiling,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Apply failed; retrying page"
                    );
                    self.update(|s| s.state = ShardState::Backoff);
                    if !self.sleep_or_stop(delay).await {
                        return PageOutcome::Abandoned;
                    }
                }
                PolicyAction::SkipEvent => {
                    if self.stop_requested() {
                        self.abandon(page, "Stop requested during apply; skip deferred to next start");
                        return PageOutcome::Abandoned;
                    }
                    self.report(TerminalAction::SkipEvent, &message, attempts, page);
                    observe::record_skipped_page(&self.name);
                    self.dead_letter(page, &message, attempts).await;

                    if !self.commit(page.ceiling).await {
                        return PageOutcome::Abandoned;
                    }
                    self.update(|s| {
                        s.attempt_count = 0;
                        s.current_page = None;
                    });
                    return PageOutcome::Skipped;
                }
                PolicyAction::StopShard => {
                    self.report(TerminalAction::StopShard, &message, attempts, page);
                    return PageOutcome::Terminal(TerminalAction::StopShard);
                }
                PolicyAction::StopAll => {
                    self.report(TerminalAction::StopAll, &message, attempts, page);
                    self.daemon_stop.trigger();
                    return PageOutcome::Terminal(TerminalAction::StopAll);
                }
            }
        }
    }

    /// Persist `sequence` as the checkpoint, retrying store failures.
    ///
    /// Returns false when a stop arrives before the write succeeds; the page
    /// is then re-delivered on the next start.
    async fn commit(&mut self, sequence: Sequence) -> bool {
        let mut failures = 0u32;
        loop {
            match self.ctx.progression.set_checkpoint(&self.name, sequence).await {
                Ok(()) => break,
                Err(err) => {
                    if !self
                        .wait_after_store_error("set_checkpoint", &mut failures, &err)
                        .await
                    {
                        tracing::warn!(
                            projection = %self.name,
                            sequence,
                            "Stopped before checkpoint was written; page will be re-delivered"
                        );
                        return false;
                    }
                }
            }
        }

        self.checkpoint = sequence;
        self.update(|s| {
            s.last_sequence = sequence;
            s.processed_through = s.processed_through.max(sequence);
        });
        true
    }

    fn abandon(&self, page: &EventPage, message: &'static str) {
        tracing::info!(
            projection = %self.name,
            floor = page.floor,
            ceiling = page.ceiling,
            checkpoint = self.checkpoint,
            "{}",
            message
        );
        self.update(|s| s.current_page = None);
    }

    async fn dead_letter(&self, page: &EventPage, message: &str, attempts: u32) {
        let Some(store) = &self.ctx.dead_letters else {
            return;
        };

        let record = DeadLetterRecord {
            projection: self.name.clone(),
            floor: page.floor,
            ceiling: page.ceiling,
            sequences: page.sequences(),
            error_message: message.to_string(),
            attempts,
            failed_at: Utc::now(),
        };

        match store.record(&record).await {
            Ok(id) => tracing::info!(
                projection = %self.name,
                dead_letter_id = id,
                ceiling = page.ceiling,
                "Recorded skipped page"
            ),
            Err(err) => tracing::error!(
                projection = %self.name,
                ceiling = page.ceiling,
                error = %err,
                "Failed to record skipped page"
            ),
        }
    }

    fn report(&self, action: TerminalAction, message: &str, attempts: u32, page: &EventPage) {
        if action != TerminalAction::SkipEvent {
            observe::record_shard_stop(&self.name, action.as_str());
        }
        tracing::error!(
            projection = %self.name,
            action = %action,
            attempts,
            floor = page.floor,
            ceiling = page.ceiling,
            error = %message,
            "Projection failed; applying terminal action"
        );

        self.emit(ShardFault {
            projection: self.name.clone(),
            action,
            error: message.to_string(),
            attempts,
            floor: page.floor,
            ceiling: page.ceiling,
            occurred_at: Utc::now(),
        });
    }

    fn fault_setup(&self, message: String) -> ShardExit {
        tracing::error!(projection = %self.name, error = %message, "Shard setup failed");
        observe::record_shard_stop(&self.name, "faulted");
        self.update(|s| s.last_error = Some(message.clone()));
        self.emit(ShardFault {
            projection: self.name.clone(),
            action: TerminalAction::StopShard,
            error: message,
            attempts: 1,
            floor: self.checkpoint,
            ceiling: self.checkpoint,
            occurred_at: Utc::now(),
        });
        self.finish(ShardExit::Faulted)
    }

    fn emit(&self, fault: ShardFault) {
        if let Some(handler) = &self.ctx.on_fault {
            handler(&fault);
        }
    }

    /// Log a store failure and wait out the fetch backoff.
    ///
    /// Returns false if a stop was requested instead.
    async fn wait_after_store_error(
        &self,
        operation: &'static str,
        failures: &mut u32,
        err: &StrandError,
    ) -> bool {
        observe::record_store_error(operation);
        let delay = self.ctx.config.fetch_backoff.calculate(*failures);
        *failures = failures.saturating_add(1);

        tracing::warn!(
            projection = %self.name,
            operation,
            failures = *failures,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Store call failed; retrying"
        );
        let message = err.to_string();
        self.update(|s| {
            s.state = ShardState::Backoff;
            s.last_error = Some(message);
        });

        self.sleep_or_stop(delay).await
    }

    fn stop_requested(&self) -> bool {
        self.stop.is_triggered() || self.daemon_stop.is_triggered()
    }

    /// Sleep for `delay` unless a stop arrives first; true if the full delay elapsed
    async fn sleep_or_stop(&self, delay: Duration) -> bool {
        if self.stop_requested() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => !self.stop_requested(),
            _ = self.stop.triggered() => false,
            _ = self.daemon_stop.triggered() => false,
        }
    }

    fn finish(&self, exit: ShardExit) -> ShardExit {
        let state = match exit {
            ShardExit::Faulted => ShardState::Faulted,
            _ => ShardState::Stopped,
        };
        self.update(|s| {
            s.state = state;
            s.current_page = None;
        });
        tracing::info!(
            projection = %self.name,
            checkpoint = self.checkpoint,
            exit = ?exit,
            "Shard stopped"
        );
        exit
    }

    fn update(&self, f: impl FnOnce(&mut ShardStatus)) {
        let mut status = self.status.write();
        f(&mut status);
        status.updated_at = Utc::now();
    }
}
