//! Task Manager - owns task lifecycle, the worker pool and the kill switch

use crate::executor::{RouterExecutor, SubtaskExecutor};
use crate::state::{TaskAction, TaskStatus};
use crate::store::{JsonTaskStore, TaskStore};
use crate::task::{Subtask, Task, TaskId};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_foundation::{
    AuditRecord, Error, KillSwitch, Result, TaskConfig, ThreatLevel, WardenConfig,
};
use warden_tool::ToolRouter;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for task manager
#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    /// Maximum concurrently executing tasks
    pub worker_concurrency: usize,

    /// A RUNNING task with no update for this long is failed
    pub watchdog_interval: Duration,

    /// Upper bound for `kill_switch()` to wait on in-flight calls
    pub kill_switch_budget: Duration,

    pub max_log_entries: usize,

    /// Pause instead of fail on recoverable errors
    pub pause_on_recoverable: bool,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self::from(&TaskConfig::default())
    }
}

impl From<&TaskConfig> for TaskManagerConfig {
    fn from(config: &TaskConfig) -> Self {
        Self {
            worker_concurrency: config.worker_concurrency.max(1),
            watchdog_interval: config.watchdog_interval(),
            kill_switch_budget: config.kill_switch_budget(),
            max_log_entries: config.max_log_entries,
            pause_on_recoverable: config.pause_on_recoverable,
        }
    }
}

/// Lifecycle notifications for external monitors
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Created(Task),
    Transition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    Progress {
        id: TaskId,
        progress: u8,
        note: Option<String>,
    },
    KillSwitch {
        engaged: bool,
        cancelled: usize,
    },
    Purged(TaskId),
}

/// Filter for `list_tasks`
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub statuses: Option<Vec<TaskStatus>>,
    pub description_contains: Option<String>,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.statuses.get_or_insert_with(Vec::new).push(status);
        self
    }

    pub fn active() -> Self {
        Self {
            statuses: Some(vec![TaskStatus::Queued, TaskStatus::Running, TaskStatus::Paused]),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.description_contains = Some(text.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, task: &Task) -> bool {
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&task.status) {
                return false;
            }
        }
        if let Some(text) = &self.description_contains {
            if !task.description.to_lowercase().contains(&text.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// Snapshot counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub active_workers: usize,
    pub kill_switch_engaged: bool,
    /// Records whose last write failed and are waiting for a retry
    pub pending_writes: usize,
}

struct TaskSlot {
    task: Task,
    cancel: CancellationToken,
    /// Claim number of the worker that owns this task
    claim: Option<u64>,
    resumed: Arc<Notify>,
}

impl TaskSlot {
    fn new(task: Task, kill_switch: &KillSwitch) -> Self {
        Self {
            task,
            cancel: kill_switch.child_token(),
            claim: None,
            resumed: Arc::new(Notify::new()),
        }
    }
}

struct Inner {
    config: TaskManagerConfig,
    tasks: RwLock<HashMap<TaskId, TaskSlot>>,
    store: Arc<dyn TaskStore>,
    /// Ids whose latest snapshot has not been written yet
    dirty: Mutex<BTreeSet<TaskId>>,
    executor: Arc<dyn SubtaskExecutor>,
    kill_switch: Arc<KillSwitch>,
    router: Option<Arc<ToolRouter>>,
    queue_tx: mpsc::UnboundedSender<TaskId>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<TaskId>>>,
    semaphore: Arc<Semaphore>,
    active_workers: AtomicUsize,
    next_claim: AtomicU64,
    events: broadcast::Sender<TaskEvent>,
    shutdown: CancellationToken,
}

/// Task Manager - handles task lifecycle and execution
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    /// Create a task manager with its own kill switch
    pub fn new(
        config: TaskManagerConfig,
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn SubtaskExecutor>,
    ) -> Self {
        Self::build(config, store, executor, Arc::new(KillSwitch::new()), None)
    }

    /// Create a task manager whose subtasks go through `router`
    ///
    /// The router's kill switch, permission manager and audit log are shared.
    pub fn with_router(
        config: TaskManagerConfig,
        store: Arc<dyn TaskStore>,
        router: Arc<ToolRouter>,
    ) -> Self {
        let executor = Arc::new(RouterExecutor::new(router.clone()));
        let kill_switch = router.kill_switch().clone();
        Self::build(config, store, executor, kill_switch, Some(router))
    }

    /// Task records under `<data_dir>/tasks`
    pub fn from_config(config: &WardenConfig, router: Arc<ToolRouter>) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(JsonTaskStore::new(config.data_dir.clone()));
        Ok(Self::with_router(
            TaskManagerConfig::from(&config.tasks),
            store,
            router,
        ))
    }

    fn build(
        config: TaskManagerConfig,
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn SubtaskExecutor>,
        kill_switch: Arc<KillSwitch>,
        router: Option<Arc<ToolRouter>>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let semaphore = Arc::new(Semaphore::new(config.worker_concurrency.max(1)));

        Self {
            inner: Arc::new(Inner {
                config,
                tasks: RwLock::new(HashMap::new()),
                store,
                dirty: Mutex::new(BTreeSet::new()),
                executor,
                kill_switch,
                router,
                queue_tx,
                queue_rx: Mutex::new(Some(queue_rx)),
                semaphore,
                active_workers: AtomicUsize::new(0),
                next_claim: AtomicU64::new(1),
                events,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.inner.config
    }

    pub fn kill_switch_handle(&self) -> &Arc<KillSwitch> {
        &self.inner.kill_switch
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Allocate a new QUEUED task without subtasks
    ///
    /// Fails only while the kill switch is engaged.
    pub fn create_task(&self, description: impl Into<String>) -> Result<Task> {
        self.insert(Task::new(description, Vec::new()))
    }

    /// Create a task from planner output and queue it for the worker pool
    pub fn submit(&self, description: impl Into<String>, subtasks: Vec<Subtask>) -> Result<Task> {
        let task = self.insert(Task::new(description, subtasks))?;
        self.enqueue(task.id);
        Ok(task)
    }

    fn insert(&self, task: Task) -> Result<Task> {
        let id = task.id;
        {
            // Checked under the table lock so `kill_switch()` cannot miss the new slot
            let mut tasks = self.inner.tasks.write();
            self.inner.kill_switch.check()?;
            tasks.insert(id, TaskSlot::new(task.clone(), &self.inner.kill_switch));
        }
        info!(task_id = %id, description = %task.description, "Task created");
        self.persist(id);
        let _ = self.inner.events.send(TaskEvent::Created(task.clone()));
        Ok(task)
    }

    fn enqueue(&self, id: TaskId) {
        if self.inner.queue_tx.send(id).is_err() {
            warn!(task_id = %id, "Task queue closed");
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// QUEUED → RUNNING
    pub fn start_task(&self, id: TaskId) -> Result<Task> {
        self.transition(id, TaskAction::Start, |_| {})
    }

    /// RUNNING → PAUSED. A worker stops before its next subtask.
    pub fn pause_task(&self, id: TaskId) -> Result<Task> {
        self.transition(id, TaskAction::Pause, |_| {})
    }

    /// PAUSED → RUNNING
    pub fn resume_task(&self, id: TaskId) -> Result<Task> {
        let task = self.transition(id, TaskAction::Resume, |_| {})?;

        let requeue = {
            let tasks = self.inner.tasks.read();
            match tasks.get(&id) {
                Some(slot) if slot.claim.is_some() => {
                    slot.resumed.notify_one();
                    false
                }
                Some(slot) => slot.task.remaining_subtasks() > 0,
                None => false,
            }
        };
        if requeue {
            self.enqueue(id);
        }
        Ok(task)
    }

    /// RUNNING → COMPLETED. No-op returning the record when already terminal.
    pub fn complete_task(&self, id: TaskId, output: impl Into<String>) -> Result<Task> {
        let output = output.into();
        self.transition(id, TaskAction::Complete, move |task| {
            task.progress = 100;
            task.output = Some(output);
        })
    }

    /// RUNNING/PAUSED → FAILED. No-op returning the record when already terminal.
    pub fn fail_task(&self, id: TaskId, error: impl Into<String>) -> Result<Task> {
        let error = error.into();
        self.transition(id, TaskAction::Fail, move |task| {
            task.error = Some(error);
        })
    }

    /// Any active state → CANCELLED
    ///
    /// Wakes a permission wait or path lock held by the task's current call.
    /// Cancelling a cancelled task returns it unchanged.
    pub fn cancel_task(&self, id: TaskId) -> Result<Task> {
        self.transition(id, TaskAction::Cancel, |_| {})
    }

    /// Set progress and append `note` to the task log (RUNNING or PAUSED only)
    pub fn update_progress(&self, id: TaskId, percent: i64, note: Option<&str>) -> Result<Task> {
        let max_log = self.inner.config.max_log_entries;
        let progress = percent.clamp(0, 100) as u8;

        let task = {
            let mut tasks = self.inner.tasks.write();
            let slot = tasks
                .get_mut(&id)
                .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
            let task = &mut slot.task;
            if !matches!(task.status, TaskStatus::Running | TaskStatus::Paused) {
                return Err(Error::invalid_transition(id, task.status, "update_progress"));
            }
            task.progress = progress;
            task.updated_at = Utc::now();
            if let Some(note) = note {
                task.push_log(note, max_log);
            }
            task.clone()
        };

        debug!(task_id = %id, progress, "Task progress");
        self.persist(id);
        let _ = self.inner.events.send(TaskEvent::Progress {
            id,
            progress,
            note: note.map(String::from),
        });
        Ok(task)
    }

    /// Apply `action` under the table lock, then persist and notify
    fn transition(
        &self,
        id: TaskId,
        action: TaskAction,
        mutate: impl FnOnce(&mut Task),
    ) -> Result<Task> {
        self.transition_slot(id, action, |slot| mutate(&mut slot.task))
    }

    fn transition_slot(
        &self,
        id: TaskId,
        action: TaskAction,
        mutate: impl FnOnce(&mut TaskSlot),
    ) -> Result<Task> {
        let max_log = self.inner.config.max_log_entries;
        let (from, task) = {
            let mut tasks = self.inner.tasks.write();
            let slot = tasks
                .get_mut(&id)
                .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
            let from = slot.task.status;
            if Self::is_repeat(from, action) {
                return Ok(slot.task.clone());
            }
            let to = slot.task.apply(action, max_log)?;
            mutate(slot);
            if to.is_terminal() {
                slot.cancel.cancel();
                slot.resumed.notify_one();
            }
            (from, slot.task.clone())
        };

        info!(task_id = %id, from = %from, to = %task.status, "Task transition");
        if task.status.is_terminal() {
            self.inner.executor.forget(id);
        }
        self.persist(id);
        let _ = self.inner.events.send(TaskEvent::Transition {
            id,
            from,
            to: task.status,
        });
        Ok(task)
    }

    /// Finishing an already finished task returns it unchanged
    fn is_repeat(status: TaskStatus, action: TaskAction) -> bool {
        match action {
            TaskAction::Complete | TaskAction::Fail => status.is_terminal(),
            TaskAction::Cancel => status == TaskStatus::Cancelled,
            _ => false,
        }
    }

    // ========================================================================
    // Query
    // ========================================================================

    pub fn get_task(&self, id: TaskId) -> Result<Task> {
        self.inner
            .tasks
            .read()
            .get(&id)
            .map(|slot| slot.task.clone())
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    /// Matching tasks, oldest first
    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .inner
            .tasks
            .read()
            .values()
            .filter(|slot| filter.matches(&slot.task))
            .map(|slot| slot.task.clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        tasks
    }

    pub fn get_stats(&self) -> TaskStats {
        let mut stats = TaskStats::default();
        for slot in self.inner.tasks.read().values() {
            stats.total += 1;
            match slot.task.status {
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Paused => stats.paused += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats.active_workers = self.inner.active_workers.load(Ordering::SeqCst);
        stats.kill_switch_engaged = self.inner.kill_switch.is_engaged();
        stats.pending_writes = self.inner.dirty.lock().len();
        stats
    }

    // ========================================================================
    // Purge
    // ========================================================================

    /// Remove a terminal task from memory and storage
    pub fn purge_task(&self, id: TaskId) -> Result<()> {
        let task = self.get_task(id)?;
        if !task.status.is_terminal() {
            return Err(Error::invalid_transition(id, task.status, "purge"));
        }

        self.inner.store.remove(id)?;
        self.inner.tasks.write().remove(&id);
        self.inner.dirty.lock().remove(&id);
        self.inner.executor.forget(id);
        info!(task_id = %id, "Task purged");
        let _ = self.inner.events.send(TaskEvent::Purged(id));
        Ok(())
    }

    /// Purge terminal tasks that ended more than `age` ago
    pub fn purge_terminal_older_than(&self, age: Duration) -> Result<usize> {
        let age = chrono::Duration::from_std(age)
            .map_err(|e| Error::InvalidInput(format!("invalid age: {}", e)))?;
        let cutoff = Utc::now() - age;

        let expired: Vec<TaskId> = self
            .inner
            .tasks
            .read()
            .values()
            .filter(|slot| slot.task.status.is_terminal())
            .filter(|slot| slot.task.ended_at.map(|t| t < cutoff).unwrap_or(false))
            .map(|slot| slot.task.id)
            .collect();

        for id in &expired {
            self.purge_task(*id)?;
        }
        Ok(expired.len())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write `id` and retry every earlier failed write
    ///
    /// Always writes the current snapshot, so the last transition wins.
    fn persist(&self, id: TaskId) {
        let mut dirty = self.inner.dirty.lock();
        dirty.insert(id);
        self.flush_locked(&mut dirty);
    }

    /// Retry pending writes. Returns how many are still pending.
    pub fn flush(&self) -> usize {
        let mut dirty = self.inner.dirty.lock();
        self.flush_locked(&mut dirty);
        dirty.len()
    }

    fn flush_locked(&self, dirty: &mut BTreeSet<TaskId>) {
        let ids: Vec<TaskId> = dirty.iter().copied().collect();
        for id in ids {
            let snapshot = self.inner.tasks.read().get(&id).map(|slot| slot.task.clone());
            let Some(task) = snapshot else {
                dirty.remove(&id);
                continue;
            };
            match self.inner.store.save(&task) {
                Ok(()) => {
                    dirty.remove(&id);
                }
                Err(e) => {
                    warn!(task_id = %id, error = %e, "Task write failed, retrying on next mutation");
                }
            }
        }
    }

    /// Reload persisted tasks
    ///
    /// RUNNING records were interrupted and become FAILED. QUEUED records are
    /// queued again. PAUSED records wait for `resume_task`.
    pub fn recover(&self) -> Result<usize> {
        let records = self.inner.store.load_all()?;
        let max_log = self.inner.config.max_log_entries;
        let mut requeue = Vec::new();
        let mut interrupted = Vec::new();
        let mut loaded = 0;

        {
            let mut tasks = self.inner.tasks.write();
            for mut task in records {
                if tasks.contains_key(&task.id) {
                    continue;
                }
                match task.status {
                    TaskStatus::Running => {
                        task.apply(TaskAction::Fail, max_log)?;
                        task.error = Some("interrupted".to_string());
                        interrupted.push(task.id);
                    }
                    TaskStatus::Queued => requeue.push(task.id),
                    _ => {}
                }
                let slot = TaskSlot::new(task, &self.inner.kill_switch);
                tasks.insert(slot.task.id, slot);
                loaded += 1;
            }
        }

        for id in &interrupted {
            warn!(task_id = %id, "Task was running at shutdown, marked failed");
            self.persist(*id);
        }
        for id in requeue {
            self.enqueue(id);
        }
        info!(loaded, interrupted = interrupted.len(), "Tasks recovered");
        Ok(loaded)
    }

    // ========================================================================
    // Kill switch
    // ========================================================================

    /// Emergency stop. Returns the number of tasks cancelled.
    ///
    /// Every active task becomes CANCELLED immediately; pending permission
    /// requests are cancelled; new work is refused until `rearm_kill_switch`.
    pub async fn kill_switch(&self) -> usize {
        self.inner.kill_switch.engage();
        let max_log = self.inner.config.max_log_entries;

        let cancelled: Vec<(TaskId, TaskStatus)> = {
            let mut tasks = self.inner.tasks.write();
            tasks
                .values_mut()
                .filter(|slot| slot.task.status.is_active())
                .filter_map(|slot| {
                    let from = slot.task.status;
                    slot.task.apply(TaskAction::Cancel, max_log).ok()?;
                    slot.task.push_log("cancelled by kill switch", max_log);
                    slot.cancel.cancel();
                    slot.resumed.notify_one();
                    Some((slot.task.id, from))
                })
                .collect()
        };

        for (id, from) in &cancelled {
            self.inner.executor.forget(*id);
            self.persist(*id);
            let _ = self.inner.events.send(TaskEvent::Transition {
                id: *id,
                from: *from,
                to: TaskStatus::Cancelled,
            });
        }

        if let Some(router) = &self.inner.router {
            let requests = router.permissions().cancel_all("kill switch");
            if !router.drain(self.inner.config.kill_switch_budget).await {
                warn!(
                    in_flight = router.in_flight(),
                    "Tool calls still running after kill switch budget"
                );
            }
            router.audit().append(AuditRecord::KillSwitch {
                engaged: true,
                tasks_cancelled: cancelled.len(),
            });
            debug!(requests, "Permission requests cancelled");
        }

        warn!(cancelled = cancelled.len(), "Kill switch: tasks cancelled");
        let _ = self.inner.events.send(TaskEvent::KillSwitch {
            engaged: true,
            cancelled: cancelled.len(),
        });
        cancelled.len()
    }

    /// Accept new work again. Returns false if the switch was not engaged.
    pub fn rearm_kill_switch(&self) -> bool {
        if !self.inner.kill_switch.rearm() {
            return false;
        }
        if let Some(router) = &self.inner.router {
            router.audit().append(AuditRecord::KillSwitch {
                engaged: false,
                tasks_cancelled: 0,
            });
        }
        let _ = self.inner.events.send(TaskEvent::KillSwitch {
            engaged: false,
            cancelled: 0,
        });
        true
    }

    // ========================================================================
    // Workers
    // ========================================================================

    /// Start the dispatcher that hands queued tasks to at most
    /// `worker_concurrency` workers. Returns None if already started.
    pub fn spawn_workers(&self) -> Option<JoinHandle<()>> {
        let mut rx = self.inner.queue_rx.lock().take()?;
        let manager = self.clone();

        Some(tokio::spawn(async move {
            let shutdown = manager.inner.shutdown.clone();
            loop {
                let id = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(id) => id,
                        None => break,
                    },
                };

                let permit = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = manager.inner.semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let worker = manager.clone();
                tokio::spawn(async move { worker.run_worker(id, permit).await });
            }
            debug!("Task dispatcher stopped");
        }))
    }

    /// Periodically fail RUNNING tasks that stopped making progress
    pub fn spawn_watchdog(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let period = (manager.inner.config.watchdog_interval / 4).max(Duration::from_millis(10));

        tokio::spawn(async move {
            let shutdown = manager.inner.shutdown.clone();
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.check_watchdog(Utc::now());
                    }
                }
            }
        })
    }

    /// Fail RUNNING tasks not updated within the watchdog interval of `now`
    pub fn check_watchdog(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        let Ok(interval) = chrono::Duration::from_std(self.inner.config.watchdog_interval) else {
            return Vec::new();
        };

        let stale: Vec<TaskId> = self
            .inner
            .tasks
            .read()
            .values()
            .filter(|slot| slot.task.status == TaskStatus::Running)
            .filter(|slot| now - slot.task.updated_at > interval)
            .map(|slot| slot.task.id)
            .collect();

        stale
            .into_iter()
            .filter(|id| {
                let message = format!(
                    "watchdog: no progress for {}s",
                    self.inner.config.watchdog_interval.as_secs()
                );
                match self.fail_task(*id, message) {
                    Ok(task) if task.status == TaskStatus::Failed => {
                        error!(task_id = %id, "Task stalled, marked failed");
                        true
                    }
                    _ => false,
                }
            })
            .collect()
    }

    /// Stop the dispatcher and watchdog. Running workers finish their current subtask.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    async fn run_worker(self, id: TaskId, _permit: OwnedSemaphorePermit) {
        let Some((claim, cancel)) = self.claim(id) else {
            return;
        };
        self.inner.active_workers.fetch_add(1, Ordering::SeqCst);

        let worker = self.clone();
        let handle = tokio::spawn(async move { worker.execute_subtasks(id, cancel).await });

        if let Err(e) = handle.await {
            let message = if e.is_panic() {
                let payload = e.into_panic();
                let text = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                format!("worker panicked: {}", text)
            } else {
                "worker aborted".to_string()
            };
            error!(task_id = %id, %message, "Worker crashed");
            let _ = self.fail_task(id, message);
        }

        self.release(id, claim);
        self.inner.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Take ownership of a task for a worker, starting it if QUEUED
    fn claim(&self, id: TaskId) -> Option<(u64, CancellationToken)> {
        let max_log = self.inner.config.max_log_entries;
        let (claim, token, started) = {
            let mut tasks = self.inner.tasks.write();
            let slot = tasks.get_mut(&id)?;
            if slot.claim.is_some() || slot.task.status.is_terminal() {
                return None;
            }
            let started = if slot.task.status == TaskStatus::Queued {
                slot.task.apply(TaskAction::Start, max_log).ok()?;
                true
            } else {
                false
            };
            let claim = self.inner.next_claim.fetch_add(1, Ordering::SeqCst);
            slot.claim = Some(claim);
            (claim, slot.cancel.clone(), started)
        };

        if started {
            info!(task_id = %id, "Task started by worker");
            self.persist(id);
            let _ = self.inner.events.send(TaskEvent::Transition {
                id,
                from: TaskStatus::Queued,
                to: TaskStatus::Running,
            });
        }
        Some((claim, token))
    }

    /// Drop the claim unless another worker has taken over since
    fn release(&self, id: TaskId, claim: u64) {
        if let Some(slot) = self.inner.tasks.write().get_mut(&id) {
            if slot.claim == Some(claim) {
                slot.claim = None;
            }
        }
    }

    async fn execute_subtasks(&self, id: TaskId, cancel: CancellationToken) {
        enum Step {
            Wait(Arc<Notify>),
            Run(usize, Subtask),
            Finish,
            Exit,
        }

        let mut outputs: Vec<String> = Vec::new();

        loop {
            if cancel.is_cancelled() {
                self.cancel_if_active(id);
                return;
            }

            let step = {
                let tasks = self.inner.tasks.read();
                match tasks.get(&id) {
                    None => Step::Exit,
                    Some(slot) => match slot.task.status {
                        TaskStatus::Paused => Step::Wait(slot.resumed.clone()),
                        TaskStatus::Running => match slot.task.subtasks.get(slot.task.next_subtask) {
                            Some(subtask) => Step::Run(slot.task.next_subtask, subtask.clone()),
                            None => Step::Finish,
                        },
                        _ => Step::Exit,
                    },
                }
            };

            let (index, subtask) = match step {
                Step::Exit => return,
                Step::Finish => {
                    let _ = self.complete_task(id, outputs.join("\n"));
                    return;
                }
                Step::Wait(resumed) => {
                    tokio::select! {
                        _ = resumed.notified() => {}
                        _ = cancel.cancelled() => {}
                    }
                    continue;
                }
                Step::Run(index, subtask) => (index, subtask),
            };

            debug!(task_id = %id, index, tool = %subtask.tool, "Executing subtask");
            let result = self.inner.executor.execute(id, &subtask, &cancel).await;
            let peak = self.inner.executor.peak_risk_score(id);

            match result {
                Ok(output) => {
                    outputs.push(output);
                    self.record_subtask(id, index, &subtask, peak);

                    if self.inner.executor.threat_level(id) == ThreatLevel::Critical {
                        warn!(task_id = %id, "Threat level critical, stopping task");
                        let _ = self.fail_task(id, "threat level critical");
                        return;
                    }
                }
                Err(e) => {
                    self.record_peak(id, peak);
                    self.handle_error(id, &subtask, e);
                    return;
                }
            }
        }
    }

    /// Advance past a finished subtask
    fn record_subtask(&self, id: TaskId, index: usize, subtask: &Subtask, peak: Option<u32>) {
        let max_log = self.inner.config.max_log_entries;
        let progress = {
            let mut tasks = self.inner.tasks.write();
            let Some(slot) = tasks.get_mut(&id) else {
                return;
            };
            let task = &mut slot.task;
            if task.status.is_terminal() {
                return;
            }
            let total = task.subtasks.len().max(1);
            task.next_subtask = index + 1;
            task.progress = (((index + 1) * 100) / total).min(100) as u8;
            task.peak_risk_score = task.peak_risk_score.max(peak.unwrap_or(0));
            if let Some(path) = subtask.created_path() {
                task.add_file(path);
            }
            task.updated_at = Utc::now();
            task.push_log(
                format!("subtask {}/{} {} done", index + 1, total, subtask.tool),
                max_log,
            );
            task.progress
        };

        self.persist(id);
        let _ = self.inner.events.send(TaskEvent::Progress {
            id,
            progress,
            note: None,
        });
    }

    fn record_peak(&self, id: TaskId, peak: Option<u32>) {
        let Some(peak) = peak else {
            return;
        };
        let mut tasks = self.inner.tasks.write();
        if let Some(slot) = tasks.get_mut(&id) {
            if slot.task.status.is_active() {
                slot.task.peak_risk_score = slot.task.peak_risk_score.max(peak);
            }
        }
    }

    /// The token also fires when the kill switch is engaged outside the manager
    fn cancel_if_active(&self, id: TaskId) {
        if self.cancel_task(id).is_ok() {
            debug!(task_id = %id, "Interrupted task cancelled");
        }
    }

    fn handle_error(&self, id: TaskId, subtask: &Subtask, err: Error) {
        match err {
            Error::Cancelled | Error::KillSwitchEngaged(_) => {
                debug!(task_id = %id, "Subtask interrupted");
                self.cancel_if_active(id);
            }
            e if e.is_recoverable() && self.inner.config.pause_on_recoverable => {
                warn!(task_id = %id, tool = %subtask.tool, error = %e, "Subtask refused, pausing task");
                let message = e.to_string();
                let paused = self.transition_slot(id, TaskAction::Pause, |slot| {
                    slot.task.error = Some(message.clone());
                    slot.claim = None;
                });
                if paused.is_err() {
                    // Already paused by the user
                    if let Some(slot) = self.inner.tasks.write().get_mut(&id) {
                        if slot.task.status == TaskStatus::Paused {
                            slot.task.error = Some(message);
                        }
                    }
                    self.persist(id);
                }
            }
            e => {
                warn!(task_id = %id, tool = %subtask.tool, error = %e, "Subtask failed");
                let _ = self.fail_task(id, e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTaskStore;
    use async_trait::async_trait;

    struct NoopExecutor;

    #[async_trait]
    impl SubtaskExecutor for NoopExecutor {
        async fn execute(
            &self,
            _task_id: TaskId,
            subtask: &Subtask,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            Ok(subtask.tool.clone())
        }

        fn name(&self) -> &'static str {
            "noop"
        }
    }

    fn manager() -> (TaskManager, Arc<MemoryTaskStore>) {
        let store = Arc::new(MemoryTaskStore::new());
        let manager = TaskManager::new(
            TaskManagerConfig::default(),
            store.clone(),
            Arc::new(NoopExecutor),
        );
        (manager, store)
    }

    #[test]
    fn test_create_is_queued_and_persisted() {
        let (manager, store) = manager();
        let task = manager.create_task("delete temp.txt").unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(store.load(task.id).unwrap().unwrap().status, TaskStatus::Queued);
    }

    #[test]
    fn test_invalid_transition_is_local() {
        let (manager, _) = manager();
        let task = manager.create_task("x").unwrap();

        let err = manager.pause_task(task.id).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(manager.get_task(task.id).unwrap(), task);

        assert!(matches!(
            manager.start_task(TaskId::new()).unwrap_err(),
            Error::TaskNotFound(_)
        ));
    }

    #[test]
    fn test_update_progress_clamps_and_logs() {
        let (manager, _) = manager();
        let task = manager.create_task("x").unwrap();
        assert!(manager.update_progress(task.id, 10, None).is_err());

        manager.start_task(task.id).unwrap();
        let task = manager.update_progress(task.id, 250, Some("halfway")).unwrap();
        assert_eq!(task.progress, 100);
        assert_eq!(task.log.back().unwrap().message, "halfway");

        manager.pause_task(task.id).unwrap();
        let task = manager.update_progress(task.id, -5, None).unwrap();
        assert_eq!(task.progress, 0);
    }

    #[test]
    fn test_cancel_semantics() {
        let (manager, _) = manager();
        let task = manager.create_task("x").unwrap();
        let cancelled = manager.cancel_task(task.id).unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert_eq!(manager.cancel_task(task.id).unwrap(), cancelled);

        let done = manager.create_task("y").unwrap();
        manager.start_task(done.id).unwrap();
        manager.complete_task(done.id, "ok").unwrap();
        assert!(matches!(
            manager.cancel_task(done.id).unwrap_err(),
            Error::InvalidTransition { .. }
        ));
    }

    #[test]
    fn test_concurrent_complete_is_applied_once() {
        let (manager, _) = manager();
        let mut events = manager.subscribe();
        let task = manager.create_task("x").unwrap();
        manager.start_task(task.id).unwrap();

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let manager = &manager;
                scope.spawn(move || {
                    for _ in 0..100 {
                        let task = manager.complete_task(task.id, format!("out {}", worker)).unwrap();
                        assert_eq!(task.status, TaskStatus::Completed);
                    }
                });
            }
        });

        let mut completions = 0;
        while let Ok(event) = events.try_recv() {
            if let TaskEvent::Transition { to: TaskStatus::Completed, .. } = event {
                completions += 1;
            }
        }
        assert_eq!(completions, 1);
        assert_eq!(manager.get_task(task.id).unwrap().log.len(), 2);
    }

    #[test]
    fn test_create_refused_once_switch_engaged_elsewhere() {
        let (manager, store) = manager();
        assert!(manager.kill_switch_handle().engage());

        assert!(matches!(
            manager.create_task("x").unwrap_err(),
            Error::KillSwitchEngaged(_)
        ));
        assert!(manager.list_tasks(&TaskFilter::new()).is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_fail_from_paused() {
        let (manager, _) = manager();
        let task = manager.create_task("x").unwrap();
        manager.start_task(task.id).unwrap();
        manager.pause_task(task.id).unwrap();
        let failed = manager.fail_task(task.id, "boom").unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));

        // no-op once terminal
        let again = manager.fail_task(task.id, "other").unwrap();
        assert_eq!(again, failed);
    }

    #[test]
    fn test_list_and_stats() {
        let (manager, _) = manager();
        let a = manager.create_task("delete temp.txt").unwrap();
        manager.create_task("list files").unwrap();
        manager.start_task(a.id).unwrap();

        let running = manager.list_tasks(&TaskFilter::new().with_status(TaskStatus::Running));
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, a.id);
        assert_eq!(manager.list_tasks(&TaskFilter::new().with_text("TEMP")).len(), 1);
        assert_eq!(manager.list_tasks(&TaskFilter::active().with_limit(1)).len(), 1);

        let stats = manager.get_stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.queued, 1);
        assert!(!stats.kill_switch_engaged);
    }

    #[test]
    fn test_purge() {
        let (manager, store) = manager();
        let task = manager.create_task("x").unwrap();
        assert!(matches!(
            manager.purge_task(task.id).unwrap_err(),
            Error::InvalidTransition { .. }
        ));

        manager.cancel_task(task.id).unwrap();
        manager.purge_task(task.id).unwrap();
        assert!(manager.get_task(task.id).is_err());
        assert!(store.load(task.id).unwrap().is_none());
    }

    #[test]
    fn test_purge_older_than_keeps_recent() {
        let (manager, _) = manager();
        let task = manager.create_task("x").unwrap();
        manager.cancel_task(task.id).unwrap();

        assert_eq!(manager.purge_terminal_older_than(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(manager.purge_terminal_older_than(Duration::ZERO).unwrap(), 1);
    }

    #[test]
    fn test_watchdog_fails_stale_running_tasks() {
        let (manager, _) = manager();
        let stale = manager.create_task("stuck").unwrap();
        manager.start_task(stale.id).unwrap();
        let paused = manager.create_task("waiting").unwrap();
        manager.start_task(paused.id).unwrap();
        manager.pause_task(paused.id).unwrap();

        let later = Utc::now() + chrono::Duration::seconds(3600);
        let failed = manager.check_watchdog(later);
        assert_eq!(failed, vec![stale.id]);

        let task = manager.get_task(stale.id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().starts_with("watchdog"));
        assert_eq!(manager.get_task(paused.id).unwrap().status, TaskStatus::Paused);

        // fresh tasks are left alone
        assert!(manager.check_watchdog(Utc::now()).is_empty());
    }

    #[tokio::test]
    async fn test_kill_switch_refuses_new_tasks_until_rearmed() {
        let (manager, _) = manager();
        let queued = manager.create_task("a").unwrap();

        assert_eq!(manager.kill_switch().await, 1);
        assert_eq!(manager.get_task(queued.id).unwrap().status, TaskStatus::Cancelled);
        assert!(matches!(
            manager.create_task("b").unwrap_err(),
            Error::KillSwitchEngaged(_)
        ));
        assert!(manager.get_stats().kill_switch_engaged);

        assert!(manager.rearm_kill_switch());
        assert!(!manager.rearm_kill_switch());
        assert!(manager.create_task("b").is_ok());
    }
}
