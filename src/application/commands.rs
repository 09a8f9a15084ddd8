use crate::application::block_store::{compute_stats, new_block_id, TimeBlockStore};
use crate::application::bootstrap::{bootstrap_workspace, BootstrapResult};
use crate::application::focus_controller::{
    FocusCompletion, FocusController, FocusSnapshot, FocusTick,
};
use crate::application::summary::{
    daily_summary, week_start_for, weekly_summary, DailySummary, WeeklySummary,
};
use crate::domain::models::{
    default_categories, normalize_date, parse_date, parse_hhmm, sample_blocks, validate_tasks,
    AppSettings, BlockCategory, BlockDraft, BlockPatch, BlockStats, DailyReflection, TimeBlock,
};
use crate::domain::timer::ResetOutcome;
use crate::infrastructure::config::ConfigBundle;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::persistence::PersistenceGateway;
use crate::infrastructure::storage::{KeyValueStore, SqliteKeyValueStore};
use chrono::{Local, NaiveDateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const NOTIFICATION_CAPACITY: usize = 16;
const QUICK_BLOCK_TITLE: &str = "Quick Focus";
const DEFAULT_CATEGORY_ICON: &str = "tag";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";

pub type NowProvider = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

pub struct AppState {
    workspace_root: PathBuf,
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    config: ConfigBundle,
    gateway: PersistenceGateway,
    runtime: Mutex<RuntimeState>,
    ticker: Mutex<Option<TickerHandle>>,
    notifications: broadcast::Sender<FocusNotification>,
    now_provider: NowProvider,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let store = Arc::new(SqliteKeyValueStore::new(&bootstrap.database_path));
        Self::from_bootstrap(bootstrap, store)
    }

    /// Same layout and config as [`AppState::new`], with records kept in
    /// `store` instead of the workspace database.
    pub fn with_key_value_store(
        workspace_root: PathBuf,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        Self::from_bootstrap(bootstrap, store)
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn from_bootstrap(
        bootstrap: BootstrapResult,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, InfraError> {
        let BootstrapResult {
            workspace_root,
            config_dir,
            logs_dir,
            database_path,
            config,
        } = bootstrap;
        let now_provider: NowProvider = Arc::new(|| Local::now().naive_local());
        let today = (now_provider)().date().format(DATE_FORMAT).to_string();

        let gateway = PersistenceGateway::new(store);
        let mut blocks = TimeBlockStore::new(gateway.clone(), config.app.write_policy);
        blocks.load_all(config.app.seed_on_first_run, &today)?;
        blocks.flush()?;
        let categories = gateway.load_categories()?;
        let reflections = gateway.load_reflections()?;
        let settings = gateway.load_settings()?;
        // no timer survives a restart, so a persisted "focusing" flag is stale
        let stale_focus_flag = gateway.load_focus_mode()?;
        if stale_focus_flag {
            gateway.save_focus_mode(false)?;
        }

        let (notifications, _receiver) = broadcast::channel(NOTIFICATION_CAPACITY);
        let state = Self {
            workspace_root,
            config_dir,
            database_path,
            logs_dir,
            runtime: Mutex::new(RuntimeState {
                controller: FocusController::new(blocks, config.focus.partial_progress),
                categories,
                reflections,
                settings,
            }),
            config,
            gateway,
            ticker: Mutex::new(None),
            notifications,
            now_provider,
            log_guard: Mutex::new(()),
        };
        if stale_focus_flag {
            state.log_info("bootstrap", "cleared stale focus flag");
        }
        Ok(state)
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn config(&self) -> &ConfigBundle {
        &self.config
    }

    /// Logs the failure and returns the message meant for the user.
    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.user_message()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }

    fn now(&self) -> NaiveDateTime {
        (self.now_provider)()
    }

    fn today(&self) -> String {
        self.now().date().format(DATE_FORMAT).to_string()
    }

    fn persist_focus_flag(&self, command: &str, enabled: bool) {
        if let Err(error) = self.gateway.save_focus_mode(enabled) {
            self.log_error(command, &format!("failed to persist focus flag: {error}"));
        }
    }

    fn notify_completion(&self, completion: &FocusCompletion, system_notification: bool) {
        // nobody listening is not an error
        let _ = self.notifications.send(FocusNotification {
            block_id: completion.block.id.clone(),
            block_title: completion.block.title.clone(),
            focused_seconds: completion.focused_seconds,
            system_notification,
        });
    }

    /// Starts, keeps or stops the tick task so that exactly one task runs
    /// while the controller's timer is running.
    fn reconcile_ticker(self: &Arc<Self>, controller: &FocusController) {
        let Ok(mut ticker) = self.ticker.lock() else {
            return;
        };
        let wanted = if controller.is_ticking() {
            controller.session_generation()
        } else {
            None
        };
        let running = ticker.as_ref().map(|current| current.generation);
        match (wanted, running) {
            (Some(generation), Some(current)) if current == generation => {}
            (Some(generation), _) => {
                if let Some(previous) = ticker.take() {
                    previous.task.abort();
                }
                *ticker = self.spawn_ticker(generation);
            }
            (None, _) => {
                if let Some(previous) = ticker.take() {
                    previous.task.abort();
                }
            }
        }
    }

    /// Drops the tick task registered for `generation`, if it is still the
    /// registered one.
    fn release_ticker(&self, generation: u64) {
        let Ok(mut ticker) = self.ticker.lock() else {
            return;
        };
        if ticker
            .as_ref()
            .is_some_and(|current| current.generation == generation)
        {
            if let Some(current) = ticker.take() {
                current.task.abort();
            }
        }
    }

    fn cancel_ticker(&self) {
        let Ok(mut ticker) = self.ticker.lock() else {
            return;
        };
        if let Some(current) = ticker.take() {
            current.task.abort();
        }
    }

    fn spawn_ticker(self: &Arc<Self>, generation: u64) -> Option<TickerHandle> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.log_info(
                "focus_ticker",
                "no async runtime; ticks are driven by the caller",
            );
            return None;
        };
        let period = Duration::from_millis(self.config.focus.tick_interval_ms);
        let task = runtime.spawn(run_ticker(Arc::downgrade(self), generation, period));
        Some(TickerHandle { generation, task })
    }
}

async fn run_ticker(state: Weak<AppState>, generation: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick resolves immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(state) = state.upgrade() else {
            return;
        };
        match tick_focus_impl(&state, generation) {
            Ok(FocusTick::Counting(_)) => {}
            Ok(FocusTick::Paused(_) | FocusTick::Stale | FocusTick::Completed(_)) => return,
            Err(error) => state.log_error("focus_ticker", &error.to_string()),
        }
    }
}

struct RuntimeState {
    controller: FocusController,
    categories: Vec<BlockCategory>,
    reflections: Vec<DailyReflection>,
    settings: AppSettings,
}

struct TickerHandle {
    generation: u64,
    task: JoinHandle<()>,
}

/// Pushed to subscribers when a focus session runs to zero.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FocusNotification {
    pub block_id: String,
    pub block_title: String,
    pub focused_seconds: i64,
    pub system_notification: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResetTimerResponse {
    pub outcome: String,
    pub snapshot: FocusSnapshot,
}

/// Runs one command, mapping a failure to its user-facing message and
/// logging it.
pub fn run_command<T>(
    state: &AppState,
    command: &str,
    operation: impl FnOnce() -> Result<T, InfraError>,
) -> Result<T, String> {
    operation().map_err(|error| state.command_error(command, &error))
}

pub fn list_blocks_impl(
    state: &AppState,
    date: Option<String>,
) -> Result<Vec<TimeBlock>, InfraError> {
    let runtime = lock_runtime(state)?;
    let store = runtime.controller.store();
    Ok(match non_empty(date) {
        Some(date) => store.filter_by_date(&date),
        None => store.list(),
    })
}

pub fn get_block_impl(state: &AppState, block_id: String) -> Result<TimeBlock, InfraError> {
    let runtime = lock_runtime(state)?;
    runtime
        .controller
        .store()
        .get(block_id.trim())
        .cloned()
        .ok_or_else(|| InfraError::NotFound(format!("block {}", block_id.trim())))
}

pub fn create_block_impl(state: &AppState, draft: BlockDraft) -> Result<TimeBlock, InfraError> {
    let mut draft = draft;
    if draft.date.trim().is_empty() {
        draft.date = state.today();
    }

    let block = {
        let mut runtime = lock_runtime(state)?;
        insert_draft(state, &mut runtime, draft)?
    };
    state.log_info("create_block", &format!("created block_id={}", block.id));
    Ok(block)
}

/// Creates a block of the configured quick length starting now (or at
/// `start_time`), in the first category, with a single default task.
pub fn create_quick_block_impl(
    state: &AppState,
    title: Option<String>,
    date: Option<String>,
    start_time: Option<String>,
) -> Result<TimeBlock, InfraError> {
    let now = state.now();
    let date = resolve_date(state, date, "date")?;
    let start = match non_empty(start_time) {
        Some(value) => {
            parse_hhmm(&value).ok_or_else(|| InfraError::validation("start_time", "must be HH:MM"))?
        }
        None => now.time(),
    };
    let minutes = i64::from(state.config.focus.quick_block_minutes);
    let (end, wrapped_seconds) = start.overflowing_add_signed(chrono::Duration::minutes(minutes));
    if wrapped_seconds != 0 {
        return Err(InfraError::validation(
            "end_time",
            "quick block must end before midnight",
        ));
    }

    let block = {
        let mut runtime = lock_runtime(state)?;
        let category_id = runtime
            .categories
            .first()
            .map(|category| category.id.clone())
            .ok_or_else(|| InfraError::validation("category", "create a category first"))?;
        let draft = BlockDraft {
            title: non_empty(title).unwrap_or_else(|| QUICK_BLOCK_TITLE.to_string()),
            date,
            start_time: start.format(TIME_FORMAT).to_string(),
            end_time: end.format(TIME_FORMAT).to_string(),
            category_id,
            color: None,
            tasks: vec![state.config.focus.quick_block_task.clone()],
        };
        insert_draft(state, &mut runtime, draft)?
    };
    state.log_info(
        "create_quick_block",
        &format!("created block_id={} minutes={minutes}", block.id),
    );
    Ok(block)
}

pub fn edit_block_impl(
    state: &AppState,
    block_id: String,
    patch: BlockPatch,
) -> Result<TimeBlock, InfraError> {
    let block_id = block_id.trim();
    let patch = normalize_patch(patch);

    let updated = {
        let mut runtime = lock_runtime(state)?;
        let mut merged = runtime
            .controller
            .store()
            .get(block_id)
            .cloned()
            .ok_or_else(|| InfraError::NotFound(format!("block {block_id}")))?;
        merged.apply_patch(&patch);
        merged.validate(state.config.focus.min_block_minutes)?;
        if let Some(category_id) = patch.category_id.as_deref() {
            category_color(&runtime.categories, category_id)?;
        }
        runtime.controller.store_mut().update_block(block_id, &patch)?
    };
    state.log_info("edit_block", &format!("updated block_id={block_id}"));
    Ok(updated)
}

/// Deleting the block under an open focus session ends that session
/// without recording progress.
pub fn delete_block_impl(state: &AppState, block_id: String) -> Result<bool, InfraError> {
    let block_id = block_id.trim();
    let deleted = {
        let mut runtime = lock_runtime(state)?;
        let had_session = runtime.controller.session_block_id() == Some(block_id);
        let deleted = runtime.controller.store_mut().delete_block(block_id)?;
        if deleted && had_session {
            runtime.controller.forget_block(block_id);
            state.cancel_ticker();
            state.persist_focus_flag("delete_block", runtime.controller.focus_mode());
        }
        deleted
    };

    if deleted {
        state.log_info("delete_block", &format!("deleted block_id={block_id}"));
    }
    Ok(deleted)
}

pub fn add_task_impl(
    state: &AppState,
    block_id: String,
    task: String,
) -> Result<TimeBlock, InfraError> {
    let block_id = block_id.trim();
    let task = task.trim();
    if task.is_empty() {
        return Err(InfraError::validation("tasks[]", "must not be empty"));
    }

    let updated = {
        let mut runtime = lock_runtime(state)?;
        let mut tasks = runtime
            .controller
            .store()
            .get(block_id)
            .map(|block| block.tasks.clone())
            .ok_or_else(|| InfraError::NotFound(format!("block {block_id}")))?;
        tasks.push(task.to_string());
        validate_tasks(&tasks)?;
        let patch = BlockPatch {
            tasks: Some(tasks),
            ..BlockPatch::default()
        };
        runtime.controller.store_mut().update_block(block_id, &patch)?
    };
    state.log_info("add_task", &format!("block_id={block_id} tasks={}", updated.tasks.len()));
    Ok(updated)
}

pub fn remove_task_impl(
    state: &AppState,
    block_id: String,
    index: usize,
) -> Result<TimeBlock, InfraError> {
    let block_id = block_id.trim();
    let updated = {
        let mut runtime = lock_runtime(state)?;
        let mut tasks = runtime
            .controller
            .store()
            .get(block_id)
            .map(|block| block.tasks.clone())
            .ok_or_else(|| InfraError::NotFound(format!("block {block_id}")))?;
        if index >= tasks.len() {
            return Err(InfraError::validation(
                "tasks",
                format!("no task at index {index}"),
            ));
        }
        tasks.remove(index);
        let patch = BlockPatch {
            tasks: Some(tasks),
            ..BlockPatch::default()
        };
        runtime.controller.store_mut().update_block(block_id, &patch)?
    };
    state.log_info("remove_task", &format!("block_id={block_id} index={index}"));
    Ok(updated)
}

/// Appends the sample day for `date` (default today). Default categories
/// the samples rely on are restored if they were deleted.
pub fn add_sample_data_impl(
    state: &AppState,
    date: Option<String>,
) -> Result<Vec<TimeBlock>, InfraError> {
    let date = resolve_date(state, date, "date")?;
    let samples = sample_blocks(&date, new_block_id);

    {
        let mut runtime = lock_runtime(state)?;
        let missing = default_categories()
            .into_iter()
            .filter(|category| samples.iter().any(|block| block.category_id == category.id))
            .filter(|category| {
                !runtime
                    .categories
                    .iter()
                    .any(|existing| existing.id == category.id)
            })
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            let mut categories = runtime.categories.clone();
            categories.extend(missing);
            state.gateway.save_categories(&categories)?;
            runtime.categories = categories;
        }
        runtime.controller.store_mut().add_blocks(samples.clone())?;
    }

    state.log_info(
        "add_sample_data",
        &format!("added {} sample blocks for {date}", samples.len()),
    );
    Ok(samples)
}

/// Stats for `date`, or over every block when no date is given.
pub fn block_stats_impl(state: &AppState, date: Option<String>) -> Result<BlockStats, InfraError> {
    let runtime = lock_runtime(state)?;
    let store = runtime.controller.store();
    Ok(match non_empty(date) {
        Some(date) => compute_stats(&store.filter_by_date(&date)),
        None => store.compute_stats(),
    })
}

pub fn flush_impl(state: &AppState) -> Result<(), InfraError> {
    let mut runtime = lock_runtime(state)?;
    let store = runtime.controller.store_mut();
    if !store.is_dirty() {
        return Ok(());
    }
    store.flush()?;
    drop(runtime);
    state.log_info("flush", "persisted pending block changes");
    Ok(())
}

pub fn start_focus_impl(
    state: &Arc<AppState>,
    block_id: String,
) -> Result<FocusSnapshot, InfraError> {
    let block_id = block_id.trim();
    if block_id.is_empty() {
        return Err(InfraError::validation("block_id", "must not be empty"));
    }

    let snapshot = {
        let mut runtime = lock_runtime(state)?;
        let started = runtime.controller.start_focus(block_id)?;
        state.reconcile_ticker(&runtime.controller);
        state.persist_focus_flag("start_focus", runtime.controller.focus_mode());
        if let Some(completion) = started.completion.as_ref() {
            state.notify_completion(completion, runtime.settings.notifications_enabled);
        }
        started.snapshot
    };
    state.log_info("start_focus", &format!("started block_id={block_id}"));
    Ok(snapshot)
}

pub fn pause_focus_impl(state: &Arc<AppState>) -> Result<FocusSnapshot, InfraError> {
    let snapshot = focus_command(state, "pause_focus", FocusController::pause_timer)?;
    state.log_info("pause_focus", "paused focus timer");
    Ok(snapshot)
}

pub fn resume_timer_impl(state: &Arc<AppState>) -> Result<FocusSnapshot, InfraError> {
    let snapshot = focus_command(state, "resume_timer", FocusController::resume_timer)?;
    state.log_info("resume_timer", "resumed focus timer");
    Ok(snapshot)
}

pub fn pause_and_exit_impl(state: &Arc<AppState>) -> Result<FocusSnapshot, InfraError> {
    let snapshot = focus_command(state, "pause_and_exit", FocusController::pause_and_exit)?;
    state.log_info("pause_and_exit", "left focus screen, block stays active");
    Ok(snapshot)
}

pub fn resume_focus_impl(state: &Arc<AppState>) -> Result<FocusSnapshot, InfraError> {
    let snapshot = focus_command(state, "resume_focus", FocusController::resume_focus)?;
    state.log_info(
        "resume_focus",
        &format!(
            "resumed block_id={}",
            snapshot.block_id.as_deref().unwrap_or("-")
        ),
    );
    Ok(snapshot)
}

pub fn end_session_impl(state: &Arc<AppState>) -> Result<TimeBlock, InfraError> {
    let block = focus_command(state, "end_session", FocusController::end_session)?;
    state.log_info(
        "end_session",
        &format!("ended block_id={} progress={}", block.id, block.progress),
    );
    Ok(block)
}

pub fn reset_timer_impl(
    state: &Arc<AppState>,
    confirmed: bool,
) -> Result<ResetTimerResponse, InfraError> {
    let (outcome, snapshot) =
        focus_command(state, "reset_timer", |controller| controller.reset_timer(confirmed))?;
    let outcome = match outcome {
        ResetOutcome::Restarted => "restarted",
        ResetOutcome::NeedsConfirmation => "needs_confirmation",
        ResetOutcome::AlreadyCompleted => "already_completed",
    };
    state.log_info("reset_timer", &format!("outcome={outcome}"));
    Ok(ResetTimerResponse {
        outcome: outcome.to_string(),
        snapshot,
    })
}

pub fn get_focus_state_impl(state: &AppState) -> Result<FocusSnapshot, InfraError> {
    let runtime = lock_runtime(state)?;
    Ok(runtime.controller.snapshot())
}

/// One timer second for the session identified by `generation`. Called by
/// the tick task; callers without an async runtime drive it themselves.
pub fn tick_focus_impl(state: &AppState, generation: u64) -> Result<FocusTick, InfraError> {
    let mut runtime = lock_runtime(state)?;
    let tick = runtime.controller.tick(generation)?;
    match &tick {
        FocusTick::Counting(_) => {}
        FocusTick::Paused(_) | FocusTick::Stale => state.release_ticker(generation),
        FocusTick::Completed(completion) => {
            state.release_ticker(generation);
            state.persist_focus_flag("tick_focus", runtime.controller.focus_mode());
            state.notify_completion(completion, runtime.settings.notifications_enabled);
            state.log_info(
                "tick_focus",
                &format!(
                    "completed block_id={} focused_seconds={}",
                    completion.block.id, completion.focused_seconds
                ),
            );
        }
    }
    Ok(tick)
}

pub fn subscribe_focus_mode(state: &AppState) -> Result<watch::Receiver<bool>, InfraError> {
    let runtime = lock_runtime(state)?;
    Ok(runtime.controller.subscribe_focus_mode())
}

pub fn subscribe_notifications(state: &AppState) -> broadcast::Receiver<FocusNotification> {
    state.notifications.subscribe()
}

pub fn list_categories_impl(state: &AppState) -> Result<Vec<BlockCategory>, InfraError> {
    let runtime = lock_runtime(state)?;
    Ok(runtime.categories.clone())
}

pub fn create_category_impl(
    state: &AppState,
    name: String,
    color: String,
    icon: Option<String>,
) -> Result<BlockCategory, InfraError> {
    let category = BlockCategory {
        id: format!("cat-{}", new_block_id()),
        name: name.trim().to_string(),
        color: color.trim().to_string(),
        icon: non_empty(icon).unwrap_or_else(|| DEFAULT_CATEGORY_ICON.to_string()),
    };
    category.validate()?;

    {
        let mut runtime = lock_runtime(state)?;
        ensure_unique_name(&runtime.categories, &category.name, None)?;
        let mut categories = runtime.categories.clone();
        categories.push(category.clone());
        state.gateway.save_categories(&categories)?;
        runtime.categories = categories;
    }
    state.log_info(
        "create_category",
        &format!("created category_id={}", category.id),
    );
    Ok(category)
}

/// Blocks hold the category id, so a rename needs no cascade.
pub fn update_category_impl(
    state: &AppState,
    category_id: String,
    name: Option<String>,
    color: Option<String>,
    icon: Option<String>,
) -> Result<BlockCategory, InfraError> {
    let category_id = category_id.trim();
    let updated = {
        let mut runtime = lock_runtime(state)?;
        let position = runtime
            .categories
            .iter()
            .position(|category| category.id == category_id)
            .ok_or_else(|| InfraError::NotFound(format!("category {category_id}")))?;

        let mut updated = runtime.categories[position].clone();
        if let Some(name) = non_empty(name) {
            updated.name = name;
        }
        if let Some(color) = non_empty(color) {
            updated.color = color;
        }
        if let Some(icon) = non_empty(icon) {
            updated.icon = icon;
        }
        updated.validate()?;
        ensure_unique_name(&runtime.categories, &updated.name, Some(category_id))?;

        let mut categories = runtime.categories.clone();
        categories[position] = updated.clone();
        state.gateway.save_categories(&categories)?;
        runtime.categories = categories;
        updated
    };
    state.log_info(
        "update_category",
        &format!("updated category_id={category_id}"),
    );
    Ok(updated)
}

pub fn delete_category_impl(state: &AppState, category_id: String) -> Result<bool, InfraError> {
    let category_id = category_id.trim();
    {
        let mut runtime = lock_runtime(state)?;
        if !runtime
            .categories
            .iter()
            .any(|category| category.id == category_id)
        {
            return Ok(false);
        }
        if runtime.controller.store().references_category(category_id) {
            return Err(InfraError::Conflict(format!(
                "category {category_id} is used by existing blocks"
            )));
        }
        let categories = runtime
            .categories
            .iter()
            .filter(|category| category.id != category_id)
            .cloned()
            .collect::<Vec<_>>();
        state.gateway.save_categories(&categories)?;
        runtime.categories = categories;
    }
    state.log_info(
        "delete_category",
        &format!("deleted category_id={category_id}"),
    );
    Ok(true)
}

/// Inserts or replaces the reflection for (`date`, `block_id`). The block
/// title is copied so the entry survives later renames and deletion.
pub fn save_reflection_impl(
    state: &AppState,
    date: Option<String>,
    block_id: String,
    reflection: String,
    rating: u8,
) -> Result<DailyReflection, InfraError> {
    let date = resolve_date(state, date, "reflection.date")?;
    let block_id = block_id.trim();

    let entry = {
        let mut runtime = lock_runtime(state)?;
        let block_title = runtime
            .controller
            .store()
            .get(block_id)
            .map(|block| block.title.clone())
            .ok_or_else(|| InfraError::NotFound(format!("block {block_id}")))?;
        let entry = DailyReflection {
            date,
            block_id: block_id.to_string(),
            block_title,
            reflection: reflection.trim().to_string(),
            rating,
        };
        entry.validate()?;

        let mut reflections = runtime.reflections.clone();
        match reflections
            .iter_mut()
            .find(|existing| existing.is_same_entry(&entry.date, &entry.block_id))
        {
            Some(existing) => *existing = entry.clone(),
            None => reflections.push(entry.clone()),
        }
        state.gateway.save_reflections(&reflections)?;
        runtime.reflections = reflections;
        entry
    };
    state.log_info(
        "save_reflection",
        &format!("saved reflection date={} block_id={block_id}", entry.date),
    );
    Ok(entry)
}

pub fn list_reflections_impl(
    state: &AppState,
    date: Option<String>,
) -> Result<Vec<DailyReflection>, InfraError> {
    let date = non_empty(date).map(|value| normalize_date(&value).unwrap_or(value));
    let runtime = lock_runtime(state)?;
    Ok(runtime
        .reflections
        .iter()
        .filter(|reflection| {
            date.as_deref()
                .map(|date| reflection.date == date)
                .unwrap_or(true)
        })
        .cloned()
        .collect())
}

pub fn get_settings_impl(state: &AppState) -> Result<AppSettings, InfraError> {
    let runtime = lock_runtime(state)?;
    Ok(runtime.settings.clone())
}

pub fn update_settings_impl(
    state: &AppState,
    settings: AppSettings,
) -> Result<AppSettings, InfraError> {
    let settings = AppSettings {
        working_hours_start: settings.working_hours_start.trim().to_string(),
        working_hours_end: settings.working_hours_end.trim().to_string(),
        ..settings
    };
    settings.validate(state.config.focus.min_block_minutes)?;

    {
        let mut runtime = lock_runtime(state)?;
        state.gateway.save_settings(&settings)?;
        runtime.settings = settings.clone();
    }
    state.log_info("update_settings", "replaced settings");
    Ok(settings)
}

pub fn daily_summary_impl(
    state: &AppState,
    date: Option<String>,
) -> Result<DailySummary, InfraError> {
    let date = resolve_date(state, date, "date")?;
    let runtime = lock_runtime(state)?;
    Ok(daily_summary(
        &runtime.controller.store().list(),
        &runtime.reflections,
        &date,
    ))
}

/// Defaults to the week (Monday first) containing today.
pub fn weekly_summary_impl(
    state: &AppState,
    week_start: Option<String>,
) -> Result<WeeklySummary, InfraError> {
    let week_start = match non_empty(week_start) {
        Some(value) => parse_date(&value)
            .ok_or_else(|| InfraError::validation("week_start", "must be YYYY-MM-DD"))?,
        None => week_start_for(state.now().date()),
    };
    let runtime = lock_runtime(state)?;
    Ok(weekly_summary(
        &runtime.controller.store().list(),
        &runtime.reflections,
        week_start,
    ))
}

/// Removes every stored record and returns to first-run defaults. Without
/// confirmation nothing changes and `false` is returned.
pub fn reset_all_data_impl(state: &AppState, confirmed: bool) -> Result<bool, InfraError> {
    if !confirmed {
        state.log_info("reset_all_data", "reset requested without confirmation");
        return Ok(false);
    }

    {
        let mut runtime = lock_runtime(state)?;
        state.gateway.remove_all()?;
        state.cancel_ticker();
        runtime.controller.clear_session();
        runtime
            .controller
            .store_mut()
            .load_all(false, &state.today())?;
        runtime.categories = default_categories();
        runtime.reflections.clear();
        runtime.settings = AppSettings::default();
    }
    state.log_info("reset_all_data", "removed all stored data");
    Ok(true)
}

/// Applies a session transition, then brings the tick task and the
/// persisted focus flag in line with the controller.
fn focus_command<T>(
    state: &Arc<AppState>,
    command: &str,
    apply: impl FnOnce(&mut FocusController) -> Result<T, InfraError>,
) -> Result<T, InfraError> {
    let mut runtime = lock_runtime(state)?;
    let value = apply(&mut runtime.controller)?;
    state.reconcile_ticker(&runtime.controller);
    state.persist_focus_flag(command, runtime.controller.focus_mode());
    Ok(value)
}

fn insert_draft(
    state: &AppState,
    runtime: &mut RuntimeState,
    draft: BlockDraft,
) -> Result<TimeBlock, InfraError> {
    let fallback_color = category_color(&runtime.categories, draft.category_id.trim())?;
    let block = draft.into_block(new_block_id(), &fallback_color);
    block.validate(state.config.focus.min_block_minutes)?;
    runtime.controller.store_mut().add_block(block)
}

fn category_color(categories: &[BlockCategory], category_id: &str) -> Result<String, InfraError> {
    categories
        .iter()
        .find(|category| category.id == category_id)
        .map(|category| category.color.clone())
        .ok_or_else(|| InfraError::validation("category", format!("unknown category {category_id}")))
}

fn ensure_unique_name(
    categories: &[BlockCategory],
    name: &str,
    except_id: Option<&str>,
) -> Result<(), InfraError> {
    let taken = categories.iter().any(|category| {
        Some(category.id.as_str()) != except_id
            && category.name.trim().to_lowercase() == name.trim().to_lowercase()
    });
    if taken {
        return Err(InfraError::validation(
            "category.name",
            format!("a category named {name} already exists"),
        ));
    }
    Ok(())
}

fn normalize_patch(patch: BlockPatch) -> BlockPatch {
    let trimmed = |value: Option<String>| value.map(|value| value.trim().to_string());
    BlockPatch {
        title: trimmed(patch.title),
        date: patch
            .date
            .map(|value| normalize_date(&value).unwrap_or(value)),
        start_time: trimmed(patch.start_time),
        end_time: trimmed(patch.end_time),
        category_id: trimmed(patch.category_id),
        color: trimmed(patch.color),
        tasks: patch.tasks.map(|tasks| {
            tasks
                .into_iter()
                .map(|task| task.trim().to_string())
                .filter(|task| !task.is_empty())
                .collect()
        }),
    }
}

fn resolve_date(
    state: &AppState,
    date: Option<String>,
    field: &'static str,
) -> Result<String, InfraError> {
    match non_empty(date) {
        Some(value) => {
            normalize_date(&value).ok_or_else(|| InfraError::validation(field, "must be YYYY-MM-DD"))
        }
        None => Ok(state.today()),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn lock_runtime(state: &AppState) -> Result<MutexGuard<'_, RuntimeState>, InfraError> {
    state
        .runtime
        .lock()
        .map_err(|error| InfraError::StateUnavailable(format!("runtime lock poisoned: {error}")))
}
