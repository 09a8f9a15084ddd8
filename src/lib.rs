pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::commands::{
    add_sample_data_impl, add_task_impl, block_stats_impl, create_block_impl,
    create_category_impl, create_quick_block_impl, daily_summary_impl, delete_block_impl,
    delete_category_impl, edit_block_impl, end_session_impl, flush_impl, get_block_impl,
    get_focus_state_impl, get_settings_impl, list_blocks_impl, list_categories_impl,
    list_reflections_impl, pause_and_exit_impl, pause_focus_impl, remove_task_impl,
    reset_all_data_impl, reset_timer_impl, resume_focus_impl, resume_timer_impl, run_command,
    save_reflection_impl, start_focus_impl, subscribe_focus_mode, subscribe_notifications,
    tick_focus_impl, update_category_impl, update_settings_impl, weekly_summary_impl, AppState,
    FocusNotification, NowProvider, ResetTimerResponse,
};
pub use application::focus_controller::{FocusCompletion, FocusSnapshot, FocusTick};
pub use application::summary::{DailySummary, WeeklySummary};
pub use domain::models::{
    AppSettings, BlockCategory, BlockDraft, BlockPatch, BlockStats, DailyReflection, TimeBlock,
};
pub use infrastructure::error::InfraError;

use std::path::PathBuf;
use std::sync::Arc;

/// Opens (and on first use lays out) the workspace at `root`, defaulting to
/// the current directory.
pub fn open_workspace(root: Option<String>) -> Result<Arc<AppState>, String> {
    let workspace_root = match root {
        Some(path) => PathBuf::from(path),
        None => std::env::current_dir().map_err(|error| error.to_string())?,
    };

    let state = AppState::new(workspace_root).map_err(|error| error.to_string())?;
    state.log_info(
        "bootstrap",
        &format!("opened database {}", state.database_path().display()),
    );
    Ok(Arc::new(state))
}
