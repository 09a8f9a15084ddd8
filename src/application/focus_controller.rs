use crate::application::block_store::TimeBlockStore;
use crate::application::focus_mode::FocusModeSignal;
use crate::domain::models::TimeBlock;
use crate::domain::timer::{format_clock, FocusTimer, ResetOutcome, TickOutcome};
use crate::infrastructure::error::InfraError;
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone)]
struct FocusSession {
    block_id: String,
    timer: FocusTimer,
    generation: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FocusSnapshot {
    pub block_id: Option<String>,
    pub block_title: Option<String>,
    pub phase: String,
    pub duration_seconds: i64,
    pub remaining_seconds: i64,
    pub remaining_label: String,
    pub progress: u8,
    pub focus_mode: bool,
    pub generation: Option<u64>,
}

/// Raised once when a session runs to zero.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FocusCompletion {
    pub block: TimeBlock,
    pub focused_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusTick {
    /// No session, or the tick belongs to a session that has since ended.
    Stale,
    Paused(FocusSnapshot),
    Counting(FocusSnapshot),
    Completed(FocusCompletion),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusStart {
    pub snapshot: FocusSnapshot,
    pub completion: Option<FocusCompletion>,
}

/// Drives focus sessions against the block store.
///
/// All active-flag writes go through here: starting focus on a block
/// deactivates whichever block held the flag before, in one store
/// mutation, before the timer exists. The focus-mode flag is published on
/// every session transition.
pub struct FocusController {
    store: TimeBlockStore,
    signal: FocusModeSignal,
    session: Option<FocusSession>,
    partial_progress: u8,
    next_generation: u64,
}

impl FocusController {
    pub fn new(store: TimeBlockStore, partial_progress: u8) -> Self {
        Self {
            store,
            signal: FocusModeSignal::default(),
            session: None,
            partial_progress,
            next_generation: 1,
        }
    }

    pub fn store(&self) -> &TimeBlockStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut TimeBlockStore {
        &mut self.store
    }

    pub fn focus_mode(&self) -> bool {
        self.signal.is_enabled()
    }

    pub fn subscribe_focus_mode(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    pub fn session_generation(&self) -> Option<u64> {
        self.session.as_ref().map(|session| session.generation)
    }

    pub fn session_block_id(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.block_id.as_str())
    }

    pub fn is_ticking(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.timer.is_running())
    }

    pub fn start_focus(&mut self, block_id: &str) -> Result<FocusStart, InfraError> {
        let block = self
            .store
            .get(block_id)
            .ok_or_else(|| InfraError::NotFound(format!("block {block_id}")))?;
        if block.is_completed {
            return Err(InfraError::Conflict(format!(
                "block {block_id} is already completed"
            )));
        }

        let activated = self.store.activate(block_id)?;

        self.session = Some(FocusSession {
            block_id: activated.id.clone(),
            timer: FocusTimer::new(activated.duration_seconds()),
            generation: self.bump_generation(),
        });
        self.signal.publish(true);

        let completion = if self.session_timer_completed() {
            Some(self.on_timer_complete()?)
        } else {
            None
        };
        Ok(FocusStart {
            snapshot: self.snapshot(),
            completion,
        })
    }

    /// Advances the session timer by one second. `generation` identifies the
    /// session the caller was started for.
    pub fn tick(&mut self, generation: u64) -> Result<FocusTick, InfraError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(FocusTick::Stale);
        };
        if session.generation != generation {
            return Ok(FocusTick::Stale);
        }
        let outcome = session.timer.tick();
        // a completed timer whose completion failed to save retries here
        let completed = session.timer.is_completed();
        match outcome {
            TickOutcome::Counting { .. } => Ok(FocusTick::Counting(self.snapshot())),
            TickOutcome::Completed => Ok(FocusTick::Completed(self.on_timer_complete()?)),
            TickOutcome::Ignored if completed => {
                Ok(FocusTick::Completed(self.on_timer_complete()?))
            }
            TickOutcome::Ignored => Ok(FocusTick::Paused(self.snapshot())),
        }
    }

    /// Marks the session block completed and leaves focus mode. If saving
    /// fails the session stays in place so completion can be retried.
    pub fn on_timer_complete(&mut self) -> Result<FocusCompletion, InfraError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| InfraError::Conflict("no focus session".to_string()))?;
        let focused_seconds = session.timer.elapsed_seconds();
        let block_id = session.block_id.clone();

        let block = self.store.mark_completed(&block_id)?;

        self.session = None;
        self.signal.publish(false);
        Ok(FocusCompletion {
            block,
            focused_seconds,
        })
    }

    pub fn pause_timer(&mut self) -> Result<FocusSnapshot, InfraError> {
        let session = self.require_session()?;
        session.timer.pause();
        self.signal.publish(false);
        Ok(self.snapshot())
    }

    pub fn resume_timer(&mut self) -> Result<FocusSnapshot, InfraError> {
        let session = self.require_session()?;
        if session.timer.is_completed() {
            return Err(InfraError::Conflict("focus session already completed".to_string()));
        }
        session.timer.resume();
        self.signal.publish(true);
        Ok(self.snapshot())
    }

    /// Leaves the focus screen without ending the session: the block stays
    /// active and its progress is untouched.
    pub fn pause_and_exit(&mut self) -> Result<FocusSnapshot, InfraError> {
        if self.store.active_id().is_none() && self.session.is_none() {
            return Err(InfraError::Conflict("no focus session".to_string()));
        }
        if let Some(session) = self.session.as_mut() {
            session.timer.pause();
        }
        self.signal.publish(false);
        Ok(self.snapshot())
    }

    /// Ends the session early. The block is deactivated and stored with
    /// the configured partial progress.
    pub fn end_session(&mut self) -> Result<TimeBlock, InfraError> {
        let block_id = self
            .session
            .as_ref()
            .map(|session| session.block_id.clone())
            .or_else(|| self.store.active_id().map(ToOwned::to_owned))
            .ok_or_else(|| InfraError::Conflict("no focus session".to_string()))?;

        let block = self.store.mark_partial(&block_id, self.partial_progress)?;

        self.session = None;
        self.signal.publish(false);
        Ok(block)
    }

    /// Re-enters focus on the block the store already marks active.
    pub fn resume_focus(&mut self) -> Result<FocusSnapshot, InfraError> {
        let active = self
            .store
            .active_block()
            .cloned()
            .ok_or_else(|| InfraError::Conflict("no active block to resume".to_string()))?;

        let reuse = self
            .session
            .as_ref()
            .is_some_and(|session| session.block_id == active.id && !session.timer.is_completed());
        if reuse {
            if let Some(session) = self.session.as_mut() {
                session.timer.resume();
            }
        } else {
            self.session = Some(FocusSession {
                block_id: active.id.clone(),
                timer: FocusTimer::new(active.duration_seconds()),
                generation: self.bump_generation(),
            });
        }
        self.signal.publish(true);

        if self.session_timer_completed() {
            self.on_timer_complete()?;
        }
        Ok(self.snapshot())
    }

    pub fn reset_timer(
        &mut self,
        confirmed: bool,
    ) -> Result<(ResetOutcome, FocusSnapshot), InfraError> {
        let session = self.require_session()?;
        let outcome = session.timer.reset(confirmed);
        if outcome == ResetOutcome::Restarted {
            self.signal.publish(true);
        }
        Ok((outcome, self.snapshot()))
    }

    /// Drops the session if it targets `block_id`, e.g. before the block is
    /// deleted.
    pub fn forget_block(&mut self, block_id: &str) {
        if self.session_block_id() == Some(block_id) {
            self.session = None;
            self.signal.publish(false);
        }
    }

    /// Drops any session and leaves focus mode, without touching blocks.
    pub fn clear_session(&mut self) {
        self.session = None;
        self.signal.publish(false);
    }

    pub fn snapshot(&self) -> FocusSnapshot {
        let focus_mode = self.signal.is_enabled();
        let Some(session) = self.session.as_ref() else {
            return FocusSnapshot {
                block_id: self.store.active_id().map(ToOwned::to_owned),
                block_title: self.store.active_block().map(|block| block.title.clone()),
                phase: "idle".to_string(),
                duration_seconds: 0,
                remaining_seconds: 0,
                remaining_label: format_clock(0),
                progress: 0,
                focus_mode,
                generation: None,
            };
        };
        FocusSnapshot {
            block_id: Some(session.block_id.clone()),
            block_title: self
                .store
                .get(&session.block_id)
                .map(|block| block.title.clone()),
            phase: session.timer.phase().as_str().to_string(),
            duration_seconds: session.timer.duration_seconds(),
            remaining_seconds: session.timer.remaining_seconds(),
            remaining_label: session.timer.remaining_label(),
            progress: session.timer.progress(),
            focus_mode,
            generation: Some(session.generation),
        }
    }

    fn require_session(&mut self) -> Result<&mut FocusSession, InfraError> {
        self.session
            .as_mut()
            .ok_or_else(|| InfraError::Conflict("no focus session".to_string()))
    }

    fn session_timer_completed(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.timer.is_completed())
    }

    fn bump_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::block_store::tests::{block, FlakyKeyValueStore};
    use crate::infrastructure::config::WritePolicy;
    use crate::infrastructure::persistence::PersistenceGateway;
    use crate::infrastructure::storage::KeyValueStore;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn controller_with(blocks: Vec<TimeBlock>) -> (Arc<FlakyKeyValueStore>, FocusController) {
        controller_with_policy(blocks, WritePolicy::Immediate)
    }

    fn controller_with_policy(
        blocks: Vec<TimeBlock>,
        policy: WritePolicy,
    ) -> (Arc<FlakyKeyValueStore>, FocusController) {
        let kv = Arc::new(FlakyKeyValueStore::default());
        let gateway = PersistenceGateway::new(Arc::clone(&kv) as Arc<dyn KeyValueStore>);
        let mut store = TimeBlockStore::new(gateway, policy);
        store.save_all(blocks).expect("seed blocks");
        (kv, FocusController::new(store, 50))
    }

    fn deep_work() -> TimeBlock {
        let mut deep = block("deep", "2024-06-01", "09:00", "10:00");
        deep.title = "Deep Work".to_string();
        deep.category_id = "cat-creative".to_string();
        deep
    }

    fn run_to_end(controller: &mut FocusController) -> FocusCompletion {
        let generation = controller.session_generation().expect("session");
        loop {
            match controller.tick(generation).expect("tick") {
                FocusTick::Completed(completion) => return completion,
                FocusTick::Counting(_) => continue,
                other => panic!("unexpected tick {other:?}"),
            }
        }
    }

    #[test]
    fn deep_work_runs_to_completion() {
        let other = block("other", "2024-06-01", "11:00", "12:00");
        let (_kv, mut controller) = controller_with(vec![deep_work(), other.clone()]);

        let started = controller.start_focus("deep").expect("start");
        assert!(started.completion.is_none());
        assert_eq!(started.snapshot.duration_seconds, 3600);
        assert!(controller.store().get("deep").expect("deep").is_active);
        assert!(controller.focus_mode());

        let completion = run_to_end(&mut controller);
        assert_eq!(completion.focused_seconds, 3600);

        let deep = controller.store().get("deep").expect("deep");
        assert!(deep.is_completed);
        assert_eq!(deep.progress, 100);
        assert!(!deep.is_active);
        assert_eq!(controller.store().get("other"), Some(&other));
        assert!(!controller.focus_mode());
        assert_eq!(controller.session_generation(), None);
    }

    #[test]
    fn restarting_focus_moves_the_active_flag() {
        let a = block("a", "2024-06-01", "09:00", "10:00");
        let b = block("b", "2024-06-01", "10:00", "11:00");
        let (_kv, mut controller) = controller_with(vec![a, b]);

        controller.start_focus("a").expect("start a");
        let first_generation = controller.session_generation().expect("session a");
        controller.start_focus("b").expect("start b");

        assert!(!controller.store().get("a").expect("a").is_active);
        assert!(controller.store().get("b").expect("b").is_active);
        assert_eq!(controller.store().active_id(), Some("b"));
        assert_eq!(
            controller.tick(first_generation).expect("stale tick"),
            FocusTick::Stale
        );
    }

    #[test]
    fn zero_length_block_completes_on_start() {
        let broken = block("broken", "2024-06-01", "10:00", "09:00");
        let (_kv, mut controller) = controller_with(vec![broken]);

        let started = controller.start_focus("broken").expect("start");
        let completion = started.completion.expect("immediate completion");
        assert!(completion.block.is_completed);
        assert_eq!(completion.focused_seconds, 0);
        assert!(!controller.focus_mode());
        assert_eq!(started.snapshot.phase, "idle");
    }

    #[test]
    fn completed_block_cannot_restart() {
        let mut done = block("done", "2024-06-01", "09:00", "10:00");
        done.is_completed = true;
        done.progress = 100;
        let (_kv, mut controller) = controller_with(vec![done]);
        assert!(matches!(
            controller.start_focus("done"),
            Err(InfraError::Conflict(_))
        ));
        assert!(matches!(
            controller.start_focus("missing"),
            Err(InfraError::NotFound(_))
        ));
    }

    #[test]
    fn pause_and_exit_keeps_block_active_and_resume_continues() {
        let (_kv, mut controller) = controller_with(vec![deep_work()]);
        controller.start_focus("deep").expect("start");
        let generation = controller.session_generation().expect("session");
        for _ in 0..90 {
            controller.tick(generation).expect("tick");
        }

        let exited = controller.pause_and_exit().expect("exit");
        assert_eq!(exited.phase, "paused");
        assert!(!exited.focus_mode);
        let deep = controller.store().get("deep").expect("deep");
        assert!(deep.is_active);
        assert_eq!(deep.progress, 0);
        assert!(matches!(
            controller.tick(generation).expect("paused tick"),
            FocusTick::Paused(_)
        ));

        let resumed = controller.resume_focus().expect("resume");
        assert!(resumed.focus_mode);
        assert_eq!(resumed.phase, "running");
        assert_eq!(resumed.remaining_seconds, 3600 - 90);
        assert_eq!(resumed.generation, Some(generation));
    }

    #[test]
    fn resume_focus_without_timer_builds_a_fresh_one() {
        let mut active = deep_work();
        active.is_active = true;
        let (_kv, mut controller) = controller_with(vec![active]);
        assert_eq!(controller.session_generation(), None);

        let resumed = controller.resume_focus().expect("resume");
        assert_eq!(resumed.phase, "running");
        assert_eq!(resumed.duration_seconds, 3600);
        assert_eq!(resumed.remaining_seconds, 3600);
        assert!(controller.focus_mode());
    }

    #[test]
    fn end_session_stores_partial_progress() {
        let (_kv, mut controller) = controller_with(vec![deep_work()]);
        controller.start_focus("deep").expect("start");
        let ended = controller.end_session().expect("end");

        assert!(!ended.is_active);
        assert!(!ended.is_completed);
        assert_eq!(ended.progress, 50);
        assert!(!controller.focus_mode());
        assert_eq!(controller.store().active_id(), None);
        assert!(matches!(controller.end_session(), Err(InfraError::Conflict(_))));
    }

    #[test]
    fn pause_resume_and_reset_flow() {
        let (_kv, mut controller) = controller_with(vec![deep_work()]);
        controller.start_focus("deep").expect("start");
        let generation = controller.session_generation().expect("session");
        controller.tick(generation).expect("tick");

        let paused = controller.pause_timer().expect("pause");
        assert_eq!(paused.phase, "paused");
        assert!(!paused.focus_mode);
        let paused_again = controller.pause_timer().expect("pause twice");
        assert_eq!(paused_again, paused);

        let (outcome, unchanged) = controller.reset_timer(false).expect("reset unconfirmed");
        assert_eq!(outcome, ResetOutcome::NeedsConfirmation);
        assert_eq!(unchanged.remaining_seconds, 3599);

        let (outcome, reset) = controller.reset_timer(true).expect("reset");
        assert_eq!(outcome, ResetOutcome::Restarted);
        assert_eq!(reset.remaining_seconds, 3600);
        assert_eq!(reset.phase, "running");
        assert!(reset.focus_mode);

        controller.pause_timer().expect("pause");
        let resumed = controller.resume_timer().expect("resume");
        assert_eq!(resumed.phase, "running");
    }

    #[test]
    fn failed_start_leaves_state_untouched() {
        let a = block("a", "2024-06-01", "09:00", "10:00");
        let b = block("b", "2024-06-01", "10:00", "11:00");
        let (kv, mut controller) = controller_with(vec![a, b]);
        controller.start_focus("a").expect("start a");

        kv.fail_writes.store(true, Ordering::SeqCst);
        assert!(controller.start_focus("b").is_err());
        assert_eq!(controller.store().active_id(), Some("a"));
        assert_eq!(controller.session_block_id(), Some("a"));
        assert!(controller.focus_mode());
    }

    #[test]
    fn failed_deferred_start_leaves_state_untouched() {
        let a = block("a", "2024-06-01", "09:00", "10:00");
        let b = block("b", "2024-06-01", "10:00", "11:00");
        let (kv, mut controller) = controller_with_policy(vec![a, b], WritePolicy::Deferred);
        controller.start_focus("a").expect("start a");

        kv.fail_writes.store(true, Ordering::SeqCst);
        assert!(controller.start_focus("b").is_err());
        assert_eq!(controller.store().active_id(), Some("a"));
        assert!(controller.store().get("a").expect("a").is_active);
        assert!(!controller.store().get("b").expect("b").is_active);
        assert!(!controller.store().is_dirty());
        assert_eq!(controller.session_block_id(), Some("a"));
        assert!(controller.focus_mode());

        kv.fail_writes.store(false, Ordering::SeqCst);
        controller.start_focus("b").expect("start b");
        assert_eq!(controller.store().active_id(), Some("b"));
    }

    #[test]
    fn failed_deferred_end_keeps_session() {
        let a = block("a", "2024-06-01", "09:00", "10:00");
        let (kv, mut controller) = controller_with_policy(vec![a], WritePolicy::Deferred);
        controller.start_focus("a").expect("start a");

        kv.fail_writes.store(true, Ordering::SeqCst);
        assert!(controller.end_session().is_err());
        let stored = controller.store().get("a").expect("a");
        assert!(stored.is_active);
        assert_eq!(stored.progress, 0);
        assert_eq!(controller.session_block_id(), Some("a"));
        assert!(controller.focus_mode());
    }

    #[test]
    fn failed_completion_can_be_retried() {
        let short = block("short", "2024-06-01", "09:00", "09:15");
        let (kv, mut controller) = controller_with(vec![short]);
        controller.start_focus("short").expect("start");
        let generation = controller.session_generation().expect("session");
        for _ in 0..(15 * 60 - 1) {
            controller.tick(generation).expect("tick");
        }

        kv.fail_writes.store(true, Ordering::SeqCst);
        assert!(controller.tick(generation).is_err());
        assert!(!controller.store().get("short").expect("short").is_completed);

        kv.fail_writes.store(false, Ordering::SeqCst);
        match controller.tick(generation).expect("retry tick") {
            FocusTick::Completed(completion) => assert!(completion.block.is_completed),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn forgetting_the_session_block_leaves_focus_mode() {
        let (_kv, mut controller) = controller_with(vec![deep_work()]);
        controller.start_focus("deep").expect("start");
        controller.forget_block("other");
        assert!(controller.focus_mode());
        controller.forget_block("deep");
        assert!(!controller.focus_mode());
        assert_eq!(controller.session_generation(), None);
    }
}
