use crate::domain::models::{
    minutes_between, normalize_date, sample_blocks, BlockPatch, BlockStats, TimeBlock,
    COMPLETE_PROGRESS,
};
use crate::infrastructure::config::WritePolicy;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::persistence::PersistenceGateway;
use indexmap::IndexMap;

/// Blocks scheduled on `date`, in their original order. A malformed date
/// matches nothing.
pub fn filter_by_date(blocks: &[TimeBlock], date: &str) -> Vec<TimeBlock> {
    let Some(date) = normalize_date(date) else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter(|block| block.date == date)
        .cloned()
        .collect()
}

pub fn compute_stats(blocks: &[TimeBlock]) -> BlockStats {
    let completed = blocks.iter().filter(|block| block.is_completed);
    BlockStats {
        completed: completed.clone().count(),
        total: blocks.len(),
        total_minutes: completed
            .filter_map(|block| minutes_between(&block.start_time, &block.end_time))
            .filter(|minutes| *minutes > 0)
            .sum(),
    }
}

/// In-memory block collection keyed by id, backed by the persistence
/// gateway.
///
/// The store holds the single active-block reference; the per-record
/// `is_active` flags are kept in step with it and only exist for the
/// serialized form. Mutations either persist immediately (restoring the
/// previous state if the write fails) or mark the store dirty until
/// [`TimeBlockStore::flush`], depending on the [`WritePolicy`].
pub struct TimeBlockStore {
    gateway: PersistenceGateway,
    write_policy: WritePolicy,
    blocks: IndexMap<String, TimeBlock>,
    active: Option<String>,
    dirty: bool,
}

struct Snapshot {
    blocks: IndexMap<String, TimeBlock>,
    active: Option<String>,
    dirty: bool,
}

impl TimeBlockStore {
    pub fn new(gateway: PersistenceGateway, write_policy: WritePolicy) -> Self {
        Self {
            gateway,
            write_policy,
            blocks: IndexMap::new(),
            active: None,
            dirty: false,
        }
    }

    /// Loads the persisted collection. With `seed_on_first_run`, a store
    /// that has never been written receives the sample day for `today`.
    /// Records without a date are assigned `today`.
    pub fn load_all(
        &mut self,
        seed_on_first_run: bool,
        today: &str,
    ) -> Result<Vec<TimeBlock>, InfraError> {
        let loaded = match self.gateway.load_blocks()? {
            Some(blocks) => blocks,
            None if seed_on_first_run => {
                let seeded = sample_blocks(today, new_block_id);
                self.gateway.save_blocks(&seeded)?;
                seeded
            }
            None => Vec::new(),
        };

        let mut backfilled = false;
        let blocks = loaded
            .into_iter()
            .map(|mut block| {
                if block.date.trim().is_empty() {
                    block.date = today.to_string();
                    backfilled = true;
                }
                block
            })
            .collect::<Vec<_>>();
        let repaired = self.replace(blocks);
        self.dirty = backfilled || repaired;
        Ok(self.list())
    }

    /// Replaces the collection and persists it in full.
    pub fn save_all(&mut self, blocks: Vec<TimeBlock>) -> Result<(), InfraError> {
        let snapshot = self.snapshot();
        self.replace(blocks);
        if let Err(error) = self.persist() {
            self.restore(snapshot);
            return Err(error);
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), InfraError> {
        if !self.dirty {
            return Ok(());
        }
        self.persist()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn list(&self) -> Vec<TimeBlock> {
        self.blocks.values().cloned().collect()
    }

    pub fn get(&self, block_id: &str) -> Option<&TimeBlock> {
        self.blocks.get(block_id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_block(&self) -> Option<&TimeBlock> {
        self.active
            .as_deref()
            .and_then(|block_id| self.blocks.get(block_id))
    }

    pub fn filter_by_date(&self, date: &str) -> Vec<TimeBlock> {
        filter_by_date(&self.list(), date)
    }

    pub fn compute_stats(&self) -> BlockStats {
        compute_stats(&self.list())
    }

    pub fn references_category(&self, category_id: &str) -> bool {
        self.blocks
            .values()
            .any(|block| block.category_id == category_id)
    }

    pub fn add_block(&mut self, block: TimeBlock) -> Result<TimeBlock, InfraError> {
        self.mutate(|store| {
            let mut block = block;
            block.is_active = false;
            store.blocks.insert(block.id.clone(), block.clone());
            Ok(block)
        })
    }

    pub fn add_blocks(&mut self, blocks: Vec<TimeBlock>) -> Result<usize, InfraError> {
        self.mutate(|store| {
            let count = blocks.len();
            for mut block in blocks {
                block.is_active = false;
                store.blocks.insert(block.id.clone(), block);
            }
            Ok(count)
        })
    }

    /// Merges `patch` into the stored block without re-validating it.
    pub fn update_block(
        &mut self,
        block_id: &str,
        patch: &BlockPatch,
    ) -> Result<TimeBlock, InfraError> {
        self.mutate(|store| {
            let block = store
                .blocks
                .get_mut(block_id)
                .ok_or_else(|| InfraError::NotFound(format!("block {block_id}")))?;
            block.apply_patch(patch);
            Ok(block.clone())
        })
    }

    /// Returns `false` when no block has `block_id`.
    pub fn delete_block(&mut self, block_id: &str) -> Result<bool, InfraError> {
        if !self.blocks.contains_key(block_id) {
            return Ok(false);
        }
        self.mutate(|store| {
            store.blocks.shift_remove(block_id);
            if store.active.as_deref() == Some(block_id) {
                store.active = None;
            }
            Ok(true)
        })
    }

    /// Makes `block_id` the only active block.
    pub(crate) fn activate(&mut self, block_id: &str) -> Result<TimeBlock, InfraError> {
        if !self.blocks.contains_key(block_id) {
            return Err(InfraError::NotFound(format!("block {block_id}")));
        }
        self.commit(|store| {
            store.set_active(Some(block_id));
            store
                .blocks
                .get(block_id)
                .cloned()
                .ok_or_else(|| InfraError::NotFound(format!("block {block_id}")))
        })
    }

    pub(crate) fn mark_completed(&mut self, block_id: &str) -> Result<TimeBlock, InfraError> {
        self.finish(block_id, true, COMPLETE_PROGRESS)
    }

    pub(crate) fn mark_partial(
        &mut self,
        block_id: &str,
        progress: u8,
    ) -> Result<TimeBlock, InfraError> {
        self.finish(block_id, false, progress)
    }

    fn finish(
        &mut self,
        block_id: &str,
        completed: bool,
        progress: u8,
    ) -> Result<TimeBlock, InfraError> {
        self.commit(|store| {
            if store.active.as_deref() == Some(block_id) {
                store.set_active(None);
            }
            let block = store
                .blocks
                .get_mut(block_id)
                .ok_or_else(|| InfraError::NotFound(format!("block {block_id}")))?;
            block.is_active = false;
            if completed {
                block.is_completed = true;
            }
            block.progress = progress.min(COMPLETE_PROGRESS);
            Ok(block.clone())
        })
    }

    fn set_active(&mut self, block_id: Option<&str>) {
        for (id, block) in self.blocks.iter_mut() {
            block.is_active = Some(id.as_str()) == block_id;
        }
        self.active = block_id.map(ToOwned::to_owned);
    }

    /// Installs `blocks`, keeping the first block flagged active (if any)
    /// and clearing the rest. Returns whether any flag had to be cleared.
    fn replace(&mut self, blocks: Vec<TimeBlock>) -> bool {
        let active = blocks
            .iter()
            .find(|block| block.is_active)
            .map(|block| block.id.clone());
        let active_count = blocks.iter().filter(|block| block.is_active).count();
        self.blocks = blocks
            .into_iter()
            .map(|block| (block.id.clone(), block))
            .collect();
        self.set_active(active.as_deref());
        active_count > 1
    }

    fn mutate<T>(
        &mut self,
        apply: impl FnOnce(&mut Self) -> Result<T, InfraError>,
    ) -> Result<T, InfraError> {
        let persist = self.write_policy == WritePolicy::Immediate;
        self.apply_mutation(persist, apply)
    }

    /// Session boundaries persist under every write policy, together with
    /// any pending deferred changes. A failed write restores the previous
    /// state.
    fn commit<T>(
        &mut self,
        apply: impl FnOnce(&mut Self) -> Result<T, InfraError>,
    ) -> Result<T, InfraError> {
        self.apply_mutation(true, apply)
    }

    fn apply_mutation<T>(
        &mut self,
        persist: bool,
        apply: impl FnOnce(&mut Self) -> Result<T, InfraError>,
    ) -> Result<T, InfraError> {
        let snapshot = self.snapshot();
        let value = match apply(self) {
            Ok(value) => value,
            Err(error) => {
                self.restore(snapshot);
                return Err(error);
            }
        };
        self.dirty = true;
        if persist {
            if let Err(error) = self.persist() {
                self.restore(snapshot);
                return Err(error);
            }
        }
        Ok(value)
    }

    fn persist(&mut self) -> Result<(), InfraError> {
        self.gateway.save_blocks(&self.list())?;
        self.dirty = false;
        Ok(())
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            blocks: self.blocks.clone(),
            active: self.active.clone(),
            dirty: self.dirty,
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.blocks = snapshot.blocks;
        self.active = snapshot.active;
        self.dirty = snapshot.dirty;
    }
}

pub fn new_block_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::infrastructure::storage::{InMemoryKeyValueStore, KeyValueStore};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Delegates to memory but can be switched to fail every write.
    #[derive(Default)]
    pub(crate) struct FlakyKeyValueStore {
        inner: InMemoryKeyValueStore,
        pub(crate) fail_writes: AtomicBool,
    }

    impl KeyValueStore for FlakyKeyValueStore {
        fn get(&self, key: &str) -> Result<Option<String>, InfraError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), InfraError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(InfraError::Storage("write rejected".to_string()));
            }
            self.inner.set(key, value)
        }

        fn remove_many(&self, keys: &[&str]) -> Result<(), InfraError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(InfraError::Storage("write rejected".to_string()));
            }
            self.inner.remove_many(keys)
        }
    }

    pub(crate) fn block(id: &str, date: &str, start: &str, end: &str) -> TimeBlock {
        TimeBlock {
            id: id.to_string(),
            title: format!("Block {id}"),
            date: date.to_string(),
            start_time: start.to_string(),
            end_time: end.to_string(),
            category_id: "cat-work".to_string(),
            color: "#4A90D9".to_string(),
            tasks: Vec::new(),
            is_active: false,
            is_completed: false,
            progress: 0,
        }
    }

    fn store_with(policy: WritePolicy) -> (Arc<FlakyKeyValueStore>, TimeBlockStore) {
        let kv = Arc::new(FlakyKeyValueStore::default());
        let gateway = PersistenceGateway::new(Arc::clone(&kv) as Arc<dyn KeyValueStore>);
        (kv, TimeBlockStore::new(gateway, policy))
    }

    #[test]
    fn filter_by_date_keeps_relative_order() {
        let blocks = vec![
            block("a", "2024-06-01", "09:00", "10:00"),
            block("b", "2024-06-02", "09:00", "10:00"),
            block("c", "2024-06-01", "07:00", "08:00"),
        ];
        let filtered = filter_by_date(&blocks, "2024-06-01");
        let ids = filtered.iter().map(|b| b.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn filter_by_malformed_date_matches_nothing() {
        let blocks = vec![block("a", "2024-06-01", "09:00", "10:00")];
        assert!(filter_by_date(&blocks, "June 1st").is_empty());
        assert!(filter_by_date(&blocks, "").is_empty());
    }

    #[test]
    fn stats_of_empty_collection_are_zero() {
        assert_eq!(
            compute_stats(&[]),
            BlockStats {
                completed: 0,
                total: 0,
                total_minutes: 0
            }
        );
    }

    #[test]
    fn stats_sum_minutes_of_completed_blocks_only() {
        let mut done = block("a", "2024-06-01", "09:00", "10:30");
        done.is_completed = true;
        let mut broken = block("b", "2024-06-01", "bad", "10:00");
        broken.is_completed = true;
        let open = block("c", "2024-06-01", "11:00", "12:00");

        let stats = compute_stats(&[done, broken, open]);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.total_minutes, 90);
    }

    #[test]
    fn save_then_load_roundtrips_field_for_field() {
        let (kv, mut store) = store_with(WritePolicy::Immediate);
        let mut first = block("a", "2024-06-01", "09:00", "10:00");
        first.tasks = vec!["one".to_string(), "two".to_string()];
        first.is_active = true;
        let mut second = block("b", "2024-06-02", "13:00", "14:00");
        second.is_completed = true;
        second.progress = 100;
        let saved = vec![first, second];
        store.save_all(saved.clone()).expect("save");

        let gateway = PersistenceGateway::new(kv as Arc<dyn KeyValueStore>);
        let mut reloaded = TimeBlockStore::new(gateway, WritePolicy::Immediate);
        let loaded = reloaded.load_all(false, "2024-06-01").expect("load");
        assert_eq!(loaded, saved);
        assert_eq!(reloaded.active_id(), Some("a"));
    }

    #[test]
    fn first_run_seeding_follows_flag() {
        let (_kv, mut store) = store_with(WritePolicy::Immediate);
        assert!(store.load_all(false, "2024-06-01").expect("load").is_empty());

        let (_kv, mut store) = store_with(WritePolicy::Immediate);
        let seeded = store.load_all(true, "2024-06-01").expect("load");
        assert_eq!(seeded.len(), 4);
        assert!(seeded.iter().all(|b| b.date == "2024-06-01"));
        assert!(!store.is_dirty());
    }

    #[test]
    fn load_repairs_duplicate_active_flags_and_backfills_dates() {
        let (kv, _store) = store_with(WritePolicy::Immediate);
        let gateway = PersistenceGateway::new(Arc::clone(&kv) as Arc<dyn KeyValueStore>);
        let mut a = block("a", "", "09:00", "10:00");
        a.is_active = true;
        let mut b = block("b", "2024-06-02", "09:00", "10:00");
        b.is_active = true;
        gateway.save_blocks(&[a, b]).expect("seed");

        let mut store = TimeBlockStore::new(gateway, WritePolicy::Immediate);
        let loaded = store.load_all(false, "2024-06-01").expect("load");
        assert_eq!(loaded[0].date, "2024-06-01");
        assert!(loaded[0].is_active);
        assert!(!loaded[1].is_active);
        assert!(store.is_dirty());
    }

    #[test]
    fn update_merges_without_validation() {
        let (_kv, mut store) = store_with(WritePolicy::Immediate);
        store
            .add_block(block("a", "2024-06-01", "09:00", "10:00"))
            .expect("add");
        let updated = store
            .update_block(
                "a",
                &BlockPatch {
                    end_time: Some("08:00".to_string()),
                    ..BlockPatch::default()
                },
            )
            .expect("update");
        assert_eq!(updated.end_time, "08:00");
        assert!(matches!(
            store.update_block("missing", &BlockPatch::default()),
            Err(InfraError::NotFound(_))
        ));
    }

    #[test]
    fn failed_write_restores_previous_state() {
        let (kv, mut store) = store_with(WritePolicy::Immediate);
        store
            .add_block(block("a", "2024-06-01", "09:00", "10:00"))
            .expect("add");

        kv.fail_writes.store(true, Ordering::SeqCst);
        let result = store.add_block(block("b", "2024-06-01", "11:00", "12:00"));
        assert!(result.is_err_and(|error| error.is_persistence_failure()));
        assert_eq!(store.len(), 1);
        assert!(!store.delete_block("a").expect_err("delete fails").to_string().is_empty());
        assert!(store.get("a").is_some());
        assert!(!store.is_dirty());
    }

    #[test]
    fn deferred_policy_marks_dirty_until_flush() {
        let (kv, mut store) = store_with(WritePolicy::Deferred);
        store
            .add_block(block("a", "2024-06-01", "09:00", "10:00"))
            .expect("add");
        assert!(store.is_dirty());
        assert_eq!(kv.get(crate::infrastructure::persistence::BLOCKS_KEY).expect("get"), None);

        store.flush().expect("flush");
        assert!(!store.is_dirty());
        assert!(kv
            .get(crate::infrastructure::persistence::BLOCKS_KEY)
            .expect("get")
            .is_some());
    }

    #[test]
    fn deferred_activation_persists_or_rolls_back() {
        let (kv, mut store) = store_with(WritePolicy::Deferred);
        store
            .add_blocks(vec![
                block("a", "2024-06-01", "09:00", "10:00"),
                block("b", "2024-06-01", "10:00", "11:00"),
            ])
            .expect("add");
        store.activate("a").expect("activate a");
        assert!(!store.is_dirty());

        kv.fail_writes.store(true, Ordering::SeqCst);
        assert!(store.activate("b").is_err());
        assert!(store.mark_completed("a").is_err());
        assert_eq!(store.active_id(), Some("a"));
        assert!(store.get("a").expect("a").is_active);
        assert!(!store.get("a").expect("a").is_completed);
        assert!(!store.get("b").expect("b").is_active);
    }

    #[test]
    fn deleting_active_block_clears_reference() {
        let (_kv, mut store) = store_with(WritePolicy::Immediate);
        store
            .add_block(block("a", "2024-06-01", "09:00", "10:00"))
            .expect("add");
        store.activate("a").expect("activate");
        assert!(store.delete_block("a").expect("delete"));
        assert_eq!(store.active_id(), None);
        assert!(!store.delete_block("a").expect("second delete"));
    }

    proptest! {
        #[test]
        fn activation_leaves_exactly_one_active(
            count in 1usize..12,
            picks in proptest::collection::vec(0usize..12, 1..8)
        ) {
            let (_kv, mut store) = store_with(WritePolicy::Deferred);
            for index in 0..count {
                store
                    .add_block(block(&format!("b{index}"), "2024-06-01", "09:00", "10:00"))
                    .expect("add");
            }
            for pick in picks {
                let id = format!("b{}", pick % count);
                store.activate(&id).expect("activate");
                let active = store.list().into_iter().filter(|b| b.is_active).collect::<Vec<_>>();
                prop_assert_eq!(active.len(), 1);
                prop_assert_eq!(&active[0].id, &id);
                prop_assert_eq!(store.active_id(), Some(id.as_str()));
            }
        }
    }
}
