use crate::domain::models::{
    default_categories, AppSettings, BlockCategory, DailyReflection, TimeBlock,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

pub const BLOCKS_KEY: &str = "blockfocus.blocks";
pub const CATEGORIES_KEY: &str = "blockfocus.categories";
pub const REFLECTIONS_KEY: &str = "blockfocus.reflections";
pub const SETTINGS_KEY: &str = "blockfocus.settings";
pub const FOCUS_MODE_KEY: &str = "blockfocus.focus_mode";

pub const ALL_KEYS: [&str; 5] = [
    BLOCKS_KEY,
    CATEGORIES_KEY,
    REFLECTIONS_KEY,
    SETTINGS_KEY,
    FOCUS_MODE_KEY,
];

/// Typed access to the records kept in key-value storage. Absent keys map
/// to defaults; malformed values are errors.
#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn KeyValueStore>,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// `None` when nothing was ever saved, so callers can tell a first run
    /// from an emptied collection.
    pub fn load_blocks(&self) -> Result<Option<Vec<TimeBlock>>, InfraError> {
        self.read(BLOCKS_KEY)
    }

    pub fn save_blocks(&self, blocks: &[TimeBlock]) -> Result<(), InfraError> {
        self.write(BLOCKS_KEY, &blocks)
    }

    pub fn load_categories(&self) -> Result<Vec<BlockCategory>, InfraError> {
        Ok(self
            .read(CATEGORIES_KEY)?
            .unwrap_or_else(default_categories))
    }

    pub fn save_categories(&self, categories: &[BlockCategory]) -> Result<(), InfraError> {
        self.write(CATEGORIES_KEY, &categories)
    }

    pub fn load_reflections(&self) -> Result<Vec<DailyReflection>, InfraError> {
        Ok(self.read(REFLECTIONS_KEY)?.unwrap_or_default())
    }

    pub fn save_reflections(&self, reflections: &[DailyReflection]) -> Result<(), InfraError> {
        self.write(REFLECTIONS_KEY, &reflections)
    }

    pub fn load_settings(&self) -> Result<AppSettings, InfraError> {
        Ok(self.read(SETTINGS_KEY)?.unwrap_or_default())
    }

    pub fn save_settings(&self, settings: &AppSettings) -> Result<(), InfraError> {
        self.write(SETTINGS_KEY, settings)
    }

    pub fn load_focus_mode(&self) -> Result<bool, InfraError> {
        Ok(self.read(FOCUS_MODE_KEY)?.unwrap_or(false))
    }

    pub fn save_focus_mode(&self, enabled: bool) -> Result<(), InfraError> {
        self.write(FOCUS_MODE_KEY, &enabled)
    }

    pub fn remove_all(&self) -> Result<(), InfraError> {
        self.store.remove_many(&ALL_KEYS)
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, InfraError> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), InfraError> {
        let payload = serde_json::to_string(value)?;
        self.store.set(key, &payload)
    }
}
