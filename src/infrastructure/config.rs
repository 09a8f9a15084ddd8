use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const FOCUS_JSON: &str = "focus.json";
const SUPPORTED_SCHEMA: u64 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Persist the whole collection on every mutation.
    Immediate,
    /// Track dirtiness and persist at session boundaries or on flush.
    Deferred,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub app_name: String,
    pub database_file: String,
    pub seed_on_first_run: bool,
    pub write_policy: WritePolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: "BlockFocus".to_string(),
            database_file: "blockfocus.sqlite".to_string(),
            seed_on_first_run: false,
            write_policy: WritePolicy::Immediate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FocusConfig {
    pub tick_interval_ms: u64,
    pub partial_progress: u8,
    pub min_block_minutes: u32,
    pub quick_block_minutes: u32,
    pub quick_block_task: String,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            partial_progress: 50,
            min_block_minutes: 15,
            quick_block_minutes: 30,
            quick_block_task: "Stay on a single task".to_string(),
        }
    }
}

impl FocusConfig {
    fn validate(&self) -> Result<(), InfraError> {
        if self.tick_interval_ms == 0 {
            return Err(InfraError::InvalidConfig(
                "focus.tickIntervalMs must be > 0".to_string(),
            ));
        }
        if self.partial_progress >= 100 {
            return Err(InfraError::InvalidConfig(
                "focus.partialProgress must be < 100".to_string(),
            ));
        }
        if self.quick_block_minutes < self.min_block_minutes {
            return Err(InfraError::InvalidConfig(
                "focus.quickBlockMinutes must be >= focus.minBlockMinutes".to_string(),
            ));
        }
        if self.quick_block_task.trim().is_empty() {
            return Err(InfraError::InvalidConfig(
                "focus.quickBlockTask must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigBundle {
    pub app: AppConfig,
    pub focus: FocusConfig,
}

#[derive(Serialize, Deserialize)]
struct Versioned<T> {
    schema: u64,
    #[serde(flatten)]
    body: T,
}

fn default_files() -> Result<HashMap<&'static str, serde_json::Value>, InfraError> {
    Ok(HashMap::from([
        (
            APP_JSON,
            serde_json::to_value(Versioned {
                schema: SUPPORTED_SCHEMA,
                body: AppConfig::default(),
            })?,
        ),
        (
            FOCUS_JSON,
            serde_json::to_value(Versioned {
                schema: SUPPORTED_SCHEMA,
                body: FocusConfig::default(),
            })?,
        ),
    ]))
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files()? {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn read_typed<T>(path: &Path) -> Result<T, InfraError>
where
    T: for<'de> Deserialize<'de>,
{
    let value = read_config(path)?;
    let versioned: Versioned<T> = serde_json::from_value(value).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid {}: {error}", path.display()))
    })?;
    Ok(versioned.body)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    let app: AppConfig = read_typed(&config_dir.join(APP_JSON))?;
    if app.database_file.trim().is_empty() {
        return Err(InfraError::InvalidConfig(
            "app.databaseFile must not be empty".to_string(),
        ));
    }
    let focus: FocusConfig = read_typed(&config_dir.join(FOCUS_JSON))?;
    focus.validate()?;
    Ok(ConfigBundle { app, focus })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

    struct TempConfigDir {
        path: PathBuf,
    }

    impl TempConfigDir {
        fn new() -> Self {
            let sequence = NEXT_DIR.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "blockfocus-config-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create config dir");
            Self { path }
        }
    }

    impl Drop for TempConfigDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn defaults_are_written_and_loaded() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        let bundle = load_configs(&dir.path).expect("load configs");
        assert_eq!(bundle, ConfigBundle::default());
    }

    #[test]
    fn existing_files_are_not_overwritten() {
        let dir = TempConfigDir::new();
        fs::write(
            dir.path.join(FOCUS_JSON),
            r#"{"schema":1,"tickIntervalMs":250,"partialProgress":40,"minBlockMinutes":15,"quickBlockMinutes":25,"quickBlockTask":"Ship it"}"#,
        )
        .expect("write focus config");
        ensure_default_configs(&dir.path).expect("write defaults");

        let bundle = load_configs(&dir.path).expect("load configs");
        assert_eq!(bundle.focus.tick_interval_ms, 250);
        assert_eq!(bundle.focus.partial_progress, 40);
        assert_eq!(bundle.app, AppConfig::default());
    }

    #[test]
    fn unsupported_schema_is_rejected() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        fs::write(
            dir.path.join(APP_JSON),
            r#"{"schema":2,"appName":"x","databaseFile":"x.sqlite","seedOnFirstRun":false,"writePolicy":"immediate"}"#,
        )
        .expect("overwrite app config");

        match load_configs(&dir.path) {
            Err(InfraError::InvalidConfig(message)) => assert!(message.contains("unsupported schema")),
            other => panic!("expected invalid config error, got {other:?}"),
        }
    }

    #[test]
    fn focus_values_are_validated() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        fs::write(
            dir.path.join(FOCUS_JSON),
            r#"{"schema":1,"tickIntervalMs":1000,"partialProgress":100,"minBlockMinutes":15,"quickBlockMinutes":30,"quickBlockTask":"t"}"#,
        )
        .expect("overwrite focus config");
        assert!(load_configs(&dir.path).is_err());
    }
}
