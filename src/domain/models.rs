use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_TITLE_CHARS: usize = 50;
pub const MAX_TASKS: usize = 5;
pub const MAX_TASK_CHARS: usize = 100;
pub const MAX_REFLECTION_CHARS: usize = 500;
pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;
pub const COMPLETE_PROGRESS: u8 = 100;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";

/// A rejected form field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimeBlock {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub category_id: String,
    pub color: String,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub progress: u8,
}

impl TimeBlock {
    /// Scheduled length in whole minutes, `None` when either time is
    /// unparseable.
    pub fn duration_minutes(&self) -> Option<i64> {
        minutes_between(&self.start_time, &self.end_time)
    }

    /// Countdown length for a focus session. Inverted or malformed ranges
    /// yield zero.
    pub fn duration_seconds(&self) -> i64 {
        self.duration_minutes()
            .map(|minutes| minutes.max(0) * 60)
            .unwrap_or(0)
    }

    pub fn validate(&self, min_block_minutes: u32) -> Result<(), FieldError> {
        validate_title(&self.title)?;
        validate_date(&self.date, "date")?;
        validate_time_range(&self.start_time, &self.end_time, min_block_minutes)?;
        validate_non_empty(&self.category_id, "category")?;
        validate_color(&self.color, "color")?;
        validate_tasks(&self.tasks)?;
        if self.progress > COMPLETE_PROGRESS {
            return Err(FieldError::new("progress", "must be between 0 and 100"));
        }
        Ok(())
    }

    /// Merges the set fields of `patch`. Performs no validation.
    pub fn apply_patch(&mut self, patch: &BlockPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(date) = &patch.date {
            self.date = date.clone();
        }
        if let Some(start_time) = &patch.start_time {
            self.start_time = start_time.clone();
        }
        if let Some(end_time) = &patch.end_time {
            self.end_time = end_time.clone();
        }
        if let Some(category_id) = &patch.category_id {
            self.category_id = category_id.clone();
        }
        if let Some(color) = &patch.color {
            self.color = color.clone();
        }
        if let Some(tasks) = &patch.tasks {
            self.tasks = tasks.clone();
        }
    }
}

/// Form payload for a new block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockDraft {
    pub title: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub category_id: String,
    pub color: Option<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
}

impl BlockDraft {
    pub fn into_block(self, id: String, fallback_color: &str) -> TimeBlock {
        TimeBlock {
            id,
            title: self.title.trim().to_string(),
            date: normalize_date(&self.date).unwrap_or(self.date),
            start_time: self.start_time.trim().to_string(),
            end_time: self.end_time.trim().to_string(),
            category_id: self.category_id.trim().to_string(),
            color: self
                .color
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(fallback_color)
                .to_string(),
            tasks: normalize_tasks(self.tasks),
            is_active: false,
            is_completed: false,
            progress: 0,
        }
    }
}

/// Partial edit of a block. Status fields are owned by the focus
/// controller and cannot be patched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockPatch {
    pub title: Option<String>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub category_id: Option<String>,
    pub color: Option<String>,
    pub tasks: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockCategory {
    pub id: String,
    pub name: String,
    pub color: String,
    pub icon: String,
}

impl BlockCategory {
    pub fn validate(&self) -> Result<(), FieldError> {
        validate_non_empty(&self.id, "category.id")?;
        validate_non_empty(&self.name, "category.name")?;
        validate_color(&self.color, "category.color")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DailyReflection {
    pub date: String,
    pub block_id: String,
    pub block_title: String,
    pub reflection: String,
    pub rating: u8,
}

impl DailyReflection {
    pub fn validate(&self) -> Result<(), FieldError> {
        validate_date(&self.date, "reflection.date")?;
        validate_non_empty(&self.block_id, "reflection.block_id")?;
        if self.reflection.chars().count() > MAX_REFLECTION_CHARS {
            return Err(FieldError::new(
                "reflection",
                format!("must be at most {MAX_REFLECTION_CHARS} characters"),
            ));
        }
        if !(MIN_RATING..=MAX_RATING).contains(&self.rating) {
            return Err(FieldError::new(
                "rating",
                format!("must be between {MIN_RATING} and {MAX_RATING}"),
            ));
        }
        Ok(())
    }

    pub fn is_same_entry(&self, date: &str, block_id: &str) -> bool {
        self.date == date && self.block_id == block_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub dark_mode: bool,
    pub notifications_enabled: bool,
    pub working_hours_start: String,
    pub working_hours_end: String,
    pub default_block_duration: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            dark_mode: false,
            notifications_enabled: true,
            working_hours_start: "09:00".to_string(),
            working_hours_end: "17:00".to_string(),
            default_block_duration: 60,
        }
    }
}

impl AppSettings {
    pub fn validate(&self, min_block_minutes: u32) -> Result<(), FieldError> {
        validate_hhmm(&self.working_hours_start, "settings.working_hours_start")?;
        validate_hhmm(&self.working_hours_end, "settings.working_hours_end")?;
        let working_minutes =
            minutes_between(&self.working_hours_start, &self.working_hours_end).unwrap_or(0);
        if working_minutes <= 0 {
            return Err(FieldError::new(
                "settings.working_hours_end",
                "must be after working_hours_start",
            ));
        }
        if self.default_block_duration < min_block_minutes {
            return Err(FieldError::new(
                "settings.default_block_duration",
                format!("must be at least {min_block_minutes} minutes"),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockStats {
    pub completed: usize,
    pub total: usize,
    pub total_minutes: i64,
}

pub fn default_categories() -> Vec<BlockCategory> {
    [
        ("cat-work", "Work", "#4A90D9", "briefcase"),
        ("cat-study", "Study", "#7B61FF", "book"),
        ("cat-creative", "Creative", "#F5A623", "palette"),
        ("cat-personal", "Personal", "#50E3C2", "person"),
        ("cat-health", "Health", "#E94B3C", "heart"),
    ]
    .into_iter()
    .map(|(id, name, color, icon)| BlockCategory {
        id: id.to_string(),
        name: name.to_string(),
        color: color.to_string(),
        icon: icon.to_string(),
    })
    .collect()
}

/// Sample day used for first-run seeding and the "add sample data" action.
pub fn sample_blocks(date: &str, mut next_id: impl FnMut() -> String) -> Vec<TimeBlock> {
    [
        (
            "Morning Planning",
            "08:00",
            "08:30",
            "cat-work",
            "#4A90D9",
            vec!["Review calendar", "Pick top three priorities"],
        ),
        (
            "Deep Work",
            "09:00",
            "11:00",
            "cat-creative",
            "#F5A623",
            vec!["Draft chapter outline", "Write first section"],
        ),
        (
            "Study Session",
            "13:00",
            "14:00",
            "cat-study",
            "#7B61FF",
            vec!["Read two papers"],
        ),
        (
            "Workout",
            "18:00",
            "18:45",
            "cat-health",
            "#E94B3C",
            vec!["Warm up", "Strength circuit"],
        ),
    ]
    .into_iter()
    .map(|(title, start, end, category_id, color, tasks)| TimeBlock {
        id: next_id(),
        title: title.to_string(),
        date: date.to_string(),
        start_time: start.to_string(),
        end_time: end.to_string(),
        category_id: category_id.to_string(),
        color: color.to_string(),
        tasks: tasks.into_iter().map(ToOwned::to_owned).collect(),
        is_active: false,
        is_completed: false,
        progress: 0,
    })
    .collect()
}

/// Canonical `YYYY-MM-DD` form of `value`, `None` when it is not a date.
pub fn normalize_date(value: &str) -> Option<String> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .ok()
        .map(|date| date.format(DATE_FORMAT).to_string())
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), TIME_FORMAT).ok()
}

/// Minutes from `start` to `end`, both parsed against one fixed reference
/// date. Negative when `end` precedes `start`.
pub fn minutes_between(start: &str, end: &str) -> Option<i64> {
    let reference = NaiveDate::from_ymd_opt(2000, 1, 1)?;
    let start = NaiveDateTime::new(reference, parse_hhmm(start)?);
    let end = NaiveDateTime::new(reference, parse_hhmm(end)?);
    Some((end - start).num_minutes())
}

pub fn validate_title(title: &str) -> Result<(), FieldError> {
    validate_non_empty(title, "title")?;
    if title.trim().chars().count() > MAX_TITLE_CHARS {
        return Err(FieldError::new(
            "title",
            format!("must be at most {MAX_TITLE_CHARS} characters"),
        ));
    }
    Ok(())
}

pub fn validate_time_range(
    start_time: &str,
    end_time: &str,
    min_block_minutes: u32,
) -> Result<(), FieldError> {
    validate_hhmm(start_time, "start_time")?;
    validate_hhmm(end_time, "end_time")?;
    let minutes = minutes_between(start_time, end_time).unwrap_or(0);
    if minutes <= 0 {
        return Err(FieldError::new("end_time", "must be after start_time"));
    }
    if minutes < i64::from(min_block_minutes) {
        return Err(FieldError::new(
            "end_time",
            format!("block must be at least {min_block_minutes} minutes"),
        ));
    }
    Ok(())
}

pub fn validate_tasks(tasks: &[String]) -> Result<(), FieldError> {
    if tasks.len() > MAX_TASKS {
        return Err(FieldError::new(
            "tasks",
            format!("at most {MAX_TASKS} tasks allowed"),
        ));
    }
    for task in tasks {
        validate_non_empty(task, "tasks[]")?;
        if task.chars().count() > MAX_TASK_CHARS {
            return Err(FieldError::new(
                "tasks[]",
                format!("must be at most {MAX_TASK_CHARS} characters"),
            ));
        }
    }
    Ok(())
}

pub fn validate_color(value: &str, field_name: &'static str) -> Result<(), FieldError> {
    let Some(hex) = value.strip_prefix('#') else {
        return Err(FieldError::new(field_name, "must be #RRGGBB"));
    };
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(FieldError::new(field_name, "must be #RRGGBB"));
    }
    Ok(())
}

pub fn validate_date(value: &str, field_name: &'static str) -> Result<(), FieldError> {
    parse_date(value)
        .map(|_| ())
        .ok_or_else(|| FieldError::new(field_name, "must be YYYY-MM-DD"))
}

fn validate_hhmm(value: &str, field_name: &'static str) -> Result<(), FieldError> {
    parse_hhmm(value)
        .map(|_| ())
        .ok_or_else(|| FieldError::new(field_name, "must be HH:MM"))
}

fn validate_non_empty(value: &str, field_name: &'static str) -> Result<(), FieldError> {
    if value.trim().is_empty() {
        return Err(FieldError::new(field_name, "must not be empty"));
    }
    Ok(())
}

fn normalize_tasks(tasks: Vec<String>) -> Vec<String> {
    tasks
        .into_iter()
        .map(|task| task.trim().to_string())
        .filter(|task| !task.is_empty())
        .collect()
}
