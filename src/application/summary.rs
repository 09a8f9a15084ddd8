use crate::application::block_store::{compute_stats, filter_by_date};
use crate::domain::models::{normalize_date, BlockStats, DailyReflection, TimeBlock};
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

const DAYS_PER_WEEK: i64 = 7;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DailySummary {
    pub date: String,
    pub stats: BlockStats,
    pub reflections: Vec<DailyReflection>,
    pub average_rating: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WeeklySummary {
    pub week_start: String,
    pub week_end: String,
    pub days: Vec<DailySummary>,
    pub totals: BlockStats,
    pub average_rating: Option<f64>,
    pub best_day: Option<String>,
}

pub fn daily_summary(
    blocks: &[TimeBlock],
    reflections: &[DailyReflection],
    date: &str,
) -> DailySummary {
    let date = normalize_date(date).unwrap_or_else(|| date.trim().to_string());
    let day_reflections = reflections
        .iter()
        .filter(|reflection| reflection.date == date)
        .cloned()
        .collect::<Vec<_>>();
    DailySummary {
        stats: compute_stats(&filter_by_date(blocks, &date)),
        average_rating: average_rating(&day_reflections),
        reflections: day_reflections,
        date,
    }
}

/// Seven consecutive days starting at `week_start`.
pub fn weekly_summary(
    blocks: &[TimeBlock],
    reflections: &[DailyReflection],
    week_start: NaiveDate,
) -> WeeklySummary {
    let days = (0..DAYS_PER_WEEK)
        .map(|offset| week_start + Duration::days(offset))
        .map(|date| daily_summary(blocks, reflections, &date.format("%Y-%m-%d").to_string()))
        .collect::<Vec<_>>();

    let totals = days.iter().fold(BlockStats::default(), |acc, day| BlockStats {
        completed: acc.completed + day.stats.completed,
        total: acc.total + day.stats.total,
        total_minutes: acc.total_minutes + day.stats.total_minutes,
    });
    let week_reflections = days
        .iter()
        .flat_map(|day| day.reflections.iter().cloned())
        .collect::<Vec<_>>();
    // first day wins ties
    let best_day = days
        .iter()
        .filter(|day| day.stats.total_minutes > 0)
        .fold(None::<&DailySummary>, |best, day| match best {
            Some(current) if current.stats.total_minutes >= day.stats.total_minutes => Some(current),
            _ => Some(day),
        })
        .map(|day| day.date.clone());

    WeeklySummary {
        week_start: week_start.format("%Y-%m-%d").to_string(),
        week_end: (week_start + Duration::days(DAYS_PER_WEEK - 1))
            .format("%Y-%m-%d")
            .to_string(),
        average_rating: average_rating(&week_reflections),
        totals,
        best_day,
        days,
    }
}

/// Monday of the week containing `date`.
pub fn week_start_for(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn average_rating(reflections: &[DailyReflection]) -> Option<f64> {
    if reflections.is_empty() {
        return None;
    }
    let sum = reflections
        .iter()
        .map(|reflection| f64::from(reflection.rating))
        .sum::<f64>();
    Some(sum / reflections.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::block_store::tests::block;

    fn completed(id: &str, date: &str, start: &str, end: &str) -> TimeBlock {
        let mut block = block(id, date, start, end);
        block.is_completed = true;
        block.progress = 100;
        block
    }

    fn reflection(date: &str, block_id: &str, rating: u8) -> DailyReflection {
        DailyReflection {
            date: date.to_string(),
            block_id: block_id.to_string(),
            block_title: format!("Block {block_id}"),
            reflection: "ok".to_string(),
            rating,
        }
    }

    #[test]
    fn week_starts_on_monday() {
        let saturday = NaiveDate::from_ymd_opt(2024, 6, 1).expect("date");
        assert_eq!(
            week_start_for(saturday),
            NaiveDate::from_ymd_opt(2024, 5, 27).expect("date")
        );
        let monday = NaiveDate::from_ymd_opt(2024, 5, 27).expect("date");
        assert_eq!(week_start_for(monday), monday);
    }

    #[test]
    fn daily_summary_scopes_to_date() {
        let blocks = vec![
            completed("a", "2024-06-01", "09:00", "10:00"),
            block("b", "2024-06-01", "11:00", "12:00"),
            completed("c", "2024-06-02", "09:00", "09:30"),
        ];
        let reflections = vec![
            reflection("2024-06-01", "a", 4),
            reflection("2024-06-02", "c", 2),
        ];
        let summary = daily_summary(&blocks, &reflections, "2024-06-01");
        assert_eq!(summary.stats.completed, 1);
        assert_eq!(summary.stats.total, 2);
        assert_eq!(summary.stats.total_minutes, 60);
        assert_eq!(summary.reflections.len(), 1);
        assert_eq!(summary.average_rating, Some(4.0));
    }

    #[test]
    fn weekly_summary_totals_and_best_day() {
        let blocks = vec![
            completed("a", "2024-05-27", "09:00", "10:00"),
            completed("b", "2024-05-29", "09:00", "11:00"),
            completed("c", "2024-06-03", "09:00", "12:00"),
            block("d", "2024-05-29", "13:00", "14:00"),
        ];
        let reflections = vec![
            reflection("2024-05-27", "a", 5),
            reflection("2024-05-29", "b", 3),
        ];
        let start = NaiveDate::from_ymd_opt(2024, 5, 27).expect("date");
        let summary = weekly_summary(&blocks, &reflections, start);

        assert_eq!(summary.days.len(), 7);
        assert_eq!(summary.week_end, "2024-06-02");
        assert_eq!(summary.totals.completed, 2);
        assert_eq!(summary.totals.total, 3);
        assert_eq!(summary.totals.total_minutes, 180);
        assert_eq!(summary.best_day.as_deref(), Some("2024-05-29"));
        assert_eq!(summary.average_rating, Some(4.0));
    }

    #[test]
    fn empty_week_has_no_best_day_or_rating() {
        let start = NaiveDate::from_ymd_opt(2024, 5, 27).expect("date");
        let summary = weekly_summary(&[], &[], start);
        assert_eq!(summary.totals, BlockStats::default());
        assert_eq!(summary.best_day, None);
        assert_eq!(summary.average_rating, None);
    }
}
