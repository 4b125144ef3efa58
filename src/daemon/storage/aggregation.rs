//! Read side of the store: per-day statistics built with SQL aggregates.

use chrono::NaiveDate;
use duckdb::{params, params_from_iter};
use serde::Serialize;

use crate::utils::time::date_to_string;

use super::{
    error::{StoreError, StoreResult},
    event_store::{parse_date, Access, EventStore},
};

pub const DEFAULT_OVERVIEW_LIMIT: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppUsage {
    pub app_name: String,
    pub event_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailySummary {
    pub logical_date: NaiveDate,
    pub total_keys: u64,
    pub key_events: u64,
    /// Sorted by `event_count`, most used first.
    pub app_usage: Vec<AppUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayOverview {
    pub logical_date: NaiveDate,
    pub total_keys: u64,
    pub unique_apps: u64,
}

/// Optional inclusive date range for [EventStore::overview].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverviewQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub limit: u32,
}

impl Default for OverviewQuery {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            limit: DEFAULT_OVERVIEW_LIMIT,
        }
    }
}

impl EventStore {
    /// Keystroke totals and app ranking for one logical day. Days without data produce zeros.
    pub fn daily_summary(&self, logical_date: NaiveDate) -> StoreResult<DailySummary> {
        let date = date_to_string(logical_date);
        let conn = self.connect(Access::ReadOnly)?;

        let (total_keys, key_events) = conn.query_row(
            r#"
            SELECT CAST(COALESCE(SUM(key_count), 0) AS BIGINT), COUNT(*)
            FROM key_events
            WHERE logical_date = CAST(? AS DATE)
            "#,
            params![date],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;

        let mut stmt = conn.prepare(
            r#"
            SELECT app_name, COUNT(*) AS event_count
            FROM window_events
            WHERE logical_date = CAST(? AS DATE)
            GROUP BY app_name
            ORDER BY event_count DESC, app_name ASC
            "#,
        )?;
        let app_usage = stmt
            .query_map(params![date], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(app_name, event_count)| {
                Ok(AppUsage {
                    app_name,
                    event_count: to_count("event_count", event_count)?,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(DailySummary {
            logical_date,
            total_keys: to_count("total_keys", total_keys)?,
            key_events: to_count("key_events", key_events)?,
            app_usage,
        })
    }

    /// One row per day that has window events, newest first, at most `query.limit` rows.
    pub fn overview(&self, query: OverviewQuery) -> StoreResult<Vec<DayOverview>> {
        let mut conditions = Vec::new();
        let mut bounds = Vec::new();
        if let Some(from) = query.from {
            conditions.push("w.logical_date >= CAST(? AS DATE)");
            bounds.push(date_to_string(from));
        }
        if let Some(to) = query.to {
            conditions.push("w.logical_date <= CAST(? AS DATE)");
            bounds.push(date_to_string(to));
        }
        let filter = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            r#"
            SELECT
                CAST(w.logical_date AS VARCHAR),
                CAST(COALESCE(k.total_keys, 0) AS BIGINT),
                COUNT(DISTINCT w.app_name)
            FROM window_events w
            LEFT JOIN (
                SELECT logical_date, SUM(key_count) AS total_keys
                FROM key_events
                GROUP BY logical_date
            ) k ON k.logical_date = w.logical_date
            {filter}
            GROUP BY w.logical_date, k.total_keys
            ORDER BY w.logical_date DESC
            LIMIT {}
            "#,
            query.limit
        );

        let conn = self.connect(Access::ReadOnly)?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bounds.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(date, total_keys, unique_apps)| {
                Ok(DayOverview {
                    logical_date: parse_date(&date)?,
                    total_keys: to_count("total_keys", total_keys)?,
                    unique_apps: to_count("unique_apps", unique_apps)?,
                })
            })
            .collect()
    }
}

fn to_count(column: &'static str, value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| StoreError::InvalidValue {
        column,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::Days;

    use crate::daemon::storage::event_store::tests::{at, test_store, TEST_DATE};

    use super::{AppUsage, OverviewQuery};

    #[test]
    fn summary_of_empty_day_is_zero() -> Result<()> {
        let (_dir, store) = test_store()?;
        let summary = store.daily_summary(TEST_DATE)?;
        assert_eq!(summary.logical_date, TEST_DATE);
        assert_eq!(summary.total_keys, 0);
        assert_eq!(summary.key_events, 0);
        assert!(summary.app_usage.is_empty());
        Ok(())
    }

    #[test]
    fn summary_ranks_apps_by_event_count() -> Result<()> {
        let (_dir, store) = test_store()?;
        store.upsert_window_event(at(0), "editor", TEST_DATE, None, None)?;
        store.upsert_window_event(at(1), "browser", TEST_DATE, None, None)?;
        store.upsert_window_event(at(2), "editor", TEST_DATE, None, None)?;
        store.upsert_window_event(at(3), "terminal", TEST_DATE, None, None)?;
        store.upsert_window_event(at(4), "editor", TEST_DATE, None, None)?;
        store.upsert_window_event(at(5), "terminal", TEST_DATE, None, None)?;
        store.upsert_window_event(at(6), "other day", TEST_DATE.succ_opt().unwrap(), None, None)?;
        store.upsert_key_event(at(0), 10, TEST_DATE)?;
        store.upsert_key_event(at(1), 15, TEST_DATE)?;
        store.upsert_key_event(at(1), 5, TEST_DATE)?;

        let summary = store.daily_summary(TEST_DATE)?;
        assert_eq!(summary.total_keys, 30);
        assert_eq!(summary.key_events, 2);
        assert_eq!(
            summary.app_usage,
            vec![
                AppUsage {
                    app_name: "editor".into(),
                    event_count: 3
                },
                AppUsage {
                    app_name: "terminal".into(),
                    event_count: 2
                },
                AppUsage {
                    app_name: "browser".into(),
                    event_count: 1
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn overview_is_descending_and_limited() -> Result<()> {
        let (_dir, store) = test_store()?;
        for day in 0..5u64 {
            let date = TEST_DATE.checked_add_days(Days::new(day)).unwrap();
            let base = day as i64 * 1000;
            store.upsert_window_event(at(base), "a", date, None, None)?;
            store.upsert_window_event(at(base + 1), "b", date, None, None)?;
            store.upsert_window_event(at(base + 2), "a", date, None, None)?;
            store.upsert_key_event(at(base), 7, date)?;
            store.upsert_key_event(at(base + 1), 3, date)?;
        }

        let overview = store.overview(OverviewQuery {
            limit: 3,
            ..Default::default()
        })?;
        assert_eq!(overview.len(), 3);
        assert!(overview
            .windows(2)
            .all(|w| w[0].logical_date > w[1].logical_date));
        assert_eq!(
            overview[0].logical_date,
            TEST_DATE.checked_add_days(Days::new(4)).unwrap()
        );
        assert!(overview.iter().all(|v| v.total_keys == 10 && v.unique_apps == 2));
        Ok(())
    }

    #[test]
    fn overview_reports_zero_keys_for_days_without_key_events() -> Result<()> {
        let (_dir, store) = test_store()?;
        store.upsert_window_event(at(0), "a", TEST_DATE, None, None)?;

        let overview = store.overview(OverviewQuery::default())?;
        assert_eq!(overview.len(), 1);
        assert_eq!(overview[0].total_keys, 0);
        assert_eq!(overview[0].unique_apps, 1);
        Ok(())
    }

    #[test]
    fn overview_filters_by_range() -> Result<()> {
        let (_dir, store) = test_store()?;
        let dates = (0..6u64)
            .map(|d| TEST_DATE.checked_add_days(Days::new(d)).unwrap())
            .collect::<Vec<_>>();
        for (i, date) in dates.iter().enumerate() {
            store.upsert_window_event(at(i as i64), "a", *date, None, None)?;
        }

        let overview = store.overview(OverviewQuery {
            from: Some(dates[1]),
            to: Some(dates[3]),
            ..Default::default()
        })?;
        assert_eq!(
            overview.iter().map(|v| v.logical_date).collect::<Vec<_>>(),
            vec![dates[3], dates[2], dates[1]]
        );

        let only_from = store.overview(OverviewQuery {
            from: Some(dates[4]),
            ..Default::default()
        })?;
        assert_eq!(only_from.len(), 2);
        Ok(())
    }
}
