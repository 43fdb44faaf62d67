//! Day-over-day change rate of each (project, service) pair, computed by
//! joining two instantiations of the aggregation view.
use crate::{view::view_ref, warehouse::Warehouse, Config};
use anyhow::Context;
use chrono::{Duration, NaiveDate};

/// The pair of partition dates compared by one run.
/// `today` is the invocation date minus one day, and `yesterday` is the
/// invocation date minus two days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ComparisonDays {
    pub today: NaiveDate,
    pub yesterday: NaiveDate,
}

impl ComparisonDays {
    pub fn relative_to(invocation: NaiveDate) -> Self {
        Self {
            today: invocation - Duration::days(1),
            yesterday: invocation - Duration::days(2),
        }
    }
}

/// Query which inner-joins the two days on (project, service), so pairs
/// missing from either day are dropped. `change_rate` is null whenever
/// yesterday's cost is null or zero.
pub fn query_sql(config: &Config, days: ComparisonDays) -> String {
    format!(
        r#"SELECT
  today.proj,
  today.service_name,
  yesterday.cost AS yesterday_cost,
  today.cost AS today_cost,
  ROUND(SAFE_MULTIPLY(SAFE_DIVIDE(today.cost - yesterday.cost, yesterday.cost), 100), 2) AS change_rate
FROM {view}('{today}') AS today
INNER JOIN {view}('{yesterday}') AS yesterday
  ON today.proj = yesterday.proj
  AND today.service_name = yesterday.service_name
ORDER BY today.proj, today.service_name"#,
        view = view_ref(config),
        today = days.today.format("%Y-%m-%d"),
        yesterday = days.yesterday.format("%Y-%m-%d"),
    )
}

/// Issues the change-rate query, returning a cursor over its rows.
#[tracing::instrument(skip_all, fields(today = %days.today, yesterday = %days.yesterday))]
pub async fn query<W: Warehouse>(
    warehouse: &W,
    config: &Config,
    days: ComparisonDays,
) -> anyhow::Result<W::Cursor> {
    let sql = query_sql(config, days);
    let cursor = warehouse
        .query(&sql)
        .await
        .context("executing change rate query")?;

    tracing::debug!("issued change rate query");
    Ok(cursor)
}

/// Percent change from `yesterday` to `today`, rounded half away from zero to
/// two decimal places. This mirrors the query's expression: the rate is
/// `None` if either cost is absent or if `yesterday` is zero.
pub fn change_rate(yesterday: Option<f64>, today: Option<f64>) -> Option<f64> {
    let (yesterday, today) = (yesterday?, today?);
    if yesterday == 0.0 {
        return None;
    }
    let rate = (today - yesterday) / yesterday * 100.0;
    Some((rate * 100.0).round() / 100.0)
}
