use crate::warehouse::{Row, RowCursor};
use anyhow::Context;

/// Aggregated cost of one (project, service) pair across the two compared days.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CostRecord {
    pub project: String,
    pub service: String,
    pub yesterday_cost: Option<f64>,
    pub today_cost: Option<f64>,
    /// Percent change from yesterday to today, rounded to two decimal places.
    /// Absent if either cost is absent or yesterday's cost is zero.
    pub change_rate: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum RowError {
    #[error("row is missing column {0:?}")]
    MissingColumn(&'static str),
    #[error("column {0:?} must not be null")]
    Null(&'static str),
    #[error("column {column:?} is not a number: {value:?}")]
    NotANumber { column: &'static str, value: String },
}

impl TryFrom<Row> for CostRecord {
    type Error = RowError;

    fn try_from(row: Row) -> Result<Self, Self::Error> {
        Ok(CostRecord {
            project: text(&row, "proj")?,
            service: text(&row, "service_name")?,
            yesterday_cost: number(&row, "yesterday_cost")?,
            today_cost: number(&row, "today_cost")?,
            change_rate: number(&row, "change_rate")?,
        })
    }
}

fn cell<'r>(row: &'r Row, column: &'static str) -> Result<Option<&'r str>, RowError> {
    row.get(column).ok_or(RowError::MissingColumn(column))
}

fn text(row: &Row, column: &'static str) -> Result<String, RowError> {
    cell(row, column)?
        .map(str::to_string)
        .ok_or(RowError::Null(column))
}

fn number(row: &Row, column: &'static str) -> Result<Option<f64>, RowError> {
    cell(row, column)?
        .map(|value| {
            value.parse::<f64>().map_err(|_| RowError::NotANumber {
                column,
                value: value.to_string(),
            })
        })
        .transpose()
}

/// Renders an amount with two decimal places, or `-` if it's absent.
pub fn two_places(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{value:.2}"),
        None => "-".to_string(),
    }
}

/// Drains `cursor` into records, preserving the order in which rows were returned.
/// The first error, whether reading or converting a row, aborts the drain.
pub async fn materialize<C: RowCursor>(cursor: &mut C) -> anyhow::Result<Vec<CostRecord>> {
    let mut records = Vec::new();

    loop {
        let index = records.len();
        let Some(row) = cursor
            .next()
            .await
            .with_context(|| format!("reading change rate row {index} from warehouse"))?
        else {
            break;
        };
        let record = CostRecord::try_from(row)
            .with_context(|| format!("converting change rate row {index}"))?;
        records.push(record);
    }

    tracing::info!(records = records.len(), "materialized change rate rows");
    Ok(records)
}
