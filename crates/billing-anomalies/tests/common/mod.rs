use billing_anomalies::{change_rate::change_rate, ChatSender, Config, Row, RowCursor, Warehouse};
use chrono::NaiveDate;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn config(threshold: f64) -> Config {
    Config {
        project_id: "acme-billing".to_string(),
        billing_account_id: "0A1B2C-3D4E5F-6A7B8C".to_string(),
        dataset_id: "billing_export".to_string(),
        view_name: "daily_cost".to_string(),
        slack_oauth_token: "xoxb-test".to_string(),
        slack_channel_id: "C0123".to_string(),
        threshold,
        access_token: Some("ya29.test".to_string()),
        bigquery_endpoint: url::Url::parse("http://127.0.0.1:1/bigquery/v2/").unwrap(),
        slack_endpoint: url::Url::parse("http://127.0.0.1:1/api/").unwrap(),
        metadata_endpoint: url::Url::parse("http://127.0.0.1:1/computeMetadata/v1/").unwrap(),
        dry_run: false,
    }
}

/// Warehouse holding per-day aggregates in memory. Change rate queries are
/// answered by joining the two days whose dates appear in the query text.
#[derive(Debug, Default)]
pub struct FakeWarehouse {
    pub days: BTreeMap<NaiveDate, Vec<(String, String, f64)>>,
    pub statements: Mutex<Vec<String>>,
    pub fail_execute: bool,
    pub fail_query: bool,
    /// Fail the cursor after this many rows were read.
    pub fail_cursor_after: Option<usize>,
}

impl FakeWarehouse {
    pub fn with_cost(mut self, day: &str, project: &str, service: &str, cost: f64) -> Self {
        self.days.entry(date(day)).or_default().push((
            project.to_string(),
            service.to_string(),
            cost,
        ));
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    fn costs(&self, day: NaiveDate) -> &[(String, String, f64)] {
        self.days.get(&day).map(Vec::as_slice).unwrap_or_default()
    }
}

// Extracts the `('YYYY-MM-DD')` view arguments of a query, in order.
fn view_arguments(sql: &str) -> Vec<NaiveDate> {
    sql.split("('")
        .skip(1)
        .filter_map(|rest| rest.split("')").next())
        .map(date)
        .collect()
}

impl Warehouse for FakeWarehouse {
    type Cursor = FakeCursor;

    async fn execute<'s>(&'s self, sql: &'s str) -> anyhow::Result<()> {
        self.statements.lock().unwrap().push(sql.to_string());
        if self.fail_execute {
            anyhow::bail!("Access Denied: Dataset acme-billing:billing_export");
        }
        Ok(())
    }

    async fn query<'s>(&'s self, sql: &'s str) -> anyhow::Result<FakeCursor> {
        self.statements.lock().unwrap().push(sql.to_string());
        if self.fail_query {
            anyhow::bail!("Not found: Function acme-billing:billing_export.daily_cost");
        }
        let dates = view_arguments(sql);
        let [today, yesterday] = dates[..] else {
            anyhow::bail!("expected two view arguments in {sql}");
        };

        let mut today = self.costs(today).to_vec();
        today.sort_by(|(lp, ls, _), (rp, rs, _)| (lp, ls).cmp(&(rp, rs)));

        let mut rows = VecDeque::new();
        for (project, service, today_cost) in &today {
            let Some((_, _, yesterday_cost)) = self
                .costs(yesterday)
                .iter()
                .find(|(p, s, _)| p == project && s == service)
            else {
                continue;
            };
            let rate = change_rate(Some(*yesterday_cost), Some(*today_cost));

            rows.push_back(
                Row::new()
                    .with("proj", Some(project.as_str()))
                    .with("service_name", Some(service.as_str()))
                    .with("yesterday_cost", Some(yesterday_cost.to_string()))
                    .with("today_cost", Some(today_cost.to_string()))
                    .with("change_rate", rate.map(|r| r.to_string())),
            );
        }

        Ok(FakeCursor {
            rows,
            read: 0,
            fail_after: self.fail_cursor_after,
        })
    }
}

#[derive(Debug)]
pub struct FakeCursor {
    rows: VecDeque<Row>,
    read: usize,
    fail_after: Option<usize>,
}

impl RowCursor for FakeCursor {
    async fn next<'s>(&'s mut self) -> anyhow::Result<Option<Row>> {
        if self.fail_after == Some(self.read) {
            anyhow::bail!("connection reset by peer");
        }
        self.read += 1;
        Ok(self.rows.pop_front())
    }
}

/// Records posted messages, optionally failing the Nth post (zero-based).
#[derive(Debug, Default)]
pub struct RecordingSender {
    pub posted: Mutex<Vec<(String, String, String)>>,
    pub fail_at: Option<usize>,
}

impl RecordingSender {
    pub fn texts(&self) -> Vec<String> {
        self.posted
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, text)| text.clone())
            .collect()
    }
}

impl ChatSender for RecordingSender {
    async fn post<'s>(
        &'s self,
        credential: &'s str,
        channel: &'s str,
        text: &'s str,
    ) -> anyhow::Result<()> {
        let mut posted = self.posted.lock().unwrap();
        if self.fail_at == Some(posted.len()) {
            anyhow::bail!("slack chat.postMessage failed: rate_limited");
        }
        posted.push((credential.to_string(), channel.to_string(), text.to_string()));
        Ok(())
    }
}
