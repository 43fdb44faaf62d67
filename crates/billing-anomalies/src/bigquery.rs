//! `Warehouse` implementation over the BigQuery v2 REST API.
//!
//! Statements run through `jobs.query`. Jobs which don't complete within the
//! synchronous wait, and result sets spanning multiple pages, are continued
//! with `jobs.getQueryResults`.
use crate::{
    metadata,
    warehouse::{Row, RowCursor, Warehouse},
    Config,
};
use anyhow::Context;
use derivative::Derivative;
use std::collections::VecDeque;

// Upper bound on how long BigQuery holds a request open while a job runs.
const WAIT_TIMEOUT_MS: u32 = 10_000;
const PAGE_SIZE: u32 = 1_000;

#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct BigQuery {
    #[derivative(Debug = "ignore")]
    http: reqwest::Client,
    endpoint: url::Url,
    project_id: String,
    #[derivative(Debug = "ignore")]
    token: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    timeout_ms: u32,
    max_results: u32,
}

#[derive(serde::Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(serde::Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    schema: Option<Schema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    #[serde(default)]
    page_token: Option<String>,
}

#[derive(serde::Deserialize, Debug, Default)]
struct Schema {
    #[serde(default)]
    fields: Vec<Field>,
}

#[derive(serde::Deserialize, Debug)]
struct Field {
    name: String,
}

#[derive(serde::Deserialize, Debug)]
struct TableRow {
    f: Vec<TableCell>,
}

#[derive(serde::Deserialize, Debug)]
struct TableCell {
    v: serde_json::Value,
}

impl BigQuery {
    /// Builds a client for the configured project, fetching an access token
    /// from the metadata server if one wasn't configured.
    pub async fn connect(http: reqwest::Client, config: &Config) -> anyhow::Result<Self> {
        let token = match &config.access_token {
            Some(token) => token.clone(),
            None => metadata::access_token(&http, &config.metadata_endpoint)
                .await
                .context("fetching BigQuery access token")?,
        };
        Ok(Self {
            http,
            endpoint: config.bigquery_endpoint.clone(),
            project_id: config.project_id.clone(),
            token,
        })
    }

    fn url(&self, segments: &[&str]) -> anyhow::Result<url::Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("BigQuery endpoint {} cannot be a base", self.endpoint))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Runs `sql` and waits for its job to complete, returning the first page of results.
    async fn run(&self, sql: &str) -> anyhow::Result<QueryResponse> {
        let url = self.url(&["projects", &self.project_id, "queries"])?;
        let request = self.http.post(url).bearer_auth(&self.token).json(&QueryRequest {
            query: sql,
            use_legacy_sql: false,
            timeout_ms: WAIT_TIMEOUT_MS,
            max_results: PAGE_SIZE,
        });
        let mut response: QueryResponse = send(request).await.context("calling jobs.query")?;

        while !response.job_complete {
            let job = job_reference(&response)?;
            tracing::debug!(job_id = %job.job_id, "waiting for BigQuery job to complete");
            response = self.results(&job, None).await?;
        }
        Ok(response)
    }

    async fn results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> anyhow::Result<QueryResponse> {
        let url = self.url(&["projects", &self.project_id, "queries", &job.job_id])?;

        let mut params = vec![
            ("timeoutMs", WAIT_TIMEOUT_MS.to_string()),
            ("maxResults", PAGE_SIZE.to_string()),
        ];
        if let Some(location) = &job.location {
            params.push(("location", location.clone()));
        }
        if let Some(page_token) = page_token {
            params.push(("pageToken", page_token.to_string()));
        }

        let request = self.http.get(url).bearer_auth(&self.token).query(&params);
        send(request)
            .await
            .with_context(|| format!("calling jobs.getQueryResults for job {}", job.job_id))
    }
}

fn job_reference(response: &QueryResponse) -> anyhow::Result<JobReference> {
    response
        .job_reference
        .clone()
        .context("BigQuery response is missing its jobReference")
}

async fn send<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> anyhow::Result<T> {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(serde::Deserialize)]
    struct ErrorDetail {
        message: String,
    }

    let response = request.send().await?;
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(ErrorBody { error }) => error.message,
            Err(_) => body,
        };
        anyhow::bail!("BigQuery returned {status}: {message}");
    }
    Ok(response.json().await?)
}

impl Warehouse for BigQuery {
    type Cursor = BigQueryCursor;

    async fn execute<'s>(&'s self, sql: &'s str) -> anyhow::Result<()> {
        self.run(sql).await?;
        Ok(())
    }

    async fn query<'s>(&'s self, sql: &'s str) -> anyhow::Result<BigQueryCursor> {
        let QueryResponse {
            job_reference,
            schema,
            rows,
            page_token,
            ..
        } = self.run(sql).await?;

        let columns = schema
            .unwrap_or_default()
            .fields
            .into_iter()
            .map(|field| field.name)
            .collect();

        Ok(BigQueryCursor {
            client: self.clone(),
            job: job_reference,
            columns,
            rows: rows.into(),
            page_token,
        })
    }
}

/// Cursor over the rows of a completed query job. Pages beyond the first are
/// fetched as the cursor reaches them.
#[derive(Debug)]
pub struct BigQueryCursor {
    client: BigQuery,
    job: Option<JobReference>,
    columns: Vec<String>,
    rows: VecDeque<TableRow>,
    page_token: Option<String>,
}

impl BigQueryCursor {
    fn to_row(&self, TableRow { f }: TableRow) -> anyhow::Result<Row> {
        if f.len() != self.columns.len() {
            anyhow::bail!(
                "BigQuery row has {} cells but the schema has {} fields",
                f.len(),
                self.columns.len()
            );
        }
        Ok(self
            .columns
            .iter()
            .cloned()
            .zip(f.into_iter().map(|TableCell { v }| match v {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s),
                other => Some(other.to_string()),
            }))
            .collect())
    }
}

impl RowCursor for BigQueryCursor {
    async fn next<'s>(&'s mut self) -> anyhow::Result<Option<Row>> {
        loop {
            if let Some(row) = self.rows.pop_front() {
                return self.to_row(row).map(Some);
            }
            let Some(page_token) = self.page_token.take() else {
                return Ok(None);
            };
            let job = self
                .job
                .clone()
                .context("BigQuery response is missing its jobReference")?;

            let page = self.client.results(&job, Some(&page_token)).await?;
            tracing::debug!(rows = page.rows.len(), "fetched BigQuery result page");

            self.rows.extend(page.rows);
            self.page_token = page.page_token;
        }
    }
}
