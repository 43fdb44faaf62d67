use crate::{
    bigquery::BigQuery,
    change_rate::{self, ComparisonDays},
    classify,
    config::{Args, ConfigError},
    notify::{ChatSender, DeliveryError, Notifier, NotifierError, Sender},
    record,
    slack::Slack,
    summary, view,
    warehouse::Warehouse,
    Config,
};
use chrono::{NaiveDate, Utc};

/// Warehouse-facing stages of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Connect,
    DefineView,
    QueryChangeRate,
    Materialize,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Connect => "connecting to the warehouse",
            Stage::DefineView => "defining the aggregation view",
            Stage::QueryChangeRate => "querying change rates",
            Stage::Materialize => "materializing change rates",
        })
    }
}

/// Failure of a run. Every variant terminates the run at the point it occurred.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration")]
    Config(#[from] ConfigError),
    #[error("invalid notifier configuration")]
    Notifier(#[from] NotifierError),
    #[error("warehouse failure while {stage}")]
    Warehouse {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

impl Error {
    pub fn id(&self) -> &'static str {
        match self {
            Error::Config(_) => "Config",
            Error::Notifier(_) => "Notifier",
            Error::Warehouse { .. } => "Warehouse",
            Error::Delivery(_) => "Delivery",
        }
    }

    /// Renders the error and each of its sources, outermost first.
    pub fn describe(&self) -> String {
        let mut description = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            description.push_str(": ");
            description.push_str(&err.to_string());
            source = err.source();
        }
        description
    }

    fn warehouse(stage: Stage) -> impl FnOnce(anyhow::Error) -> Error {
        move |source| Error::Warehouse { stage, source }
    }
}

impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut ser = serializer.serialize_map(None)?;
        ser.serialize_entry("error", self.id())?;
        ser.serialize_entry("description", &self.describe())?;
        ser.end()
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Report {
    pub today: NaiveDate,
    pub yesterday: NaiveDate,
    /// Number of (project, service) pairs present on both days.
    pub records: usize,
    pub anomalies: usize,
    pub delivered: usize,
}

/// Runs detection once: validates the notifier, defines the aggregation view,
/// queries and materializes change rates, and delivers a message for each
/// anomaly. Stages run strictly in sequence and the first failure ends the run.
#[tracing::instrument(skip_all, fields(%invocation_date))]
pub async fn run<W: Warehouse, S: ChatSender>(
    config: &Config,
    warehouse: &W,
    sender: &S,
    invocation_date: NaiveDate,
) -> Result<Report, Error> {
    // Credentials are checked even if there turn out to be no anomalies.
    let notifier = Notifier::new(sender, &config.slack_channel_id, &config.slack_oauth_token)?;

    view::define(warehouse, config)
        .await
        .map_err(Error::warehouse(Stage::DefineView))?;

    let days = ComparisonDays::relative_to(invocation_date);
    let mut cursor = change_rate::query(warehouse, config, days)
        .await
        .map_err(Error::warehouse(Stage::QueryChangeRate))?;

    let records = record::materialize(&mut cursor)
        .await
        .map_err(Error::warehouse(Stage::Materialize))?;

    summary::print_table(
        &format!("Change rates of {} against {}", days.today, days.yesterday),
        &records,
        config.threshold,
    );

    let anomalies = classify::anomalies(&records, config.threshold);
    let delivered = notifier.deliver(&anomalies).await?;

    let report = Report {
        today: days.today,
        yesterday: days.yesterday,
        records: records.len(),
        anomalies: anomalies.len(),
        delivered,
    };
    tracing::info!(?report, "finished cost anomaly detection");
    Ok(report)
}

/// Resolves `args` and runs detection against BigQuery and Slack for the current UTC date.
pub async fn invoke(args: &Args, http: &reqwest::Client) -> Result<Report, Error> {
    let config = args.resolve(http).await?;
    tracing::debug!(?config, "resolved configuration");

    let sender = if config.dry_run {
        Sender::DryRun
    } else {
        Sender::Slack(Slack::new(http.clone(), config.slack_endpoint.clone()))
    };
    let warehouse = BigQuery::connect(http.clone(), &config)
        .await
        .map_err(Error::warehouse(Stage::Connect))?;

    run(&config, &warehouse, &sender, Utc::now().date_naive()).await
}
