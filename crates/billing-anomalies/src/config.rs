use crate::metadata;
use derivative::Derivative;

/// Settings of a detection run. Every setting may be given as a flag or
/// through the environment variable used by existing deployments.
#[derive(Derivative, Clone, clap::Args)]
#[derivative(Debug)]
#[clap(rename_all = "kebab-case")]
pub struct Args {
    /// Google Cloud project which holds the billing export dataset.
    /// Resolved from the GCE metadata server if unset.
    #[clap(long, env = "PROJECT_ID")]
    pub project_id: Option<String>,
    /// Billing account whose export table is read.
    #[clap(long, env = "BILLING_ACCOUNT_ID")]
    pub billing_account_id: Option<String>,
    /// Dataset holding the billing export table and the aggregation view.
    #[clap(long, env = "DATASET_ID")]
    pub dataset_id: Option<String>,
    /// Name of the aggregation table function to (re)define.
    #[clap(long, env = "PARTITION_TABLE_NAME")]
    pub view_name: Option<String>,
    /// Slack bot token used to post notifications.
    #[derivative(Debug = "ignore")]
    #[clap(long, env = "SLACK_OAUTH_TOKEN", hide_env_values = true)]
    pub slack_oauth_token: Option<String>,
    /// Slack channel which receives notifications.
    #[clap(long, env = "SLACK_CHANNEL_ID")]
    pub slack_channel_id: Option<String>,
    /// Day-over-day change, in percent, above which a service's cost is reported.
    #[clap(long, env = "DETECT_ABNORMALY_PERCENTAGE", allow_hyphen_values = true)]
    pub threshold: Option<String>,
    /// OAuth access token for BigQuery. Fetched from the metadata server if unset.
    #[derivative(Debug = "ignore")]
    #[clap(long, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,
    /// Base URL of the BigQuery REST API.
    #[clap(
        long,
        env = "BIGQUERY_ENDPOINT",
        default_value = "https://bigquery.googleapis.com/bigquery/v2/"
    )]
    pub bigquery_endpoint: url::Url,
    /// Base URL of the Slack Web API.
    #[clap(long, env = "SLACK_ENDPOINT", default_value = "https://slack.com/api/")]
    pub slack_endpoint: url::Url,
    /// Base URL of the GCE metadata server.
    #[clap(
        long,
        env = "METADATA_ENDPOINT",
        default_value = "http://metadata.google.internal/computeMetadata/v1/"
    )]
    pub metadata_endpoint: url::Url,
    /// Log anomaly messages instead of posting them to Slack.
    #[clap(long)]
    pub dry_run: bool,
}

/// Validated, immutable settings of a single run.
#[derive(Derivative, Clone, PartialEq)]
#[derivative(Debug)]
pub struct Config {
    pub project_id: String,
    pub billing_account_id: String,
    pub dataset_id: String,
    pub view_name: String,
    #[derivative(Debug = "ignore")]
    pub slack_oauth_token: String,
    pub slack_channel_id: String,
    pub threshold: f64,
    #[derivative(Debug = "ignore")]
    pub access_token: Option<String>,
    pub bigquery_endpoint: url::Url,
    pub slack_endpoint: url::Url,
    pub metadata_endpoint: url::Url,
    pub dry_run: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} must be a number, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("{name} contains characters which are not valid in a BigQuery identifier: {value:?}")]
    InvalidIdentifier { name: &'static str, value: String },
    #[error("PROJECT_ID is not set, and it could not be resolved from the metadata server")]
    ProjectLookup(#[source] anyhow::Error),
}

impl Args {
    /// Resolves the project from the metadata server if it wasn't given,
    /// and then validates all settings into a `Config`.
    pub async fn resolve(&self, http: &reqwest::Client) -> Result<Config, ConfigError> {
        let project_id = match non_empty(&self.project_id) {
            Some(project_id) => project_id.to_string(),
            None => {
                tracing::info!("PROJECT_ID is not set, resolving it from the metadata server");
                metadata::project_id(http, &self.metadata_endpoint)
                    .await
                    .map_err(ConfigError::ProjectLookup)?
            }
        };
        self.validate(project_id)
    }

    /// Validates settings into a `Config` using the given project.
    pub fn validate(&self, project_id: String) -> Result<Config, ConfigError> {
        let project_id = identifier("PROJECT_ID", &project_id, &['-', '.', ':'])?;
        let billing_account_id = identifier(
            "BILLING_ACCOUNT_ID",
            required("BILLING_ACCOUNT_ID", &self.billing_account_id)?,
            &['-'],
        )?;
        let dataset_id = identifier("DATASET_ID", required("DATASET_ID", &self.dataset_id)?, &[])?;
        let view_name = identifier(
            "PARTITION_TABLE_NAME",
            required("PARTITION_TABLE_NAME", &self.view_name)?,
            &[],
        )?;
        let slack_oauth_token = required("SLACK_OAUTH_TOKEN", &self.slack_oauth_token)?;
        let slack_channel_id = required("SLACK_CHANNEL_ID", &self.slack_channel_id)?;
        let threshold = parse_threshold(required(
            "DETECT_ABNORMALY_PERCENTAGE",
            &self.threshold,
        )?)?;

        Ok(Config {
            project_id,
            billing_account_id,
            dataset_id,
            view_name,
            slack_oauth_token: slack_oauth_token.to_string(),
            slack_channel_id: slack_channel_id.to_string(),
            threshold,
            access_token: non_empty(&self.access_token).map(str::to_string),
            bigquery_endpoint: self.bigquery_endpoint.clone(),
            slack_endpoint: self.slack_endpoint.clone(),
            metadata_endpoint: self.metadata_endpoint.clone(),
            dry_run: self.dry_run,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required<'a>(name: &'static str, value: &'a Option<String>) -> Result<&'a str, ConfigError> {
    non_empty(value).ok_or(ConfigError::Missing(name))
}

// Identifiers are interpolated into backtick-quoted SQL references.
fn identifier(name: &'static str, value: &str, extra: &[char]) -> Result<String, ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Missing(name));
    }
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || extra.contains(&c))
    {
        Ok(value.to_string())
    } else {
        Err(ConfigError::InvalidIdentifier {
            name,
            value: value.to_string(),
        })
    }
}

fn parse_threshold(value: &str) -> Result<f64, ConfigError> {
    match value.parse::<f64>() {
        Ok(threshold) if !threshold.is_nan() => Ok(threshold),
        _ => Err(ConfigError::InvalidNumber {
            name: "DETECT_ABNORMALY_PERCENTAGE",
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::Parser;

    #[derive(Debug, clap::Parser)]
    #[clap(args_override_self = true)]
    struct TestCli {
        #[clap(flatten)]
        args: Args,
    }

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec![
            "test",
            "--billing-account-id",
            "0A1B2C-3D4E5F-6A7B8C",
            "--dataset-id",
            "billing_export",
            "--view-name",
            "daily_cost",
            "--slack-oauth-token",
            "xoxb-secret",
            "--slack-channel-id",
            "C0123",
            "--threshold",
            "40",
        ];
        argv.extend_from_slice(extra);
        TestCli::try_parse_from(argv).unwrap().args
    }

    #[test]
    fn valid_args_produce_config() {
        let config = args(&[]).validate("my-project".to_string()).unwrap();

        assert_eq!(config.project_id, "my-project");
        assert_eq!(config.billing_account_id, "0A1B2C-3D4E5F-6A7B8C");
        assert_eq!(config.view_name, "daily_cost");
        assert_eq!(config.threshold, 40.0);
        assert_eq!(config.access_token, None);
        assert_eq!(
            config.slack_endpoint.as_str(),
            "https://slack.com/api/"
        );
        assert!(!config.dry_run);
    }

    #[test]
    fn negative_threshold_is_accepted() {
        let config = args(&["--threshold", "-12.5"])
            .validate("my-project".to_string())
            .unwrap();
        assert_eq!(config.threshold, -12.5);
    }

    #[test]
    fn non_numeric_threshold_is_rejected() {
        for value in ["forty", "NaN", "40%"] {
            let err = args(&["--threshold", value])
                .validate("my-project".to_string())
                .unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidNumber { name: "DETECT_ABNORMALY_PERCENTAGE", .. }),
                "{value}: {err:?}"
            );
        }
    }

    #[test]
    fn empty_settings_are_missing() {
        let mut a = args(&[]);
        a.slack_channel_id = Some("  ".to_string());
        let err = a.validate("my-project".to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SLACK_CHANNEL_ID")));

        let mut a = args(&[]);
        a.dataset_id = None;
        let err = a.validate("my-project".to_string()).unwrap_err();
        assert_eq!(err.to_string(), "DATASET_ID must be set");

        let err = args(&[]).validate(String::new()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("PROJECT_ID")));
    }

    #[test]
    fn identifiers_cannot_escape_quoting() {
        let err = args(&["--view-name", "daily`; DROP TABLE x; --"])
            .validate("my-project".to_string())
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidIdentifier { name: "PARTITION_TABLE_NAME", .. }
        ));

        // Dashes are valid in project ids, but not in dataset names.
        assert!(args(&["--dataset-id", "billing-export"])
            .validate("my-project".to_string())
            .is_err());
    }

    #[tokio::test]
    async fn unset_project_is_resolved_from_metadata() {
        let mut a = args(&[]);
        a.project_id = None;
        a.metadata_endpoint = metadata::serve_fake("acme-from-metadata").await;

        let config = a.resolve(&reqwest::Client::new()).await.unwrap();
        assert_eq!(config.project_id, "acme-from-metadata");

        // A configured project is used without consulting the server.
        a.project_id = Some("my-project".to_string());
        a.metadata_endpoint = url::Url::parse("http://127.0.0.1:1/computeMetadata/v1/").unwrap();
        let config = a.resolve(&reqwest::Client::new()).await.unwrap();
        assert_eq!(config.project_id, "my-project");
    }

    #[tokio::test]
    async fn failed_project_lookup_is_a_config_error() {
        let http = reqwest::Client::new();
        let mut a = args(&[]);
        a.project_id = None;

        a.metadata_endpoint = metadata::serve_fake("").await;
        let err = a.resolve(&http).await.unwrap_err();
        assert!(matches!(err, ConfigError::ProjectLookup(_)), "{err:?}");

        a.metadata_endpoint = a.metadata_endpoint.join("../../missing/").unwrap();
        let err = a.resolve(&http).await.unwrap_err();
        assert!(matches!(err, ConfigError::ProjectLookup(_)), "{err:?}");
        assert_eq!(
            err.to_string(),
            "PROJECT_ID is not set, and it could not be resolved from the metadata server"
        );
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let a = args(&["--access-token", "ya29.secret"]);
        let config = a.validate("my-project".to_string()).unwrap();

        for debug in [format!("{a:?}"), format!("{config:?}")] {
            assert!(!debug.contains("xoxb-secret"), "{debug}");
            assert!(!debug.contains("ya29.secret"), "{debug}");
            assert!(debug.contains("C0123"), "{debug}");
        }
    }
}

#[cfg(test)]
pub(crate) fn fixture() -> Config {
    Config {
        project_id: "acme-billing".to_string(),
        billing_account_id: "0A1B2C-3D4E5F-6A7B8C".to_string(),
        dataset_id: "billing_export".to_string(),
        view_name: "daily_cost".to_string(),
        slack_oauth_token: "xoxb-test".to_string(),
        slack_channel_id: "C0123".to_string(),
        threshold: 40.0,
        access_token: Some("ya29.test".to_string()),
        bigquery_endpoint: url::Url::parse("https://bigquery.googleapis.com/bigquery/v2/").unwrap(),
        slack_endpoint: url::Url::parse("https://slack.com/api/").unwrap(),
        metadata_endpoint: url::Url::parse("http://metadata.google.internal/computeMetadata/v1/")
            .unwrap(),
        dry_run: false,
    }
}
