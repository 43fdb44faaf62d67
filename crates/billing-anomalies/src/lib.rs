//! Detects day-over-day cost anomalies in a BigQuery billing export and
//! reports them to a Slack channel.
use clap::Parser;

pub mod bigquery;
pub mod change_rate;
pub mod classify;
pub mod config;
pub mod metadata;
pub mod notify;
pub mod pipeline;
pub mod record;
pub mod server;
pub mod slack;
pub mod summary;
pub mod view;
pub mod warehouse;

pub use config::{Args, Config, ConfigError};
pub use notify::{ChatSender, Notifier};
pub use pipeline::{run, Report};
pub use record::CostRecord;
pub use warehouse::{Row, RowCursor, Warehouse};

#[derive(Debug, Parser)]
#[clap(version)]
pub struct Cli {
    /// Emit logs as JSON rather than as compact text.
    #[clap(long, global = true)]
    pub log_json: bool,
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, clap::Subcommand)]
#[clap(rename_all = "kebab-case")]
pub enum Command {
    /// Run detection once for the current UTC date and exit.
    Run(Args),
    Serve(server::ServeArgs),
}

impl Cli {
    pub async fn run(&self) -> anyhow::Result<()> {
        match &self.cmd {
            Command::Run(args) => {
                let report = pipeline::invoke(args, &reqwest::Client::new()).await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
                Ok(())
            }
            Command::Serve(serve_args) => server::serve(serve_args).await,
        }
    }
}

/// Serves `app` on an ephemeral local port, returning the URL of `base_path`.
#[cfg(test)]
pub(crate) async fn serve_fake(app: axum::Router, base_path: &str) -> url::Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    url::Url::parse(&format!("http://{addr}{base_path}")).unwrap()
}
