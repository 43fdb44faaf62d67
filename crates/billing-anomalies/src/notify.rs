use crate::{record::two_places, CostRecord};

/// Posts plain-text messages to a chat channel.
pub trait ChatSender: std::fmt::Debug + Send + Sync {
    fn post<'s>(
        &'s self,
        credential: &'s str,
        channel: &'s str,
        text: &'s str,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send + 's;
}

#[derive(Debug)]
pub enum Sender {
    /// Messages are logged rather than posted.
    DryRun,
    Slack(crate::slack::Slack),
}

impl ChatSender for Sender {
    async fn post<'s>(
        &'s self,
        credential: &'s str,
        channel: &'s str,
        text: &'s str,
    ) -> anyhow::Result<()> {
        match self {
            Sender::DryRun => {
                tracing::warn!(%channel, %text, "skipping chat message (dry run)");
                Ok(())
            }
            Sender::Slack(slack) => slack.post(credential, channel, text).await,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum NotifierError {
    #[error("chat channel id must not be empty")]
    EmptyChannel,
    #[error("chat credential must not be empty")]
    EmptyCredential,
}

/// A message which failed to deliver. Messages before it were delivered,
/// and messages after it were not attempted.
#[derive(Debug, thiserror::Error)]
#[error("failed to deliver anomaly of service {service:?} in project {project:?} (after {delivered} delivered)")]
pub struct DeliveryError {
    pub project: String,
    pub service: String,
    pub delivered: usize,
    #[source]
    pub source: anyhow::Error,
}

/// Delivers anomaly messages to a single channel, one message per anomaly.
#[derive(Debug)]
pub struct Notifier<'s, S> {
    sender: &'s S,
    channel: &'s str,
    credential: &'s str,
}

impl<'s, S: ChatSender> Notifier<'s, S> {
    /// Returns an error if the channel or credential is empty.
    pub fn new(sender: &'s S, channel: &'s str, credential: &'s str) -> Result<Self, NotifierError> {
        if channel.trim().is_empty() {
            return Err(NotifierError::EmptyChannel);
        }
        if credential.trim().is_empty() {
            return Err(NotifierError::EmptyCredential);
        }
        Ok(Self {
            sender,
            channel,
            credential,
        })
    }

    /// Posts one message per anomaly, in order, stopping at the first failure.
    /// Returns the number of messages delivered.
    pub async fn deliver(&self, anomalies: &[&CostRecord]) -> Result<usize, DeliveryError> {
        for (delivered, record) in anomalies.iter().enumerate() {
            let text = message(record);

            if let Err(source) = self.sender.post(self.credential, self.channel, &text).await {
                return Err(DeliveryError {
                    project: record.project.clone(),
                    service: record.service.clone(),
                    delivered,
                    source,
                });
            }
            tracing::info!(
                project = %record.project,
                service = %record.service,
                change_rate = ?record.change_rate,
                "delivered cost anomaly"
            );
        }
        Ok(anomalies.len())
    }
}

/// Single-line description of an anomalous record.
pub fn message(record: &CostRecord) -> String {
    let line = format!(
        "cost anomaly detected -> {:<40} | {:<45} | {:<25} | {:<25} | {}",
        format!("project: {}", record.project),
        format!("service: {}", record.service),
        format!("yesterday cost: {}", two_places(record.yesterday_cost)),
        format!("today cost: {}", two_places(record.today_cost)),
        format!("change rate: {}", two_places(record.change_rate)),
    );
    line.replace('\n', " ")
}
