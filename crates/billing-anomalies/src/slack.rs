use anyhow::Context;

/// Client of the Slack Web API's `chat.postMessage` method.
#[derive(Debug, Clone)]
pub struct Slack {
    http: reqwest::Client,
    endpoint: url::Url,
}

#[derive(serde::Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(serde::Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

impl Slack {
    pub fn new(http: reqwest::Client, endpoint: url::Url) -> Self {
        Self { http, endpoint }
    }

    /// Posts `text` to `channel` as the bot identified by `token`.
    /// Slack reports most failures with a 200 status and `"ok": false`.
    pub async fn post(&self, token: &str, channel: &str, text: &str) -> anyhow::Result<()> {
        let url = self.endpoint.join("chat.postMessage")?;

        let PostMessageResponse { ok, error, ts } = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&PostMessage { channel, text })
            .send()
            .await
            .context("calling slack chat.postMessage")?
            .error_for_status()?
            .json()
            .await
            .context("decoding slack chat.postMessage response")?;

        if !ok {
            anyhow::bail!(
                "slack chat.postMessage failed: {}",
                error.as_deref().unwrap_or("unknown error")
            );
        }

        tracing::debug!(%channel, ?ts, "posted slack message");
        Ok(())
    }
}
