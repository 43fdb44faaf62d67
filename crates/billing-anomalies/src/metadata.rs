//! Lookups against the GCE metadata server, which is reachable from Cloud
//! Functions, Cloud Run and Compute Engine workloads.
use anyhow::Context;

const FLAVOR_HEADER: &str = "Metadata-Flavor";
const FLAVOR: &str = "Google";

/// Returns the id of the project the workload runs in.
pub async fn project_id(http: &reqwest::Client, endpoint: &url::Url) -> anyhow::Result<String> {
    let url = endpoint.join("project/project-id")?;
    let body = http
        .get(url)
        .header(FLAVOR_HEADER, FLAVOR)
        .send()
        .await
        .context("requesting project id from metadata server")?
        .error_for_status()?
        .text()
        .await?;

    let project_id = body.trim();
    if project_id.is_empty() {
        anyhow::bail!("metadata server returned an empty project id");
    }
    Ok(project_id.to_string())
}

/// Returns an OAuth access token of the workload's default service account.
pub async fn access_token(http: &reqwest::Client, endpoint: &url::Url) -> anyhow::Result<String> {
    #[derive(serde::Deserialize)]
    struct Response {
        access_token: String,
    }
    let url = endpoint.join("instance/service-accounts/default/token")?;
    let Response { access_token } = http
        .get(url)
        .header(FLAVOR_HEADER, FLAVOR)
        .send()
        .await
        .context("requesting access token from metadata server")?
        .error_for_status()?
        .json()
        .await
        .context("decoding metadata server token response")?;

    Ok(access_token)
}

/// Serves a metadata server which reports `project` (possibly empty), and
/// which rejects requests lacking the metadata flavor header.
#[cfg(test)]
pub(crate) async fn serve_fake(project: &'static str) -> url::Url {
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;

    fn flavored(headers: &HeaderMap) -> bool {
        headers.get(FLAVOR_HEADER).and_then(|v| v.to_str().ok()) == Some(FLAVOR)
    }

    let app = axum::Router::new()
        .route(
            "/computeMetadata/v1/project/project-id",
            axum::routing::get(move |headers: HeaderMap| async move {
                if flavored(&headers) {
                    project.into_response()
                } else {
                    StatusCode::FORBIDDEN.into_response()
                }
            }),
        )
        .route(
            "/computeMetadata/v1/instance/service-accounts/default/token",
            axum::routing::get(|headers: HeaderMap| async move {
                if flavored(&headers) {
                    axum::Json(serde_json::json!({
                        "access_token": "ya29.metadata",
                        "expires_in": 3599,
                        "token_type": "Bearer",
                    }))
                    .into_response()
                } else {
                    StatusCode::FORBIDDEN.into_response()
                }
            }),
        );
    crate::serve_fake(app, "/computeMetadata/v1/").await
}
