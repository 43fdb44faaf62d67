use crate::{config::Args, pipeline};
use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

#[derive(Debug, clap::Args)]
#[clap(rename_all = "kebab-case")]
/// Serve an HTTP endpoint which runs detection once per request.
pub struct ServeArgs {
    /// Port to listen on.
    #[clap(long, env = "PORT", default_value = "8080")]
    pub port: u16,
    #[clap(flatten)]
    pub args: Args,
}

#[derive(Debug)]
pub struct App {
    pub args: Args,
    pub http: reqwest::Client,
}

pub fn router(app: Arc<App>) -> axum::Router {
    axum::Router::new()
        .route(
            "/",
            axum::routing::get(handle_invoke).post(handle_invoke),
        )
        .with_state(app)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn handle_invoke(
    State(app): State<Arc<App>>,
) -> Result<Json<pipeline::Report>, pipeline::Error> {
    let report = pipeline::invoke(&app.args, &app.http).await?;
    Ok(Json(report))
}

impl IntoResponse for pipeline::Error {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.describe(), "cost anomaly detection failed");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

pub async fn serve(ServeArgs { port, args }: &ServeArgs) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("[::]:{port}"))
        .await
        .context("failed to bind server port")?;
    tracing::info!(%port, "listening for detection requests");

    let app = Arc::new(App {
        args: args.clone(),
        http: reqwest::Client::new(),
    });

    axum::serve(listener, router(app))
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!(%error, "failed to listen for shutdown signal");
            }
        })
        .await?;

    Ok(())
}
