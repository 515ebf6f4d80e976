use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use super::scheduler::JobRegistry;

#[derive(Clone)]
struct AppState {
    registry: Arc<JobRegistry>,
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "scheduled_jobs": state.registry.len(),
        "interval_secs": state.registry.interval().as_secs(),
    }))
}

fn router(registry: Arc<JobRegistry>) -> Router {
    let app_state = AppState { registry };

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/status", get(status))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_http_server(
    listen: &str,
    registry: Arc<JobRegistry>,
) -> Result<(), anyhow::Error> {
    let app = router(registry);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn serve(registry: Arc<JobRegistry>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(registry)).await.unwrap();
        });
        format!("http://{}", address)
    }

    #[tokio::test]
    async fn health_and_status_respond() {
        let registry = Arc::new(JobRegistry::new(Duration::from_secs(1800)));
        let base = serve(registry).await;

        let health = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert_eq!(health.text().await.unwrap(), "OK");

        let status: serde_json::Value = reqwest::get(format!("{}/status", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["scheduled_jobs"], 0);
        assert_eq!(status["interval_secs"], 1800);
    }
}
