use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartError},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    errors::{DecorateError, Result},
    models::DecorationResult,
    orchestrator::{DecorationRequest, Decorator, UploadedImage},
};

#[derive(Clone)]
struct AppState {
    decorator: Arc<Decorator>,
}

impl IntoResponse for DecorateError {
    fn into_response(self) -> Response {
        let status = match &self {
            DecorateError::InvalidInput(_) | DecorateError::ValidationFailed { .. } => {
                StatusCode::BAD_REQUEST
            }
            DecorateError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            DecorateError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

pub fn router(decorator: Arc<Decorator>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/decorate", post(decorate_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { decorator })
}

pub async fn run_server(
    addr: SocketAddr,
    decorator: Arc<Decorator>,
    max_upload_bytes: usize,
) -> Result<()> {
    let app = router(decorator, max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(target: "server", %addr, "decorator server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(target: "server", "server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(target: "server", error = ?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!(target: "server", "received shutdown signal");
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn decorate_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> std::result::Result<Json<DecorationResult>, DecorateError> {
    let mut image = None;
    let mut prompt = None;

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(malformed)?;
                image = Some(UploadedImage {
                    filename,
                    content_type,
                    data,
                });
            }
            Some("prompt") => prompt = Some(field.text().await.map_err(malformed)?),
            _ => {}
        }
    }

    let image = image.ok_or_else(|| DecorateError::invalid_input("No image provided"))?;
    let result = state
        .decorator
        .decorate(DecorationRequest { image, prompt })
        .await?;

    Ok(Json(result))
}

fn malformed(err: MultipartError) -> DecorateError {
    DecorateError::invalid_input(format!("Malformed upload: {}", err.body_text()))
}
