//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method   | Path               | Description |
//! |----------|--------------------|-------------|
//! | `POST`   | `/chat`            | Answer a message (optionally within a session) |
//! | `POST`   | `/documents`       | Upload a file (multipart field `file`) |
//! | `GET`    | `/documents`       | List stored documents |
//! | `DELETE` | `/documents/{id}`  | Delete a document and its chunks |
//! | `POST`   | `/sessions`        | Start a new conversation session |
//! | `GET`    | `/health`          | Version and store reachability |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "validation_error", "message": "message must not be empty" } }
//! ```
//!
//! The code is the [`ErrorKind`] of the underlying [`RagError`]; the status
//! is derived from it (see [`status_for`]).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for browser-based chat
//! widgets.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use ragchat_core::error::{ErrorKind, RagError};
use ragchat_core::models::{ConversationTurn, DocumentSummary};
use ragchat_core::store::MetadataFilter;

use crate::assistant::{Assistant, ChatInput, ChatOutput, HealthReport};
use crate::config::Config;

type AppState = Arc<Assistant>;

/// Build the router over a ready assistant.
pub fn router(assistant: Arc<Assistant>) -> Router {
    let max_upload = assistant.config().server.max_upload_bytes;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/documents", post(handle_upload).get(handle_list_documents))
        .route("/documents/{id}", delete(handle_delete_document))
        .route("/sessions", post(handle_create_session))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(cors)
        .with_state(assistant)
}

/// Start the server on `[server].bind` and run until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let assistant = Arc::new(Assistant::from_config(config.clone()).await?);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");
    println!("ragchat listening on http://{}", bind_addr);

    axum::serve(listener, router(assistant)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// HTTP status for each error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation | ErrorKind::Config => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::EmbeddingService | ErrorKind::ModelResponseInvalid => StatusCode::BAD_GATEWAY,
        ErrorKind::StoreUnavailable | ErrorKind::ModelUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorKind::RetrievalTimeout => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let kind = err.kind();
        if err.is_upstream() {
            tracing::warn!(code = kind.as_str(), error = %err, "request failed upstream");
        }
        AppError {
            status: status_for(kind),
            code: kind.as_str(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::from(RagError::Validation(message.into()))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct HistoryItem {
    user: String,
    assistant: String,
}

#[derive(Deserialize)]
struct ChatBody {
    message: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    history: Vec<HistoryItem>,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    filter: Option<MetadataFilter>,
}

async fn handle_chat(
    State(assistant): State<AppState>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Json<ChatOutput>, AppError> {
    let Json(body) = body.map_err(|e| bad_request(e.body_text()))?;
    let input = ChatInput {
        message: body.message,
        user_id: body.user_id,
        session_id: body.session_id,
        history: body
            .history
            .into_iter()
            .map(|h| ConversationTurn::new(h.user, h.assistant))
            .collect(),
        top_k: body.top_k,
        filter: body.filter,
    };
    Ok(Json(assistant.chat(input).await?))
}

// ============ /documents ============

#[derive(Serialize)]
struct UploadResponse {
    document_id: String,
    chunk_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    superseded: Vec<String>,
}

async fn handle_upload(
    State(assistant): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| bad_request("file field has no file name"))?;
        let bytes = field.bytes().await.map_err(|e| bad_request(e.body_text()))?;

        let report = assistant.ingest_upload(&file_name, &bytes).await?;
        return Ok(Json(UploadResponse {
            document_id: report.document_id,
            chunk_count: report.chunk_count,
            superseded: report.superseded,
        }));
    }
    Err(bad_request("multipart field 'file' is required"))
}

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<DocumentSummary>,
}

async fn handle_list_documents(
    State(assistant): State<AppState>,
) -> Result<Json<DocumentListResponse>, AppError> {
    let documents = assistant.list_documents().await?;
    Ok(Json(DocumentListResponse { documents }))
}

#[derive(Serialize)]
struct DeleteResponse {
    document_id: String,
    chunks_deleted: usize,
}

async fn handle_delete_document(
    State(assistant): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let chunks_deleted = assistant.delete_document(&id).await?;
    Ok(Json(DeleteResponse {
        document_id: id,
        chunks_deleted,
    }))
}

// ============ POST /sessions ============

#[derive(Deserialize, Default)]
struct SessionBody {
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Serialize)]
struct SessionResponse {
    session_id: String,
}

async fn handle_create_session(
    State(assistant): State<AppState>,
    body: Option<Json<SessionBody>>,
) -> Json<SessionResponse> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    Json(SessionResponse {
        session_id: assistant.create_session(body.user_id.as_deref()),
    })
}

// ============ GET /health ============

async fn handle_health(State(assistant): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = assistant.health().await;
    let status = if report.status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
