//! HTTP API and the single-page UI, served with axum.
//!
//! Model and database work is synchronous, so every handler moves it onto
//! the blocking pool. The models sit behind one mutex: requests that need
//! them run one at a time.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard},
};

use axum::{
    Json,
    Router,
    extract::{
        DefaultBodyLimit,
        Multipart,
        Path,
        State,
        rejection::JsonRejection,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::{
    answer::AnswerExtractor,
    chunking::ChunkingConfig,
    doc_id::DocumentId,
    embedding::Embedder,
    error::Error,
    ingestion::ingest_upload,
    library_db::{DocumentSummary, LibraryDb},
    retrieval::{self, Hit, SearchParams},
};

/// Largest accepted request body (uploads included).
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

pub const DEFAULT_ADDR: &str = "127.0.0.1:8501";

const INDEX_HTML: &str = include_str!("web/index.html");

/// Models usable by the server.
pub trait ModelBackend: Embedder + AnswerExtractor + Send + 'static {}

impl<T: Embedder + AnswerExtractor + Send + 'static> ModelBackend for T {}

/// Shared server state.
pub struct AppState<M> {
    pub library: LibraryDb,
    pub chunking: ChunkingConfig,
    pub models: Mutex<M>,
}

impl<M> AppState<M> {
    pub fn new(library: LibraryDb, chunking: ChunkingConfig, models: M) -> Self {
        Self {
            library,
            chunking,
            models: Mutex::new(models),
        }
    }
}

type SharedState<M> = Arc<AppState<M>>;

/// An error response: JSON `{"message": ...}` with a matching status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

#[derive(Serialize)]
struct JsonError {
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        Self {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, message = %self.message, "request failed");
        }
        let body = Json(JsonError {
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::internal(format!("worker task failed: {e}")))?
        .map_err(ApiError::from)
}

fn lock_models<M>(models: &Mutex<M>) -> crate::Result<MutexGuard<'_, M>> {
    models
        .lock()
        .map_err(|_| Error::Model("model lock poisoned".to_string()))
}

/// Build the application router.
pub fn router<M: ModelBackend>(state: SharedState<M>) -> Router {
    Router::new()
        .route("/", get(index))
        .route(
            "/api/documents",
            get(list_documents::<M>).post(upload_document::<M>),
        )
        .route("/api/documents/{id}", delete(delete_document::<M>))
        .route("/api/documents/{id}/chunks", get(document_chunks::<M>))
        .route("/api/search", post(search::<M>))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Bind `addr` and serve until the process exits.
pub async fn serve<M: ModelBackend>(
    addr: SocketAddr,
    state: SharedState<M>,
) -> crate::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "serving docseek");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn list_documents<M: ModelBackend>(
    State(state): State<SharedState<M>>,
) -> ApiResult<Json<Vec<DocumentSummary>>> {
    let documents = blocking(move || state.library.list_documents()).await?;
    Ok(Json(documents.iter().map(|d| d.summary()).collect()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    document: DocumentSummary,
    replaced: bool,
    chunks: Vec<String>,
}

async fn upload_document<M: ModelBackend>(
    State(state): State<SharedState<M>>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload.pdf").to_string();
        let bytes = field.bytes().await?;
        upload = Some((filename, bytes));
        break;
    }
    let Some((filename, bytes)) = upload else {
        return Err(Error::InvalidInput(
            "multipart body has no 'file' field".to_string(),
        )
        .into());
    };

    let outcome = blocking(move || {
        let mut models = lock_models(&state.models)?;
        ingest_upload(
            &state.library,
            &mut *models,
            &filename,
            &bytes,
            &state.chunking,
            &mut |_, _| {},
        )
    })
    .await?;

    let status = if outcome.replaced {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(UploadResponse {
            document: outcome.document.summary(),
            replaced: outcome.replaced,
            chunks: outcome.chunks,
        }),
    ))
}

#[derive(Serialize)]
struct ChunkView {
    order: u32,
    text: String,
}

#[derive(Serialize)]
struct ChunksResponse {
    document: DocumentSummary,
    chunks: Vec<ChunkView>,
}

async fn document_chunks<M: ModelBackend>(
    State(state): State<SharedState<M>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ChunksResponse>> {
    let response = blocking(move || {
        let document = state.library.resolve(&id)?;
        let chunks = state
            .library
            .document_chunks(document.id.numeric)?
            .into_iter()
            .map(|(order, text)| ChunkView { order, text })
            .collect();
        Ok(ChunksResponse {
            document: document.summary(),
            chunks,
        })
    })
    .await?;
    Ok(Json(response))
}

async fn delete_document<M: ModelBackend>(
    State(state): State<SharedState<M>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    blocking(move || {
        let doc_id = DocumentId::parse_hex(&id).ok_or_else(|| {
            Error::InvalidInput(format!(
                "expected a 16-digit hex document id, got '{id}'"
            ))
        })?;
        if !state.library.delete_document(doc_id.numeric)? {
            return Err(Error::NotFound {
                kind: "document",
                name: doc_id.hex(),
            });
        }
        info!(id = %doc_id, "deleted document");
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    result_count: usize,
    results: Vec<Hit>,
}

async fn search<M: ModelBackend>(
    State(state): State<SharedState<M>>,
    payload: Result<Json<SearchParams>, JsonRejection>,
) -> ApiResult<Json<SearchResponse>> {
    let Json(params) = payload?;
    let query = params.query.clone();
    let results = blocking(move || {
        let mut models = lock_models(&state.models)?;
        retrieval::search(&params, &state.library, &mut *models)
    })
    .await?;

    Ok(Json(SearchResponse {
        query,
        result_count: results.len(),
        results,
    }))
}
