//! AirQuery Content Provider
//! Serves a local store to remote `content://` clients over HTTP

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::adapter::content::{
    AffectedResponse, DeleteRequest, InsertRequest, InsertResponse, QueryRequest, UpdateRequest,
};
use super::adapter::{AdapterError, ContentUri, Cursor, LocalStore};

#[derive(Clone)]
pub struct ProviderState {
    pub authority: Arc<str>,
    pub store: Arc<dyn LocalStore>,
}

impl ProviderState {
    pub fn new(authority: &str, store: Arc<dyn LocalStore>) -> Self {
        Self {
            authority: Arc::from(authority),
            store,
        }
    }

    fn check_authority(&self, authority: &str) -> Result<(), ProviderError> {
        if authority == &*self.authority {
            Ok(())
        } else {
            Err(ProviderError::new(
                StatusCode::NOT_FOUND,
                format!("unknown authority '{}'", authority),
            ))
        }
    }
}

/// Error body returned by every handler
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub struct ProviderError {
    status: StatusCode,
    message: String,
}

impl ProviderError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn from_adapter(e: AdapterError) -> Self {
        let status = match e {
            AdapterError::NotFound(_) => StatusCode::NOT_FOUND,
            AdapterError::Connection(_) | AdapterError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ProviderError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

pub fn create_router(state: ProviderState) -> Router {
    Router::new()
        .route("/content/{authority}/{table}/query", post(query_rows))
        .route("/content/{authority}/{table}/insert", post(insert_row))
        .route("/content/{authority}/{table}/update", post(update_rows))
        .route("/content/{authority}/{table}/delete", post(delete_rows))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until the task is dropped
pub async fn serve(addr: SocketAddr, state: ProviderState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, authority = %state.authority, "Content provider listening");
    axum::serve(listener, create_router(state)).await
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Run a store call on the blocking pool so a slow query never stalls the
/// executor
async fn on_store<T, F>(state: ProviderState, call: F) -> Result<T, ProviderError>
where
    T: Send + 'static,
    F: FnOnce(&dyn LocalStore) -> Result<T, ProviderError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || call(state.store.as_ref()))
        .await
        .map_err(|e| ProviderError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
}

async fn query_rows(
    State(state): State<ProviderState>,
    Path((authority, table)): Path<(String, String)>,
    Json(body): Json<QueryRequest>,
) -> Result<Json<Cursor>, ProviderError> {
    state.check_authority(&authority)?;
    let cursor = on_store(state, move |store| {
        store
            .query(
                &table,
                body.projection.as_deref(),
                body.selection.as_deref(),
                &body.selection_args,
                None,
                body.sort.as_deref(),
            )
            .map_err(ProviderError::from_adapter)
    })
    .await?;
    Ok(Json(cursor))
}

async fn insert_row(
    State(state): State<ProviderState>,
    Path((authority, table)): Path<(String, String)>,
    Json(body): Json<InsertRequest>,
) -> Result<(StatusCode, Json<InsertResponse>), ProviderError> {
    state.check_authority(&authority)?;
    let base = ContentUri::parse(&format!("content://{}/{}", authority, table))
        .map_err(|e| ProviderError::new(StatusCode::BAD_REQUEST, e.to_string()))?;

    let id = on_store(state, move |store| {
        store.insert(&table, &body.values).map_err(|e| {
            tracing::debug!(table = %table, error = %e, "Insert refused");
            ProviderError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        })
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(InsertResponse {
            uri: base.with_appended(id).to_string(),
        }),
    ))
}

async fn update_rows(
    State(state): State<ProviderState>,
    Path((authority, table)): Path<(String, String)>,
    Json(body): Json<UpdateRequest>,
) -> Result<Json<AffectedResponse>, ProviderError> {
    state.check_authority(&authority)?;
    let affected = on_store(state, move |store| {
        store
            .update(&table, &body.values, body.selection.as_deref(), &body.selection_args)
            .map_err(ProviderError::from_adapter)
    })
    .await?;
    Ok(Json(AffectedResponse { affected }))
}

async fn delete_rows(
    State(state): State<ProviderState>,
    Path((authority, table)): Path<(String, String)>,
    Json(body): Json<DeleteRequest>,
) -> Result<Json<AffectedResponse>, ProviderError> {
    state.check_authority(&authority)?;
    let affected = on_store(state, move |store| {
        store
            .delete(&table, body.selection.as_deref(), &body.selection_args)
            .map_err(ProviderError::from_adapter)
    })
    .await?;
    Ok(Json(AffectedResponse { affected }))
}
