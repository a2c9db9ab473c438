//! HTTP API for the Tably node.
//!
//! Serves the smart HTTP transfer protocol: the ref advertisement, the
//! upload-pack (fetch) and receive-pack (push) endpoints, plus health and
//! metrics. Multi-request sessions are threaded through cookies.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tably_protocol::protocol::{self, advertise_refs};
use tably_protocol::{
    ProtocolError, ReceivePackResponse, ReceivePackSession, RefUpdatePolicy, RefUpdater,
    UploadPackResponse, UploadPackSession,
};
use tably_storage::{Actor, ObjectStore, RefStore, StorageError};
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::observability::{metrics_handler, metrics_middleware, request_id_middleware, METRICS};
use crate::sessions::{SessionLimits, SessionRegistry};

/// Path the upload-pack cookie is scoped to.
pub const UPLOAD_PACK_PATH: &str = "/upload-pack";
/// Path the receive-pack cookie is scoped to.
pub const RECEIVE_PACK_PATH: &str = "/receive-pack";

const COOKIE_MAX_AGE_SECS: u64 = 24 * 60 * 60;

/// Room for ref-update lines on top of a full packfile chunk.
const REQUEST_OVERHEAD: usize = 1 << 20;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub objects: Arc<dyn ObjectStore>,
    pub refs: Arc<dyn RefStore>,
    pub policy: RefUpdatePolicy,
    /// Identity recorded in reflog entries for pushed refs.
    pub actor: Actor,
    pub max_packfile_size: usize,
    pub upload_sessions: Arc<SessionRegistry<UploadPackSession>>,
    pub receive_sessions: Arc<SessionRegistry<ReceivePackSession>>,
}

impl AppState {
    /// Creates state with empty session registries.
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        refs: Arc<dyn RefStore>,
        transfer: &TransferConfig,
        actor: Actor,
    ) -> Self {
        let limits = SessionLimits {
            ttl: transfer.session_ttl(),
            idle_timeout: transfer.session_idle(),
            max_sessions: transfer.max_sessions,
        };
        Self {
            objects,
            refs,
            policy: transfer.policy(),
            actor,
            max_packfile_size: transfer.max_packfile_size,
            upload_sessions: Arc::new(SessionRegistry::new("upload-pack", limits)),
            receive_sessions: Arc::new(SessionRegistry::new("receive-pack", limits)),
        }
    }
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ApiError {
    /// Peer mistakes are 400; failures of this node are 500.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Protocol(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Protocol(ProtocolError::Storage(_) | ProtocolError::Io(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Protocol(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::warn!(error = %self, "Rejected request");
        }
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}

/// Creates the API router.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.max_packfile_size.saturating_add(REQUEST_OVERHEAD);
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/info/refs", get(info_refs))
        .route("/info/refs/", get(info_refs))
        .route("/upload-pack", post(upload_pack))
        .route("/upload-pack/", post(upload_pack))
        .route("/receive-pack", post(receive_pack))
        .route("/receive-pack/", post(receive_pack))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestDecompressionLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": {
            "upload_pack": state.upload_sessions.len(),
            "receive_pack": state.receive_sessions.len(),
        }
    }))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

/// Advertises every ref as `<hex> <name>`.
async fn info_refs(State(state): State<AppState>) -> Result<Response, ApiError> {
    let refs = state.refs.list("")?;
    let mut body = Vec::new();
    advertise_refs(&mut body, &refs)?;
    tracing::debug!(refs = refs.len(), "Advertising refs");

    Ok((
        [
            (header::CONTENT_TYPE, protocol::UPLOAD_PACK_ADVERTISEMENT),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

/// One want/have round or one packfile chunk of a fetch.
async fn upload_pack(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let registry = &state.upload_sessions;
    let (id, session, is_new) =
        match session_cookie(&headers, protocol::UPLOAD_PACK_COOKIE).and_then(|id| {
            registry.get(&id).map(|s| (id, s))
        }) {
            Some((id, session)) => (id, session, false),
            None => {
                let (id, session) = registry.insert(UploadPackSession::new(
                    state.objects.clone(),
                    state.refs.clone(),
                    state.max_packfile_size,
                ));
                (id, session, true)
            }
        };

    let mut session = session.lock().await;
    let chunks_before = session.chunks_sent();
    let objects_before = session.objects_sent();
    let response = match session.handle(&body) {
        Ok(response) => response,
        Err(e) => return Err(discard_on_error(registry, &id, is_new, e.into())),
    };

    let chunks = session.chunks_sent() - chunks_before;
    METRICS.packfile_chunks_sent.inc_by(chunks as u64);
    METRICS
        .objects_sent
        .inc_by((session.objects_sent() - objects_before) as u64);
    if chunks_before == 0 && chunks > 0 {
        METRICS.negotiation_rounds.observe(session.rounds() as f64);
    }
    let terminal = session.is_terminal();
    tracing::debug!(
        session = %id,
        state = ?session.state(),
        rounds = session.rounds(),
        chunks = session.chunks_sent(),
        "Upload-pack request handled"
    );
    drop(session);

    let mut response = match response {
        UploadPackResponse::Acks(body) => {
            ([(header::CONTENT_TYPE, protocol::UPLOAD_PACK_RESULT)], body).into_response()
        }
        UploadPackResponse::Packfile { data, more } => (
            [
                (header::CONTENT_TYPE, protocol::PACKFILE),
                (
                    HeaderName::from_static(protocol::PACKFILE_MORE_HEADER),
                    if more { "true" } else { "false" },
                ),
            ],
            data,
        )
            .into_response(),
    };

    if terminal {
        registry.remove(&id);
        set_session_cookie(&mut response, protocol::UPLOAD_PACK_COOKIE, UPLOAD_PACK_PATH, None);
    } else {
        set_session_cookie(
            &mut response,
            protocol::UPLOAD_PACK_COOKIE,
            UPLOAD_PACK_PATH,
            Some(id),
        );
    }
    Ok(response)
}

/// Ref updates plus packfile data of a push.
async fn receive_pack(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let registry = &state.receive_sessions;
    let (id, session, is_new) =
        match session_cookie(&headers, protocol::RECEIVE_PACK_COOKIE).and_then(|id| {
            registry.get(&id).map(|s| (id, s))
        }) {
            Some((id, session)) => (id, session, false),
            None => {
                let updater = RefUpdater::new(
                    state.objects.clone(),
                    state.refs.clone(),
                    state.policy,
                    state.actor.clone(),
                );
                let (id, session) =
                    registry.insert(ReceivePackSession::new(state.objects.clone(), updater));
                (id, session, true)
            }
        };

    let mut session = session.lock().await;
    let objects_before = session.objects_received();
    let response = match session.handle(&body) {
        Ok(response) => response,
        Err(e) => return Err(discard_on_error(registry, &id, is_new, e.into())),
    };
    METRICS
        .objects_received
        .inc_by((session.objects_received() - objects_before) as u64);
    drop(session);

    let content_type = [(header::CONTENT_TYPE, protocol::RECEIVE_PACK_RESULT)];
    let response = match response {
        ReceivePackResponse::Continue(body) => {
            tracing::debug!(session = %id, "Asking for more objects");
            let mut response = (content_type, body).into_response();
            set_session_cookie(
                &mut response,
                protocol::RECEIVE_PACK_COOKIE,
                RECEIVE_PACK_PATH,
                Some(id),
            );
            response
        }
        ReceivePackResponse::Report { body, updates } => {
            for update in &updates {
                METRICS.record_ref_update(update.err_msg.as_deref());
                tracing::info!(
                    session = %id,
                    dst = %update.dst,
                    err_msg = update.err_msg.as_deref().unwrap_or(""),
                    "Ref update"
                );
            }
            registry.remove(&id);
            let mut response = (content_type, body).into_response();
            set_session_cookie(
                &mut response,
                protocol::RECEIVE_PACK_COOKIE,
                RECEIVE_PACK_PATH,
                None,
            );
            response
        }
    };
    Ok(response)
}

/// Sessions that failed on their first request, or failed on this node's
/// side, are dropped. A client mistake on a later request leaves the
/// session where it was.
fn discard_on_error<S: Send + 'static>(
    registry: &SessionRegistry<S>,
    id: &Uuid,
    is_new: bool,
    err: ApiError,
) -> ApiError {
    if is_new || err.status().is_server_error() {
        registry.remove(id);
    }
    tracing::debug!(kind = registry.kind(), session = %id, error = %err, "Session request failed");
    err
}

/// Reads a session id from the request's `Cookie` headers.
pub fn session_cookie(headers: &HeaderMap, name: &str) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

/// Sets the session cookie, or clears it when `id` is `None`.
fn set_session_cookie(response: &mut Response, name: &str, path: &str, id: Option<Uuid>) {
    let cookie = match id {
        Some(id) => format!("{name}={id}; Path={path}; Max-Age={COOKIE_MAX_AGE_SECS}; HttpOnly"),
        None => format!("{name}=; Path={path}; Max-Age=0; HttpOnly"),
    };
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
}
